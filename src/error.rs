//! Error handling for the obscam controller client

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Base URL could not be turned into a request target
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Response carried no usable HTTP/JSON semantics
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Non-2xx status without an error body
    #[error("HTTP error {status}")]
    HttpError { status: u16 },

    /// Non-2xx status (or embedded error body) with a server message
    #[error("HTTP error {status}: {message}")]
    HttpErrorWithMessage { status: u16, message: String },

    /// Connect / timeout / DNS failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Save directory could not be acquired
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Image payload did not decode
    #[error("Decode failure: {0}")]
    Decode(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict (already running, duplicate id)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse failure classes used for reporting and sequence abort decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    ProtocolViolation,
    RemoteRejected,
    ResourceUnavailable,
    DecodeFailure,
    Local,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) => ErrorKind::Transport,
            Error::InvalidResponse(_) => ErrorKind::ProtocolViolation,
            Error::HttpError { .. } | Error::HttpErrorWithMessage { .. } => {
                ErrorKind::RemoteRejected
            }
            Error::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            Error::Decode(_) => ErrorKind::DecodeFailure,
            Error::InvalidUrl(_)
            | Error::NotFound(_)
            | Error::Validation(_)
            | Error::Conflict(_)
            | Error::Config(_)
            | Error::Serialization(_)
            | Error::Io(_) => ErrorKind::Local,
        }
    }

    /// Whether a capture sequence must stop when a remote call returns this error.
    ///
    /// Decode and local write failures are per-photo and skipped instead.
    pub fn is_fatal_for_sequence(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::RemoteRejected | ErrorKind::ProtocolViolation
        )
    }

    /// HTTP status code, if the remote answered at all
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::HttpError { status } | Error::HttpErrorWithMessage { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            return Error::InvalidUrl(e.to_string());
        }
        if e.is_decode() {
            return Error::InvalidResponse(e.to_string());
        }
        if let Some(status) = e.status() {
            return Error::HttpError {
                status: status.as_u16(),
            };
        }
        Error::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::Transport("x".into()).kind(), ErrorKind::Transport);
        assert_eq!(
            Error::HttpErrorWithMessage {
                status: 500,
                message: "boom".into()
            }
            .kind(),
            ErrorKind::RemoteRejected
        );
        assert_eq!(Error::Decode("x".into()).kind(), ErrorKind::DecodeFailure);
        assert_eq!(
            Error::InvalidResponse("x".into()).kind(),
            ErrorKind::ProtocolViolation
        );
    }

    #[test]
    fn test_sequence_fatality() {
        assert!(Error::Transport("reset".into()).is_fatal_for_sequence());
        assert!(Error::HttpError { status: 503 }.is_fatal_for_sequence());
        assert!(!Error::Decode("bad base64".into()).is_fatal_for_sequence());
        assert!(!Error::Io(std::io::Error::other("disk full")).is_fatal_for_sequence());
    }

    #[test]
    fn test_status_code() {
        assert_eq!(Error::HttpError { status: 404 }.status_code(), Some(404));
        assert_eq!(Error::Transport("x".into()).status_code(), None);
    }
}
