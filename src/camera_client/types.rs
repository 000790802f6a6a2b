//! Camera service wire types
//!
//! Field names follow the service's snake_case JSON. The status payload is
//! also accepted in the camelCase spelling older service builds emit.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::exposure::{micros_to_seconds, seconds_to_micros};

/// Live state of one camera feed, as last reported by `/status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(
        default,
        rename = "last_snapshot",
        alias = "lastSnapshot",
        deserialize_with = "deserialize_optional_timestamp"
    )]
    pub last_snapshot_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fault: Option<String>,
}

/// Sensor block of the status payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Primary (weather) camera feed
    #[serde(default, alias = "weatherCam")]
    pub weather_cam: CameraState,
    /// Secondary (meteor) camera feed
    #[serde(default, alias = "meteorCam")]
    pub meteor_cam: CameraState,
}

/// Alert raised by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub ts: Option<String>,
}

/// `GET /status` response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub sensors: SensorReadings,
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub alerts: Vec<Alert>,
}

/// Generic `{success, message}` acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Camera settings update. Exposures are in seconds here and in whole
/// microseconds on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraSettings {
    pub gain: Option<i64>,
    pub photo_exposure_seconds: Option<f64>,
    pub video_exposure_seconds: Option<f64>,
    pub image_format: Option<String>,
    pub wb_r: Option<i64>,
    pub wb_b: Option<i64>,
}

impl CameraSettings {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether applying these settings makes the service restart its stream
    pub fn affects_stream(&self) -> bool {
        self.gain.is_some()
            || self.video_exposure_seconds.is_some()
            || self.image_format.is_some()
            || self.wb_r.is_some()
            || self.wb_b.is_some()
    }

    pub(crate) fn to_wire(&self) -> SettingsBody {
        SettingsBody {
            gain: self.gain,
            photo_exposure: self.photo_exposure_seconds.map(seconds_to_micros),
            video_exposure: self.video_exposure_seconds.map(seconds_to_micros),
            image_format: self.image_format.clone(),
            wb_r: self.wb_r,
            wb_b: self.wb_b,
        }
    }
}

/// `POST /camera/settings` body
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SettingsBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_exposure: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_exposure: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wb_r: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wb_b: Option<i64>,
}

/// Values echoed back after a settings update (service builds that answer
/// with an empty body produce the default)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsAck {
    pub gain: Option<i64>,
    pub exposure_seconds: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SettingsAckWire {
    #[serde(default)]
    pub gain: Option<i64>,
    /// Photo exposure in microseconds
    #[serde(default)]
    pub exposure: Option<u64>,
}

impl From<SettingsAckWire> for SettingsAck {
    fn from(wire: SettingsAckWire) -> Self {
        Self {
            gain: wire.gain,
            exposure_seconds: wire.exposure.map(micros_to_seconds),
        }
    }
}

/// Output file format for sequence captures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Jpeg,
    Png,
    Tiff,
}

impl FileFormat {
    /// Wire / config name
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Jpeg => "jpeg",
            FileFormat::Png => "png",
            FileFormat::Tiff => "tiff",
        }
    }

    /// File name extension
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Jpeg => "jpg",
            FileFormat::Png => "png",
            FileFormat::Tiff => "tiff",
        }
    }
}

impl std::str::FromStr for FileFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(FileFormat::Jpeg),
            "png" => Ok(FileFormat::Png),
            "tiff" | "tif" => Ok(FileFormat::Tiff),
            other => Err(crate::Error::Validation(format!(
                "unsupported file format: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `POST /camera/sequence/start` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStartRequest {
    pub save_path: String,
    pub count: u32,
    pub file_format: FileFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
}

/// `POST /camera/sequence/start` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStartAck {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub save_path: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    /// Echoed verbatim; older service builds use upper-case names
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub interval: Option<f64>,
}

/// `GET /camera/sequence/status` response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSequenceStatus {
    pub active: bool,
    #[serde(default)]
    pub current_count: u32,
    #[serde(default)]
    pub total_count: u32,
    #[serde(default)]
    pub save_path: Option<String>,
    /// Echoed verbatim; older service builds use upper-case names
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub interval: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchCaptureRequest {
    pub count: u32,
}

/// `POST /camera/sequence/capture` response
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchCaptureResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub photos: Vec<Option<String>>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool {
    true
}

fn deserialize_null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 timestamps and naive ISO 8601 ones (read as UTC)
fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", s))),
    }
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
