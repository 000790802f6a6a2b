//! Photo payload validation and file output
//!
//! Payloads are written verbatim. Validation is signature sniffing only.

use crate::camera_client::FileFormat;
use crate::directory_access::DirectoryLease;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const TIFF_LE: [u8; 4] = [b'I', b'I', 0x2A, 0x00];
const TIFF_BE: [u8; 4] = [b'M', b'M', 0x00, 0x2A];

/// Writes one photo into a leased directory
#[async_trait]
pub trait PhotoWriter: Send + Sync {
    async fn write(&self, lease: &DirectoryLease, file_name: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// tokio::fs writer; never overwrites an existing file
#[derive(Debug, Clone, Copy, Default)]
pub struct FsPhotoWriter;

#[async_trait]
impl PhotoWriter for FsPhotoWriter {
    async fn write(&self, lease: &DirectoryLease, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = lease.join(file_name);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        tracing::debug!(path = %path.display(), size = bytes.len(), "Photo written");
        Ok(path)
    }
}

/// Image format from the leading bytes
pub fn sniff_image_format(bytes: &[u8]) -> Option<FileFormat> {
    if bytes.starts_with(&[0xFF, 0xD8]) {
        Some(FileFormat::Jpeg)
    } else if bytes.starts_with(&PNG_MAGIC) {
        Some(FileFormat::Png)
    } else if bytes.starts_with(&TIFF_LE) || bytes.starts_with(&TIFF_BE) {
        Some(FileFormat::Tiff)
    } else {
        None
    }
}

/// Decode a batch payload (plain base64 or a `data:` URI)
pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let data = match payload.find("base64,") {
        Some(pos) if payload.starts_with("data:") => &payload[pos + "base64,".len()..],
        _ => payload,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Decode(format!("invalid base64 payload: {}", e)))
}

/// Check a payload is an image; returns its format
pub fn validate_image(bytes: &[u8]) -> Result<FileFormat> {
    if bytes.is_empty() {
        return Err(Error::Decode("empty image payload".to_string()));
    }
    sniff_image_format(bytes).ok_or_else(|| {
        Error::Decode(format!(
            "unrecognized image signature ({} bytes)",
            bytes.len()
        ))
    })
}
