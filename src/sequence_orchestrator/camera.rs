//! Remote capture calls a sequence needs

use crate::camera_client::CameraClient;
use crate::error::Result;
use async_trait::async_trait;

/// Camera side of a capture run
#[async_trait]
pub trait SequenceCamera: Send + Sync {
    /// One photo (time-lapse mode)
    async fn capture_snapshot(&self) -> Result<Vec<u8>>;

    /// `count` photos in one call (batch mode); `None` = photo not delivered
    async fn capture_batch(&self, count: u32) -> Result<Vec<Option<String>>>;
}

#[async_trait]
impl SequenceCamera for CameraClient {
    async fn capture_snapshot(&self) -> Result<Vec<u8>> {
        CameraClient::capture_snapshot(self).await
    }

    async fn capture_batch(&self, count: u32) -> Result<Vec<Option<String>>> {
        self.capture_sequence_batch(count).await
    }
}
