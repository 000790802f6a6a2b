//! RealtimeHub - Snapshot Distribution
//!
//! ## Responsibilities
//!
//! - Broadcast camera status, sequence progress and audit entries to the
//!   front end as plain data snapshots
//!
//! Publishing with no subscriber is not an error. Slow subscribers skip
//! messages (`RecvError::Lagged`) instead of blocking publishers.

use crate::camera_client::CameraState;
use crate::event_log_service::LogEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel capacity
const DEFAULT_CAPACITY: usize = 256;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    CameraStatus(CameraStatusMessage),
    SequenceProgress(SequenceProgressMessage),
    SequenceFinished(SequenceFinishedMessage),
    LogEntry(LogEntry),
    /// A frame came off an MJPEG stream (bytes are not broadcast)
    Frame(FrameMessage),
}

/// Both feeds of one controller after a status poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStatusMessage {
    pub controller_id: Uuid,
    pub reachable: bool,
    pub weather_cam: CameraState,
    pub meteor_cam: CameraState,
    pub timestamp: String,
}

/// Estimated sequence progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceProgressMessage {
    pub current_count: u32,
    pub total_count: u32,
    /// 0.0 ..= 1.0, time based
    pub progress_fraction: f64,
    pub elapsed_seconds: f64,
    pub estimated_total_seconds: f64,
}

/// Sequence end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceFinishedMessage {
    /// "completed", "cancelled" or "failed"
    pub status: String,
    pub photos_saved: u32,
    pub total_count: u32,
    pub skipped: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Frame arrival notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMessage {
    pub controller_id: Uuid,
    pub frame_number: u64,
    pub size: usize,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    tx: broadcast::Sender<HubMessage>,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every message published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        self.tx.subscribe()
    }

    /// Publish; returns the number of subscribers reached
    pub fn broadcast(&self, message: HubMessage) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let hub = RealtimeHub::new();
        let reached = hub.broadcast(HubMessage::Frame(FrameMessage {
            controller_id: Uuid::new_v4(),
            frame_number: 1,
            size: 10,
        }));
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives() {
        let hub = RealtimeHub::new();
        let mut rx = hub.subscribe();
        hub.broadcast(HubMessage::SequenceFinished(SequenceFinishedMessage {
            status: "completed".to_string(),
            photos_saved: 5,
            total_count: 5,
            skipped: 0,
            error: None,
        }));

        match rx.recv().await.unwrap() {
            HubMessage::SequenceFinished(msg) => assert_eq!(msg.photos_saved, 5),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_message_json_shape() {
        let msg = HubMessage::SequenceProgress(SequenceProgressMessage {
            current_count: 1,
            total_count: 4,
            progress_fraction: 0.25,
            elapsed_seconds: 2.0,
            estimated_total_seconds: 8.0,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "sequence_progress");
        assert_eq!(json["data"]["total_count"], 4);
    }
}
