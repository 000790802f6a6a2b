//! Camera Status Tracker
//!
//! Holds the last reported state of both camera feeds of every controller
//! and detects connection lost/recovered transitions. Only transitions are
//! worth an audit entry; steady state is not.
//!
//! States are replaced wholesale from a status snapshot, never edited field
//! by field.

use crate::camera_client::{CameraState, StatusSnapshot};
use crate::controller_registry::ControllerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Camera connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraConnectionStatus {
    /// Initial state (never polled)
    Unknown,
    Online,
    Offline,
}

/// Which feed of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFeed {
    /// Primary feed
    Weather,
    /// Secondary feed
    Meteor,
}

impl CameraFeed {
    pub const ALL: [CameraFeed; 2] = [CameraFeed::Weather, CameraFeed::Meteor];

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraFeed::Weather => "weather",
            CameraFeed::Meteor => "meteor",
        }
    }
}

/// Camera status transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraStatusEvent {
    /// Feed went from Online to Offline (or first poll found it offline)
    Lost,
    /// Feed went from Offline to Online
    Recovered,
}

/// One feed's transition produced by a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedTransition {
    pub feed: CameraFeed,
    pub event: CameraStatusEvent,
}

/// Both feeds of one controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerCameras {
    /// Whether the last poll reached the controller at all
    pub reachable: bool,
    pub weather_cam: CameraState,
    pub meteor_cam: CameraState,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ControllerCameras {
    pub fn feed(&self, feed: CameraFeed) -> &CameraState {
        match feed {
            CameraFeed::Weather => &self.weather_cam,
            CameraFeed::Meteor => &self.meteor_cam,
        }
    }
}

/// Tracks camera feed states and detects transitions
pub struct CameraStatusTracker {
    /// controller_id -> both feeds
    states: RwLock<HashMap<ControllerId, ControllerCameras>>,
}

impl CameraStatusTracker {
    /// Create new tracker
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Replace both feed states from a fresh status snapshot
    pub async fn apply(
        &self,
        controller_id: &ControllerId,
        snapshot: &StatusSnapshot,
    ) -> Vec<FeedTransition> {
        let next = ControllerCameras {
            reachable: true,
            weather_cam: snapshot.sensors.weather_cam.clone(),
            meteor_cam: snapshot.sensors.meteor_cam.clone(),
            updated_at: Some(Utc::now()),
        };
        self.replace(controller_id, next).await
    }

    /// Record a controller that could not be polled: both feeds disconnected
    pub async fn mark_unreachable(
        &self,
        controller_id: &ControllerId,
        reason: &str,
    ) -> Vec<FeedTransition> {
        let previous = self.get(controller_id).await.unwrap_or_default();
        let offline = |state: &CameraState| CameraState {
            connected: false,
            streaming: false,
            last_snapshot_time: state.last_snapshot_time,
            fault: Some(reason.to_string()),
        };
        let next = ControllerCameras {
            reachable: false,
            weather_cam: offline(&previous.weather_cam),
            meteor_cam: offline(&previous.meteor_cam),
            updated_at: Some(Utc::now()),
        };
        self.replace(controller_id, next).await
    }

    async fn replace(
        &self,
        controller_id: &ControllerId,
        next: ControllerCameras,
    ) -> Vec<FeedTransition> {
        let mut states = self.states.write().await;
        let previous = states.insert(*controller_id, next.clone());

        CameraFeed::ALL
            .iter()
            .filter_map(|&feed| {
                let prev = previous
                    .as_ref()
                    .map(|p| connection_of(p.feed(feed)))
                    .unwrap_or(CameraConnectionStatus::Unknown);
                let now = connection_of(next.feed(feed));
                transition(controller_id, feed, prev, now).map(|event| FeedTransition { feed, event })
            })
            .collect()
    }

    /// Last known states of one controller
    pub async fn get(&self, controller_id: &ControllerId) -> Option<ControllerCameras> {
        self.states.read().await.get(controller_id).cloned()
    }

    /// Connection status of one feed
    pub async fn get_status(&self, controller_id: &ControllerId, feed: CameraFeed) -> CameraConnectionStatus {
        self.states
            .read()
            .await
            .get(controller_id)
            .map(|c| connection_of(c.feed(feed)))
            .unwrap_or(CameraConnectionStatus::Unknown)
    }

    /// Stop tracking a controller (e.g. removed from the registry)
    pub async fn remove(&self, controller_id: &ControllerId) {
        self.states.write().await.remove(controller_id);
    }

    pub async fn clear(&self) {
        self.states.write().await.clear();
    }
}

impl Default for CameraStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn connection_of(state: &CameraState) -> CameraConnectionStatus {
    if state.connected {
        CameraConnectionStatus::Online
    } else {
        CameraConnectionStatus::Offline
    }
}

fn transition(
    controller_id: &ControllerId,
    feed: CameraFeed,
    prev: CameraConnectionStatus,
    now: CameraConnectionStatus,
) -> Option<CameraStatusEvent> {
    use CameraConnectionStatus::*;

    match (prev, now) {
        (Online, Offline) => {
            tracing::warn!(controller_id = %controller_id, feed = feed.as_str(), "Camera connection lost");
            Some(CameraStatusEvent::Lost)
        }
        (Offline, Online) => {
            tracing::info!(controller_id = %controller_id, feed = feed.as_str(), "Camera connection recovered");
            Some(CameraStatusEvent::Recovered)
        }
        // First poll found it offline
        (Unknown, Offline) => {
            tracing::warn!(
                controller_id = %controller_id,
                feed = feed.as_str(),
                "Camera offline on first poll - marking as lost"
            );
            Some(CameraStatusEvent::Lost)
        }
        _ => None,
    }
}
