//! PollingOrchestrator - Periodic Status Polling
//!
//! ## Responsibilities
//!
//! - Poll `/status` of every controller declaring the cameras role
//! - Controllers are polled concurrently, one request each per tick
//! - Feed the CameraStatusTracker, broadcast snapshots, audit transitions
//!
//! Polling is best-effort: a failed poll marks the controller unreachable
//! and is otherwise only logged at debug level.

use crate::camera_client::{CameraClient, ClientOptions, StatusSnapshot};
use crate::camera_status_tracker::{CameraStatusEvent, CameraStatusTracker, FeedTransition};
use crate::controller_registry::{ControllerEndpoint, ControllerId, ControllerStore, Role};
use crate::error::Result;
use crate::event_log_service::EventLogService;
use crate::realtime_hub::{CameraStatusMessage, HubMessage, RealtimeHub};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Audit module tag
const MODULE: &str = "poller";

/// Result of polling one controller
#[derive(Debug, Clone)]
pub struct ControllerPoll {
    pub controller_id: ControllerId,
    pub reachable: bool,
    pub transitions: Vec<FeedTransition>,
}

/// StatusPoller instance
pub struct StatusPoller {
    store: Arc<ControllerStore>,
    tracker: Arc<CameraStatusTracker>,
    event_log: Arc<EventLogService>,
    realtime_hub: Arc<RealtimeHub>,
    client_options: ClientOptions,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatusPoller {
    /// Create new StatusPoller
    pub fn new(
        store: Arc<ControllerStore>,
        tracker: Arc<CameraStatusTracker>,
        event_log: Arc<EventLogService>,
        realtime_hub: Arc<RealtimeHub>,
        client_options: ClientOptions,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            tracker,
            event_log,
            realtime_hub,
            client_options,
            poll_interval,
            running: Arc::new(RwLock::new(false)),
            task: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Start polling loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Status polling already running");
                return;
            }
            *running = true;
        }

        tracing::info!(interval_secs = self.poll_interval.as_secs_f64(), "Starting status poller");

        let store = self.store.clone();
        let tracker = self.tracker.clone();
        let event_log = self.event_log.clone();
        let realtime_hub = self.realtime_hub.clone();
        let client_options = self.client_options.clone();
        let poll_interval = self.poll_interval;
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            let mut interval = interval(poll_interval);

            loop {
                interval.tick().await;

                if !*running.read().await {
                    break;
                }

                Self::poll_all(&store, &tracker, &event_log, &realtime_hub, &client_options).await;
            }

            tracing::info!("Status poller stopped");
        });

        if let Some(previous) = self.task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Stop polling loop; an in-flight poll is abandoned
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        tracing::info!("Stopping status poller");
    }

    /// Poll every cameras controller once
    pub async fn poll_once(&self) -> Vec<ControllerPoll> {
        Self::poll_all(
            &self.store,
            &self.tracker,
            &self.event_log,
            &self.realtime_hub,
            &self.client_options,
        )
        .await
    }

    async fn poll_all(
        store: &ControllerStore,
        tracker: &CameraStatusTracker,
        event_log: &EventLogService,
        realtime_hub: &RealtimeHub,
        client_options: &ClientOptions,
    ) -> Vec<ControllerPoll> {
        let controllers = store.with_role(&Role::cameras()).await;
        let polls = controllers.iter().map(|controller| async move {
            let result = Self::fetch(controller, client_options).await;
            Self::record(controller, result, tracker, event_log, realtime_hub).await
        });
        join_all(polls).await
    }

    async fn fetch(controller: &ControllerEndpoint, client_options: &ClientOptions) -> Result<StatusSnapshot> {
        let client = CameraClient::for_endpoint(controller, client_options.clone())?;
        client.fetch_status().await
    }

    async fn record(
        controller: &ControllerEndpoint,
        result: Result<StatusSnapshot>,
        tracker: &CameraStatusTracker,
        event_log: &EventLogService,
        realtime_hub: &RealtimeHub,
    ) -> ControllerPoll {
        let (reachable, transitions) = match &result {
            Ok(snapshot) => (true, tracker.apply(&controller.id, snapshot).await),
            Err(e) => {
                tracing::debug!(controller_id = %controller.id, error = %e, "Status poll failed");
                (false, tracker.mark_unreachable(&controller.id, &e.to_string()).await)
            }
        };

        for transition in &transitions {
            let text = format!(
                "{} {} camera connection {}",
                controller.name,
                transition.feed.as_str(),
                match transition.event {
                    CameraStatusEvent::Lost => "lost",
                    CameraStatusEvent::Recovered => "recovered",
                }
            );
            let entry = match transition.event {
                CameraStatusEvent::Lost => event_log.warn(MODULE, text).await,
                CameraStatusEvent::Recovered => event_log.info(MODULE, text).await,
            };
            realtime_hub.broadcast(HubMessage::LogEntry(entry));
        }

        if let Some(state) = tracker.get(&controller.id).await {
            realtime_hub.broadcast(HubMessage::CameraStatus(CameraStatusMessage {
                controller_id: controller.id,
                reachable,
                weather_cam: state.weather_cam,
                meteor_cam: state.meteor_cam,
                timestamp: Utc::now().to_rfc3339(),
            }));
        }

        ControllerPoll {
            controller_id: controller.id,
            reachable,
            transitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_status_tracker::{CameraConnectionStatus, CameraFeed};
    use crate::controller_registry::{ControllerRegistry, NewController};

    #[tokio::test]
    async fn test_unreachable_controller_is_lost_once() {
        let store = Arc::new(ControllerStore::in_memory(ControllerRegistry::default()));
        // Reserved port, nothing listens there
        let controller = store
            .add(NewController {
                name: "dome".to_string(),
                base_url: "127.0.0.1:9".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let tracker = Arc::new(CameraStatusTracker::new());
        let event_log = Arc::new(EventLogService::default());
        let hub = Arc::new(RealtimeHub::new());
        let mut rx = hub.subscribe();
        let poller = StatusPoller::new(
            store,
            tracker.clone(),
            event_log.clone(),
            hub,
            ClientOptions {
                timeout: Duration::from_secs(2),
                connect_timeout: Duration::from_secs(1),
                settle_delay: Duration::ZERO,
            },
            Duration::from_secs(60),
        );

        let polls = poller.poll_once().await;
        assert_eq!(polls.len(), 1);
        assert!(!polls[0].reachable);
        assert_eq!(polls[0].transitions.len(), 2);
        assert_eq!(
            tracker.get_status(&controller.id, CameraFeed::Weather).await,
            CameraConnectionStatus::Offline
        );
        assert_eq!(event_log.by_module(MODULE, 10).await.len(), 2);
        assert!(matches!(rx.recv().await.unwrap(), HubMessage::LogEntry(_)));

        // Second failure is steady state
        let polls = poller.poll_once().await;
        assert!(polls[0].transitions.is_empty());
        assert_eq!(event_log.count().await, 2);
    }

    #[tokio::test]
    async fn test_no_controllers() {
        let poller = StatusPoller::new(
            Arc::new(ControllerStore::in_memory(ControllerRegistry::default())),
            Arc::new(CameraStatusTracker::new()),
            Arc::new(EventLogService::default()),
            Arc::new(RealtimeHub::new()),
            ClientOptions::default(),
            Duration::from_secs(5),
        );
        assert!(poller.poll_once().await.is_empty());
        assert!(!poller.is_running().await);
    }

    #[tokio::test]
    async fn test_restart_replaces_polling_loop() {
        let poller = StatusPoller::new(
            Arc::new(ControllerStore::in_memory(ControllerRegistry::default())),
            Arc::new(CameraStatusTracker::new()),
            Arc::new(EventLogService::default()),
            Arc::new(RealtimeHub::new()),
            ClientOptions::default(),
            Duration::from_secs(60),
        );

        poller.start().await;
        let first = poller.task.lock().await.as_ref().unwrap().abort_handle();
        poller.stop().await;
        poller.start().await;
        assert!(poller.is_running().await);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !first.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!poller.task.lock().await.as_ref().unwrap().is_finished());

        poller.stop().await;
        assert!(!poller.is_running().await);
        assert!(poller.task.lock().await.is_none());
    }
}
