//! Application state
//!
//! Holds all shared components. Built once by the binary and passed down;
//! nothing here is a global.

use crate::camera_client::{CameraClient, ClientOptions};
use crate::camera_status_tracker::CameraStatusTracker;
use crate::controller_registry::{
    ControllerEndpoint, ControllerId, ControllerRepository, ControllerStore, Role,
};
use crate::directory_access::FsDirectoryAccess;
use crate::error::{Error, Result};
use crate::event_log_service::{EventLogService, LogEntry};
use crate::polling_orchestrator::StatusPoller;
use crate::realtime_hub::{HubMessage, RealtimeHub};
use crate::sequence_orchestrator::{
    CheckpointRepository, FsPhotoWriter, SequenceOrchestrator, SystemClock,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Audit module tag for command failures
pub const CLI_MODULE: &str = "cli";

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// controllers.json / sequence.json live here
    pub state_dir: PathBuf,
    /// Total request timeout
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    /// Wait after stream-affecting commands before re-polling status
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub progress_tick: Duration,
    pub event_log_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: std::env::var("OBSCAM_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./.obscam")),
            http_timeout: Duration::from_secs(env_parse("OBSCAM_HTTP_TIMEOUT_SEC", 300)),
            connect_timeout: Duration::from_secs(env_parse("OBSCAM_CONNECT_TIMEOUT_SEC", 10)),
            settle_delay: Duration::from_millis(env_parse("OBSCAM_SETTLE_DELAY_MS", 2000)),
            poll_interval: Duration::from_secs(env_parse("OBSCAM_POLL_INTERVAL_SEC", 5).max(1)),
            progress_tick: Duration::from_millis(env_parse("OBSCAM_PROGRESS_TICK_MS", 500)),
            event_log_capacity: env_parse("OBSCAM_EVENT_LOG_CAPACITY", 2000) as usize,
        }
    }
}

fn env_parse(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn controllers_path(&self) -> PathBuf {
        self.state_dir.join("controllers.json")
    }

    pub fn sequence_path(&self) -> PathBuf {
        self.state_dir.join("sequence.json")
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: self.http_timeout,
            connect_timeout: self.connect_timeout,
            settle_delay: self.settle_delay,
        }
    }
}

/// Application state shared across commands
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// Controller list + role pins (persisted)
    pub controllers: Arc<ControllerStore>,
    /// Audit log (in-memory ring buffer)
    pub event_log: Arc<EventLogService>,
    pub realtime: Arc<RealtimeHub>,
    pub camera_status: Arc<CameraStatusTracker>,
    pub directories: Arc<FsDirectoryAccess>,
    pub polling: Arc<StatusPoller>,
}

impl AppState {
    /// Build every component from the configuration
    pub async fn init(config: AppConfig) -> Result<Self> {
        let known_roles: BTreeSet<Role> = [Role::cameras()].into_iter().collect();
        let controllers = Arc::new(
            ControllerStore::load(ControllerRepository::new(config.controllers_path()), known_roles)
                .await?,
        );
        let event_log = Arc::new(EventLogService::new(config.event_log_capacity));
        let realtime = Arc::new(RealtimeHub::new());
        let camera_status = Arc::new(CameraStatusTracker::new());
        let polling = Arc::new(StatusPoller::new(
            controllers.clone(),
            camera_status.clone(),
            event_log.clone(),
            realtime.clone(),
            config.client_options(),
            config.poll_interval,
        ));

        Ok(Self {
            config,
            controllers,
            event_log,
            realtime,
            camera_status,
            directories: Arc::new(FsDirectoryAccess::new()),
            polling,
        })
    }

    /// The given controller, or the active `cameras` controller
    pub async fn resolve_controller(&self, id: Option<ControllerId>) -> Result<ControllerEndpoint> {
        match id {
            Some(id) => self
                .controllers
                .get(&id)
                .await
                .ok_or_else(|| Error::NotFound(format!("controller {}", id))),
            None => self
                .controllers
                .resolve(&Role::cameras())
                .await
                .ok_or_else(|| Error::NotFound("no controller declares the cameras role".to_string())),
        }
    }

    pub fn client_for(&self, endpoint: &ControllerEndpoint) -> Result<CameraClient> {
        CameraClient::for_endpoint(endpoint, self.config.client_options())
    }

    pub fn checkpoints(&self) -> CheckpointRepository {
        CheckpointRepository::new(self.config.sequence_path())
    }

    /// Audit a failed command and publish the entry
    pub async fn record_failure(&self, command: &str, error: impl std::fmt::Display) -> LogEntry {
        tracing::error!(command = command, error = %error, "Command failed");
        let entry = self
            .event_log
            .error(CLI_MODULE, format!("{} failed: {}", command, error))
            .await;
        self.realtime.broadcast(HubMessage::LogEntry(entry.clone()));
        entry
    }

    /// Capture orchestrator bound to one controller
    pub fn orchestrator_for(&self, endpoint: &ControllerEndpoint) -> Result<SequenceOrchestrator> {
        let client = self.client_for(endpoint)?;
        Ok(SequenceOrchestrator::new(
            Arc::new(client),
            self.directories.clone(),
            Arc::new(FsPhotoWriter),
            Arc::new(SystemClock),
            self.event_log.clone(),
            self.realtime.clone(),
        )
        .with_checkpoints(self.checkpoints())
        .with_progress_tick(self.config.progress_tick))
    }
}
