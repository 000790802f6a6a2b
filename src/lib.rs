//! Observatory Camera Client Library
//!
//! Remote control of observatory camera rigs over their HTTP camera service.
//!
//! ## Architecture
//!
//! 1. FrameDemuxer - MJPEG byte stream to JPEG frames (SOI/EOI framing)
//! 2. CameraClient - Typed commands against one camera service
//! 3. ControllerRegistry - Controller list, roles, active-controller pins
//! 4. SequenceOrchestrator - Batch / time-lapse capture runs
//! 5. CameraStatusTracker - Feed states and lost/recovered transitions
//! 6. PollingOrchestrator - Periodic status polling
//! 7. EventLogService - Audit log (ring buffer)
//! 8. RealtimeHub - Snapshot distribution
//! 9. DirectoryAccess - Save location leases
//!
//! ## Design Principles
//!
//! - Writes are fire-and-forget; state only changes through a status poll
//! - Shared state lives in an explicit context (`AppState`), never globals

pub mod camera_client;
pub mod camera_status_tracker;
pub mod controller_registry;
pub mod directory_access;
pub mod error;
pub mod event_log_service;
pub mod frame_demuxer;
pub mod polling_orchestrator;
pub mod realtime_hub;
pub mod sequence_orchestrator;
pub mod state;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
