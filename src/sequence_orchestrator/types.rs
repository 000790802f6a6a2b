//! SequenceOrchestrator data types

use crate::camera_client::FileFormat;
use crate::error::{Error, Result};
use crate::realtime_hub::SequenceProgressMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Capture run request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRequest {
    pub save_dir: PathBuf,
    pub count: u32,
    /// 0 = batch mode (one remote call, no pacing)
    #[serde(default)]
    pub interval_seconds: f64,
    /// Per-photo exposure, used for progress estimation and file names
    #[serde(default)]
    pub exposure_seconds: f64,
    /// Gain in effect, used for file names
    #[serde(default)]
    pub gain: i64,
    #[serde(default)]
    pub file_format: FileFormat,
}

impl SequenceRequest {
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(Error::Validation("count must be at least 1".to_string()));
        }
        if Duration::try_from_secs_f64(self.interval_seconds).is_err() {
            return Err(Error::Validation(format!(
                "invalid interval: {}",
                self.interval_seconds
            )));
        }
        if !self.exposure_seconds.is_finite() || self.exposure_seconds < 0.0 {
            return Err(Error::Validation(format!(
                "invalid exposure: {}",
                self.exposure_seconds
            )));
        }
        Ok(())
    }

    pub fn is_batch(&self) -> bool {
        self.interval_seconds == 0.0
    }
}

/// Live orchestration state. `active == false` means no run is in flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureSequenceState {
    pub active: bool,
    pub current_count: u32,
    pub total_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub interval_seconds: f64,
    pub exposure_seconds: f64,
    pub save_dir: Option<PathBuf>,
    pub file_format: FileFormat,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SequenceStatus {
    Completed,
    Cancelled,
    Failed(String),
}

impl SequenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceStatus::Completed => "completed",
            SequenceStatus::Cancelled => "cancelled",
            SequenceStatus::Failed(_) => "failed",
        }
    }
}

/// A photo position that produced no file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPhoto {
    /// 1-based position in the run
    pub index: u32,
    pub reason: String,
}

/// Result of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceOutcome {
    pub status: SequenceStatus,
    pub photos_saved: u32,
    pub skipped: Vec<SkippedPhoto>,
    pub files: Vec<PathBuf>,
    /// State at the moment the run ended; the live state is back to idle
    pub final_state: CaptureSequenceState,
}

/// Time based progress estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequenceProgress {
    pub current_count: u32,
    pub total_count: u32,
    pub progress_fraction: f64,
    pub elapsed_seconds: f64,
    pub estimated_total_seconds: f64,
}

impl From<SequenceProgress> for SequenceProgressMessage {
    fn from(progress: SequenceProgress) -> Self {
        Self {
            current_count: progress.current_count,
            total_count: progress.total_count,
            progress_fraction: progress.progress_fraction,
            elapsed_seconds: progress.elapsed_seconds,
            estimated_total_seconds: progress.estimated_total_seconds,
        }
    }
}

/// Everything needed to recompute progress after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceCheckpoint {
    pub started_at: DateTime<Utc>,
    pub total_count: u32,
    pub interval_seconds: f64,
    pub exposure_seconds: f64,
    pub save_dir: PathBuf,
    pub file_format: FileFormat,
}

/// Result of `resume`
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    /// Estimated duration already elapsed; state stays idle
    Finished,
    /// Progress estimation restarted
    Restarted(SequenceProgress),
}
