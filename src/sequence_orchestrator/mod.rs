//! SequenceOrchestrator - Capture Sequence Runs
//!
//! ## Responsibilities
//!
//! - Entry guard: request validation, one run at a time, save directory lease
//! - Batch mode (`interval == 0`): one remote batch call, photos written in order
//! - Time-lapse mode (`interval > 0`): snapshot, write, sleep, repeat
//! - Time based progress estimation on a fixed tick
//! - Cooperative cancellation, checkable during captures and sleeps
//! - Checkpoint persistence so progress survives a restart
//!
//! ## Failure policy
//!
//! - Per-photo decode / write failures are recorded and skipped
//! - Transport, protocol and remote rejections end the run as `Failed`
//! - Files already written are never removed
//!
//! `currentCount` only moves when a file has been written. The state is
//! behind one mutex shared by the run loop and the progress ticker.

mod camera;
mod clock;
mod progress;
mod repository;
mod types;
mod writer;

pub use camera::SequenceCamera;
pub use clock::{Clock, SystemClock};
pub use progress::{estimated_total_seconds, photo_file_name, progress_fraction};
pub use repository::CheckpointRepository;
pub use types::*;
pub use writer::{decode_payload, sniff_image_format, validate_image, FsPhotoWriter, PhotoWriter};

use crate::directory_access::{DirectoryAccess, DirectoryLease};
use crate::error::{Error, Result};
use crate::event_log_service::{EventLogService, Severity};
use crate::realtime_hub::{HubMessage, RealtimeHub, SequenceFinishedMessage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Audit module tag
const MODULE: &str = "sequence";

/// Default progress tick
const DEFAULT_PROGRESS_TICK_MS: u64 = 500;

/// A run that passed the entry guard
struct ActiveRun {
    request: SequenceRequest,
    lease: DirectoryLease,
    cancel_rx: watch::Receiver<bool>,
}

/// Files and skips accumulated by a run
#[derive(Default)]
struct RunLedger {
    files: Vec<PathBuf>,
    skipped: Vec<SkippedPhoto>,
}

/// SequenceOrchestrator instance
#[derive(Clone)]
pub struct SequenceOrchestrator {
    camera: Arc<dyn SequenceCamera>,
    directories: Arc<dyn DirectoryAccess>,
    writer: Arc<dyn PhotoWriter>,
    clock: Arc<dyn Clock>,
    event_log: Arc<EventLogService>,
    realtime_hub: Arc<RealtimeHub>,
    checkpoints: Option<CheckpointRepository>,
    progress_tick: Duration,
    state: Arc<Mutex<CaptureSequenceState>>,
    /// Present while a run (or resumed estimate) is active
    cancel_tx: Arc<Mutex<Option<watch::Sender<bool>>>>,
}

impl SequenceOrchestrator {
    /// Create new SequenceOrchestrator
    pub fn new(
        camera: Arc<dyn SequenceCamera>,
        directories: Arc<dyn DirectoryAccess>,
        writer: Arc<dyn PhotoWriter>,
        clock: Arc<dyn Clock>,
        event_log: Arc<EventLogService>,
        realtime_hub: Arc<RealtimeHub>,
    ) -> Self {
        Self {
            camera,
            directories,
            writer,
            clock,
            event_log,
            realtime_hub,
            checkpoints: None,
            progress_tick: Duration::from_millis(DEFAULT_PROGRESS_TICK_MS),
            state: Arc::new(Mutex::new(CaptureSequenceState::default())),
            cancel_tx: Arc::new(Mutex::new(None)),
        }
    }

    /// Persist checkpoints while a run is active
    pub fn with_checkpoints(mut self, repository: CheckpointRepository) -> Self {
        self.checkpoints = Some(repository);
        self
    }

    pub fn with_progress_tick(mut self, tick: Duration) -> Self {
        self.progress_tick = tick.max(Duration::from_millis(10));
        self
    }

    // ========================================
    // Queries
    // ========================================

    /// Current state snapshot
    pub async fn state(&self) -> CaptureSequenceState {
        self.state.lock().await.clone()
    }

    /// Time based estimate; `None` when idle
    pub async fn progress(&self) -> Option<SequenceProgress> {
        let state = self.state.lock().await;
        if !state.active {
            return None;
        }
        let started_at = state.started_at?;
        let elapsed = progress::elapsed_seconds(started_at, self.clock.now());
        let total = estimated_total_seconds(
            state.total_count,
            state.interval_seconds,
            state.exposure_seconds,
        );
        Some(SequenceProgress {
            current_count: state.current_count,
            total_count: state.total_count,
            progress_fraction: progress_fraction(elapsed, total),
            elapsed_seconds: elapsed,
            estimated_total_seconds: total,
        })
    }

    /// Persistable view of the active run
    pub async fn checkpoint(&self) -> Option<SequenceCheckpoint> {
        let state = self.state.lock().await;
        if !state.active {
            return None;
        }
        Some(SequenceCheckpoint {
            started_at: state.started_at?,
            total_count: state.total_count,
            interval_seconds: state.interval_seconds,
            exposure_seconds: state.exposure_seconds,
            save_dir: state.save_dir.clone()?,
            file_format: state.file_format,
        })
    }

    // ========================================
    // Control
    // ========================================

    /// Run to completion
    pub async fn run(&self, request: SequenceRequest) -> Result<SequenceOutcome> {
        let run = self.begin(request).await?;
        Ok(self.execute(run).await)
    }

    /// Pass the entry guard, then run in the background
    pub async fn spawn(&self, request: SequenceRequest) -> Result<JoinHandle<SequenceOutcome>> {
        let run = self.begin(request).await?;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.execute(run).await }))
    }

    /// Request cancellation; false when nothing is active
    pub async fn cancel(&self) -> bool {
        match self.cancel_tx.lock().await.as_ref() {
            Some(tx) => {
                tx.send_replace(true);
                tracing::info!("Sequence cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Recompute progress for a run started before a restart. The remote side
    /// is not queried.
    pub async fn resume(&self, checkpoint: SequenceCheckpoint) -> Result<ResumeOutcome> {
        let mut state = self.state.lock().await;
        if state.active {
            return Err(Error::Conflict("a sequence is already active".to_string()));
        }

        let elapsed = progress::elapsed_seconds(checkpoint.started_at, self.clock.now());
        let total = estimated_total_seconds(
            checkpoint.total_count,
            checkpoint.interval_seconds,
            checkpoint.exposure_seconds,
        );

        if checkpoint.total_count == 0 || elapsed >= total {
            drop(state);
            tracing::info!(
                elapsed_secs = elapsed,
                estimated_secs = total,
                "Checkpointed sequence presumed finished"
            );
            self.clear_checkpoint().await;
            self.record(Severity::Info, "Previous sequence presumed finished".to_string())
                .await;
            return Ok(ResumeOutcome::Finished);
        }

        *state = CaptureSequenceState {
            active: true,
            current_count: 0,
            total_count: checkpoint.total_count,
            started_at: Some(checkpoint.started_at),
            interval_seconds: checkpoint.interval_seconds,
            exposure_seconds: checkpoint.exposure_seconds,
            save_dir: Some(checkpoint.save_dir),
            file_format: checkpoint.file_format,
        };
        drop(state);

        let (tx, rx) = watch::channel(false);
        *self.cancel_tx.lock().await = Some(tx);
        self.spawn_ticker(rx, true);

        tracing::info!(
            elapsed_secs = elapsed,
            estimated_secs = total,
            "Sequence progress estimation restarted"
        );
        Ok(ResumeOutcome::Restarted(SequenceProgress {
            current_count: 0,
            total_count: checkpoint.total_count,
            progress_fraction: progress_fraction(elapsed, total),
            elapsed_seconds: elapsed,
            estimated_total_seconds: total,
        }))
    }

    // ========================================
    // Run lifecycle
    // ========================================

    async fn begin(&self, request: SequenceRequest) -> Result<ActiveRun> {
        request.validate()?;

        let mut state = self.state.lock().await;
        if state.active {
            return Err(Error::Conflict("a sequence is already active".to_string()));
        }

        let lease = match self.directories.acquire(&request.save_dir).await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!(save_dir = %request.save_dir.display(), error = %e, "Sequence refused");
                self.record(Severity::Error, format!("Sequence not started: {}", e))
                    .await;
                return Err(e);
            }
        };

        *state = CaptureSequenceState {
            active: true,
            current_count: 0,
            total_count: request.count,
            started_at: Some(self.clock.now()),
            interval_seconds: request.interval_seconds,
            exposure_seconds: request.exposure_seconds,
            save_dir: Some(lease.path().to_path_buf()),
            file_format: request.file_format,
        };
        drop(state);

        let (tx, cancel_rx) = watch::channel(false);
        *self.cancel_tx.lock().await = Some(tx);

        if let Some(checkpoint) = self.checkpoint().await {
            if let Some(repository) = &self.checkpoints {
                if let Err(e) = repository.save(&checkpoint).await {
                    tracing::warn!(error = %e, "Failed to persist sequence checkpoint");
                }
            }
        }

        let mode = if request.is_batch() { "batch" } else { "time-lapse" };
        tracing::info!(
            count = request.count,
            interval_secs = request.interval_seconds,
            exposure_secs = request.exposure_seconds,
            save_dir = %lease.path().display(),
            mode = mode,
            "Sequence started"
        );
        self.record(
            Severity::Info,
            format!("Sequence started: {} photos", request.count),
        )
        .await;

        Ok(ActiveRun {
            request,
            lease,
            cancel_rx,
        })
    }

    async fn execute(&self, run: ActiveRun) -> SequenceOutcome {
        let ActiveRun {
            request,
            lease,
            mut cancel_rx,
        } = run;

        let ticker = self.spawn_ticker(cancel_rx.clone(), false);
        let mut ledger = RunLedger::default();

        let status = if request.is_batch() {
            self.run_batch(&request, &lease, &mut cancel_rx, &mut ledger).await
        } else {
            self.run_timelapse(&request, &lease, &mut cancel_rx, &mut ledger).await
        };

        ticker.abort();
        drop(lease);
        self.finish(&request, status, ledger).await
    }

    async fn run_batch(
        &self,
        request: &SequenceRequest,
        lease: &DirectoryLease,
        cancel_rx: &mut watch::Receiver<bool>,
        ledger: &mut RunLedger,
    ) -> SequenceStatus {
        if *cancel_rx.borrow() {
            return SequenceStatus::Cancelled;
        }

        let payloads = tokio::select! {
            result = self.camera.capture_batch(request.count) => result,
            _ = cancelled(cancel_rx) => return SequenceStatus::Cancelled,
        };
        let payloads = match payloads {
            Ok(payloads) => payloads,
            Err(e) => {
                tracing::error!(error = %e, "Batch capture failed");
                return SequenceStatus::Failed(e.to_string());
            }
        };

        if payloads.len() != request.count as usize {
            tracing::warn!(
                requested = request.count,
                received = payloads.len(),
                "Batch returned a different number of photos"
            );
        }

        for (position, payload) in payloads.into_iter().enumerate() {
            if *cancel_rx.borrow() {
                return SequenceStatus::Cancelled;
            }
            let index = position as u32 + 1;
            let bytes = match payload {
                Some(payload) => decode_payload(&payload),
                None => Err(Error::Decode("photo missing from batch".to_string())),
            };
            match bytes {
                Ok(bytes) => self.store_photo(request, lease, index, &bytes, ledger).await,
                Err(e) => self.skip(index, &e, ledger).await,
            }
        }

        SequenceStatus::Completed
    }

    async fn run_timelapse(
        &self,
        request: &SequenceRequest,
        lease: &DirectoryLease,
        cancel_rx: &mut watch::Receiver<bool>,
        ledger: &mut RunLedger,
    ) -> SequenceStatus {
        let pause = match Duration::try_from_secs_f64(request.interval_seconds) {
            Ok(pause) => pause,
            Err(e) => return SequenceStatus::Failed(format!("invalid interval: {}", e)),
        };

        for index in 1..=request.count {
            if *cancel_rx.borrow() {
                return SequenceStatus::Cancelled;
            }

            let captured = tokio::select! {
                result = self.camera.capture_snapshot() => result,
                _ = cancelled(cancel_rx) => return SequenceStatus::Cancelled,
            };
            match captured {
                Ok(bytes) => self.store_photo(request, lease, index, &bytes, ledger).await,
                Err(e) if e.is_fatal_for_sequence() => {
                    tracing::error!(index = index, error = %e, "Snapshot failed, aborting sequence");
                    return SequenceStatus::Failed(e.to_string());
                }
                Err(e) => self.skip(index, &e, ledger).await,
            }

            if index < request.count {
                tokio::select! {
                    _ = self.clock.sleep(pause) => {}
                    _ = cancelled(cancel_rx) => return SequenceStatus::Cancelled,
                }
            }
        }

        SequenceStatus::Completed
    }

    /// Validate and write one photo; failures become skips
    async fn store_photo(
        &self,
        request: &SequenceRequest,
        lease: &DirectoryLease,
        index: u32,
        bytes: &[u8],
        ledger: &mut RunLedger,
    ) {
        let format = match validate_image(bytes) {
            Ok(format) => format,
            Err(e) => return self.skip(index, &e, ledger).await,
        };
        if format != request.file_format {
            tracing::debug!(
                index = index,
                requested = %request.file_format,
                actual = %format,
                "Payload format differs from requested, keeping payload format"
            );
        }

        let file_name = photo_file_name(
            self.clock.now(),
            index,
            request.count,
            request.gain,
            request.exposure_seconds,
            format.extension(),
        );

        match self.writer.write(lease, &file_name, bytes).await {
            Ok(path) => {
                let mut state = self.state.lock().await;
                state.current_count = (state.current_count + 1).min(state.total_count);
                drop(state);
                tracing::info!(index = index, total = request.count, path = %path.display(), "Photo saved");
                ledger.files.push(path);
            }
            Err(e) => self.skip(index, &e, ledger).await,
        }
    }

    async fn skip(&self, index: u32, error: &Error, ledger: &mut RunLedger) {
        tracing::warn!(index = index, error = %error, "Photo skipped");
        self.record(Severity::Warning, format!("Photo {} skipped: {}", index, error))
            .await;
        ledger.skipped.push(SkippedPhoto {
            index,
            reason: error.to_string(),
        });
    }

    async fn finish(
        &self,
        request: &SequenceRequest,
        status: SequenceStatus,
        ledger: RunLedger,
    ) -> SequenceOutcome {
        let final_state = {
            let mut state = self.state.lock().await;
            let mut last = std::mem::take(&mut *state);
            last.active = false;
            last
        };
        *self.cancel_tx.lock().await = None;
        self.clear_checkpoint().await;

        let photos_saved = ledger.files.len() as u32;
        let (severity, text) = match &status {
            SequenceStatus::Completed => (
                Severity::Info,
                format!("Sequence completed: {}/{} photos saved", photos_saved, request.count),
            ),
            SequenceStatus::Cancelled => (
                Severity::Warning,
                format!("Sequence cancelled: {}/{} photos saved", photos_saved, request.count),
            ),
            SequenceStatus::Failed(reason) => (
                Severity::Error,
                format!(
                    "Sequence failed after {}/{} photos: {}",
                    photos_saved, request.count, reason
                ),
            ),
        };
        tracing::info!(
            status = status.as_str(),
            photos_saved = photos_saved,
            skipped = ledger.skipped.len(),
            "Sequence finished"
        );
        self.record(severity, text).await;

        self.realtime_hub
            .broadcast(HubMessage::SequenceFinished(SequenceFinishedMessage {
                status: status.as_str().to_string(),
                photos_saved,
                total_count: request.count,
                skipped: ledger.skipped.len() as u32,
                error: match &status {
                    SequenceStatus::Failed(reason) => Some(reason.clone()),
                    _ => None,
                },
            }));

        SequenceOutcome {
            status,
            photos_saved,
            skipped: ledger.skipped,
            files: ledger.files,
            final_state,
        }
    }

    // ========================================
    // Progress ticker
    // ========================================

    /// Broadcast progress every tick. A resumed estimate also owns the
    /// state: it returns it to idle when the estimate completes or on cancel.
    fn spawn_ticker(&self, mut cancel_rx: watch::Receiver<bool>, resumed: bool) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticks = interval(this.progress_tick);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {}
                    _ = cancelled(&mut cancel_rx) => {
                        if resumed {
                            this.end_resumed(&cancel_rx, "Resumed sequence estimate cancelled").await;
                        }
                        break;
                    }
                }

                let Some(progress) = this.progress().await else {
                    break;
                };
                this.realtime_hub
                    .broadcast(HubMessage::SequenceProgress(progress.into()));

                if resumed && progress.progress_fraction >= 1.0 {
                    this.end_resumed(&cancel_rx, "Resumed sequence presumed finished").await;
                    break;
                }
            }
        })
    }

    /// Return to idle, unless a newer run already replaced the estimate
    /// owning `cancel_rx`
    async fn end_resumed(&self, cancel_rx: &watch::Receiver<bool>, text: &str) {
        {
            let mut state = self.state.lock().await;
            let mut cancel_tx = self.cancel_tx.lock().await;
            let owned = cancel_tx
                .as_ref()
                .is_some_and(|tx| tx.subscribe().same_channel(cancel_rx));
            if !owned {
                return;
            }
            *state = CaptureSequenceState::default();
            *cancel_tx = None;
        }
        self.clear_checkpoint().await;
        tracing::info!("{}", text);
        self.record(Severity::Info, text.to_string()).await;
    }

    // ========================================
    // Helpers
    // ========================================

    async fn clear_checkpoint(&self) {
        if let Some(repository) = &self.checkpoints {
            if let Err(e) = repository.clear().await {
                tracing::warn!(error = %e, "Failed to clear sequence checkpoint");
            }
        }
    }

    async fn record(&self, severity: Severity, message: String) {
        let entry = self.event_log.record(MODULE, severity, message).await;
        self.realtime_hub.broadcast(HubMessage::LogEntry(entry));
    }
}

/// Resolves once cancellation is requested (or the run is torn down)
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    let _ = cancel_rx.wait_for(|cancelled| *cancelled).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_client::FileFormat;
    use crate::directory_access::FsDirectoryAccess;
    use async_trait::async_trait;
    use base64::Engine;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    const JPEG: [u8; 6] = [0xFF, 0xD8, 0xFF, 0xE0, 0xFF, 0xD9];

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    /// Clock whose sleeps advance virtual time instantly; sleeps numbered
    /// `block_from` and later never finish
    struct ManualClock {
        now: StdMutex<DateTime<Utc>>,
        sleeps: AtomicU32,
        block_from: Option<u32>,
    }

    impl ManualClock {
        fn new(block_from: Option<u32>) -> Self {
            Self {
                now: StdMutex::new(Utc.with_ymd_and_hms(2024, 8, 12, 22, 0, 0).unwrap()),
                sleeps: AtomicU32::new(0),
                block_from,
            }
        }

        fn advance(&self, seconds: i64) {
            *self.now.lock().unwrap() += chrono::Duration::seconds(seconds);
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            let n = self.sleeps.fetch_add(1, Ordering::SeqCst) + 1;
            if self.block_from.is_some_and(|from| n >= from) {
                std::future::pending::<()>().await;
            }
            *self.now.lock().unwrap() += chrono::Duration::from_std(duration).unwrap();
            tokio::task::yield_now().await;
        }
    }

    #[derive(Default)]
    struct FakeCamera {
        batch: Vec<Option<String>>,
        /// Snapshot call number that fails with a transport error
        fail_at: Option<u32>,
        /// Captures never answer
        hang: bool,
        snapshots: AtomicU32,
        batches: AtomicU32,
    }

    impl FakeCamera {
        fn calls(&self) -> u32 {
            self.snapshots.load(Ordering::SeqCst) + self.batches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SequenceCamera for FakeCamera {
        async fn capture_snapshot(&self) -> Result<Vec<u8>> {
            let n = self.snapshots.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_at == Some(n) {
                return Err(Error::Transport("connection reset".to_string()));
            }
            Ok(JPEG.to_vec())
        }

        async fn capture_batch(&self, _count: u32) -> Result<Vec<Option<String>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.batch.clone())
        }
    }

    struct Fixture {
        orchestrator: SequenceOrchestrator,
        event_log: Arc<EventLogService>,
        dir: tempfile::TempDir,
    }

    fn fixture(camera: FakeCamera, clock: Arc<ManualClock>) -> Fixture {
        fixture_with(Arc::new(camera), clock)
    }

    fn fixture_with(camera: Arc<FakeCamera>, clock: Arc<ManualClock>) -> Fixture {
        let event_log = Arc::new(EventLogService::default());
        let orchestrator = SequenceOrchestrator::new(
            camera,
            Arc::new(FsDirectoryAccess::new()),
            Arc::new(FsPhotoWriter),
            clock,
            event_log.clone(),
            Arc::new(RealtimeHub::new()),
        );
        Fixture {
            orchestrator,
            event_log,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn request(dir: &tempfile::TempDir, count: u32, interval_seconds: f64) -> SequenceRequest {
        SequenceRequest {
            save_dir: dir.path().to_path_buf(),
            count,
            interval_seconds,
            exposure_seconds: 2.0,
            gain: 120,
            file_format: FileFormat::Jpeg,
        }
    }

    async fn files_in(dir: &tempfile::TempDir) -> usize {
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_batch_writes_every_photo() {
        let camera = FakeCamera {
            batch: vec![Some(b64(&JPEG)); 5],
            ..Default::default()
        };
        let f = fixture(camera, Arc::new(ManualClock::new(None)));

        let outcome = f.orchestrator.run(request(&f.dir, 5, 0.0)).await.unwrap();

        assert_eq!(outcome.status, SequenceStatus::Completed);
        assert_eq!(outcome.photos_saved, 5);
        assert_eq!(outcome.final_state.current_count, 5);
        assert!(!outcome.final_state.active);
        assert_eq!(files_in(&f.dir).await, 5);
        assert!(outcome.files[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_seq0001of0005_gain120_exp2s.jpg"));

        // Live state back to idle
        assert_eq!(f.orchestrator.state().await, CaptureSequenceState::default());
        assert!(f.orchestrator.progress().await.is_none());
    }

    #[tokio::test]
    async fn test_batch_null_entry_is_skipped() {
        let camera = FakeCamera {
            batch: vec![Some(b64(&JPEG)), None, Some(b64(&JPEG)), Some(b64(&JPEG))],
            ..Default::default()
        };
        let f = fixture(camera, Arc::new(ManualClock::new(None)));

        let outcome = f.orchestrator.run(request(&f.dir, 4, 0.0)).await.unwrap();

        assert_eq!(outcome.status, SequenceStatus::Completed);
        assert_eq!(outcome.photos_saved, 3);
        assert_eq!(files_in(&f.dir).await, 3);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].index, 2);
        assert_eq!(
            f.event_log
                .by_module(MODULE, 10)
                .await
                .iter()
                .filter(|e| e.severity == Severity::Warning)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_batch_undecodable_payload_is_skipped() {
        let camera = FakeCamera {
            batch: vec![Some(b64(b"plain text")), Some(b64(&JPEG))],
            ..Default::default()
        };
        let f = fixture(camera, Arc::new(ManualClock::new(None)));

        let outcome = f.orchestrator.run(request(&f.dir, 2, 0.0)).await.unwrap();
        assert_eq!(outcome.status, SequenceStatus::Completed);
        assert_eq!(outcome.photos_saved, 1);
        assert_eq!(outcome.skipped[0].index, 1);
    }

    #[tokio::test]
    async fn test_timelapse_cancel_after_three() {
        // Third sleep (after photo 3) hangs until cancelled
        let clock = Arc::new(ManualClock::new(Some(3)));
        let f = fixture(FakeCamera::default(), clock);

        let handle = f.orchestrator.spawn(request(&f.dir, 10, 5.0)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.orchestrator.state().await.current_count < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(f.orchestrator.cancel().await);
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.status, SequenceStatus::Cancelled);
        assert_eq!(outcome.photos_saved, 3);
        assert_eq!(files_in(&f.dir).await, 3);
        assert!(!outcome.final_state.active);
        assert!(!f.orchestrator.state().await.active);
        assert!(!f.orchestrator.cancel().await);
    }

    async fn cancel_while_capturing(interval_seconds: f64) {
        let camera = Arc::new(FakeCamera {
            hang: true,
            ..Default::default()
        });
        let f = fixture_with(camera.clone(), Arc::new(ManualClock::new(None)));

        let handle = f
            .orchestrator
            .spawn(request(&f.dir, 3, interval_seconds))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while camera.calls() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(f.orchestrator.cancel().await);
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.status, SequenceStatus::Cancelled);
        assert_eq!(outcome.photos_saved, 0);
        assert!(outcome.files.is_empty());
        assert_eq!(files_in(&f.dir).await, 0);
        assert_eq!(camera.calls(), 1);
        assert!(!f.orchestrator.state().await.active);
    }

    #[tokio::test]
    async fn test_cancel_during_pending_snapshot() {
        cancel_while_capturing(5.0).await;
    }

    #[tokio::test]
    async fn test_cancel_during_pending_batch() {
        cancel_while_capturing(0.0).await;
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_partial_output() {
        let camera = FakeCamera {
            fail_at: Some(3),
            ..Default::default()
        };
        let f = fixture(camera, Arc::new(ManualClock::new(None)));

        let outcome = f.orchestrator.run(request(&f.dir, 5, 1.0)).await.unwrap();

        assert!(matches!(outcome.status, SequenceStatus::Failed(_)));
        assert_eq!(outcome.photos_saved, 2);
        assert_eq!(files_in(&f.dir).await, 2);
        assert_eq!(
            f.event_log.latest(1).await[0].severity,
            Severity::Error
        );
    }

    #[tokio::test]
    async fn test_entry_guard() {
        let f = fixture(FakeCamera::default(), Arc::new(ManualClock::new(None)));

        let missing = SequenceRequest {
            save_dir: f.dir.path().join("missing"),
            ..request(&f.dir, 1, 0.0)
        };
        assert!(matches!(
            f.orchestrator.run(missing).await,
            Err(Error::ResourceUnavailable(_))
        ));
        assert!(matches!(
            f.orchestrator.run(request(&f.dir, 0, 0.0)).await,
            Err(Error::Validation(_))
        ));
        assert!(!f.orchestrator.state().await.active);
    }

    #[tokio::test]
    async fn test_unrepresentable_interval_is_refused() {
        let camera = FakeCamera {
            batch: vec![Some(b64(&JPEG))],
            ..Default::default()
        };
        let f = fixture(camera, Arc::new(ManualClock::new(None)));

        assert!(matches!(
            f.orchestrator.spawn(request(&f.dir, 2, 1e20)).await,
            Err(Error::Validation(_))
        ));
        assert!(!f.orchestrator.state().await.active);
        assert!(!f.orchestrator.cancel().await);

        let outcome = f.orchestrator.run(request(&f.dir, 1, 0.0)).await.unwrap();
        assert_eq!(outcome.status, SequenceStatus::Completed);
    }

    #[tokio::test]
    async fn test_second_run_conflicts() {
        let clock = Arc::new(ManualClock::new(Some(1)));
        let f = fixture(FakeCamera::default(), clock);

        let handle = f.orchestrator.spawn(request(&f.dir, 3, 1.0)).await.unwrap();
        assert!(matches!(
            f.orchestrator.run(request(&f.dir, 1, 0.0)).await,
            Err(Error::Conflict(_))
        ));
        assert!(f.orchestrator.checkpoint().await.is_some());

        f.orchestrator.cancel().await;
        assert_eq!(handle.await.unwrap().status, SequenceStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_resume() {
        let clock = Arc::new(ManualClock::new(None));
        let f = fixture(FakeCamera::default(), clock.clone());
        let checkpoint = SequenceCheckpoint {
            started_at: clock.now(),
            total_count: 10,
            interval_seconds: 3.0,
            exposure_seconds: 1.0,
            save_dir: f.dir.path().to_path_buf(),
            file_format: FileFormat::Jpeg,
        };

        // 40s estimated, 10s elapsed
        clock.advance(10);
        match f.orchestrator.resume(checkpoint.clone()).await.unwrap() {
            ResumeOutcome::Restarted(progress) => {
                assert_eq!(progress.estimated_total_seconds, 40.0);
                assert_eq!(progress.progress_fraction, 0.25);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(f.orchestrator.state().await.active);
        assert!(f.orchestrator.cancel().await);

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.orchestrator.state().await.active {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        clock.advance(60);
        assert_eq!(
            f.orchestrator.resume(checkpoint).await.unwrap(),
            ResumeOutcome::Finished
        );
        assert!(!f.orchestrator.state().await.active);
    }

    #[tokio::test]
    async fn test_stale_resumed_estimate_leaves_new_run_alone() {
        let clock = Arc::new(ManualClock::new(Some(1)));
        let f = fixture(FakeCamera::default(), clock);

        let handle = f.orchestrator.spawn(request(&f.dir, 3, 1.0)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.orchestrator.state().await.current_count < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let (_stale_tx, stale_rx) = watch::channel(false);
        f.orchestrator
            .end_resumed(&stale_rx, "Resumed sequence presumed finished")
            .await;

        assert!(f.orchestrator.state().await.active);
        assert!(f.orchestrator.cancel().await);
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.status, SequenceStatus::Cancelled);
        assert_eq!(outcome.photos_saved, 1);
    }

    #[tokio::test]
    async fn test_checkpoint_persisted_while_running() {
        let clock = Arc::new(ManualClock::new(Some(1)));
        let f = fixture(FakeCamera::default(), clock);
        let repository = CheckpointRepository::new(f.dir.path().join("state/sequence.json"));
        let orchestrator = f.orchestrator.clone().with_checkpoints(repository.clone());

        let handle = orchestrator.spawn(request(&f.dir, 2, 1.0)).await.unwrap();
        assert_eq!(repository.load().await.unwrap().unwrap().total_count, 2);

        orchestrator.cancel().await;
        handle.await.unwrap();
        assert!(repository.load().await.unwrap().is_none());
    }
}
