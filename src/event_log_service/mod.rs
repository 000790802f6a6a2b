//! EventLogService - Audit Log (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Record structured failure / lifecycle entries (module tag, severity, text)
//! - Bounded retention, oldest entries evicted first
//! - Queries for the front end

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Entry severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub entry_id: u64,
    pub timestamp: DateTime<Utc>,
    /// Module tag, e.g. "sequence", "camera", "poller"
    pub module: String,
    pub severity: Severity,
    pub message: String,
}

/// Ring buffer for entries
struct EntryRingBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_id: u64,
}

impl EntryRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    fn push(&mut self, module: &str, severity: Severity, message: String) -> LogEntry {
        let entry = LogEntry {
            entry_id: self.next_id,
            timestamp: Utc::now(),
            module: module.to_string(),
            severity,
            message,
        };
        self.next_id += 1;

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    fn latest(&self, count: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(count).cloned().collect()
    }

    fn by_module(&self, module: &str, count: usize) -> Vec<LogEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.module == module)
            .take(count)
            .cloned()
            .collect()
    }
}

/// EventLogService instance
pub struct EventLogService {
    buffer: RwLock<EntryRingBuffer>,
}

impl EventLogService {
    /// Create new EventLogService
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(EntryRingBuffer::new(capacity)),
        }
    }

    /// Append an entry
    pub async fn record(&self, module: &str, severity: Severity, message: impl Into<String>) -> LogEntry {
        let mut buffer = self.buffer.write().await;
        let entry = buffer.push(module, severity, message.into());
        tracing::debug!(
            entry_id = entry.entry_id,
            module = %entry.module,
            severity = ?entry.severity,
            "Audit entry recorded"
        );
        entry
    }

    pub async fn info(&self, module: &str, message: impl Into<String>) -> LogEntry {
        self.record(module, Severity::Info, message).await
    }

    pub async fn warn(&self, module: &str, message: impl Into<String>) -> LogEntry {
        self.record(module, Severity::Warning, message).await
    }

    pub async fn error(&self, module: &str, message: impl Into<String>) -> LogEntry {
        self.record(module, Severity::Error, message).await
    }

    /// Latest entries, newest first
    pub async fn latest(&self, count: usize) -> Vec<LogEntry> {
        self.buffer.read().await.latest(count)
    }

    /// Latest entries of one module, newest first
    pub async fn by_module(&self, module: &str, count: usize) -> Vec<LogEntry> {
        self.buffer.read().await.by_module(module, count)
    }

    /// Entry count
    pub async fn count(&self) -> usize {
        self.buffer.read().await.entries.len()
    }
}

impl Default for EventLogService {
    fn default() -> Self {
        Self::new(2000) // Default capacity
    }
}
