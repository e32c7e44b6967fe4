//! Operator-visible status log: a fixed-capacity ring buffer of the 50
//! most recent diagnostic entries. In-memory only, never persisted, and
//! not a substitute for the one-shot user notification of an operation's
//! outcome.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;

pub const STATUS_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Info => "info",
            StatusLevel::Warning => "warning",
            StatusLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub id: u64,
    pub message: String,
    pub level: StatusLevel,
    pub timestamp: String,
    pub details: Option<String>,
}

/// O(1) append; the oldest entry is evicted once capacity is reached.
pub struct StatusLog {
    entries: Mutex<VecDeque<StatusEntry>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::with_capacity(STATUS_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    pub fn push(&self, level: StatusLevel, message: impl Into<String>, details: Option<String>) {
        let entry = StatusEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            message: message.into(),
            level,
            timestamp: Utc::now().to_rfc3339(),
            details,
        };
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(StatusLevel::Info, message, None);
    }

    pub fn warning(&self, message: impl Into<String>, details: Option<String>) {
        self.push(StatusLevel::Warning, message, details);
    }

    pub fn error(&self, message: impl Into<String>, details: Option<String>) {
        self.push(StatusLevel::Error, message, details);
    }

    /// Most-recent-last copy of the buffer.
    pub fn snapshot(&self) -> Vec<StatusEntry> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let log = StatusLog::with_capacity(3);
        for i in 0..5 {
            log.info(format!("entry {i}"));
        }

        let entries = log.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "entry 2");
        assert_eq!(entries[2].message, "entry 4");
    }

    #[test]
    fn ids_are_monotonic() {
        let log = StatusLog::with_capacity(2);
        log.info("a");
        log.warning("b", Some("detail".into()));
        log.error("c", None);

        let entries = log.snapshot();
        assert!(entries[0].id < entries[1].id);
        assert_eq!(entries[1].level, StatusLevel::Error);
    }
}
