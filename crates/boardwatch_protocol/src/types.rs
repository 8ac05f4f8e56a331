//! Canonical run types used across all crates.

use crate::ids::{RunId, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Run state machine
// ============================================================================

/// Lifecycle of one per-tenant ingestion attempt.
///
/// ```text
/// enqueued ──▶ running ──▶ done
///                     └──▶ done_with_errors
///                     └──▶ failed
/// enqueued ──▶ enqueue_failed
/// enqueued ──▶ skipped_lock_active
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum RunStatus {
    Enqueued,
    EnqueueFailed,
    Running,
    Done,
    DoneWithErrors,
    Failed,
    SkippedLockActive,
}

impl RunStatus {
    /// Terminal statuses are reached exactly once and never regress.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Enqueued | RunStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Enqueued => "enqueued",
            RunStatus::EnqueueFailed => "enqueue_failed",
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::DoneWithErrors => "done_with_errors",
            RunStatus::Failed => "failed",
            RunStatus::SkippedLockActive => "skipped_lock_active",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run entered the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum RunType {
    Scheduled,
    Manual,
    Gc,
}

impl RunType {
    pub fn as_str(self) -> &'static str {
        match self {
            RunType::Scheduled => "scheduled",
            RunType::Manual => "manual",
            RunType::Gc => "gc",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown run type: {0}")]
pub struct RunTypeParseError(String);

impl FromStr for RunType {
    type Err = RunTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunType::Scheduled),
            "manual" => Ok(RunType::Manual),
            "gc" => Ok(RunType::Gc),
            other => Err(RunTypeParseError(other.to_string())),
        }
    }
}

// ============================================================================
// Queue payload
// ============================================================================

/// The message the dispatcher carries: exactly one run for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub run_type: RunType,
}

// ============================================================================
// Counters
// ============================================================================

/// Point-in-time view of a run's counters.
///
/// Written by the heartbeat while the run is live and once more at terminal
/// time. Conservation at terminal time:
/// `found = candidates + skipped_old + no_timestamp`, `writes = added + updated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub feeds_count: u64,
    pub found: u64,
    pub candidates: u64,
    pub added: u64,
    pub updated: u64,
    pub skipped_old: u64,
    pub skipped_unchanged: u64,
    pub no_timestamp: u64,
    pub writes: u64,
    pub errors_count: u64,
}

// ============================================================================
// Error samples
// ============================================================================

/// One captured feed failure: which URL, what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub url: String,
    pub message: String,
}

/// Bounded insertion-order ring of error samples. Oldest entries are dropped
/// silently once capacity is reached; diagnostics, not durability.
#[derive(Debug, Clone)]
pub struct ErrorSampleBuffer {
    capacity: usize,
    samples: VecDeque<ErrorSample>,
}

impl ErrorSampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, url: impl Into<String>, message: impl Into<String>) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ErrorSample {
            url: url.into(),
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> Vec<ErrorSample> {
        self.samples.iter().cloned().collect()
    }
}

impl Default for ErrorSampleBuffer {
    fn default() -> Self {
        Self::new(crate::defaults::ERROR_SAMPLE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Enqueued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::DoneWithErrors.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::EnqueueFailed.is_terminal());
        assert!(RunStatus::SkippedLockActive.is_terminal());
    }

    #[test]
    fn run_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::DoneWithErrors).unwrap(),
            "\"done_with_errors\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::SkippedLockActive).unwrap(),
            "\"skipped_lock_active\""
        );
    }

    #[test]
    fn run_type_parses() {
        assert_eq!("gc".parse::<RunType>().unwrap(), RunType::Gc);
        assert!("cron".parse::<RunType>().is_err());
    }

    #[test]
    fn error_buffer_drops_oldest() {
        let mut buf = ErrorSampleBuffer::new(3);
        for i in 0..5 {
            buf.push(format!("https://feed/{i}"), "boom");
        }
        let samples = buf.as_slice();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].url, "https://feed/2");
        assert_eq!(samples[2].url, "https://feed/4");
    }

    #[test]
    fn descriptor_roundtrips_json() {
        let desc = RunDescriptor {
            tenant_id: TenantId::parse("tenant-1").unwrap(),
            run_id: RunId::new(),
            run_type: RunType::Manual,
        };
        let json = serde_json::to_string(&desc).unwrap();
        let back: RunDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(desc, back);
    }
}
