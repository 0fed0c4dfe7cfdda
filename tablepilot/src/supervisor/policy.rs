//! Per-table recovery bookkeeping.
//!
//! Each failure class keeps its own consecutive-failure counter, and the table
//! keeps one more across all classes so alternating failures still escalate. A failed
//! attempt yields a [`Verdict`] that tells the caller what to do next; the
//! bookkeeping itself never sleeps or performs I/O.

use super::{
    errors::{FailureClass, OperationError, StuckState},
    timeouts::DEFAULT_OPERATION_TIMEOUT,
};
use crate::TableId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget and thresholds shared by every failure class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,

    /// Delay before retry `n` (the last entry repeats)
    pub backoff: Vec<Duration>,

    /// Consecutive end-to-end failures before escalation
    pub stuck_threshold: u32,

    /// Consecutive recognition failures before switching to the fallback recognizer
    pub fallback_after: u32,

    /// Timeout applied to every collaborator call
    pub op_timeout: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            stuck_threshold: 3,
            fallback_after: 3,
            op_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl RecoveryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff
            .get(retry as usize)
            .or(self.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Wait `delay`, then try again
    Retryable { delay: Duration },

    /// Switch to the fallback recognizer and try once more now
    FallbackNow,

    /// Drop this sample or action; the table keeps running
    Skip,

    /// Raise an alert and move the table to error
    Escalate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ClassState {
    consecutive: u32,
    total: u64,
}

/// Error counters exposed in snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub capture_failures: u64,
    pub recognition_failures: u64,
    pub action_failures: u64,
    pub total_errors: u64,
    pub fallback_active: bool,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Recovery state of one table
#[derive(Debug, Clone)]
pub struct RecoveryState {
    table_id: TableId,
    policy: RecoveryPolicy,
    capture: ClassState,
    recognition: ClassState,
    action: ClassState,
    /// Exhausted failures of any class since the last plausible sample or completed click
    consecutive_failures: u32,
    fallback_active: bool,
    total_errors: u64,
    last_error_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl RecoveryState {
    pub fn new(table_id: TableId, policy: RecoveryPolicy) -> Self {
        Self {
            table_id,
            policy,
            capture: ClassState::default(),
            recognition: ClassState::default(),
            action: ClassState::default(),
            consecutive_failures: 0,
            fallback_active: false,
            total_errors: 0,
            last_error_at: None,
            last_error: None,
        }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub fn fallback_active(&self) -> bool {
        self.fallback_active
    }

    pub fn consecutive(&self, class: FailureClass) -> u32 {
        self.class(class).consecutive
    }

    /// Consecutive failures across every class
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn class(&self, class: FailureClass) -> &ClassState {
        match class {
            FailureClass::Capture => &self.capture,
            FailureClass::Recognition => &self.recognition,
            FailureClass::Action => &self.action,
        }
    }

    fn class_mut(&mut self, class: FailureClass) -> &mut ClassState {
        match class {
            FailureClass::Capture => &mut self.capture,
            FailureClass::Recognition => &mut self.recognition,
            FailureClass::Action => &mut self.action,
        }
    }

    /// A failed attempt of a guarded call.
    ///
    /// `attempt` is 0 for the first try. Fallback recognition is single-shot.
    pub fn on_attempt_failed(&mut self, err: &OperationError, attempt: u32) -> Verdict {
        let class = err.class();
        let single_shot = class == FailureClass::Recognition && self.fallback_active;
        if !err.is_fatal() && !single_shot && attempt < self.policy.max_retries {
            return Verdict::Retryable {
                delay: self.policy.delay_for(attempt),
            };
        }
        self.on_exhausted(err)
    }

    /// A failure that cannot be retried any more.
    pub fn on_exhausted(&mut self, err: &OperationError) -> Verdict {
        let class = err.class();
        self.total_errors += 1;
        self.last_error_at = Some(Utc::now());
        self.last_error = Some(err.to_string());

        let fallback_after = self.policy.fallback_after;
        let stuck_threshold = self.policy.stuck_threshold;
        let fallback_active = self.fallback_active;

        let state = self.class_mut(class);
        state.consecutive += 1;
        state.total += 1;
        let class_consecutive = state.consecutive;
        self.consecutive_failures += 1;

        if class == FailureClass::Recognition && !fallback_active && class_consecutive >= fallback_after
        {
            self.class_mut(class).consecutive = 0;
            self.consecutive_failures = 0;
            self.fallback_active = true;
            log::warn!(
                "Table {}: Switching to fallback recognition after {} failures",
                self.table_id,
                fallback_after
            );
            return Verdict::FallbackNow;
        }

        if class_consecutive >= stuck_threshold || self.consecutive_failures >= stuck_threshold {
            Verdict::Escalate
        } else {
            Verdict::Skip
        }
    }

    /// A capture success alone does not end a run of table failures; the
    /// sample still has to be read.
    pub fn on_success(&mut self, class: FailureClass) {
        self.class_mut(class).consecutive = 0;
        if class != FailureClass::Capture {
            self.consecutive_failures = 0;
        }
    }

    /// Clear counters and return to the primary recognizer
    pub fn reset(&mut self) {
        self.capture.consecutive = 0;
        self.recognition.consecutive = 0;
        self.action.consecutive = 0;
        self.consecutive_failures = 0;
        self.fallback_active = false;
    }

    pub fn stuck(&self, class: FailureClass) -> StuckState {
        StuckState {
            table_id: self.table_id,
            class,
            consecutive: self.consecutive(class).max(self.consecutive_failures),
            last_error: self.last_error.clone().unwrap_or_default(),
            at: self.last_error_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn summary(&self) -> ErrorSummary {
        ErrorSummary {
            capture_failures: self.capture.total,
            recognition_failures: self.recognition.total,
            action_failures: self.action.total,
            total_errors: self.total_errors,
            fallback_active: self.fallback_active,
            last_error_at: self.last_error_at,
            last_error: self.last_error.clone(),
        }
    }
}
