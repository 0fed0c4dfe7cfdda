//! Error recovery supervisor.
//!
//! Wraps every capture, recognition and click made by one table pipeline.
//! Transient failures are retried with backoff; repeated recognition failures
//! switch the table to its fallback recognizer; repeated unrecoverable failures
//! escalate to a [`StuckState`] that the pipeline turns into an alert.
//!
//! State is per table, so a failing table never changes how its neighbours are
//! treated.

pub mod errors;
pub mod policy;
pub mod timeouts;

pub use errors::{
    ActionError, CaptureError, FailureClass, OperationError, RecognitionError, StuckState,
};
pub use policy::{ErrorSummary, RecoveryPolicy, RecoveryState, Verdict};
pub use timeouts::{DEFAULT_OPERATION_TIMEOUT, with_timeout};

use crate::TableId;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Context handed to each attempt of a guarded call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 0 for the first try
    pub number: u32,

    /// Use the fallback recognizer for this attempt
    pub fallback: bool,
}

/// Why a guarded call gave up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// Budget exhausted; drop this sample or action
    #[error("Skipped after failure: {0}")]
    Skipped(OperationError),

    #[error(transparent)]
    Escalated(StuckState),

    #[error("Cancelled")]
    Cancelled,
}

/// Recovery supervisor for one table
pub struct Supervisor {
    table_id: TableId,
    state: RecoveryState,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(table_id: TableId, policy: RecoveryPolicy, cancel: CancellationToken) -> Self {
        Self {
            table_id,
            state: RecoveryState::new(table_id, policy),
            cancel,
        }
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        self.state.policy()
    }

    pub fn summary(&self) -> ErrorSummary {
        self.state.summary()
    }

    /// Clear every counter (explicit resume)
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Reset a class after a success confirmed outside a guarded call
    pub fn record_success(&mut self, class: FailureClass) {
        self.state.on_success(class);
    }

    /// Record a failure detected outside a guarded call, such as an implausible
    /// sample. No retry is attempted.
    pub fn note_failure(&mut self, err: OperationError) -> Result<(), GuardError> {
        log::warn!(
            "Table {}: {} failure at {}: {}",
            self.table_id,
            err.class(),
            chrono::Utc::now().to_rfc3339(),
            err
        );
        match self.state.on_exhausted(&err) {
            Verdict::Escalate => Err(GuardError::Escalated(self.state.stuck(err.class()))),
            _ => Err(GuardError::Skipped(err)),
        }
    }

    /// Run `op` under the recovery policy.
    ///
    /// # Arguments
    ///
    /// * `operation` - Short operation name used in log lines
    /// * `covers` - Classes reset to zero when the call succeeds
    /// * `op` - Produces one attempt; failures carry their own class
    ///
    /// # Returns
    ///
    /// * `Result<T, GuardError>` - Value of the first successful attempt
    pub async fn guard<T, F, Fut>(
        &mut self,
        operation: &str,
        covers: &[FailureClass],
        mut op: F,
    ) -> Result<T, GuardError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let mut number = 0;
        loop {
            let attempt = Attempt {
                number,
                fallback: self.state.fallback_active(),
            };

            let err = match op(attempt).await {
                Ok(value) => {
                    for class in covers {
                        self.state.on_success(*class);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            log::warn!(
                "Table {}: {} attempt {} failed at {} ({} failure{}): {}",
                self.table_id,
                operation,
                number + 1,
                chrono::Utc::now().to_rfc3339(),
                err.class(),
                if attempt.fallback { ", fallback" } else { "" },
                err
            );

            match self.state.on_attempt_failed(&err, number) {
                Verdict::Retryable { delay } => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(GuardError::Cancelled),
                    }
                    number += 1;
                }
                Verdict::FallbackNow => {
                    number += 1;
                }
                Verdict::Skip => return Err(GuardError::Skipped(err)),
                Verdict::Escalate => {
                    let stuck = self.state.stuck(err.class());
                    log::error!("Table {}: {}", self.table_id, stuck);
                    return Err(GuardError::Escalated(stuck));
                }
            }
        }
    }
}
