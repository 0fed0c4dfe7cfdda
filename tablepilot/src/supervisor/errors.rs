//! Failure taxonomy for guarded collaborator calls.

use crate::TableId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which recovery track a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    Capture,
    Recognition,
    Action,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Capture => write!(f, "capture"),
            FailureClass::Recognition => write!(f, "recognition"),
            FailureClass::Action => write!(f, "action"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The surface is gone (closed or navigating); retrying immediately is pointless
    #[error("Capture surface unavailable")]
    SurfaceUnavailable,

    #[error("Capture failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    #[error("Could not read {what}")]
    Unreadable { what: String },

    /// Value was read but fails plausibility checks
    #[error("Implausible reading: {0}")]
    Implausible(String),

    #[error("Recognizer failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("Click at ({x}, {y}) rejected: {reason}")]
    Rejected { x: i32, y: i32, reason: String },

    #[error("Click target unavailable")]
    SurfaceUnavailable,
}

/// Any failure of a guarded operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("{class} operation timed out after {after:?}")]
    Timeout { class: FailureClass, after: Duration },
}

impl OperationError {
    pub fn class(&self) -> FailureClass {
        match self {
            OperationError::Capture(_) => FailureClass::Capture,
            OperationError::Recognition(_) => FailureClass::Recognition,
            OperationError::Action(_) => FailureClass::Action,
            OperationError::Timeout { class, .. } => *class,
        }
    }

    /// Fatal failures skip the retry budget
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OperationError::Capture(CaptureError::SurfaceUnavailable)
                | OperationError::Action(ActionError::SurfaceUnavailable)
        )
    }
}

/// Consecutive unrecoverable failures on one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Table {table_id} stuck after {consecutive} consecutive {class} failures: {last_error}")]
pub struct StuckState {
    pub table_id: TableId,
    pub class: FailureClass,
    pub consecutive: u32,
    pub last_error: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_keeps_class() {
        let err = OperationError::Timeout {
            class: FailureClass::Action,
            after: Duration::from_secs(5),
        };
        assert_eq!(err.class(), FailureClass::Action);
        assert!(err.to_string().contains("5s"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_surface_loss_is_fatal() {
        let err: OperationError = CaptureError::SurfaceUnavailable.into();
        assert!(err.is_fatal());
        let err: OperationError = CaptureError::Failed("blank frame".into()).into();
        assert!(!err.is_fatal());
    }
}
