//! Pipeline command types.

use crate::{pattern::RuleSet, status::TableSnapshot};
use tokio::sync::oneshot;

/// Commands accepted by a table pipeline. Each carries its own reply channel.
#[derive(Debug)]
pub enum TableCommand {
    /// Leave `Idle` and start learning
    Activate {
        response: oneshot::Sender<TableResponse>,
    },

    /// Pause between ticks
    Pause {
        response: oneshot::Sender<TableResponse>,
    },

    /// Resume a paused table, or recover a table in error
    Resume {
        response: oneshot::Sender<TableResponse>,
    },

    /// Replace the rule set; takes effect at the next decision point
    SetRules {
        rules: RuleSet,
        response: oneshot::Sender<TableResponse>,
    },

    GetSnapshot {
        response: oneshot::Sender<TableSnapshot>,
    },

    /// Stop the pipeline
    Close {
        response: oneshot::Sender<TableResponse>,
    },
}

/// Response to a table command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableResponse {
    /// Operation succeeded
    Success,

    /// Not valid in the table's current state
    InvalidState(String),
}
