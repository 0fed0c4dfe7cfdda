//! Status feed for presentation layers.
//!
//! A bounded broadcast channel: publishing never blocks, and a consumer that
//! falls behind loses the oldest events (it sees `RecvError::Lagged`).

use crate::{
    TableId,
    pattern::Team,
    round::{Decision, RoundCounts, RoundOutcome, TableStatus},
    supervisor::{ErrorSummary, FailureClass},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of buffered events
pub const DEFAULT_STATUS_CAPACITY: usize = 256;

/// Read-only view of one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSnapshot {
    pub table_id: TableId,
    pub state: String,
    pub status: TableStatus,

    /// Winners of the last three rounds, oldest first
    pub last_outcomes: Vec<Option<Team>>,

    pub last_decision: Option<Decision>,
    pub rounds_watched: u32,
    pub next_round_number: u64,
    pub timer: Option<u8>,
    pub blue_score: Option<u32>,
    pub red_score: Option<u32>,
    pub rules: String,
    pub counts: RoundCounts,
    pub errors: ErrorSummary,
}

/// Escalation raised when a table is stuck
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub table_id: TableId,
    pub at: DateTime<Utc>,
    pub class: FailureClass,
    pub consecutive: u32,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    TableUpdate(TableSnapshot),
    RoundCompleted {
        table_id: TableId,
        outcome: RoundOutcome,
    },
    Alert(Alert),
    GeometryDrift {
        table_id: TableId,
        dx: i32,
        dy: i32,
    },
    SurfaceReloaded {
        at: DateTime<Utc>,
    },
    SurfaceRestored {
        at: DateTime<Utc>,
    },
    Throttle {
        cpu_percent: f32,
        factor: f64,
    },
}

/// Cloneable publishing side of the feed
#[derive(Debug, Clone)]
pub struct StatusFeed {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish without waiting; an event with no listeners is dropped
    pub fn publish(&self, event: StatusEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_CAPACITY)
    }
}
