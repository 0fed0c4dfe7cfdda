//! Multi-table round automation core.
//!
//! This crate drives up to six independently running game tables that share a
//! single captured surface. Each table runs its own pipeline task: it samples the
//! table's timer and scores, tracks round boundaries, consults the user's pattern
//! rules at the decision point, performs a two-phase click, and persists every
//! completed round before moving on.
//!
//! ## Modules
//!
//! - [`pattern`]: rule strings (`"BBP-P;BPB-B"`) and the first-match decision engine
//! - [`round`]: per-table round state machine and round records
//! - [`supervisor`]: retry, backoff, fallback and escalation per failure class
//! - [`store`]: session folder, append-only round files and the write-through cache
//! - [`table`]: pipeline actor and the [`Orchestrator`](table::Orchestrator)
//! - [`collab`]: traits for the external capture, recognition and click collaborators

pub mod collab;
pub mod config;
pub mod control;
pub mod gate;
pub mod geometry;
pub mod monitor;
pub mod pattern;
pub mod round;
pub mod schedule;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod table;

pub use config::{ConfigError, GlobalSettings};
pub use pattern::{PatternRule, RuleError, RuleSet, Team};
pub use round::{RoundOutcome, RoundStateMachine, TableStatus};
pub use status::{StatusEvent, StatusFeed};
pub use table::{Orchestrator, OrchestratorError, TableConfig};

/// Table identifier (1-based, at most [`MAX_TABLES`]).
pub type TableId = u8;

/// Maximum number of tables a single surface can host.
pub const MAX_TABLES: usize = 6;
