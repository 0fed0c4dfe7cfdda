//! Table pipelines and the orchestrator that runs them.
//!
//! This module implements:
//! - TablePipeline: async actor driving a single table
//! - Orchestrator: roster of up to six pipelines sharing one capture surface
//! - Command-based communication with tokio channels
//!
//! ## Architecture
//!
//! Each table runs in its own Tokio task with an mpsc command inbox. A tick
//! captures the table through the shared [`CaptureGate`](crate::gate::CaptureGate),
//! feeds the reading to the table's round state machine, and performs any
//! requested action. Completed rounds are written through the persistence
//! cache before the next tick is scheduled.
//!
//! Global signals (reload pause, CPU throttle) reach the pipelines through
//! a `watch` channel and are honored between ticks.

pub mod actor;
pub mod config;
pub mod manager;
pub mod messages;

pub use actor::{PipelineContext, TableHandle, TablePipeline};
pub use config::{RosterConfig, RosterTable, TableConfig};
pub use manager::{Orchestrator, OrchestratorError};
pub use messages::{TableCommand, TableResponse};
