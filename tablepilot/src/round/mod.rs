//! Round tracking: samples in, finished rounds and action requests out.

pub mod entities;
pub mod state_machine;

pub use entities::{Decision, RoundCounts, RoundOutcome, Sample, TableStatus, Winner};
pub use state_machine::{
    ActionRequest, DEFAULT_DRIFT_CHECK_ROUNDS, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_SCORE_DROP,
    HIGH_TIMER, LOW_TIMER, MAX_TIMER, MachineConfig, Phase, RoundStateMachine, SampleError, Step,
    TransitionError,
};
