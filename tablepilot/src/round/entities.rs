//! Round records and per-table status types.

use crate::pattern::Team;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recognized observation of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub timer: u8,
    pub blue_score: u32,
    pub red_score: u32,
    pub at: DateTime<Utc>,
}

impl Sample {
    pub fn new(timer: u8, blue_score: u32, red_score: u32) -> Self {
        Self {
            timer,
            blue_score,
            red_score,
            at: Utc::now(),
        }
    }

    pub fn scores(&self) -> (u32, u32) {
        (self.blue_score, self.red_score)
    }
}

/// What the table did in a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Red,
    Blue,
    Skip,
}

impl Decision {
    pub fn team(self) -> Option<Team> {
        match self {
            Decision::Red => Some(Team::Red),
            Decision::Blue => Some(Team::Blue),
            Decision::Skip => None,
        }
    }
}

impl From<Team> for Decision {
    fn from(team: Team) -> Self {
        match team {
            Team::Red => Decision::Red,
            Team::Blue => Decision::Blue,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Red => write!(f, "red"),
            Decision::Blue => write!(f, "blue"),
            Decision::Skip => write!(f, "skip"),
        }
    }
}

/// Derived winner of a finished round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Red,
    Blue,
    None,
}

impl Winner {
    /// Winner from the score movement between round start and finish.
    ///
    /// Whichever side gained more points wins; equal gains give [`Winner::None`].
    pub fn from_scores(start: (u32, u32), end: (u32, u32)) -> Self {
        let blue_gain = end.0.saturating_sub(start.0);
        let red_gain = end.1.saturating_sub(start.1);
        match blue_gain.cmp(&red_gain) {
            std::cmp::Ordering::Greater => Winner::Blue,
            std::cmp::Ordering::Less => Winner::Red,
            std::cmp::Ordering::Equal => Winner::None,
        }
    }

    pub fn team(self) -> Option<Team> {
        match self {
            Winner::Red => Some(Team::Red),
            Winner::Blue => Some(Team::Blue),
            Winner::None => None,
        }
    }
}

/// A finished round. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Per-table round number, strictly increasing by one
    pub round_number: u64,

    /// When the round started (first sample after the previous boundary)
    pub started_at: DateTime<Utc>,

    /// Timer value at round start
    pub timer_start: u8,

    pub blue_score: u32,
    pub red_score: u32,
    pub winner: Winner,
    pub decision: Decision,

    /// Rule that produced the decision, in `HHH-D` form
    pub pattern_matched: Option<String>,

    /// Whether the decision matched the winner; `None` for skipped rounds
    pub correct: Option<bool>,
}

impl RoundOutcome {
    pub fn evaluate(decision: Decision, winner: Winner) -> Option<bool> {
        decision
            .team()
            .map(|team| winner.team().is_some_and(|w| w == team))
    }
}

/// Coarse table status shown on the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Idle,
    Learning,
    Active,
    Paused,
    Error,
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableStatus::Idle => write!(f, "idle"),
            TableStatus::Learning => write!(f, "learning"),
            TableStatus::Active => write!(f, "active"),
            TableStatus::Paused => write!(f, "paused"),
            TableStatus::Error => write!(f, "error"),
        }
    }
}

/// Raw per-table counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCounts {
    pub rounds: u64,
    pub decisions: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub skipped: u64,
}

impl RoundCounts {
    pub fn record(&mut self, outcome: &RoundOutcome) {
        self.rounds += 1;
        match outcome.correct {
            Some(true) => {
                self.decisions += 1;
                self.correct += 1;
            }
            Some(false) => {
                self.decisions += 1;
                self.incorrect += 1;
            }
            None => self.skipped += 1,
        }
    }
}
