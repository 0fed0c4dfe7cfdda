//! Pattern rules and the decision engine.
//!
//! Rules are written as `HHH-D` entries separated by `;`, where `HHH` is the last
//! three round winners (oldest first) and `D` is the side to back. `B` stands for
//! the red side and `P` for the blue side, matching the labels on the table.
//!
//! ```
//! use tablepilot::pattern::{RuleSet, Team, decide};
//!
//! let rules: RuleSet = "BBP-P;BPB-B".parse().unwrap();
//! let rule = decide(&[Team::Red, Team::Red, Team::Blue], &rules).unwrap();
//! assert_eq!(rule.action, Team::Blue);
//! ```

pub mod engine;
pub mod rules;

pub use engine::{decide, decide_recent};
pub use rules::{PatternRule, RuleError, RuleSet};

use serde::{Deserialize, Serialize};

/// One side of a table. Used both for round winners and for actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    /// Single-letter code used in rule strings
    pub fn code(self) -> char {
        match self {
            Team::Red => 'B',
            Team::Blue => 'P',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'B' => Some(Team::Red),
            'P' => Some(Team::Blue),
            _ => None,
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Team::Red => write!(f, "red"),
            Team::Blue => write!(f, "blue"),
        }
    }
}
