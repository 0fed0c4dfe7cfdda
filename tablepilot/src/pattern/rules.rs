//! Rule string parsing and validation.

use super::Team;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Rule parsing errors. Indices are 1-based, in the order rules appear.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("Pattern string is empty")]
    Empty,

    #[error("Rule {index} is empty (stray ';'?)")]
    EmptyRule { index: usize },

    #[error("Rule {index} '{rule}': expected HHH-D with a single '-'")]
    Shape { index: usize, rule: String },

    #[error("Rule {index} '{rule}': history must be exactly 3 characters, got {len}")]
    HistoryLength {
        index: usize,
        rule: String,
        len: usize,
    },

    #[error("Rule {index} '{rule}': invalid history character '{ch}' (expected B or P)")]
    HistoryChar { index: usize, rule: String, ch: char },

    #[error("Rule {index} '{rule}': decision must be exactly 1 character, got {len}")]
    DecisionLength {
        index: usize,
        rule: String,
        len: usize,
    },

    #[error("Rule {index} '{rule}': invalid decision character '{ch}' (expected B or P)")]
    DecisionChar { index: usize, rule: String, ch: char },
}

/// A single rule: when the last three winners equal `history`, back `action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternRule {
    /// Last three winners, oldest first
    pub history: [Team; 3],

    /// Side to back when the history matches
    pub action: Team,
}

impl PatternRule {
    pub fn new(history: [Team; 3], action: Team) -> Self {
        Self { history, action }
    }

    fn parse(index: usize, raw: &str) -> Result<Self, RuleError> {
        let rule = raw.trim().to_ascii_uppercase();
        if rule.is_empty() {
            return Err(RuleError::EmptyRule { index });
        }

        let mut parts = rule.split('-');
        let (Some(history), Some(decision), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RuleError::Shape {
                index,
                rule: rule.clone(),
            });
        };

        let history_len = history.chars().count();
        if history_len != 3 {
            return Err(RuleError::HistoryLength {
                index,
                len: history_len,
                rule: rule.clone(),
            });
        }

        let mut teams = [Team::Red; 3];
        for (slot, ch) in teams.iter_mut().zip(history.chars()) {
            *slot = Team::from_code(ch).ok_or_else(|| RuleError::HistoryChar {
                index,
                rule: rule.clone(),
                ch,
            })?;
        }

        let mut decision_chars = decision.chars();
        let action = match (decision_chars.next(), decision_chars.next()) {
            (Some(ch), None) => Team::from_code(ch).ok_or_else(|| RuleError::DecisionChar {
                index,
                rule: rule.clone(),
                ch,
            })?,
            _ => {
                return Err(RuleError::DecisionLength {
                    index,
                    len: decision.chars().count(),
                    rule: rule.clone(),
                });
            }
        };

        Ok(Self::new(teams, action))
    }
}

impl std::fmt::Display for PatternRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for team in self.history {
            write!(f, "{}", team.code())?;
        }
        write!(f, "-{}", self.action.code())
    }
}

/// Ordered rules; earlier rules take precedence.
///
/// Serialized as the canonical rule string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuleSet {
    rules: Vec<PatternRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<PatternRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromStr for RuleSet {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RuleError::Empty);
        }

        let rules = trimmed
            .split(';')
            .enumerate()
            .map(|(i, raw)| PatternRule::parse(i + 1, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }
}

impl TryFrom<String> for RuleSet {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuleSet> for String {
    fn from(value: RuleSet) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{rule}")?;
        }
        Ok(())
    }
}
