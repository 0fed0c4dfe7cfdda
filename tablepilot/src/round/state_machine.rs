//! Per-table round state machine.
//!
//! The machine consumes recognized samples and decides three things: when a
//! round ends, whether the table may act in the current round, and what the
//! finished round looked like. It performs no I/O; the pipeline drives the
//! click phases through [`RoundStateMachine::team_clicked`],
//! [`RoundStateMachine::confirmed`] and [`RoundStateMachine::action_failed`].
//!
//! ## Phases
//!
//! ```text
//! Idle -> Learning -> Deciding -> ActionPending -> Confirming -> AwaitingResult
//!                        ^                                            |
//!                        +-------------------- boundary --------------+
//! ```
//!
//! `Paused` wraps the phase held at pause time. `Error` is entered on escalation
//! and left only through [`RoundStateMachine::recover`].

use super::entities::{Decision, RoundCounts, RoundOutcome, Sample, TableStatus, Winner};
use crate::{
    TableId,
    pattern::{RuleSet, Team, decide_recent},
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Timer at or below this value closes the action window
pub const LOW_TIMER: u8 = 6;

/// Timer at or above this value right after a low timer marks a new round
pub const HIGH_TIMER: u8 = 11;

/// Largest timer a table can display
pub const MAX_TIMER: u8 = 25;

/// Rounds watched before decisions are allowed
pub const LEARNING_ROUNDS: u32 = 3;

/// Winners kept in memory for rule evaluation
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Completed rounds between geometry checks
pub const DEFAULT_DRIFT_CHECK_ROUNDS: u32 = 15;

/// Samples after a timer jump during which a score change still completes the boundary
pub const DEFAULT_BOUNDARY_WINDOW: u8 = 5;

/// Largest score decrease against the round start accepted from a single sample
pub const DEFAULT_MAX_SCORE_DROP: u32 = 2;

/// Matching samples needed before a larger score drop is believed
pub const DROP_CONFIRM_SAMPLES: u8 = 3;

/// Number of recent outcomes kept for status snapshots
const RECENT_OUTCOMES: usize = 3;

/// Machine phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Learning,
    Deciding,
    ActionPending(Team),
    Confirming(Team),
    AwaitingResult,
    Paused(Box<Phase>),
    Error,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Learning => "learning",
            Phase::Deciding => "deciding",
            Phase::ActionPending(_) => "action_pending",
            Phase::Confirming(_) => "confirming",
            Phase::AwaitingResult => "awaiting_result",
            Phase::Paused(_) => "paused",
            Phase::Error => "error",
        }
    }

    pub fn status(&self) -> TableStatus {
        match self {
            Phase::Idle => TableStatus::Idle,
            Phase::Learning => TableStatus::Learning,
            Phase::Deciding
            | Phase::ActionPending(_)
            | Phase::Confirming(_)
            | Phase::AwaitingResult => TableStatus::Active,
            Phase::Paused(_) => TableStatus::Paused,
            Phase::Error => TableStatus::Error,
        }
    }

    /// Whether samples are consumed in this phase
    pub fn observes(&self) -> bool {
        matches!(
            self,
            Phase::Learning | Phase::Deciding | Phase::AwaitingResult
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tunables for boundary detection and sample plausibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub low_timer: u8,
    pub high_timer: u8,
    pub max_timer: u8,
    pub learning_rounds: u32,
    pub history_limit: usize,

    /// Scores above this are implausible; 0 disables the check
    pub target_score: u32,

    /// Largest tolerated score decrease against the round start (both-zero resets excepted)
    pub max_score_drop: u32,

    pub drift_check_rounds: u32,
    pub boundary_window: u8,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            low_timer: LOW_TIMER,
            high_timer: HIGH_TIMER,
            max_timer: MAX_TIMER,
            learning_rounds: LEARNING_ROUNDS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            target_score: 0,
            max_score_drop: DEFAULT_MAX_SCORE_DROP,
            drift_check_rounds: DEFAULT_DRIFT_CHECK_ROUNDS,
            boundary_window: DEFAULT_BOUNDARY_WINDOW,
        }
    }
}

/// Sample rejected as implausible. Counts as a recognition failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    #[error("timer {timer} outside 0..={max}")]
    TimerOutOfRange { timer: u8, max: u8 },

    #[error("{team} score {score} above target {target}")]
    ScoreAboveTarget { team: Team, score: u32, target: u32 },

    #[error("{team} score dropped from {from} to {to}")]
    ScoreDrop { team: Team, from: u32, to: u32 },
}

/// Event applied in a phase that does not accept it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot apply '{event}' while {phase}")]
pub struct TransitionError {
    pub event: &'static str,
    pub phase: &'static str,
}

/// Requested two-phase action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub round_number: u64,
    pub team: Team,
    pub pattern: String,
}

/// Result of consuming one sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    /// Round finalized by this sample
    pub completed: Option<RoundOutcome>,

    /// Action to perform now
    pub action: Option<ActionRequest>,

    /// Geometry should be re-validated
    pub drift_check_due: bool,
}

#[derive(Debug, Clone)]
struct OpenRound {
    started_at: DateTime<Utc>,
    timer_start: u8,
    start_scores: (u32, u32),
    decision: Decision,
    pattern: Option<String>,
    window_closed: bool,
    acted: bool,
}

impl OpenRound {
    fn from_sample(sample: &Sample) -> Self {
        Self {
            started_at: sample.at,
            timer_start: sample.timer,
            start_scores: sample.scores(),
            decision: Decision::Skip,
            pattern: None,
            window_closed: false,
            acted: false,
        }
    }
}

/// Round tracking for a single table
#[derive(Debug, Clone)]
pub struct RoundStateMachine {
    table_id: TableId,
    config: MachineConfig,
    rules: RuleSet,
    phase: Phase,
    history: VecDeque<Team>,
    recent: VecDeque<RoundOutcome>,
    counts: RoundCounts,
    rounds_watched: u32,
    next_round_number: u64,
    open: Option<OpenRound>,
    last_sample: Option<Sample>,
    pending_jump: Option<u8>,
    /// Dropped scores seen on consecutive samples, and how many times
    drop_streak: Option<((u32, u32), u8)>,
    rounds_since_drift_check: u32,
}

impl RoundStateMachine {
    pub fn new(table_id: TableId, config: MachineConfig, rules: RuleSet) -> Self {
        Self {
            table_id,
            config,
            rules,
            phase: Phase::Idle,
            history: VecDeque::new(),
            recent: VecDeque::with_capacity(RECENT_OUTCOMES),
            counts: RoundCounts::default(),
            rounds_watched: 0,
            next_round_number: 1,
            open: None,
            last_sample: None,
            pending_jump: None,
            drop_streak: None,
            rounds_since_drift_check: 0,
        }
    }

    /// Continue numbering and history from rounds persisted earlier.
    ///
    /// `rounds` must be in persisted order.
    pub fn restore(&mut self, rounds: &[RoundOutcome]) {
        for outcome in rounds {
            self.push_outcome(outcome.clone());
        }
        if let Some(last) = rounds.last() {
            self.next_round_number = last.round_number + 1;
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn status(&self) -> TableStatus {
        self.phase.status()
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn set_rules(&mut self, rules: RuleSet) {
        self.rules = rules;
    }

    pub fn history(&self) -> &VecDeque<Team> {
        &self.history
    }

    /// Most recent outcomes, oldest first
    pub fn recent_outcomes(&self) -> impl Iterator<Item = &RoundOutcome> {
        self.recent.iter()
    }

    pub fn last_decision(&self) -> Option<Decision> {
        self.recent.back().map(|o| o.decision)
    }

    pub fn counts(&self) -> RoundCounts {
        self.counts
    }

    pub fn rounds_watched(&self) -> u32 {
        self.rounds_watched
    }

    pub fn next_round_number(&self) -> u64 {
        self.next_round_number
    }

    pub fn last_sample(&self) -> Option<&Sample> {
        self.last_sample.as_ref()
    }

    /// Start watching. Only valid from `Idle`.
    pub fn activate(&mut self) -> Result<(), TransitionError> {
        if self.phase != Phase::Idle {
            return Err(self.invalid("activate"));
        }
        self.rounds_watched = 0;
        self.phase = Phase::Learning;
        Ok(())
    }

    /// Consume one recognized sample.
    ///
    /// Samples arriving outside `Learning`, `Deciding` and `AwaitingResult` are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError`] when the sample is implausible. Only the count
    /// of matching dropped samples changes in that case.
    pub fn observe(&mut self, sample: Sample) -> Result<Step, SampleError> {
        let mut step = Step::default();
        if !self.phase.observes() {
            log::debug!(
                "Table {}: Ignoring sample while {}",
                self.table_id,
                self.phase
            );
            return Ok(step);
        }

        self.validate(&sample)?;

        let Some(prev) = self.last_sample.replace(sample) else {
            self.open = Some(OpenRound::from_sample(&sample));
            self.consider_action(&sample, &mut step);
            return Ok(step);
        };

        let is_reset = sample.scores() == (0, 0) && prev.scores() != (0, 0);
        if is_reset {
            log::info!("Table {}: Scores reset to 0-0", self.table_id);
            match self.open.as_mut() {
                Some(open) => open.start_scores = (0, 0),
                None => self.open = Some(OpenRound::from_sample(&sample)),
            }
            self.pending_jump = None;
        } else if self.is_boundary(&prev, &sample) {
            step.completed = Some(self.finalize(&sample));
            if self.rounds_since_drift_check >= self.config.drift_check_rounds {
                self.rounds_since_drift_check = 0;
                step.drift_check_due = true;
            }
        }

        self.consider_action(&sample, &mut step);
        Ok(step)
    }

    /// Team button was clicked
    pub fn team_clicked(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            Phase::ActionPending(team) => {
                self.phase = Phase::Confirming(team);
                Ok(())
            }
            _ => Err(self.invalid("team_clicked")),
        }
    }

    /// Confirm button was clicked; no more actions until the next boundary
    pub fn confirmed(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            Phase::Confirming(team) => {
                if let Some(open) = self.open.as_mut() {
                    open.decision = team.into();
                }
                self.phase = Phase::AwaitingResult;
                Ok(())
            }
            _ => Err(self.invalid("confirmed")),
        }
    }

    /// The two-phase action could not be completed; the round is recorded as a skip
    pub fn action_failed(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            Phase::ActionPending(_) | Phase::Confirming(_) => {
                if let Some(open) = self.open.as_mut() {
                    open.decision = Decision::Skip;
                }
                self.phase = Phase::AwaitingResult;
                Ok(())
            }
            _ => Err(self.invalid("action_failed")),
        }
    }

    /// Pause, remembering the current phase.
    ///
    /// Returns `false` if already paused or in error.
    pub fn pause(&mut self) -> bool {
        match self.phase {
            Phase::Paused(_) | Phase::Error => false,
            _ => {
                let prior = std::mem::replace(&mut self.phase, Phase::Idle);
                self.phase = Phase::Paused(Box::new(prior));
                true
            }
        }
    }

    /// Resume the phase held at pause time.
    ///
    /// Returns `false` if not paused.
    pub fn resume(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Paused(prior) => {
                self.phase = *prior;
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// Escalated failure
    pub fn fail(&mut self) {
        self.phase = Phase::Error;
    }

    /// Leave `Error` and resume deciding. History is preserved; the round in
    /// flight when the failure happened is discarded.
    pub fn recover(&mut self) -> Result<(), TransitionError> {
        if self.phase != Phase::Error {
            return Err(self.invalid("recover"));
        }
        self.open = None;
        self.last_sample = None;
        self.pending_jump = None;
        self.drop_streak = None;
        self.phase = Phase::Deciding;
        Ok(())
    }

    fn invalid(&self, event: &'static str) -> TransitionError {
        TransitionError {
            event,
            phase: self.phase.name(),
        }
    }

    fn validate(&mut self, sample: &Sample) -> Result<(), SampleError> {
        if sample.timer > self.config.max_timer {
            return Err(SampleError::TimerOutOfRange {
                timer: sample.timer,
                max: self.config.max_timer,
            });
        }

        let target = self.config.target_score;
        if target > 0 {
            for (team, score) in [(Team::Blue, sample.blue_score), (Team::Red, sample.red_score)] {
                if score > target {
                    return Err(SampleError::ScoreAboveTarget {
                        team,
                        score,
                        target,
                    });
                }
            }
        }

        self.check_drop(sample)
    }

    /// Scores only fall on a 0-0 reset, so a sample below the round start is
    /// a misread unless enough consecutive samples agree on it. Comparing to
    /// the round start keeps one noisy high read from becoming the baseline.
    fn check_drop(&mut self, sample: &Sample) -> Result<(), SampleError> {
        let Some(start) = self.open.as_ref().map(|open| open.start_scores) else {
            return Ok(());
        };
        if sample.scores() == (0, 0) {
            self.drop_streak = None;
            return Ok(());
        }

        let tolerance = self.config.max_score_drop;
        let dropped = [
            (Team::Blue, start.0, sample.blue_score),
            (Team::Red, start.1, sample.red_score),
        ]
        .into_iter()
        .find(|(_, from, to)| to < from && from - to > tolerance);

        let Some((team, from, to)) = dropped else {
            self.drop_streak = None;
            return Ok(());
        };

        let seen = match self.drop_streak {
            Some((scores, seen)) if scores == sample.scores() => seen + 1,
            _ => 1,
        };
        if seen < DROP_CONFIRM_SAMPLES {
            self.drop_streak = Some((sample.scores(), seen));
            return Err(SampleError::ScoreDrop { team, from, to });
        }

        log::info!(
            "Table {}: Accepting scores {}-{} after {} matching samples",
            self.table_id,
            sample.blue_score,
            sample.red_score,
            seen
        );
        self.drop_streak = None;
        if let Some(open) = self.open.as_mut() {
            open.start_scores = sample.scores();
        }
        Ok(())
    }

    /// Round boundary: a low-to-high timer jump together with a score change
    /// relative to the round start. When the two signals arrive on different
    /// samples, the first sample within the window that shows both completes
    /// the boundary.
    fn is_boundary(&mut self, prev: &Sample, sample: &Sample) -> bool {
        let Some(open) = &self.open else {
            return false;
        };
        let score_changed = sample.scores() != open.start_scores;
        let jumped = prev.timer <= self.config.low_timer && sample.timer >= self.config.high_timer;

        if jumped {
            if score_changed {
                self.pending_jump = None;
                return true;
            }
            self.pending_jump = Some(self.config.boundary_window);
            return false;
        }

        match self.pending_jump {
            Some(_) if score_changed => {
                self.pending_jump = None;
                true
            }
            Some(left) if left <= 1 => {
                log::debug!(
                    "Table {}: Timer jump without score change ignored",
                    self.table_id
                );
                self.pending_jump = None;
                false
            }
            Some(left) => {
                self.pending_jump = Some(left - 1);
                false
            }
            None => false,
        }
    }

    fn finalize(&mut self, sample: &Sample) -> RoundOutcome {
        let open = self
            .open
            .replace(OpenRound::from_sample(sample))
            .unwrap_or_else(|| OpenRound::from_sample(sample));

        let winner = Winner::from_scores(open.start_scores, sample.scores());
        let outcome = RoundOutcome {
            round_number: self.next_round_number,
            started_at: open.started_at,
            timer_start: open.timer_start,
            blue_score: sample.blue_score,
            red_score: sample.red_score,
            winner,
            decision: open.decision,
            pattern_matched: open.pattern,
            correct: RoundOutcome::evaluate(open.decision, winner),
        };

        self.next_round_number += 1;
        self.push_outcome(outcome.clone());
        self.rounds_watched += 1;
        self.rounds_since_drift_check += 1;

        match self.phase {
            Phase::Learning if self.rounds_watched >= self.config.learning_rounds => {
                log::info!(
                    "Table {}: Learning complete after {} rounds",
                    self.table_id,
                    self.rounds_watched
                );
                self.phase = Phase::Deciding;
            }
            Phase::AwaitingResult => self.phase = Phase::Deciding,
            _ => {}
        }

        outcome
    }

    fn push_outcome(&mut self, outcome: RoundOutcome) {
        if let Some(team) = outcome.winner.team() {
            self.history.push_back(team);
            while self.history.len() > self.config.history_limit {
                self.history.pop_front();
            }
        }
        self.counts.record(&outcome);
        if self.recent.len() == RECENT_OUTCOMES {
            self.recent.pop_front();
        }
        self.recent.push_back(outcome);
    }

    fn consider_action(&mut self, sample: &Sample, step: &mut Step) {
        if self.phase != Phase::Deciding {
            return;
        }
        let Some(open) = self.open.as_mut() else {
            return;
        };
        if open.acted || open.window_closed {
            return;
        }

        if sample.timer <= self.config.low_timer {
            open.window_closed = true;
            return;
        }

        if let Some(rule) = decide_recent(self.history.iter().copied(), &self.rules) {
            open.acted = true;
            open.pattern = Some(rule.to_string());
            self.phase = Phase::ActionPending(rule.action);
            step.action = Some(ActionRequest {
                round_number: self.next_round_number,
                team: rule.action,
                pattern: rule.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Team::{Blue, Red};

    fn sample(timer: u8, scores: (u32, u32)) -> Sample {
        Sample::new(timer, scores.0, scores.1)
    }

    fn machine(rules: &str) -> RoundStateMachine {
        let mut m = RoundStateMachine::new(1, MachineConfig::default(), rules.parse().unwrap());
        m.activate().unwrap();
        m
    }

    /// Count down the current round, then jump to 25 with the winner's score bumped.
    /// Any requested action is clicked and confirmed straight away.
    fn play_round(m: &mut RoundStateMachine, scores: &mut (u32, u32), winner: Team) -> Vec<Step> {
        let mut steps = Vec::new();
        for timer in [20, 15, 10, 7, 5, 2, 0] {
            steps.push(observe(m, sample(timer, *scores)));
        }
        match winner {
            Blue => scores.0 += 1,
            Red => scores.1 += 1,
        }
        steps.push(observe(m, sample(25, *scores)));
        steps
    }

    fn observe(m: &mut RoundStateMachine, s: Sample) -> Step {
        let step = m.observe(s).unwrap();
        if step.action.is_some() {
            m.team_clicked().unwrap();
            m.confirmed().unwrap();
        }
        step
    }

    fn completed(steps: &[Step]) -> Vec<RoundOutcome> {
        steps.iter().filter_map(|s| s.completed.clone()).collect()
    }

    fn learn(m: &mut RoundStateMachine, winners: [Team; 3]) -> (u32, u32) {
        let mut scores = (0, 0);
        m.observe(sample(25, scores)).unwrap();
        for w in winners {
            play_round(m, &mut scores, w);
        }
        scores
    }

    #[test]
    fn test_activation_starts_learning() {
        let m = machine("BBP-P");
        assert_eq!(m.phase(), &Phase::Learning);
        assert_eq!(m.status(), TableStatus::Learning);
    }

    #[test]
    fn test_learning_needs_three_rounds() {
        let mut m = machine("PPP-P");
        let mut scores = (0, 0);
        m.observe(sample(25, scores)).unwrap();
        play_round(&mut m, &mut scores, Blue);
        play_round(&mut m, &mut scores, Blue);
        assert_eq!(m.phase(), &Phase::Learning);
        play_round(&mut m, &mut scores, Blue);
        assert_eq!(m.rounds_watched(), 3);
        assert!(matches!(
            m.phase(),
            Phase::Deciding | Phase::AwaitingResult
        ));
    }

    #[test]
    fn test_single_countdown_finalizes_exactly_one_round() {
        let mut m = machine("BBP-P");
        let mut scores = (2, 3);
        m.observe(sample(25, scores)).unwrap();
        let steps = play_round(&mut m, &mut scores, Blue);
        let rounds = completed(&steps);
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].round_number, 1);
        assert_eq!(rounds[0].winner, Winner::Blue);
        assert_eq!((rounds[0].blue_score, rounds[0].red_score), (3, 3));
        assert_eq!(rounds[0].timer_start, 25);
    }

    #[test]
    fn test_matching_history_triggers_blue() {
        let mut m = machine("BBP-P;BPB-B");
        let mut scores = (0, 0);
        m.observe(sample(25, scores)).unwrap();
        play_round(&mut m, &mut scores, Red);
        play_round(&mut m, &mut scores, Red);
        let steps = play_round(&mut m, &mut scores, Blue);

        let action = steps.last().unwrap().action.clone().unwrap();
        assert_eq!(action.team, Blue);
        assert_eq!(action.pattern, "BBP-P");
        assert_eq!(action.round_number, 4);
        assert_eq!(m.phase(), &Phase::AwaitingResult);

        let steps = play_round(&mut m, &mut scores, Blue);
        let round = completed(&steps).pop().unwrap();
        assert_eq!(round.decision, Decision::Blue);
        assert_eq!(round.pattern_matched.as_deref(), Some("BBP-P"));
        assert_eq!(round.correct, Some(true));
    }

    #[test]
    fn test_no_match_records_skip() {
        let mut m = machine("BBP-P");
        let mut scores = learn(&mut m, [Red, Blue, Red]);
        assert_eq!(m.phase(), &Phase::Deciding);

        let steps = play_round(&mut m, &mut scores, Red);
        assert!(steps.iter().all(|s| s.action.is_none()));
        let round = completed(&steps).pop().unwrap();
        assert_eq!(round.decision, Decision::Skip);
        assert_eq!(round.correct, None);
    }

    #[test]
    fn test_no_action_after_countdown_reached() {
        let mut m = machine("PPP-P");
        let mut scores = learn(&mut m, [Red, Red, Red]);
        assert_eq!(m.phase(), &Phase::Deciding);
        for timer in [20, 10, 6] {
            assert!(m.observe(sample(timer, scores)).unwrap().action.is_none());
        }

        // Rules now match, but this round's window already closed.
        m.set_rules("BBB-P".parse().unwrap());
        assert!(m.observe(sample(4, scores)).unwrap().action.is_none());
        // Noisy read above the threshold within the same round.
        assert!(m.observe(sample(9, scores)).unwrap().action.is_none());
        m.observe(sample(0, scores)).unwrap();

        scores.1 += 1;
        let step = m.observe(sample(25, scores)).unwrap();
        assert_eq!(step.completed.unwrap().decision, Decision::Skip);
        assert_eq!(step.action.unwrap().team, Blue);
    }

    #[test]
    fn test_countdown_first_sample_is_skip() {
        let mut m = machine("BBB-P");
        let mut scores = learn(&mut m, [Red, Red, Red]);
        assert_eq!(m.phase(), &Phase::AwaitingResult);
        m.fail();
        m.recover().unwrap();

        // Baseline discarded; first sample lands in the countdown.
        let step = m.observe(sample(4, scores)).unwrap();
        assert!(step.action.is_none());
        // Noisy read above the low threshold in the same round.
        let step = m.observe(sample(8, scores)).unwrap();
        assert!(step.action.is_none());
        m.observe(sample(0, scores)).unwrap();
        scores.0 += 1;
        let step = m.observe(sample(25, scores)).unwrap();
        let round = step.completed.unwrap();
        assert_eq!(round.decision, Decision::Skip);
        assert_eq!(round.pattern_matched, None);
    }

    #[test]
    fn test_round_numbers_increase_by_one() {
        let mut m = machine("PPP-P");
        let mut scores = (0, 0);
        m.observe(sample(25, scores)).unwrap();
        let mut numbers = Vec::new();
        for w in [Blue, Red, Blue, Blue, Red, Red] {
            let steps = play_round(&mut m, &mut scores, w);
            numbers.extend(completed(&steps).iter().map(|r| r.round_number));
            if m.rounds_watched() == 3 {
                m.pause();
                m.resume();
            }
        }
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_restore_continues_numbering() {
        let mut m = machine("BBP-P");
        let mut scores = (0, 0);
        m.observe(sample(25, scores)).unwrap();
        let rounds: Vec<_> = [Red, Red]
            .into_iter()
            .flat_map(|w| completed(&play_round(&mut m, &mut scores, w)))
            .collect();

        let mut restored = RoundStateMachine::new(1, MachineConfig::default(), m.rules().clone());
        restored.restore(&rounds);
        assert_eq!(restored.next_round_number(), 3);
        assert_eq!(restored.history().len(), 2);
        assert_eq!(restored.counts().rounds, 2);
    }

    #[test]
    fn test_late_score_change_completes_pending_boundary() {
        let mut m = machine("BBP-P");
        let scores = (1, 1);
        m.observe(sample(25, scores)).unwrap();
        for timer in [10, 5, 0] {
            m.observe(sample(timer, scores)).unwrap();
        }
        let step = m.observe(sample(25, scores)).unwrap();
        assert!(step.completed.is_none());
        let step = m.observe(sample(24, (1, 2))).unwrap();
        let round = step.completed.unwrap();
        assert_eq!(round.winner, Winner::Red);
        assert_eq!(round.round_number, 1);
    }

    #[test]
    fn test_jump_without_score_change_expires() {
        let mut m = machine("BBP-P");
        let scores = (1, 1);
        m.observe(sample(25, scores)).unwrap();
        m.observe(sample(0, scores)).unwrap();
        m.observe(sample(25, scores)).unwrap();
        for timer in (19..25).rev() {
            assert!(m.observe(sample(timer, scores)).unwrap().completed.is_none());
        }
        assert!(m.observe(sample(18, (2, 1))).unwrap().completed.is_none());
    }

    #[test]
    fn test_implausible_samples_rejected() {
        let mut m = RoundStateMachine::new(
            2,
            MachineConfig {
                target_score: 10,
                ..MachineConfig::default()
            },
            "BBP-P".parse().unwrap(),
        );
        m.activate().unwrap();
        assert!(matches!(
            m.observe(sample(30, (0, 0))),
            Err(SampleError::TimerOutOfRange { timer: 30, .. })
        ));
        assert!(matches!(
            m.observe(sample(20, (11, 0))),
            Err(SampleError::ScoreAboveTarget { team: Blue, .. })
        ));
        m.observe(sample(20, (5, 4))).unwrap();
        assert!(matches!(
            m.observe(sample(19, (5, 1))),
            Err(SampleError::ScoreDrop { team: Red, from: 4, to: 1 })
        ));
        // A full reset starts a new match.
        assert!(m.observe(sample(18, (0, 0))).unwrap().completed.is_none());
        assert_eq!(m.last_sample().unwrap().scores(), (0, 0));
    }

    #[test]
    fn test_one_high_misread_does_not_poison_later_samples() {
        let mut m = machine("BBP-P");
        m.observe(sample(20, (5, 2))).unwrap();
        // Red 2 misread as 3, then the true score comes back.
        m.observe(sample(19, (5, 3))).unwrap();
        let rejected = (0..11u8)
            .filter(|t| m.observe(sample(18 - t, (5, 2))).is_err())
            .count();
        assert_eq!(rejected, 0);
        assert_eq!(m.counts(), RoundCounts::default());
    }

    #[test]
    fn test_small_drop_within_tolerance_accepted() {
        let mut m = machine("BBP-P");
        m.observe(sample(20, (5, 4))).unwrap();
        assert!(m.observe(sample(19, (5, 2))).is_ok());
    }

    #[test]
    fn test_large_drop_accepted_once_samples_agree() {
        let mut m = machine("BBP-P");
        m.observe(sample(20, (9, 4))).unwrap();
        for timer in [19, 18] {
            assert!(matches!(
                m.observe(sample(timer, (5, 4))),
                Err(SampleError::ScoreDrop { team: Blue, from: 9, to: 5 })
            ));
        }
        assert!(m.observe(sample(17, (5, 4))).is_ok());
        assert!(m.observe(sample(16, (5, 4))).is_ok());

        // The accepted scores are the new round start, so the next win is blue.
        m.observe(sample(2, (5, 4))).unwrap();
        let step = m.observe(sample(25, (6, 4))).unwrap();
        assert_eq!(step.completed.unwrap().winner, Winner::Blue);
    }

    #[test]
    fn test_drop_streak_restarts_on_different_reading() {
        let mut m = machine("BBP-P");
        m.observe(sample(20, (9, 4))).unwrap();
        assert!(m.observe(sample(19, (5, 4))).is_err());
        assert!(m.observe(sample(18, (5, 4))).is_err());
        assert!(m.observe(sample(17, (4, 4))).is_err());
        assert!(m.observe(sample(16, (5, 4))).is_err());
    }

    #[test]
    fn test_pause_restores_prior_phase() {
        let mut m = machine("BBP-P");
        assert!(m.pause());
        assert!(!m.pause());
        assert_eq!(m.status(), TableStatus::Paused);
        assert!(m.observe(sample(20, (0, 0))).unwrap() == Step::default());
        assert!(m.resume());
        assert_eq!(m.phase(), &Phase::Learning);
        assert!(!m.resume());
    }

    #[test]
    fn test_error_requires_recover() {
        let mut m = machine("BBP-P");
        m.fail();
        assert_eq!(m.status(), TableStatus::Error);
        assert!(!m.pause());
        assert!(m.activate().is_err());
        m.recover().unwrap();
        assert_eq!(m.phase(), &Phase::Deciding);
        assert!(m.recover().is_err());
    }

    #[test]
    fn test_click_phases_enforced() {
        let mut m = machine("BBP-P");
        assert!(m.team_clicked().is_err());
        assert!(m.confirmed().is_err());
        assert!(m.action_failed().is_err());
    }

    #[test]
    fn test_drift_check_requested_periodically() {
        let mut m = RoundStateMachine::new(
            1,
            MachineConfig {
                drift_check_rounds: 2,
                ..MachineConfig::default()
            },
            "BBP-P".parse().unwrap(),
        );
        m.activate().unwrap();
        let mut scores = (0, 0);
        m.observe(sample(25, scores)).unwrap();
        let due: Vec<bool> = (0..4)
            .map(|_| {
                play_round(&mut m, &mut scores, Red)
                    .iter()
                    .any(|s| s.drift_check_due)
            })
            .collect();
        assert_eq!(due, vec![false, true, false, true]);
    }
}
