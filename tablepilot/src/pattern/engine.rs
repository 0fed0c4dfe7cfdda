//! First-match decision engine.

use super::{PatternRule, RuleSet, Team};

/// Return the first rule whose history equals `recent`, if any.
///
/// # Arguments
///
/// * `recent` - The last three winners, oldest first
/// * `rules` - Rules in priority order
///
/// # Returns
///
/// * `Option<&PatternRule>` - The winning rule, or `None` if nothing matches
pub fn decide<'a>(recent: &[Team; 3], rules: &'a RuleSet) -> Option<&'a PatternRule> {
    rules.rules().iter().find(|rule| &rule.history == recent)
}

/// Like [`decide`], reading the last three entries of a longer history.
///
/// Returns `None` while fewer than three outcomes are known.
pub fn decide_recent<'a, I>(history: I, rules: &'a RuleSet) -> Option<&'a PatternRule>
where
    I: IntoIterator<Item = Team>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut tail = history.into_iter().rev();
    let (Some(c), Some(b), Some(a)) = (tail.next(), tail.next(), tail.next()) else {
        return None;
    };
    decide(&[a, b, c], rules)
}
