//! Selection strategy: the post-match filter applied to every evaluation.

use serde::{Deserialize, Serialize};

use crate::evaluator::MatchedRule;

/// How the final match list is filtered before being returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionStrategy {
    /// Return every matching rule
    #[default]
    AllMatches,
    /// Keep only the matches tied for the highest priority
    HighestPriority,
}

/// Apply `strategy` to `matches` in place. `HighestPriority` is a stable
/// filter: ties keep their input order.
pub(crate) fn apply(strategy: SelectionStrategy, matches: &mut Vec<MatchedRule>) {
    match strategy {
        SelectionStrategy::AllMatches => {}
        SelectionStrategy::HighestPriority => {
            let Some(max) = matches.iter().map(|m| m.priority).max() else {
                return;
            };
            matches.retain(|m| m.priority == max);
        }
    }
}
