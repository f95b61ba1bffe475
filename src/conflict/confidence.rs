//! Confidence scoring for generated resolution candidates (§4.7 step 5 /
//! confidence formula, §9 Open Question (c)).

use std::collections::HashMap;
use std::sync::Mutex;

use super::strategies::Candidate;
use super::DetectedConflict;

/// Lines past which a candidate's score is penalized; large auto-generated
/// resolutions are riskier to trust blindly.
const SIZE_PENALTY_THRESHOLD_LINES: usize = 200;

/// Starting success rate for a strategy with no history yet (§9 Open
/// Question (c): seeded neutral rather than 0 or 1, so a brand-new
/// strategy neither dominates nor is starved out).
const INITIAL_SUCCESS_RATE: f64 = 0.5;

/// EMA smoothing factor for [`ConfidenceScorer::record_outcome`].
const EMA_ALPHA: f64 = 0.2;

/// Scores a candidate resolution in `[0, 1]` from the conflict's complexity
/// factor, textual similarity between the two sides, an AST-validity
/// heuristic, a rolling per-strategy success rate, and a size penalty.
pub struct ConfidenceScorer {
    success_rates: Mutex<HashMap<String, f64>>,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfidenceScorer {
    /// Construct a scorer with no strategy history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            success_rates: Mutex::new(HashMap::new()),
        }
    }

    /// Score `candidate` for `conflict`.
    #[must_use]
    pub fn score(&self, conflict: &DetectedConflict, candidate: &Candidate) -> f64 {
        let complexity = conflict.conflict_type.complexity_factor();
        let similarity = token_similarity(&conflict.markers);
        let ast_bonus = if candidate.is_ast_valid { 1.0 } else { 0.4 };
        let success_rate = self.success_rate_for(&candidate.strategy_name);
        let size_penalty = size_penalty(&candidate.content);

        let raw = 0.35 * complexity + 0.2 * similarity + 0.2 * ast_bonus + 0.25 * success_rate;
        (raw - size_penalty).clamp(0.0, 1.0)
    }

    /// The rolling success rate for `strategy_name`, or [`INITIAL_SUCCESS_RATE`]
    /// if it has no recorded outcomes yet.
    #[must_use]
    pub fn success_rate_for(&self, strategy_name: &str) -> f64 {
        self.success_rates
            .lock()
            .ok()
            .and_then(|rates| rates.get(strategy_name).copied())
            .unwrap_or(INITIAL_SUCCESS_RATE)
    }

    /// Fold in an observed outcome (suggestion accepted/applied or
    /// rejected) for `strategy_name` via an exponential moving average.
    pub fn record_outcome(&self, strategy_name: &str, accepted: bool) {
        let Ok(mut rates) = self.success_rates.lock() else {
            return;
        };
        let prior = rates.get(strategy_name).copied().unwrap_or(INITIAL_SUCCESS_RATE);
        let observed = if accepted { 1.0 } else { 0.0 };
        rates.insert(strategy_name.to_owned(), prior + EMA_ALPHA * (observed - prior));
    }
}

fn size_penalty(content: &str) -> f64 {
    let lines = content.lines().count();
    if lines <= SIZE_PENALTY_THRESHOLD_LINES {
        0.0
    } else {
        let excess = (lines - SIZE_PENALTY_THRESHOLD_LINES) as f64;
        (excess / 1000.0).min(0.3)
    }
}

/// A coarse line-overlap similarity between the two sides of every region,
/// averaged across regions. High overlap between `ours`/`theirs` suggests
/// the conflict is mostly cosmetic.
fn token_similarity(markers: &super::ConflictMarkers) -> f64 {
    if markers.regions.is_empty() {
        return 0.0;
    }
    let total: f64 = markers
        .regions
        .iter()
        .map(|region| {
            let ours: std::collections::HashSet<String> = region.ours.lines().map(super::classify::normalize_whitespace).collect();
            let theirs: std::collections::HashSet<String> = region.theirs.lines().map(super::classify::normalize_whitespace).collect();
            if ours.is_empty() && theirs.is_empty() {
                return 1.0;
            }
            let intersection = ours.intersection(&theirs).count() as f64;
            let union = ours.union(&theirs).count().max(1) as f64;
            intersection / union
        })
        .sum();
    total / markers.regions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::classify::Severity;
    use crate::conflict::parser::{ConflictMarkers, MarkerRegion};
    use crate::model::conflict::ConflictType;
    use std::path::PathBuf;

    fn conflict(conflict_type: ConflictType, ours: &str, theirs: &str) -> DetectedConflict {
        DetectedConflict {
            file_path: PathBuf::from("f.rs"),
            markers: ConflictMarkers {
                raw: String::new(),
                regions: vec![MarkerRegion {
                    base: None,
                    ours: ours.to_owned(),
                    theirs: theirs.to_owned(),
                }],
            },
            conflict_type,
            severity: Severity::Low,
        }
    }

    fn candidate(strategy: &str, content: &str, ast_valid: bool) -> Candidate {
        Candidate {
            strategy_name: strategy.to_owned(),
            content: content.to_owned(),
            explanation: String::new(),
            is_ast_valid: ast_valid,
            confidence: 0.0,
        }
    }

    #[test]
    fn trivial_conflict_scores_higher_than_semantic() {
        let scorer = ConfidenceScorer::new();
        let trivial = conflict(ConflictType::Trivial, "a", "a");
        let semantic = conflict(ConflictType::Semantic, "a", "b");
        let trivial_score = scorer.score(&trivial, &candidate("TrivialMerge", "a", true));
        let semantic_score = scorer.score(&semantic, &candidate("Fallback", "b", true));
        assert!(trivial_score > semantic_score);
    }

    #[test]
    fn unseen_strategy_uses_neutral_success_rate() {
        let scorer = ConfidenceScorer::new();
        assert_eq!(scorer.success_rate_for("Novel"), INITIAL_SUCCESS_RATE);
    }

    #[test]
    fn recording_acceptance_raises_success_rate() {
        let scorer = ConfidenceScorer::new();
        scorer.record_outcome("TrivialMerge", true);
        assert!(scorer.success_rate_for("TrivialMerge") > INITIAL_SUCCESS_RATE);
    }

    #[test]
    fn recording_rejection_lowers_success_rate() {
        let scorer = ConfidenceScorer::new();
        scorer.record_outcome("Fallback", false);
        assert!(scorer.success_rate_for("Fallback") < INITIAL_SUCCESS_RATE);
    }

    #[test]
    fn oversized_candidate_is_penalized() {
        let scorer = ConfidenceScorer::new();
        let c = conflict(ConflictType::Trivial, "a", "a");
        let big_content = "line\n".repeat(500);
        let small = scorer.score(&c, &candidate("TrivialMerge", "a", true));
        let big = scorer.score(&c, &candidate("TrivialMerge", &big_content, true));
        assert!(big < small);
    }
}
