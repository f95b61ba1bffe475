//! The resolution strategy chain (§4.7 step 5): each strategy proposes a
//! candidate resolution; the confidence scorer ranks the results.

use super::DetectedConflict;
use crate::model::conflict::ConflictType;

/// A candidate resolution produced by one strategy for one conflict. Not
/// yet scored; [`super::confidence::ConfidenceScorer`] fills in
/// `confidence` before this is turned into a persisted
/// [`crate::model::suggestion::AutoFixSuggestion`].
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Name of the strategy that produced this, e.g. `"TrivialMerge"`.
    pub strategy_name: String,
    /// The proposed resolved content for the conflicted region(s).
    pub content: String,
    /// Human-readable rationale.
    pub explanation: String,
    /// Whether the proposed content looks structurally sound (balanced
    /// delimiters). Feeds the confidence scorer's AST bonus.
    pub is_ast_valid: bool,
    /// Filled in by [`super::confidence::ConfidenceScorer::score`]; zero
    /// until then.
    pub confidence: f64,
}

/// A single step of the resolution chain.
pub trait ResolutionStrategy: Send + Sync {
    /// This strategy's name, used for persistence and success-rate
    /// tracking.
    fn name(&self) -> &'static str;

    /// Whether this strategy applies to `conflict` at all.
    fn can_handle(&self, conflict: &DetectedConflict) -> bool;

    /// Produce a candidate resolution. Only called when [`Self::can_handle`]
    /// returned `true`.
    fn resolve(&self, conflict: &DetectedConflict) -> Candidate;

    /// Known risks of trusting this strategy's output without review.
    fn identify_risks(&self, conflict: &DetectedConflict) -> Vec<String>;
}

fn is_balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

fn joined(region_field: impl Fn(&super::parser::MarkerRegion) -> &str, conflict: &DetectedConflict) -> String {
    conflict.markers.regions.iter().map(|r| region_field(r)).collect::<Vec<_>>().join("\n")
}

/// Resolves conflicts where both sides converge to the same content, or
/// where only one side actually diverged from the merge base.
pub struct TrivialMerge;

impl ResolutionStrategy for TrivialMerge {
    fn name(&self) -> &'static str {
        "TrivialMerge"
    }

    fn can_handle(&self, conflict: &DetectedConflict) -> bool {
        conflict.conflict_type == ConflictType::Trivial
    }

    fn resolve(&self, conflict: &DetectedConflict) -> Candidate {
        let content = conflict
            .markers
            .regions
            .first()
            .map(|r| {
                if let Some(base) = &r.base {
                    if r.ours.trim() == base.trim() {
                        r.theirs.clone()
                    } else {
                        r.ours.clone()
                    }
                } else if r.ours.trim() == r.theirs.trim() {
                    r.ours.clone()
                } else {
                    r.ours.clone()
                }
            })
            .unwrap_or_default();
        Candidate {
            strategy_name: self.name().to_owned(),
            is_ast_valid: is_balanced(&content),
            explanation: "both sides converge, or only one side changed from the merge base".to_owned(),
            content,
            confidence: 0.0,
        }
    }

    fn identify_risks(&self, _conflict: &DetectedConflict) -> Vec<String> {
        Vec::new()
    }
}

/// Resolves conflicts where both sides add distinct, non-overlapping
/// content by concatenating them.
pub struct StructuralMerge;

impl ResolutionStrategy for StructuralMerge {
    fn name(&self) -> &'static str {
        "StructuralMerge"
    }

    fn can_handle(&self, conflict: &DetectedConflict) -> bool {
        conflict.conflict_type == ConflictType::Structural
    }

    fn resolve(&self, conflict: &DetectedConflict) -> Candidate {
        let content = conflict
            .markers
            .regions
            .iter()
            .map(|r| format!("{}\n{}", r.ours, r.theirs))
            .collect::<Vec<_>>()
            .join("\n");
        Candidate {
            strategy_name: self.name().to_owned(),
            is_ast_valid: is_balanced(&content),
            explanation: "both sides add distinct content; concatenated ours followed by theirs".to_owned(),
            content,
            confidence: 0.0,
        }
    }

    fn identify_risks(&self, _conflict: &DetectedConflict) -> Vec<String> {
        vec!["ordering between the two additions was not verified".to_owned()]
    }
}

/// Proposes ours-wins as a candidate for overlapping concurrent edits,
/// flagged with risks rather than silently applied.
pub struct ConcurrentEdit;

impl ResolutionStrategy for ConcurrentEdit {
    fn name(&self) -> &'static str {
        "ConcurrentEdit"
    }

    fn can_handle(&self, conflict: &DetectedConflict) -> bool {
        matches!(conflict.conflict_type, ConflictType::ConcurrentEdit | ConflictType::Semantic)
    }

    fn resolve(&self, conflict: &DetectedConflict) -> Candidate {
        let content = joined(|r| &r.ours, conflict);
        Candidate {
            strategy_name: self.name().to_owned(),
            is_ast_valid: is_balanced(&content),
            explanation: "same region edited on both sides; defaulting to ours pending review".to_owned(),
            content,
            confidence: 0.0,
        }
    }

    fn identify_risks(&self, _conflict: &DetectedConflict) -> Vec<String> {
        vec![
            "theirs-side changes are discarded in this candidate".to_owned(),
            "same logical construct was edited on both sides".to_owned(),
        ]
    }
}

/// Last-resort strategy: always applies, proposes ours-wins, and reports
/// the lowest possible confidence contribution via its empty-handed
/// explanation. Ensures every conflict gets at least one candidate.
pub struct Fallback;

impl ResolutionStrategy for Fallback {
    fn name(&self) -> &'static str {
        "Fallback"
    }

    fn can_handle(&self, _conflict: &DetectedConflict) -> bool {
        true
    }

    fn resolve(&self, conflict: &DetectedConflict) -> Candidate {
        let content = joined(|r| &r.ours, conflict);
        Candidate {
            strategy_name: self.name().to_owned(),
            is_ast_valid: false,
            explanation: "no strategy could confidently resolve this conflict; manual review required".to_owned(),
            content,
            confidence: 0.0,
        }
    }

    fn identify_risks(&self, _conflict: &DetectedConflict) -> Vec<String> {
        vec!["unclassified or unresolvable conflict; do not auto-apply".to_owned()]
    }
}

/// The default strategy chain, most-specific first (§4.7 step 5). Callers
/// pass this to [`super::generate_suggestions`].
#[must_use]
pub fn default_chain() -> Vec<Box<dyn ResolutionStrategy>> {
    vec![Box::new(TrivialMerge), Box::new(StructuralMerge), Box::new(ConcurrentEdit), Box::new(Fallback)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::classify::Severity;
    use crate::conflict::parser::{ConflictMarkers, MarkerRegion};
    use std::path::PathBuf;

    fn conflict(conflict_type: ConflictType, ours: &str, theirs: &str, base: Option<&str>) -> DetectedConflict {
        DetectedConflict {
            file_path: PathBuf::from("f.rs"),
            markers: ConflictMarkers {
                raw: String::new(),
                regions: vec![MarkerRegion {
                    base: base.map(str::to_owned),
                    ours: ours.to_owned(),
                    theirs: theirs.to_owned(),
                }],
            },
            conflict_type,
            severity: Severity::Low,
        }
    }

    #[test]
    fn trivial_merge_handles_only_trivial() {
        let strategy = TrivialMerge;
        assert!(strategy.can_handle(&conflict(ConflictType::Trivial, "a", "a", None)));
        assert!(!strategy.can_handle(&conflict(ConflictType::Semantic, "a", "b", None)));
    }

    #[test]
    fn trivial_merge_prefers_the_side_that_changed() {
        let strategy = TrivialMerge;
        let c = conflict(ConflictType::Trivial, "changed", "base", Some("base"));
        assert_eq!(strategy.resolve(&c).content, "changed");
    }

    #[test]
    fn structural_merge_concatenates_both_sides() {
        let strategy = StructuralMerge;
        let c = conflict(ConflictType::Structural, "fn a() {}", "fn b() {}", None);
        let candidate = strategy.resolve(&c);
        assert!(candidate.content.contains("fn a() {}"));
        assert!(candidate.content.contains("fn b() {}"));
        assert!(!strategy.identify_risks(&c).is_empty());
    }

    #[test]
    fn fallback_always_handles() {
        let strategy = Fallback;
        assert!(strategy.can_handle(&conflict(ConflictType::Unknown, "a", "b", None)));
    }

    #[test]
    fn default_chain_has_fallback_last() {
        let chain = default_chain();
        assert_eq!(chain.last().unwrap().name(), "Fallback");
    }
}
