//! Conflict classification and severity computation (§4.7 steps 4-5).

use super::ast::AstPort;
use super::parser::ConflictMarkers;
use crate::model::conflict::ConflictType;

/// Coarse urgency signal derived from classification and region count, for
/// surfacing to a human (not persisted; §4.7 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Safe to auto-resolve with high confidence.
    Low,
    /// Auto-resolvable but worth a quick human glance.
    Medium,
    /// Needs human review before merging.
    High,
}

/// Classify a file's marker regions into one [`ConflictType`] (§4.7 step 4).
///
/// A file with no regions (markers failed to parse) is [`ConflictType::Unknown`].
/// A file with multiple regions takes the least-confident classification
/// among them, since any one unresolved region blocks the whole file.
#[must_use]
pub fn classify(markers: &ConflictMarkers, ast: &dyn AstPort, analyze_semantics: bool) -> ConflictType {
    if markers.regions.is_empty() {
        return ConflictType::Unknown;
    }

    markers
        .regions
        .iter()
        .map(|region| classify_region(region, ast, analyze_semantics))
        .max_by_key(|t| ordinal(*t))
        .unwrap_or(ConflictType::Unknown)
}

/// Rank used to pick the "worst" (least confidently auto-resolvable)
/// classification across a file's regions; higher means less confident.
const fn ordinal(t: ConflictType) -> i32 {
    match t {
        ConflictType::Trivial => 0,
        ConflictType::Structural => 1,
        ConflictType::ConcurrentEdit => 2,
        ConflictType::Semantic => 3,
        ConflictType::Unknown => 4,
    }
}

/// Collapse all whitespace runs to a single space and trim the ends, so
/// reformatting-only edits (retabs, alignment) don't register as a real
/// textual difference.
pub(super) fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn classify_region(region: &super::parser::MarkerRegion, ast: &dyn AstPort, analyze_semantics: bool) -> ConflictType {
    if normalize_whitespace(&region.ours) == normalize_whitespace(&region.theirs) {
        return ConflictType::Trivial;
    }

    if let Some(base) = &region.base {
        let ours_changed = normalize_whitespace(&region.ours) != normalize_whitespace(base);
        let theirs_changed = normalize_whitespace(&region.theirs) != normalize_whitespace(base);
        if ours_changed != theirs_changed {
            return ConflictType::Trivial;
        }
    }

    if !analyze_semantics {
        return ConflictType::ConcurrentEdit;
    }

    let analysis = ast.analyze(&region.ours, &region.theirs);
    if !analysis.is_well_formed {
        return ConflictType::Unknown;
    }
    if analysis.looks_like_distinct_additions {
        ConflictType::Structural
    } else {
        ConflictType::Semantic
    }
}

/// Derive severity from classification and how many regions a file has.
/// More regions raises severity one notch, since each is an independent
/// chance the chosen strategy is wrong.
#[must_use]
pub const fn severity(conflict_type: ConflictType, region_count: usize) -> Severity {
    let base = match conflict_type {
        ConflictType::Trivial => Severity::Low,
        ConflictType::Structural => Severity::Medium,
        ConflictType::ConcurrentEdit | ConflictType::Semantic => Severity::High,
        ConflictType::Unknown => Severity::High,
    };
    if region_count > 3 {
        match base {
            Severity::Low => Severity::Medium,
            other => other,
        }
    } else {
        base
    }
}
