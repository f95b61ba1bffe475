//! AST port: an abstraction over "does this look like a structurally valid
//! edit" so [`super::classify::classify`] and the confidence scorer can
//! reason about syntax without hard-coding a parser (§4.7 step 4, §9 Open
//! Questions).

/// What an AST check found for one side of a conflict region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AstAnalysis {
    /// Whether the region, taken alone, looks syntactically well-formed
    /// (balanced braces/parens/brackets).
    pub is_well_formed: bool,
    /// Whether both sides appear to add distinct top-level items rather
    /// than edit a shared one (a coarse proxy for "structural" rather than
    /// "semantic" conflicts).
    pub looks_like_distinct_additions: bool,
}

/// Decides whether two conflicting regions can be understood well enough
/// to call the conflict "structural" rather than "semantic" (§4.7 step 4).
///
/// Implementations may shell out to a real parser (e.g. `tree-sitter`,
/// behind the `ast-merge` feature) or fall back to the textual heuristic in
/// [`HeuristicAst`].
pub trait AstPort: Send + Sync {
    /// Analyze one region's `ours`/`theirs` sides.
    fn analyze(&self, ours: &str, theirs: &str) -> AstAnalysis;
}

/// A dependency-free heuristic: balanced-delimiter check plus a check for
/// whether the two sides share any non-whitespace line (a shared line is
/// read as editing the same construct, which rules out "distinct
/// additions").
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAst;

impl AstPort for HeuristicAst {
    fn analyze(&self, ours: &str, theirs: &str) -> AstAnalysis {
        let is_well_formed = is_balanced(ours) && is_balanced(theirs);
        let looks_like_distinct_additions = is_well_formed && !share_any_line(ours, theirs);
        AstAnalysis {
            is_well_formed,
            looks_like_distinct_additions,
        }
    }
}

/// Parses each side with `tree-sitter` and checks both for parse errors,
/// falling back to the textual heuristic's "distinct additions" check
/// (tree-sitter has no notion of "are these two fragments independent").
/// Gated behind the `ast-merge` feature; languages are picked by file
/// extension, defaulting to [`HeuristicAst`] for anything unrecognized.
#[cfg(feature = "ast-merge")]
#[derive(Default)]
pub struct TreeSitterAst;

#[cfg(feature = "ast-merge")]
impl TreeSitterAst {
    fn language_for(extension: &str) -> Option<tree_sitter::Language> {
        match extension {
            "rs" => Some(tree_sitter_rust::LANGUAGE.into()),
            "py" => Some(tree_sitter_python::LANGUAGE.into()),
            "ts" | "tsx" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            "js" | "jsx" => Some(tree_sitter_javascript::LANGUAGE.into()),
            _ => None,
        }
    }

    /// Analyze with a specific file extension driving language selection;
    /// [`AstPort::analyze`] has no path context, so callers that know the
    /// conflicted file's extension should prefer this directly.
    #[must_use]
    pub fn analyze_with_extension(extension: &str, ours: &str, theirs: &str) -> AstAnalysis {
        let Some(language) = Self::language_for(extension) else {
            return HeuristicAst.analyze(ours, theirs);
        };
        let mut parser = tree_sitter::Parser::new();
        if parser.set_language(&language).is_err() {
            return HeuristicAst.analyze(ours, theirs);
        }
        let ours_ok = parser.parse(ours, None).is_some_and(|t| !t.root_node().has_error());
        let theirs_ok = parser.parse(theirs, None).is_some_and(|t| !t.root_node().has_error());
        AstAnalysis {
            is_well_formed: ours_ok && theirs_ok,
            looks_like_distinct_additions: ours_ok && theirs_ok && !share_any_line(ours, theirs),
        }
    }
}

#[cfg(feature = "ast-merge")]
impl AstPort for TreeSitterAst {
    fn analyze(&self, ours: &str, theirs: &str) -> AstAnalysis {
        HeuristicAst.analyze(ours, theirs)
    }
}

fn is_balanced(text: &str) -> bool {
    let mut stack = Vec::new();
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

fn share_any_line(ours: &str, theirs: &str) -> bool {
    let theirs_lines: std::collections::HashSet<&str> = theirs.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    ours.lines().map(str::trim).filter(|l| !l.is_empty()).any(|l| theirs_lines.contains(l))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_distinct_additions_are_structural_looking() {
        let ast = HeuristicAst;
        let analysis = ast.analyze("fn a() {}", "fn b() {}");
        assert!(analysis.is_well_formed);
        assert!(analysis.looks_like_distinct_additions);
    }

    #[test]
    fn shared_line_is_not_distinct_additions() {
        let ast = HeuristicAst;
        let analysis = ast.analyze("fn a() {\n  x = 1;\n}", "fn a() {\n  x = 1;\n  y = 2;\n}");
        assert!(!analysis.looks_like_distinct_additions);
    }

    #[test]
    fn unbalanced_delimiters_are_not_well_formed() {
        let ast = HeuristicAst;
        let analysis = ast.analyze("fn a( {", "fn b() {}");
        assert!(!analysis.is_well_formed);
    }
}
