//! Impact analysis (spec.md §4.9): given a mutation's target range, report
//! the direct scope touched, every dependent artifact that range feeds
//! into, a severity classification, and actionable recommendations.

use remote_client::DocumentMetadata;
use sheet_common::{
    range::ranges_overlap,
    A1Range,
    Mutation,
};

use crate::cache::CachedGraph;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectScope {
    pub rows: i64,
    pub cols: i64,
    pub cells: i64,
    pub sheets: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Formula,
    NamedRange,
    ProtectedRange,
    Chart,
    Pivot,
}

#[derive(Debug, Clone)]
pub struct DependentArtifact {
    pub kind: ArtifactKind,
    pub identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImpactAnalysis {
    pub direct_scope: DirectScope,
    pub dependent_artifacts: Vec<DependentArtifact>,
    pub protected_range_touched: bool,
    pub severity: Severity,
    pub recommendations: Vec<String>,
    /// Always `true`: this analysis is advisory, never a gate the mutation
    /// itself has to clear. Kept as a field (rather than dropped) because
    /// the tool layer's confirmation flow reads it alongside
    /// `requires_confirmation` rather than assuming it.
    pub can_proceed: bool,
    /// `true` at `high`/`critical` severity -- the tool layer is expected to
    /// elicit confirmation before resubmitting, but the core itself never
    /// silently lowers severity or blocks on its own.
    pub requires_confirmation: bool,
}

/// Row/column count used when a range's axis is unbounded (a whole row,
/// column, or sheet) and there's no known sheet extent to cap it at. Large
/// enough that any unbounded mutation reads as "touches basically
/// everything" for severity purposes, without risking overflow in `cells`.
const UNBOUNDED_AXIS_ESTIMATE: i64 = 1_000_000;

pub fn analyze(mutation: &Mutation, cached: &CachedGraph) -> ImpactAnalysis {
    let metadata = &cached.metadata;
    let graph = &cached.graph;

    let direct_scope = match mutation.target_range() {
        Some(range) => direct_scope_of(range),
        None => DirectScope { rows: 0, cols: 0, cells: 0, sheets: 1 },
    };

    let mut dependent_artifacts = Vec::new();
    let mut protected_range_touched = false;

    if let Some(target) = mutation.target_range() {
        for cell in graph.formulas_depending_on(target) {
            dependent_artifacts.push(DependentArtifact { kind: ArtifactKind::Formula, identifier: cell.to_string() });
        }
        for (name, range) in &metadata.named_ranges {
            if ranges_overlap(range, target) {
                dependent_artifacts.push(DependentArtifact { kind: ArtifactKind::NamedRange, identifier: name.clone() });
            }
        }
        for range in &metadata.protected_ranges {
            if ranges_overlap(range, target) {
                protected_range_touched = true;
                dependent_artifacts.push(DependentArtifact {
                    kind: ArtifactKind::ProtectedRange,
                    identifier: range.to_string(),
                });
            }
        }
    }

    // Charts and pivots aren't tracked against a source range by the
    // remote API surface this crate depends on (`DocumentMetadata` carries
    // only their ids) -- a mutation that deletes or restructures an entire
    // sheet is treated as touching every chart/pivot on it, since no
    // finer-grained overlap check is possible without that data.
    if matches!(mutation, Mutation::DeleteSheet { .. }) {
        dependent_artifacts.extend(
            metadata.chart_ids.iter().map(|id| DependentArtifact { kind: ArtifactKind::Chart, identifier: id.to_string() }),
        );
        dependent_artifacts.extend(
            metadata.pivot_ids.iter().map(|id| DependentArtifact { kind: ArtifactKind::Pivot, identifier: id.to_string() }),
        );
    }

    let formula_hits = dependent_artifacts.iter().filter(|a| a.kind == ArtifactKind::Formula).count();
    let severity = classify_severity(mutation, protected_range_touched, formula_hits, dependent_artifacts.len());
    let recommendations = recommend(mutation, severity, metadata);
    let requires_confirmation = severity >= Severity::High;

    ImpactAnalysis {
        direct_scope,
        dependent_artifacts,
        protected_range_touched,
        severity,
        recommendations,
        can_proceed: true,
        requires_confirmation,
    }
}

fn direct_scope_of(range: &A1Range) -> DirectScope {
    let rows = range.row_count().unwrap_or(UNBOUNDED_AXIS_ESTIMATE);
    let cols = range.col_count().unwrap_or(UNBOUNDED_AXIS_ESTIMATE);
    DirectScope { rows, cols, cells: rows.saturating_mul(cols), sheets: 1 }
}

fn classify_severity(mutation: &Mutation, protected_range_touched: bool, formula_hits: usize, artifact_count: usize) -> Severity {
    if protected_range_touched || formula_hits >= 1000 {
        return Severity::Critical;
    }
    if mutation.is_risky() && formula_hits >= 1 {
        return Severity::High;
    }
    if artifact_count >= 10 {
        return Severity::Medium;
    }
    Severity::Low
}

fn recommend(mutation: &Mutation, severity: Severity, metadata: &DocumentMetadata) -> Vec<String> {
    let mut out = Vec::new();
    if severity >= Severity::High {
        out.push("take a snapshot before applying this mutation".to_string());
    }
    if let Some(range) = mutation.target_range() {
        if range.row_count().is_none() || range.col_count().is_none() {
            out.push("narrow the range instead of targeting a whole row, column, or sheet".to_string());
        }
    }
    if mutation.is_risky() && !metadata.protected_ranges.is_empty() {
        out.push("verify the target doesn't overlap a protected range before retrying".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use sheet_common::RevisionToken;

    use super::*;
    use crate::graph::DependencyGraph;

    fn cached(metadata: DocumentMetadata) -> CachedGraph {
        let graph = DependencyGraph::build(&metadata.formulas);
        CachedGraph { graph, metadata }
    }

    #[test]
    fn touching_a_protected_range_is_always_critical() {
        let range = A1Range::new("Sheet1", 0, 0, 0, 0).unwrap();
        let metadata = DocumentMetadata {
            revision: RevisionToken::default(),
            protected_ranges: vec![range.clone()],
            ..DocumentMetadata::default()
        };
        let mutation = Mutation::ClearRange { range };
        let analysis = analyze(&mutation, &cached(metadata));
        assert_eq!(analysis.severity, Severity::Critical);
        assert!(analysis.protected_range_touched);
        assert!(analysis.can_proceed);
        assert!(analysis.requires_confirmation);
    }

    #[test]
    fn a_mutation_with_no_target_range_cannot_be_checked_for_formula_overlap() {
        use remote_client::FormulaCell;
        let metadata = DocumentMetadata {
            revision: RevisionToken::default(),
            formulas: vec![FormulaCell { sheet_name: "Sheet1".to_string(), row: 0, col: 0, formula: "=A1".to_string() }],
            ..DocumentMetadata::default()
        };
        let mutation = Mutation::InsertDimension {
            sheet_id: sheet_common::SheetId(1),
            axis: sheet_common::Axis::Rows,
            start: 0,
            end: 1,
        };
        let analysis = analyze(&mutation, &cached(metadata));
        assert_eq!(analysis.direct_scope.cells, 0);
        assert_eq!(analysis.severity, Severity::Low);
    }

    #[test]
    fn a_risky_mutation_that_breaks_dependent_formulas_is_high() {
        use remote_client::FormulaCell;
        let range = A1Range::new("Sheet1", 0, 0, 99, 0).unwrap();
        let formulas = (0..100)
            .map(|row| FormulaCell { sheet_name: "Sheet1".to_string(), row, col: 2, formula: format!("=A{}", row + 1) })
            .collect();
        let metadata = DocumentMetadata { revision: RevisionToken::default(), formulas, ..DocumentMetadata::default() };
        let mutation = Mutation::ClearRange { range };
        let analysis = analyze(&mutation, &cached(metadata));
        assert_eq!(analysis.dependent_artifacts.len(), 100);
        assert_eq!(analysis.severity, Severity::High);
        assert!(analysis.can_proceed);
        assert!(analysis.requires_confirmation);
    }

    #[test]
    fn whole_column_mutation_recommends_narrowing() {
        let range = A1Range::whole_column("Sheet1", 0);
        let mutation = Mutation::ClearRange { range };
        let analysis = analyze(&mutation, &cached(DocumentMetadata::default()));
        assert!(analysis.recommendations.iter().any(|r| r.contains("narrow")));
    }

    #[test]
    fn low_severity_when_nothing_depends_on_the_range() {
        let range = A1Range::new("Sheet1", 0, 0, 0, 0).unwrap();
        let mutation = Mutation::ClearRange { range };
        let analysis = analyze(&mutation, &cached(DocumentMetadata::default()));
        assert_eq!(analysis.severity, Severity::Low);
        assert!(analysis.dependent_artifacts.is_empty());
        assert!(analysis.can_proceed);
        assert!(!analysis.requires_confirmation);
    }
}
