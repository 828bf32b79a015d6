//! Formula dependency tracking and mutation impact analysis (spec.md §4.9).
//!
//! A [`DependencyGraph`] is built from a document's formulas by tokenizing
//! each one for cell/range references, then cached per `(document,
//! revision)` by [`DependencyGraphCache`] so it's rebuilt only when the
//! document actually changes. [`ImpactAnalyzer`] is the public entry point:
//! given a mutation, it fetches (or reuses) that graph and metadata, then
//! reports what the mutation would touch and how risky that looks.

pub mod cache;
pub mod graph;
pub mod impact;
pub mod tokenizer;

use std::sync::Arc;

use remote_client::SharedRemoteClient;
use sheet_common::{
    DocumentHandle,
    Mutation,
    Scope,
};

pub use cache::{
    CachedGraph,
    DependencyGraphCache,
};
pub use graph::DependencyGraph;
pub use impact::{
    analyze,
    ArtifactKind,
    DependentArtifact,
    DirectScope,
    ImpactAnalysis,
    Severity,
};
pub use tokenizer::{
    extract_references,
    FormulaReferences,
};

pub struct ImpactAnalyzer {
    graphs: DependencyGraphCache,
}

impl ImpactAnalyzer {
    pub fn new(client: SharedRemoteClient) -> Self {
        Self { graphs: DependencyGraphCache::new(client) }
    }

    #[tracing::instrument(skip(self, scope, mutation), fields(document_id = %document_id))]
    pub async fn analyze(&self, scope: &Scope, document_id: &DocumentHandle, mutation: &Mutation) -> anyhow::Result<ImpactAnalysis> {
        let cached = self.graphs.get_or_build(scope, document_id).await?;
        let analysis = impact::analyze(mutation, &cached);
        sheet_metrics::impact_analyzer::log_analyzed(analysis.severity.as_str());
        Ok(analysis)
    }

    pub fn invalidate(&self, document_id: &DocumentHandle) {
        self.graphs.invalidate(document_id);
    }
}

#[cfg(test)]
mod tests {
    use remote_client::MockRemoteClient;
    use sheet_common::A1Range;

    use super::*;

    #[tokio::test]
    async fn analyzer_reports_dependent_formulas() {
        let client = Arc::new(MockRemoteClient::new());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        client.seed_formula(&doc, "Sheet1", 1, 0, "=A1");
        let analyzer = ImpactAnalyzer::new(client);
        let scope = Scope::for_test();

        let mutation = Mutation::ClearRange { range: A1Range::new("Sheet1", 0, 0, 0, 0).unwrap() };
        let analysis = analyzer.analyze(&scope, &doc, &mutation).await.unwrap();
        assert_eq!(analysis.dependent_artifacts.len(), 1);
    }
}
