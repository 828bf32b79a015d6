//! Caches a built [`DependencyGraph`] (plus the metadata it was built
//! from) per `(document, revision)`, so repeated impact analyses against an
//! unchanged document don't re-fetch and re-tokenize every formula.

use std::sync::Arc;

use dashmap::DashMap;
use remote_client::{
    DocumentMetadata,
    SharedRemoteClient,
};
use sheet_common::{
    DocumentHandle,
    RevisionToken,
    Scope,
};

use crate::graph::DependencyGraph;

pub struct CachedGraph {
    pub graph: DependencyGraph,
    pub metadata: DocumentMetadata,
}

pub struct DependencyGraphCache {
    client: SharedRemoteClient,
    entries: DashMap<(DocumentHandle, RevisionToken), Arc<CachedGraph>>,
}

impl DependencyGraphCache {
    pub fn new(client: SharedRemoteClient) -> Self {
        Self { client, entries: DashMap::new() }
    }

    #[tracing::instrument(skip(self, scope), fields(document_id = %document_id))]
    pub async fn get_or_build(&self, scope: &Scope, document_id: &DocumentHandle) -> anyhow::Result<Arc<CachedGraph>> {
        let revision = self.client.current_revision(scope, document_id).await?;
        let key = (document_id.clone(), revision);
        if let Some(cached) = self.entries.get(&key) {
            return Ok(cached.clone());
        }

        let metadata = self.client.get_document_metadata(scope, document_id).await?;
        let graph = DependencyGraph::build(&metadata.formulas);
        let cached = Arc::new(CachedGraph { graph, metadata });
        self.entries.insert(key, cached.clone());
        sheet_metrics::impact_analyzer::set_graph_cache_size(self.entries.len() as i64);
        Ok(cached)
    }

    /// Drops every cached graph for `document_id`, regardless of revision.
    /// Mostly useful in tests; in production a stale entry is simply never
    /// looked up again once the revision token has moved on.
    pub fn invalidate(&self, document_id: &DocumentHandle) {
        self.entries.retain(|(doc, _), _| doc != document_id);
        sheet_metrics::impact_analyzer::set_graph_cache_size(self.entries.len() as i64);
    }
}
