//! In-flight request deduplication (spec.md §4.4): concurrent reads that
//! share `(endpoint, normalizedParams)` join a single factory call, and
//! terminal results are cached briefly to collapse bursts from clients that
//! repeat an identical read before the previous one has even finished
//! evicting from the cache.
//!
//! `moka`'s `Cache::entry().or_try_insert_with` gives us both halves for
//! free: concurrent callers for a key that's already computing await the
//! same in-flight future, and a computed value sits in the cache for its TTL
//! afterward.

use std::{
    collections::hash_map::DefaultHasher,
    future::Future,
    hash::{
        Hash,
        Hasher,
    },
    sync::Arc,
};

use sheet_common::config::DedupConfig;
use sheet_errors::ErrorMetadata;

/// Canonical dedup key: an endpoint name plus sorted, trimmed param pairs.
/// Hashed directly rather than through `serde_json::to_string`, so field
/// order or incidental whitespace in caller-supplied params never produces
/// spurious cache misses.
#[derive(Debug, Clone)]
pub struct DedupKey {
    endpoint: String,
    params: Vec<(String, String)>,
}

impl DedupKey {
    pub fn new(endpoint: impl Into<String>, params: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut params: Vec<(String, String)> =
            params.into_iter().map(|(k, v)| (k.trim().to_string(), v.trim().to_string())).collect();
        params.sort();
        Self { endpoint: endpoint.into(), params }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn cache_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.endpoint.hash(&mut hasher);
        for (k, v) in &self.params {
            k.hash(&mut hasher);
            v.hash(&mut hasher);
        }
        format!("{}:{:016x}", self.endpoint, hasher.finish())
    }
}

pub struct Deduplicator<T: Clone + Send + Sync + 'static> {
    cache: moka::future::Cache<String, T>,
}

impl<T: Clone + Send + Sync + 'static> Deduplicator<T> {
    pub fn new(config: &DedupConfig) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(config.max_entries as u64)
            .time_to_live(config.ttl)
            .build();
        Self { cache }
    }

    /// Joins an in-flight call for `key` if one exists, otherwise runs
    /// `factory` and caches the result for the configured TTL.
    #[tracing::instrument(skip(self, factory), fields(endpoint = key.endpoint()))]
    pub async fn deduplicate<F, Fut>(&self, key: &DedupKey, factory: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let cache_key = key.cache_key();
        match self.cache.entry(cache_key).or_try_insert_with(factory()).await {
            Ok(entry) => {
                if entry.is_fresh() {
                    sheet_metrics::dedup_merge::log_dedup_miss(key.endpoint());
                } else {
                    sheet_metrics::dedup_merge::log_dedup_hit(key.endpoint());
                }
                Ok(entry.into_value())
            },
            Err(err) => Err(anyhow::anyhow!(shared_error_metadata(&err))),
        }
    }
}

fn shared_error_metadata(err: &Arc<anyhow::Error>) -> ErrorMetadata {
    err.downcast_ref::<ErrorMetadata>()
        .cloned()
        .unwrap_or_else(|| ErrorMetadata::internal(err.to_string()))
}
