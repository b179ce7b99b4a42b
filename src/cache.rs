use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};

use crate::embedding::EmbeddingProvider;

/// How many missing queries go into one grouped provider call during warmup.
const PRECOMPUTE_BATCH_SIZE: usize = 20;

/// Persistent memoization of query embeddings. One entry per distinct query
/// string, append-only during a run. The cache is an optimization, never a
/// correctness dependency: every entry can be recomputed from the provider.
pub struct QueryCache {
    path: PathBuf,
    provider: Arc<dyn EmbeddingProvider>,
    entries: Mutex<HashMap<String, Vec<f32>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecomputeReport {
    pub requested: usize,
    pub already_cached: usize,
    pub embedded: usize,
}

impl QueryCache {
    /// Open the cache at `path`, loading any previously persisted entries.
    /// A corrupt or unreadable file resets to an empty cache with a warning.
    pub fn open(path: impl Into<PathBuf>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(Some(map)) => {
                tracing::info!("loaded {} cached query embeddings from {:?}", map.len(), path);
                map
            }
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!("query cache at {:?} is unreadable, starting fresh: {}", path, e);
                HashMap::new()
            }
        };

        Self {
            path,
            provider,
            entries: Mutex::new(entries),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Vec<f32>>> {
        // A poisoned map only ever holds fully inserted entries; keep going.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached vector on hit; on miss, one provider call, then insert and
    /// persist. Two tasks racing on the same key may both call the provider
    /// (same value either way) but the first insert wins and only complete
    /// states are ever persisted.
    pub async fn get_embedding(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.lock_entries().get(query).cloned() {
            return Ok(hit);
        }

        tracing::debug!("embedding cache miss: '{}'", query);
        let single = [query.to_string()];
        let embedded = self
            .provider
            .embed(&single)
            .await
            .with_context(|| format!("embedding query '{}'", query))?;
        let vector = embedded
            .into_iter()
            .next()
            .context("provider returned no embedding for a single query")?;

        let result = {
            let mut entries = self.lock_entries();
            entries
                .entry(query.to_string())
                .or_insert(vector)
                .clone()
        };
        self.save()?;
        Ok(result)
    }

    /// Warm the cache for a known query set: embed only the missing subset in
    /// grouped batches and persist once after all batches complete.
    pub async fn precompute(&self, queries: &[String]) -> Result<PrecomputeReport> {
        let missing: Vec<String> = {
            let entries = self.lock_entries();
            queries
                .iter()
                .filter(|q| !entries.contains_key(q.as_str()))
                .cloned()
                .collect()
        };

        let report = PrecomputeReport {
            requested: queries.len(),
            already_cached: queries.len() - missing.len(),
            embedded: missing.len(),
        };

        if missing.is_empty() {
            tracing::info!("all {} queries already cached", queries.len());
            return Ok(report);
        }

        tracing::info!("precomputing {} missing query embeddings", missing.len());
        for batch in missing.chunks(PRECOMPUTE_BATCH_SIZE) {
            let vectors = self.provider.embed(batch).await?;
            let mut entries = self.lock_entries();
            for (query, vector) in batch.iter().zip(vectors) {
                entries.entry(query.clone()).or_insert(vector);
            }
        }

        self.save()?;
        Ok(report)
    }

    /// Rewrite the whole mapping. Saves go through a temp file and a rename
    /// so a crash mid-write never leaves a torn cache behind.
    fn save(&self) -> Result<()> {
        let serialized = {
            let entries = self.lock_entries();
            serde_json::to_vec(&*entries).context("serializing query cache")?
        };

        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating cache directory {:?}", parent))?;
            }
        }
        fs::write(&tmp, serialized).with_context(|| format!("writing cache to {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("moving cache into place at {:?}", self.path))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }
}

fn load_entries(path: &Path) -> Result<Option<HashMap<String, Vec<f32>>>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read(path)?;
    let map = serde_json::from_slice(&raw)?;
    Ok(Some(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider stub returning a recognizable vector per input, counting calls.
    struct CountingProvider {
        calls: AtomicUsize,
        texts_embedded: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                texts_embedded: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 2.0])
                .collect())
        }
    }

    fn cache_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("query_cache.json")
    }

    #[tokio::test]
    async fn repeated_gets_issue_at_most_one_provider_call() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CountingProvider::new();
        let cache = QueryCache::open(cache_path(&dir), provider.clone());

        let first = cache.get_embedding("open world rpg reviews").await.unwrap();
        let second = cache.get_embedding("open world rpg reviews").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persisted_cache_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);

        let provider = CountingProvider::new();
        let cache = QueryCache::open(&path, provider);
        let original = cache.get_embedding("performance issues").await.unwrap();

        // Fresh instance over the same file: hit, no provider call.
        let provider2 = CountingProvider::new();
        let reloaded = QueryCache::open(&path, provider2.clone());
        assert_eq!(reloaded.len(), 1);
        let vector = reloaded.get_embedding("performance issues").await.unwrap();
        assert_eq!(vector, original);
        assert_eq!(provider2.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_cache_file_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);
        fs::write(&path, b"not json at all").unwrap();

        let provider = CountingProvider::new();
        let cache = QueryCache::open(&path, provider);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn precompute_batches_only_the_missing_subset() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CountingProvider::new();
        let cache = QueryCache::open(cache_path(&dir), provider.clone());

        cache.get_embedding("already cached").await.unwrap();
        provider.calls.store(0, Ordering::SeqCst);
        provider.texts_embedded.store(0, Ordering::SeqCst);

        // 25 missing + 1 cached: two grouped calls (20 + 5), 25 texts total.
        let mut queries: Vec<String> = (0..25).map(|i| format!("query {}", i)).collect();
        queries.push("already cached".to_string());

        let report = cache.precompute(&queries).await.unwrap();
        assert_eq!(report.requested, 26);
        assert_eq!(report.already_cached, 1);
        assert_eq!(report.embedded, 25);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.texts_embedded.load(Ordering::SeqCst), 25);
        assert_eq!(cache.len(), 26);
    }
}
