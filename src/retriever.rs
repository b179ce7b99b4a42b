use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::cache::QueryCache;
use crate::dates::{date_to_int, int_to_iso};
use crate::store::ReviewStore;

/// Character budget for one evidence snippet.
const SNIPPET_MAX_CHARS: usize = 400;

/// Date-aware retrieval over the review store. Query embeddings always come
/// from the shared cache; the store query runs on the blocking pool so
/// sqlite I/O never stalls concurrently progressing simulation tasks.
pub struct TimeFilteredRetriever {
    store: Arc<ReviewStore>,
    cache: Arc<QueryCache>,
}

impl TimeFilteredRetriever {
    pub fn new(store: Arc<ReviewStore>, cache: Arc<QueryCache>) -> Self {
        Self { store, cache }
    }

    /// Evidence snippets for `query_text`, restricted to documents dated on
    /// or before `cutoff`, best match first, at most `top_k`. No matching
    /// documents yields an empty list, not an error.
    pub async fn retrieve(
        &self,
        query_text: &str,
        cutoff: NaiveDate,
        top_k: usize,
    ) -> Result<Vec<String>> {
        let embedding = self
            .cache
            .get_embedding(query_text)
            .await
            .context("resolving query embedding")?;

        let cutoff_int = date_to_int(cutoff);
        let store = self.store.clone();
        let hits = tokio::task::spawn_blocking(move || {
            store.query_similar(&embedding, cutoff_int, top_k)
        })
        .await
        .context("store query task panicked")??;

        Ok(hits
            .iter()
            .map(|hit| format_snippet(&hit.text, hit.date))
            .collect())
    }
}

/// `- [YYYY-MM-DD] {review}...` with the text truncated to the snippet
/// budget on a character boundary.
fn format_snippet(text: &str, date: u32) -> String {
    let truncated: String = text.chars().take(SNIPPET_MAX_CHARS).collect();
    format!("- [{}] {}...", int_to_iso(date), truncated)
}
