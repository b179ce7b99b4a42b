use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use regex_lite::Regex;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::dates::date_to_int;
use crate::embedding::EmbeddingProvider;
use crate::retry::RetryPolicy;
use crate::store::{Document, ReviewStore};

/// One raw review record from the scrape dump (JSON lines). Field aliases
/// match the column names of the upstream dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct RawReview {
    #[serde(default)]
    pub review: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub timestamp_updated: Option<i64>,
    #[serde(default)]
    pub timestamp_created: Option<i64>,
    #[serde(default, alias = "Rating")]
    pub rating: Option<String>,
    #[serde(default, alias = "Playtime")]
    pub playtime: Option<String>,
    #[serde(default, alias = "ReviewID")]
    pub review_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub workers: usize,
    pub language: String,
    pub source_tag: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: 512,
            // Deliberately conservative to respect embedding API limits.
            workers: 3,
            language: "english".to_string(),
            source_tag: "steam_reviews".to_string(),
        }
    }
}

/// Final tally of one ingestion run. Partial ingestion is an accepted
/// outcome: failed batches are reported, never fatal.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub total_records: usize,
    pub written: usize,
    pub skipped_timestamp: usize,
    pub filtered_out: usize,
    pub malformed_lines: usize,
    pub failed_batches: usize,
    pub store_count: u64,
}

/// Load raw reviews from a JSON-lines file. Unparsable lines are counted and
/// logged, not fatal.
pub fn load_raw_reviews(path: &Path) -> Result<(Vec<RawReview>, usize)> {
    let file = File::open(path).with_context(|| format!("opening review dump {:?}", path))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut malformed = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawReview>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                malformed += 1;
                if malformed <= 5 {
                    tracing::warn!("skipping malformed record on line {}: {}", lineno + 1, e);
                }
            }
        }
    }
    Ok((records, malformed))
}

enum Prepared {
    Document(Document),
    SkippedTimestamp,
    Filtered,
}

/// Timestamp policy: prefer `timestamp_updated`, fall back to
/// `timestamp_created`; a record with neither resolvable is skipped.
fn resolve_date(raw: &RawReview) -> Option<u32> {
    let ts = raw.timestamp_updated.or(raw.timestamp_created)?;
    let datetime = chrono::DateTime::from_timestamp(ts, 0)?;
    Some(date_to_int(datetime.date_naive()))
}

fn parse_playtime(raw: Option<&str>) -> f64 {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let number = NUMBER.get_or_init(|| Regex::new(r"[0-9]+(\.[0-9]+)?").expect("playtime regex"));
    raw.and_then(|s| number.find(s))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0)
}

fn prepare(raw: &RawReview, index: usize, opts: &IngestOptions) -> Prepared {
    if raw.review.trim().is_empty() {
        return Prepared::Filtered;
    }
    match &raw.language {
        Some(lang) if lang.eq_ignore_ascii_case(&opts.language) => {}
        _ => return Prepared::Filtered,
    }

    let date = match resolve_date(raw) {
        Some(date) => date,
        None => return Prepared::SkippedTimestamp,
    };

    let rating = raw
        .rating
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let voted_up = rating.contains("recommended") && !rating.contains("not");

    let id = match &raw.review_id {
        Some(natural) if !natural.trim().is_empty() => natural.clone(),
        _ => format!("rev_{}", index),
    };

    Prepared::Document(Document {
        id,
        text: raw.review.clone(),
        date,
        voted_up,
        playtime: parse_playtime(raw.playtime.as_deref()),
        source: opts.source_tag.clone(),
    })
}

/// Embed and write the raw record set to the review store in fixed-size
/// batches over a bounded worker pool, retrying rate-limited batches with
/// backoff. Other batch failures abandon that batch and continue.
pub async fn run_ingestion(
    store: Arc<ReviewStore>,
    provider: Arc<dyn EmbeddingProvider>,
    records: Vec<RawReview>,
    opts: &IngestOptions,
    retry: &RetryPolicy,
) -> Result<IngestReport> {
    let mut report = IngestReport {
        total_records: records.len(),
        ..Default::default()
    };

    let mut documents = Vec::new();
    for (index, raw) in records.iter().enumerate() {
        match prepare(raw, index, opts) {
            Prepared::Document(doc) => documents.push(doc),
            Prepared::SkippedTimestamp => report.skipped_timestamp += 1,
            Prepared::Filtered => report.filtered_out += 1,
        }
    }

    let batches: Vec<Vec<Document>> = documents
        .chunks(opts.batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();
    tracing::info!(
        "ingesting {} documents in {} batches ({} workers)",
        documents.len(),
        batches.len(),
        opts.workers
    );

    let semaphore = Arc::new(Semaphore::new(opts.workers.max(1)));
    let mut tasks: JoinSet<usize> = JoinSet::new();

    for (batch_idx, batch) in batches.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let provider = provider.clone();
        let store = store.clone();
        let retry = retry.clone();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("ingest semaphore closed");

            let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
            let embeddings = match retry.run(|| provider.embed(&texts)).await {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    tracing::warn!("batch {} abandoned after embedding failure: {}", batch_idx, e);
                    return 0;
                }
            };

            let written = tokio::task::spawn_blocking(move || {
                store.insert_batch(&batch, &embeddings)
            })
            .await;

            match written {
                Ok(Ok(count)) => {
                    tracing::debug!("batch {} wrote {} documents", batch_idx, count);
                    count
                }
                Ok(Err(e)) => {
                    tracing::warn!("batch {} abandoned after store failure: {}", batch_idx, e);
                    0
                }
                Err(e) => {
                    tracing::warn!("batch {} write task panicked: {}", batch_idx, e);
                    0
                }
            }
        });
    }

    let mut done = 0usize;
    while let Some(result) = tasks.join_next().await {
        let written = result.context("ingest worker panicked")?;
        if written == 0 {
            report.failed_batches += 1;
        }
        report.written += written;
        done += 1;
        tracing::info!("ingestion progress: {} batches done, {} documents written", done, report.written);
    }

    report.store_count = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.count()).await??
    };

    tracing::info!(
        "ingestion complete: {} input, {} written, {} skipped (timestamp), {} filtered, {} failed batches, {} in store",
        report.total_records,
        report.written,
        report.skipped_timestamp,
        report.filtered_out,
        report.failed_batches,
        report.store_count
    );
    Ok(report)
}
