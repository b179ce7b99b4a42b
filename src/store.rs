use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use rusqlite::{params, Connection};

/// One ingested review, date-tagged for cutoff filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    /// YYYYMMDD. Every stored document carries a valid date; records that
    /// fail date parsing are excluded at ingestion, never partially stored.
    pub date: u32,
    pub voted_up: bool,
    pub playtime: f64,
    pub source: String,
}

/// Similarity query hit, descending score order.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub id: String,
    pub text: String,
    pub date: u32,
    pub similarity: f32,
}

/// Persistent review collection: document text + metadata + embedding blob in
/// sqlite, cosine similarity computed over the date-filtered candidate set.
pub struct ReviewStore {
    conn: Mutex<Connection>,
}

impl ReviewStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                date INTEGER NOT NULL,
                voted_up INTEGER NOT NULL,
                playtime REAL NOT NULL,
                source TEXT NOT NULL,
                embedding BLOB NOT NULL
            )"#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_reviews_date ON reviews(date)",
            [],
        )?;
        Ok(())
    }

    /// Insert one batch of documents with their embeddings, transactionally.
    /// Re-ingesting an id replaces the previous row.
    pub fn insert_batch(&self, documents: &[Document], embeddings: &[Vec<f32>]) -> Result<usize> {
        if documents.len() != embeddings.len() {
            bail!(
                "batch mismatch: {} documents, {} embeddings",
                documents.len(),
                embeddings.len()
            );
        }

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO reviews (id, text, date, voted_up, playtime, source, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (doc, embedding) in documents.iter().zip(embeddings) {
                stmt.execute(params![
                    doc.id,
                    doc.text,
                    doc.date,
                    doc.voted_up,
                    doc.playtime,
                    doc.source,
                    embedding_to_blob(embedding),
                ])?;
            }
        }
        tx.commit()?;
        Ok(documents.len())
    }

    /// Similarity search restricted to documents dated on/before `cutoff`
    /// (YYYYMMDD). Returns at most `top_k` hits, best first. An empty result
    /// is a normal outcome, not an error.
    pub fn query_similar(
        &self,
        query_embedding: &[f32],
        cutoff: u32,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT id, text, date, embedding FROM reviews WHERE date <= ?1")?;

        let mut hits: Vec<ScoredDocument> = stmt
            .query_map([cutoff], |row| {
                let blob: Vec<u8> = row.get(3)?;
                Ok(ScoredDocument {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    date: row.get::<_, i64>(2)? as u32,
                    similarity: cosine_similarity(query_embedding, &blob_to_embedding(&blob)),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM reviews", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
