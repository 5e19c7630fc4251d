//! SQLite-backed chunk + vector store for the memory layer.
//!
//! Keyed by `(path, chunk_index)`. Embeddings are stored as flat
//! little-endian f32 BLOBs. Fingerprints and listing progress live in side
//! tables so sync can skip unchanged sources and resume interrupted
//! filesystem walks.

use std::path::Path;

use anyhow::bail;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

/// One stored chunk as the search path consumes it, embedding decoded.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Chunk data for insertion (embedding not yet encoded).
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub source_date: Option<String>,
}

/// Source fingerprint: re-index only when it changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub mtime_ms: i64,
    pub size: i64,
    /// For tailed files: number of lines already indexed.
    pub last_line: i64,
}

/// Encode an f32 embedding vector as flat little-endian bytes.
pub fn encode_embedding(vec: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vec.len() * 4);
    for &val in vec {
        buf.extend_from_slice(&val.to_le_bytes());
    }
    buf
}

/// Decode a little-endian f32 blob. Length must be a non-zero multiple of 4.
pub fn decode_embedding(blob: &[u8]) -> anyhow::Result<Vec<f32>> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        bail!("Invalid embedding blob length {}", blob.len());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub struct MemoryIndex {
    pool: SqlitePool,
}

impl MemoryIndex {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        let index = Self { pool };
        index.migrate().await?;
        Ok(index)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                path TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                source_date TEXT,
                PRIMARY KEY (path, chunk_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_date ON chunks(source_date)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS source_files (
                path TEXT PRIMARY KEY,
                mtime_ms INTEGER NOT NULL,
                size INTEGER NOT NULL,
                last_line INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listing_progress (
                root TEXT PRIMARY KEY,
                last_dir TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Memory index migration complete");
        Ok(())
    }

    pub async fn upsert_chunks(&self, path: &str, chunks: &[NewChunk]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT OR REPLACE INTO chunks
                 (path, chunk_index, start_line, end_line, text, embedding, source_date)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(path)
            .bind(chunk.chunk_index)
            .bind(chunk.start_line)
            .bind(chunk.end_line)
            .bind(&chunk.text)
            .bind(encode_embedding(&chunk.embedding))
            .bind(&chunk.source_date)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Remove every chunk for one exact path.
    pub async fn delete_path(&self, path: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM chunks WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM source_files WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove all chunks whose path starts with `prefix`.
    pub async fn delete_by_prefix(&self, prefix: &str) -> anyhow::Result<u64> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let result = sqlx::query("DELETE FROM chunks WHERE path LIKE ? ESCAPE '\\'")
            .bind(&pattern)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM source_files WHERE path LIKE ? ESCAPE '\\'")
            .bind(&pattern)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All chunks matching the optional date window, embeddings decoded.
    /// Chunks without a source date never match a date filter.
    pub async fn candidates(
        &self,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> anyhow::Result<Vec<StoredChunk>> {
        let mut sql = String::from(
            "SELECT path, start_line, end_line, text, embedding FROM chunks",
        );
        let filtered = date_from.is_some() || date_to.is_some();
        if filtered {
            sql.push_str(" WHERE source_date IS NOT NULL");
            if date_from.is_some() {
                sql.push_str(" AND source_date >= ?");
            }
            if date_to.is_some() {
                sql.push_str(" AND source_date <= ?");
            }
        }

        let mut query = sqlx::query(&sql);
        if let Some(from) = date_from {
            query = query.bind(from);
        }
        if let Some(to) = date_to {
            query = query.bind(to);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            chunks.push(StoredChunk {
                path: row.get("path"),
                start_line: row.get("start_line"),
                end_line: row.get("end_line"),
                text: row.get("text"),
                embedding: decode_embedding(&row.get::<Vec<u8>, _>("embedding"))?,
            });
        }
        Ok(chunks)
    }

    /// Distinct indexed paths, for stale-source cleanup.
    pub async fn indexed_paths(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT path FROM chunks")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("path")).collect())
    }

    pub async fn max_chunk_index(&self, path: &str) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(chunk_index), -1) AS max_idx FROM chunks WHERE path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("max_idx"))
    }

    pub async fn fingerprint(&self, path: &str) -> anyhow::Result<Option<Fingerprint>> {
        let row = sqlx::query("SELECT mtime_ms, size, last_line FROM source_files WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Fingerprint {
            mtime_ms: r.get("mtime_ms"),
            size: r.get("size"),
            last_line: r.get("last_line"),
        }))
    }

    pub async fn set_fingerprint(&self, path: &str, fp: &Fingerprint) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO source_files (path, mtime_ms, size, last_line)
             VALUES (?, ?, ?, ?)",
        )
        .bind(path)
        .bind(fp.mtime_ms)
        .bind(fp.size)
        .bind(fp.last_line)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn listing_progress(&self, root: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT last_dir FROM listing_progress WHERE root = ?")
            .bind(root)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("last_dir")))
    }

    pub async fn set_listing_progress(
        &self,
        root: &str,
        last_dir: Option<&str>,
    ) -> anyhow::Result<()> {
        match last_dir {
            Some(dir) => {
                sqlx::query(
                    "INSERT OR REPLACE INTO listing_progress (root, last_dir) VALUES (?, ?)",
                )
                .bind(root)
                .bind(dir)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM listing_progress WHERE root = ?")
                    .bind(root)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_index(dir: &Path) -> MemoryIndex {
        MemoryIndex::open(&dir.join("index.db")).await.unwrap()
    }

    fn chunk(idx: i64, text: &str, date: Option<&str>) -> NewChunk {
        NewChunk {
            chunk_index: idx,
            start_line: idx * 10 + 1,
            end_line: idx * 10 + 10,
            text: text.to_string(),
            embedding: vec![idx as f32, 1.0, 0.0],
            source_date: date.map(|d| d.to_string()),
        }
    }

    #[test]
    fn embedding_round_trip() {
        let original: Vec<f32> = (0..384).map(|i| i as f32 * 0.001).collect();
        let encoded = encode_embedding(&original);
        assert_eq!(encoded.len(), 1536);
        assert_eq!(decode_embedding(&encoded).unwrap(), original);
    }

    #[test]
    fn bad_blobs_rejected() {
        assert!(decode_embedding(&[]).is_err());
        assert!(decode_embedding(&[1, 2, 3]).is_err());
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn upsert_and_fetch_candidates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = open_index(tmp.path()).await;

        index
            .upsert_chunks("MEMORY.md", &[chunk(0, "alpha", None), chunk(1, "beta", None)])
            .await
            .unwrap();

        let all = index.candidates(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].embedding.len(), 3);
        assert_eq!(index.max_chunk_index("MEMORY.md").await.unwrap(), 1);
        assert_eq!(index.max_chunk_index("other").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn date_filter_excludes_undated_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = open_index(tmp.path()).await;

        index
            .upsert_chunks(
                "chat-log/2025-02-15.jsonl",
                &[chunk(0, "dated", Some("2025-02-15"))],
            )
            .await
            .unwrap();
        index
            .upsert_chunks("MEMORY.md", &[chunk(0, "undated", None)])
            .await
            .unwrap();

        let hits = index
            .candidates(Some("2025-02-01"), Some("2025-02-28"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "dated");

        let outside = index
            .candidates(Some("2025-03-01"), Some("2025-03-31"))
            .await
            .unwrap();
        assert!(outside.is_empty());
    }

    #[tokio::test]
    async fn delete_by_prefix_scopes_to_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = open_index(tmp.path()).await;

        index
            .upsert_chunks("filesystem/projects", &[chunk(0, "a", None)])
            .await
            .unwrap();
        index
            .upsert_chunks("filesystem/projects/sub", &[chunk(0, "b", None)])
            .await
            .unwrap();
        index
            .upsert_chunks("MEMORY.md", &[chunk(0, "keep", None)])
            .await
            .unwrap();

        let removed = index.delete_by_prefix("filesystem/").await.unwrap();
        assert_eq!(removed, 2);
        let rest = index.candidates(None, None).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].path, "MEMORY.md");
    }

    #[tokio::test]
    async fn fingerprints_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = open_index(tmp.path()).await;

        assert!(index.fingerprint("notes.md").await.unwrap().is_none());
        let fp = Fingerprint {
            mtime_ms: 111,
            size: 222,
            last_line: 3,
        };
        index.set_fingerprint("notes.md", &fp).await.unwrap();
        assert_eq!(index.fingerprint("notes.md").await.unwrap(), Some(fp));
    }

    #[tokio::test]
    async fn listing_progress_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = open_index(tmp.path()).await;

        assert!(index.listing_progress("/home").await.unwrap().is_none());
        index
            .set_listing_progress("/home", Some("projects/deep"))
            .await
            .unwrap();
        assert_eq!(
            index.listing_progress("/home").await.unwrap().as_deref(),
            Some("projects/deep")
        );
        index.set_listing_progress("/home", None).await.unwrap();
        assert!(index.listing_progress("/home").await.unwrap().is_none());
    }
}
