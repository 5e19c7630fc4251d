//! Semantic memory: embedding index over notes, chat logs, and optional
//! filesystem listings, with date-aware cosine search.

mod chunking;
mod index;
mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;

pub use chunking::{chunk_lines, chunk_text, ChunkParams, TextChunk};
pub use index::{cosine_similarity, MemoryIndex};
pub use sync::SyncStats;

use crate::config::MemoryConfig;
use crate::traits::ModelClient;

/// Namespace prefix for filesystem-listing chunks.
const FILESYSTEM_PREFIX: &str = "filesystem";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub snippet: String,
    pub score: f32,
}

/// Search options: the caller supplies what the tool call carried and the
/// configured defaults fill the rest.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub k: Option<usize>,
    pub min_score: Option<f32>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub date_range: Option<String>,
}

pub struct MemoryService {
    index: MemoryIndex,
    model: Arc<dyn ModelClient>,
    workspace: PathBuf,
    tz: Tz,
    chunk_params: ChunkParams,
    default_k: usize,
    default_min_score: f32,
    fs_roots: Vec<PathBuf>,
}

impl MemoryService {
    pub async fn open(
        config: &MemoryConfig,
        index_path: PathBuf,
        workspace: PathBuf,
        tz: Tz,
        model: Arc<dyn ModelClient>,
    ) -> anyhow::Result<Self> {
        let index = MemoryIndex::open(&index_path).await?;
        Ok(Self {
            index,
            model,
            workspace,
            tz,
            chunk_params: ChunkParams::clamped(
                config.chunking.target_tokens,
                config.chunking.overlap_tokens,
            ),
            default_k: config.search.k,
            default_min_score: config.search.min_score,
            fs_roots: config
                .sync
                .filesystem_roots
                .iter()
                .map(PathBuf::from)
                .collect(),
        })
    }

    pub(crate) fn index(&self) -> &MemoryIndex {
        &self.index
    }

    pub(crate) fn workspace(&self) -> &std::path::Path {
        &self.workspace
    }

    /// Map an indexed path back to the file or directory behind it.
    /// Stale entries resolve to None and are filtered out of results.
    fn resolve_source(&self, path: &str) -> Option<PathBuf> {
        if path == FILESYSTEM_PREFIX || path.starts_with("filesystem/") {
            let rel = path.strip_prefix(FILESYSTEM_PREFIX).unwrap_or("");
            let rel = rel.strip_prefix('/').unwrap_or(rel);
            for root in &self.fs_roots {
                let candidate = if rel.is_empty() {
                    root.clone()
                } else {
                    root.join(rel)
                };
                if candidate.exists() {
                    return Some(candidate);
                }
            }
            return None;
        }
        let candidate = self.workspace.join(path);
        candidate.exists().then_some(candidate)
    }

    /// Compute the `[from, to]` day window from explicit bounds or a
    /// `dateRange` shorthand, relative to today in the user timezone.
    fn date_window(&self, query: &SearchQuery) -> (Option<String>, Option<String>) {
        if query.date_from.is_some() || query.date_to.is_some() {
            return (query.date_from.clone(), query.date_to.clone());
        }
        let Some(range) = query.date_range.as_deref() else {
            return (None, None);
        };
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        let fmt = |d: chrono::NaiveDate| d.format("%Y-%m-%d").to_string();
        match range {
            "yesterday" => {
                let y = today - Duration::days(1);
                (Some(fmt(y)), Some(fmt(y)))
            }
            "last_week" | "last_7_days" => {
                (Some(fmt(today - Duration::days(7))), Some(fmt(today)))
            }
            "last_month" => (Some(fmt(today - Duration::days(30))), Some(fmt(today))),
            _ => (None, None),
        }
    }

    /// Embed the query, cosine-rank the stored chunks, apply score and date
    /// filters, and drop hits whose source no longer exists.
    pub async fn search(&self, query: &str, opts: &SearchQuery) -> anyhow::Result<Vec<SearchHit>> {
        let vectors = self.model.embed(&[query.to_string()]).await?;
        let query_vec = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding provider returned no vector"))?;

        let (date_from, date_to) = self.date_window(opts);
        let candidates = self
            .index
            .candidates(date_from.as_deref(), date_to.as_deref())
            .await?;

        let min_score = opts.min_score.unwrap_or(self.default_min_score);
        let k = opts.k.unwrap_or(self.default_k).max(1);

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|chunk| {
                let score = cosine_similarity(&query_vec, &chunk.embedding);
                if score < min_score {
                    return None;
                }
                self.resolve_source(&chunk.path)?;
                Some(SearchHit {
                    path: chunk.path,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    snippet: snippet_of(&chunk.text),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
                .then(a.start_line.cmp(&b.start_line))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Windowed read of an indexed source. Notes and chat logs only;
    /// filesystem listings have no readable backing file in this sense.
    pub async fn read_source(
        &self,
        path: &str,
        from: Option<usize>,
        lines: Option<usize>,
    ) -> anyhow::Result<String> {
        if path == FILESYSTEM_PREFIX || path.starts_with("filesystem/") {
            anyhow::bail!("Filesystem listings cannot be read as files; search them instead");
        }
        let resolved = self
            .resolve_source(path)
            .ok_or_else(|| anyhow::anyhow!("Unknown or vanished memory source '{}'", path))?;

        let content = tokio::fs::read_to_string(&resolved).await?;
        let all: Vec<&str> = content.lines().collect();
        let from = from.unwrap_or(1).max(1);
        let count = lines.unwrap_or(100).max(1);
        let start = from - 1;
        if start >= all.len() {
            anyhow::bail!(
                "Line {} is past the end of '{}' ({} lines)",
                from,
                path,
                all.len()
            );
        }
        let end = (start + count).min(all.len());
        Ok(all[start..end].join("\n"))
    }
}

/// Search hits carry a bounded preview, not the whole chunk; callers pull
/// full context through `read_source` when they need it.
const SNIPPET_CHARS: usize = 300;

fn snippet_of(text: &str) -> String {
    let trimmed = text.trim();
    let mut snippet: String = trimmed.chars().take(SNIPPET_CHARS).collect();
    if snippet.len() < trimmed.len() {
        snippet.push('…');
    }
    snippet
}


#[cfg(test)]
mod tests {
    use super::test_support::stub_service;
    use super::*;

    #[tokio::test]
    async fn search_finds_note_content() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = tmp.path().join("workspace");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join("MEMORY.md"), "User prefers dark mode.\n").unwrap();

        let service = stub_service(&ws, tmp.path(), vec![]).await;
        service.sync().await.unwrap();

        let hits = service
            .search(
                "what does the user prefer?",
                &SearchQuery {
                    min_score: Some(0.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].snippet.contains("dark mode"));
        assert!(hits[0].score >= 0.5);
    }

    #[tokio::test]
    async fn vanished_sources_drop_out_of_results() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = tmp.path().join("workspace");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join("MEMORY.md"), "ephemeral fact about tulips\n").unwrap();

        let service = stub_service(&ws, tmp.path(), vec![]).await;
        service.sync().await.unwrap();
        std::fs::remove_file(ws.join("MEMORY.md")).unwrap();

        let hits = service
            .search(
                "ephemeral fact about tulips",
                &SearchQuery {
                    min_score: Some(0.1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn date_range_yesterday_excludes_other_days() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = tmp.path().join("workspace");
        let log_dir = ws.join("chat-log");
        std::fs::create_dir_all(&log_dir).unwrap();
        // A chat-log file from a fixed past day that is not "yesterday".
        std::fs::write(
            log_dir.join("2025-02-15.jsonl"),
            r#"{"ts":1739577600000,"jid":"1","user":"we talked about pelicans","assistant":"pelicans indeed"}"#,
        )
        .unwrap();

        let service = stub_service(&ws, tmp.path(), vec![]).await;
        service.sync().await.unwrap();

        let unfiltered = service
            .search(
                "we talked about pelicans",
                &SearchQuery {
                    min_score: Some(0.1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!unfiltered.is_empty());

        let filtered = service
            .search(
                "we talked about pelicans",
                &SearchQuery {
                    min_score: Some(0.1),
                    date_range: Some("yesterday".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn read_source_windows_notes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = tmp.path().join("workspace");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join("MEMORY.md"), "one\ntwo\nthree\nfour\n").unwrap();

        let service = stub_service(&ws, tmp.path(), vec![]).await;
        let window = service
            .read_source("MEMORY.md", Some(2), Some(2))
            .await
            .unwrap();
        assert_eq!(window, "two\nthree");

        assert!(service
            .read_source("filesystem/anything", None, None)
            .await
            .is_err());
        assert!(service.read_source("MEMORY.md", Some(99), None).await.is_err());
    }
}
