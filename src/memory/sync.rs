//! Source walking and incremental indexing.
//!
//! `sync()` fingerprints every source with `(mtime, size)` and only
//! re-embeds what changed. Chat-log files are tailed: lines already indexed
//! are never re-chunked. Filesystem listings are walked in batches with
//! progress persisted, so an interrupted walk over a large tree resumes
//! where it stopped.

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use super::chunking::{chunk_lines, chunk_text};
use super::index::{Fingerprint, NewChunk};
use super::{MemoryService, FILESYSTEM_PREFIX};
use crate::chatlog::ChatLogEntry;

/// How many directories to index between progress checkpoints.
const LISTING_BATCH: usize = 25;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncStats {
    pub upserted_files: usize,
    pub upserted_chunks: usize,
    pub deleted_paths: usize,
}

fn file_stamp(path: &Path) -> anyhow::Result<(i64, i64)> {
    let meta = std::fs::metadata(path)?;
    let mtime_ms = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok((mtime_ms, meta.len() as i64))
}

impl MemoryService {
    /// Walk all configured sources, upserting changed chunks and removing
    /// entries whose source disappeared. Idempotent: a second run with no
    /// source changes upserts nothing.
    pub async fn sync(&self) -> anyhow::Result<SyncStats> {
        let mut stats = SyncStats::default();

        self.sync_notes(&mut stats).await?;
        self.sync_chat_logs(&mut stats).await?;
        self.sync_filesystem_listings(&mut stats).await?;
        self.remove_stale(&mut stats).await?;

        info!(
            files = stats.upserted_files,
            chunks = stats.upserted_chunks,
            deleted = stats.deleted_paths,
            "Memory sync complete"
        );
        Ok(stats)
    }

    async fn sync_notes(&self, stats: &mut SyncStats) -> anyhow::Result<()> {
        let mut notes = vec![self.workspace().join("MEMORY.md")];
        let memory_dir = self.workspace().join("memory");
        if let Ok(entries) = std::fs::read_dir(&memory_dir) {
            let mut files: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
                .collect();
            files.sort();
            notes.extend(files);
        }

        for abs in notes {
            if !abs.is_file() {
                continue;
            }
            let rel = abs
                .strip_prefix(self.workspace())
                .unwrap_or(&abs)
                .to_string_lossy()
                .into_owned();
            self.sync_note_file(&rel, &abs, stats).await?;
        }
        Ok(())
    }

    async fn sync_note_file(
        &self,
        rel: &str,
        abs: &Path,
        stats: &mut SyncStats,
    ) -> anyhow::Result<()> {
        let (mtime_ms, size) = file_stamp(abs)?;
        if let Some(fp) = self.index().fingerprint(rel).await? {
            if fp.mtime_ms == mtime_ms && fp.size == size {
                return Ok(());
            }
        }

        let content = std::fs::read_to_string(abs)?;
        let chunks = chunk_text(&content, self.chunk_params);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        // Whole-file rewrite: a note edit can shift every chunk boundary.
        self.index().delete_path(rel).await?;
        if !texts.is_empty() {
            let embeddings = self.model.embed(&texts).await?;
            let rows: Vec<NewChunk> = chunks
                .iter()
                .zip(embeddings)
                .enumerate()
                .map(|(i, (chunk, embedding))| NewChunk {
                    chunk_index: i as i64,
                    start_line: chunk.start_line as i64,
                    end_line: chunk.end_line as i64,
                    text: chunk.text.clone(),
                    embedding,
                    source_date: None,
                })
                .collect();
            self.index().upsert_chunks(rel, &rows).await?;
            stats.upserted_chunks += rows.len();
        }
        self.index()
            .set_fingerprint(
                rel,
                &Fingerprint {
                    mtime_ms,
                    size,
                    last_line: content.lines().count() as i64,
                },
            )
            .await?;
        stats.upserted_files += 1;
        debug!(path = rel, "Indexed note");
        Ok(())
    }

    async fn sync_chat_logs(&self, stats: &mut SyncStats) -> anyhow::Result<()> {
        let aggregate_dir = self.workspace().join("chat-log");
        for abs in sorted_files(&aggregate_dir, "jsonl") {
            let rel = format!(
                "chat-log/{}",
                abs.file_name().unwrap_or_default().to_string_lossy()
            );
            // Aggregate files are named YYYY-MM-DD.jsonl; that date stamps
            // every chunk from the file.
            let day = abs
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string());
            self.sync_log_file(&rel, &abs, day, stats).await?;
        }

        let private_dir = aggregate_dir.join("private");
        for abs in sorted_files(&private_dir, "jsonl") {
            let rel = format!(
                "chat-log/private/{}",
                abs.file_name().unwrap_or_default().to_string_lossy()
            );
            self.sync_log_file(&rel, &abs, None, stats).await?;
        }
        Ok(())
    }

    /// Tail-index one chat-log file: only lines past the stored `last_line`
    /// are chunked. A shrunken file (rotation, manual edit) is reindexed
    /// from scratch.
    async fn sync_log_file(
        &self,
        rel: &str,
        abs: &Path,
        file_day: Option<String>,
        stats: &mut SyncStats,
    ) -> anyhow::Result<()> {
        let (mtime_ms, size) = file_stamp(abs)?;
        let previous = self.index().fingerprint(rel).await?;

        let mut from_line = 0usize;
        match &previous {
            Some(fp) if fp.mtime_ms == mtime_ms && fp.size == size => return Ok(()),
            Some(fp) if fp.size <= size => from_line = fp.last_line as usize,
            Some(_) => {
                self.index().delete_path(rel).await?;
            }
            None => {}
        }

        let content = std::fs::read_to_string(abs)?;
        let lines: Vec<&str> = content.lines().collect();
        if from_line > lines.len() {
            from_line = 0;
            self.index().delete_path(rel).await?;
        }

        let fresh = &lines[from_line..];
        if !fresh.is_empty() {
            let source_date = file_day.or_else(|| self.batch_date(fresh));
            let chunks = chunk_lines(fresh, self.chunk_params, from_line);
            if !chunks.is_empty() {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let embeddings = self.model.embed(&texts).await?;
                let next_index = self.index().max_chunk_index(rel).await? + 1;
                let rows: Vec<NewChunk> = chunks
                    .iter()
                    .zip(embeddings)
                    .enumerate()
                    .map(|(i, (chunk, embedding))| NewChunk {
                        chunk_index: next_index + i as i64,
                        start_line: chunk.start_line as i64,
                        end_line: chunk.end_line as i64,
                        text: chunk.text.clone(),
                        embedding,
                        source_date: source_date.clone(),
                    })
                    .collect();
                self.index().upsert_chunks(rel, &rows).await?;
                stats.upserted_chunks += rows.len();
            }
        }

        self.index()
            .set_fingerprint(
                rel,
                &Fingerprint {
                    mtime_ms,
                    size,
                    last_line: lines.len() as i64,
                },
            )
            .await?;
        stats.upserted_files += 1;
        Ok(())
    }

    /// Day stamp for a batch of per-chat log lines, from the first record's
    /// timestamp, in the user timezone.
    fn batch_date(&self, lines: &[&str]) -> Option<String> {
        let entry: ChatLogEntry = lines
            .iter()
            .find_map(|l| serde_json::from_str(l).ok())?;
        let ts = Utc.timestamp_millis_opt(entry.ts).single()?;
        Some(ts.with_timezone(&self.tz).format("%Y-%m-%d").to_string())
    }

    async fn sync_filesystem_listings(&self, stats: &mut SyncStats) -> anyhow::Result<()> {
        if self.fs_roots.is_empty() {
            // Listings disabled: drop the whole namespace in one statement
            // instead of path-by-path.
            let removed = self.index().delete_by_prefix(FILESYSTEM_PREFIX).await?;
            stats.deleted_paths += removed as usize;
            return Ok(());
        }
        for root in self.fs_roots.clone() {
            if !root.is_dir() {
                warn!(root = %root.display(), "Filesystem root is not a directory; skipping");
                continue;
            }
            self.sync_listing_root(&root, stats).await?;
        }
        Ok(())
    }

    /// One chunk per directory. Progress is checkpointed every
    /// `LISTING_BATCH` directories so a crash mid-walk resumes rather than
    /// restarting.
    async fn sync_listing_root(&self, root: &Path, stats: &mut SyncStats) -> anyhow::Result<()> {
        let root_key = root.to_string_lossy().into_owned();
        let resume_after = self.index().listing_progress(&root_key).await?;

        let dirs = collect_dirs(root);
        let mut skipping = resume_after.is_some();
        let mut since_checkpoint = 0usize;

        for dir in &dirs {
            let chunk_path = listing_path(root, dir);
            if skipping {
                if Some(chunk_path.as_str()) == resume_after.as_deref() {
                    skipping = false;
                }
                continue;
            }

            let (mtime_ms, _) = file_stamp(dir)?;
            let listing = directory_listing(dir)?;
            let size = listing.len() as i64;

            let unchanged = matches!(
                self.index().fingerprint(&chunk_path).await?,
                Some(fp) if fp.mtime_ms == mtime_ms && fp.size == size
            );
            if !unchanged {
                let embeddings = self.model.embed(&[listing.clone()]).await?;
                self.index()
                    .upsert_chunks(
                        &chunk_path,
                        &[NewChunk {
                            chunk_index: 0,
                            start_line: 1,
                            end_line: listing.lines().count().max(1) as i64,
                            text: listing,
                            embedding: embeddings.into_iter().next().unwrap_or_default(),
                            source_date: None,
                        }],
                    )
                    .await?;
                self.index()
                    .set_fingerprint(
                        &chunk_path,
                        &Fingerprint {
                            mtime_ms,
                            size,
                            last_line: 0,
                        },
                    )
                    .await?;
                stats.upserted_chunks += 1;
                stats.upserted_files += 1;
            }

            since_checkpoint += 1;
            if since_checkpoint >= LISTING_BATCH {
                self.index()
                    .set_listing_progress(&root_key, Some(&chunk_path))
                    .await?;
                since_checkpoint = 0;
            }
        }

        // Resume marker no longer found (tree changed): start over next run.
        if skipping {
            self.index().set_listing_progress(&root_key, None).await?;
            return Ok(());
        }

        self.index().set_listing_progress(&root_key, None).await?;
        Ok(())
    }

    async fn remove_stale(&self, stats: &mut SyncStats) -> anyhow::Result<()> {
        for path in self.index().indexed_paths().await? {
            if self.resolve_source(&path).is_none() {
                self.index().delete_path(&path).await?;
                stats.deleted_paths += 1;
                debug!(path = %path, "Removed vanished source from index");
            }
        }
        Ok(())
    }
}

fn sorted_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(extension))
        .collect();
    files.sort();
    files
}

/// Depth-first directory walk, children sorted, hidden entries skipped.
fn collect_dirs(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        out.push(dir.clone());
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && !p
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with('.'))
                        .unwrap_or(true)
            })
            .collect();
        children.sort();
        // Reverse so the stack pops them in sorted order.
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    out
}

fn listing_path(root: &Path, dir: &Path) -> String {
    match dir.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => "filesystem".to_string(),
        Ok(rel) => format!("filesystem/{}", rel.to_string_lossy()),
        Err(_) => "filesystem".to_string(),
    }
}

fn directory_listing(dir: &Path) -> anyhow::Result<String> {
    let mut lines = vec![format!("Directory: {}", dir.display())];
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.flatten().collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_dir() {
            lines.push(format!("{}/", name));
        } else {
            lines.push(format!("{} ({} bytes)", name, meta.len()));
        }
    }
    Ok(lines.join("\n"))
}
