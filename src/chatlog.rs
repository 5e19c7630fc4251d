//! Append-only conversation log.
//!
//! Every completed exchange is written as one JSON-Lines record, twice for
//! private chats: to the per-chat file (recent-context tail reads) and to the
//! per-day aggregate (date queries, memory indexing). Group traffic goes to
//! its own tree and never touches the private files.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::state::safe_jid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogEntry {
    /// Unix millis of the exchange.
    pub ts: i64,
    pub jid: String,
    pub user: String,
    pub assistant: String,
}

/// One turn of injectable history, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryLine {
    pub role: &'static str,
    pub content: String,
}

fn day_stamp(ts_ms: i64, tz: Tz) -> String {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .with_timezone(&tz)
        .format("%Y-%m-%d")
        .to_string()
}

fn private_chat_file(workspace: &Path, jid: &str) -> PathBuf {
    workspace
        .join("chat-log")
        .join("private")
        .join(format!("{}.jsonl", safe_jid(jid)))
}

fn aggregate_file(workspace: &Path, day: &str) -> PathBuf {
    workspace.join("chat-log").join(format!("{}.jsonl", day))
}

fn group_file(workspace: &Path, group_id: &str, day: &str) -> PathBuf {
    workspace
        .join("group-chat-log")
        .join(safe_jid(group_id))
        .join(format!("{}.jsonl", day))
}

fn append_line(path: &Path, line: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Record one completed private exchange: per-chat file plus the per-day
/// aggregate.
pub fn append_private(workspace: &Path, tz: Tz, entry: &ChatLogEntry) -> anyhow::Result<()> {
    let line = serde_json::to_string(entry)?;
    append_line(&private_chat_file(workspace, &entry.jid), &line)?;
    append_line(&aggregate_file(workspace, &day_stamp(entry.ts, tz)), &line)?;
    Ok(())
}

/// Record one group exchange. Group logs are isolated: nothing is written
/// under `chat-log/`, so group traffic never enters private memory.
pub fn append_group(
    workspace: &Path,
    tz: Tz,
    group_id: &str,
    entry: &ChatLogEntry,
) -> anyhow::Result<()> {
    let line = serde_json::to_string(entry)?;
    append_line(
        &group_file(workspace, group_id, &day_stamp(entry.ts, tz)),
        &line,
    )
}

fn tail_exchanges(path: &Path, n: usize) -> anyhow::Result<Vec<HistoryLine>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let entries: Vec<ChatLogEntry> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();

    let start = entries.len().saturating_sub(n);
    let mut history = Vec::with_capacity((entries.len() - start) * 2);
    for entry in &entries[start..] {
        history.push(HistoryLine {
            role: "user",
            content: entry.user.clone(),
        });
        history.push(HistoryLine {
            role: "assistant",
            content: entry.assistant.clone(),
        });
    }
    Ok(history)
}

/// Last `n` exchanges for a private chat, as user/assistant turns.
pub fn read_last_private(workspace: &Path, jid: &str, n: usize) -> anyhow::Result<Vec<HistoryLine>> {
    tail_exchanges(&private_chat_file(workspace, jid), n)
}

/// Last `n` exchanges for a group, read from today's and yesterday's files.
pub fn read_last_group(
    workspace: &Path,
    tz: Tz,
    group_id: &str,
    n: usize,
) -> anyhow::Result<Vec<HistoryLine>> {
    let now = Utc::now().timestamp_millis();
    let today = day_stamp(now, tz);
    let yesterday = day_stamp(now - 86_400_000, tz);

    let mut history = tail_exchanges(&group_file(workspace, group_id, &yesterday), n)?;
    history.extend(tail_exchanges(&group_file(workspace, group_id, &today), n)?);
    let start = history.len().saturating_sub(n * 2);
    Ok(history.split_off(start))
}
