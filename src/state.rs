//! Per-user state directory layout.
//!
//! Everything moobot persists lives under one directory: the config document,
//! the cron store, the workspace (notes, chat logs, uploads) and the memory
//! index. The directory can be redirected with `MOOBOT_STATE_DIR`, which is
//! the only environment variable in the public contract (the test harness
//! points it at a temp directory per case).

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Environment variable that redirects the state directory.
pub const STATE_DIR_ENV: &str = "MOOBOT_STATE_DIR";

#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// Resolve the state directory: `MOOBOT_STATE_DIR` override, else
    /// `~/.moobot`. Creates the directory tree on first use.
    pub fn resolve() -> anyhow::Result<Self> {
        let root = match std::env::var(STATE_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .context("Cannot determine home directory; set MOOBOT_STATE_DIR")?
                .join(".moobot"),
        };
        Self::at(root)
    }

    /// Use an explicit root (tests).
    pub fn at(root: PathBuf) -> anyhow::Result<Self> {
        let paths = Self { root };
        std::fs::create_dir_all(paths.workspace_dir())
            .with_context(|| format!("Failed to create state dir at {}", paths.root.display()))?;
        std::fs::create_dir_all(paths.cron_dir())?;
        std::fs::create_dir_all(paths.uploads_dir())?;
        Ok(paths)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Workspace: notes, chat logs, uploads. Indexable by the memory layer.
    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.workspace_dir().join("uploads")
    }

    fn cron_dir(&self) -> PathBuf {
        self.root.join("cron")
    }

    pub fn cron_store_file(&self) -> PathBuf {
        self.cron_dir().join("jobs.json")
    }

    pub fn memory_index_file(&self) -> PathBuf {
        self.root.join("memory").join("index.db")
    }
}

/// Sanitise a chat identifier for use as a file-system name.
///
/// Keeps alphanumerics, `.`, `_` and `-`; everything else becomes `_`.
/// `12345@s.whatsapp.net` and `12345` therefore map to distinct names.
pub fn safe_jid(jid: &str) -> String {
    let cleaned: String = jid
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_jid_keeps_plain_ids() {
        assert_eq!(safe_jid("123456789"), "123456789");
        assert_eq!(safe_jid("user-name_1.2"), "user-name_1.2");
    }

    #[test]
    fn safe_jid_replaces_special_chars() {
        assert_eq!(safe_jid("12345@s.whatsapp.net"), "12345_s.whatsapp.net");
        assert_eq!(safe_jid("a/b\\c:d"), "a_b_c_d");
        assert_eq!(safe_jid(""), "_");
    }

    #[test]
    fn state_paths_create_layout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = StatePaths::at(tmp.path().join("state")).unwrap();
        assert!(paths.workspace_dir().is_dir());
        assert!(paths.uploads_dir().is_dir());
        assert_eq!(paths.cron_store_file().file_name().unwrap(), "jobs.json");
    }
}
