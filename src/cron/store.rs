use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Schedule {
    OneShot {
        /// Absolute fire time, unix millis.
        #[serde(rename = "atMs")]
        at_ms: i64,
    },
    Recurring {
        /// 5-field cron expression.
        expr: String,
        /// IANA zone the expression is evaluated in; None means user default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub schedule: Schedule,
    /// The user text the agent runs when the job fires.
    pub message: String,
    /// Destination chat; its shape selects the transport.
    pub jid: String,
    /// Delivery mark for one-shots. Set before the run so a crash between
    /// mark and send can never cause a second send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at_ms: Option<i64>,
}

fn default_enabled() -> bool {
    true
}

impl CronJob {
    pub fn is_one_shot(&self) -> bool {
        matches!(self.schedule, Schedule::OneShot { .. })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    jobs: Vec<CronJob>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            jobs: Vec::new(),
        }
    }
}

/// On-disk job store: one JSON document, rewritten whole on every mutation
/// via temp-file + rename so a crash mid-write leaves the old file intact.
pub struct CronStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CronStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Missing, empty or corrupt files read as "no jobs".
    fn read_file(&self) -> StoreFile {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), "Failed to read cron store: {}", e);
                }
                return StoreFile::default();
            }
        };
        if content.trim().is_empty() {
            return StoreFile::default();
        }
        match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), "Corrupt cron store, starting empty: {}", e);
                StoreFile::default()
            }
        }
    }

    fn write_file(&self, file: &StoreFile) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub async fn load_jobs(&self) -> Vec<CronJob> {
        let _guard = self.write_lock.lock().await;
        self.read_file().jobs
    }

    pub async fn add_job(&self, job: CronJob) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file();
        file.jobs.push(job);
        self.write_file(&file)
    }

    /// Apply a patch to the job with `id`; returns whether it existed.
    pub async fn update_job<F>(&self, id: &str, patch: F) -> anyhow::Result<bool>
    where
        F: FnOnce(&mut CronJob),
    {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file();
        let Some(job) = file.jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(false);
        };
        patch(job);
        self.write_file(&file)?;
        Ok(true)
    }

    pub async fn remove_job(&self, id: &str) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file();
        let before = file.jobs.len();
        file.jobs.retain(|j| j.id != id);
        let removed = file.jobs.len() != before;
        if removed {
            self.write_file(&file)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_shot(id: &str, at_ms: i64) -> CronJob {
        CronJob {
            id: id.to_string(),
            name: format!("job-{}", id),
            enabled: true,
            schedule: Schedule::OneShot { at_ms },
            message: "do the thing".to_string(),
            jid: "123".to_string(),
            sent_at_ms: None,
        }
    }

    fn store_in(dir: &std::path::Path) -> CronStore {
        CronStore::new(dir.join("jobs.json"))
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(store_in(tmp.path()).load_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn empty_and_corrupt_files_load_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(tmp.path());
        std::fs::write(tmp.path().join("jobs.json"), "").unwrap();
        assert!(store.load_jobs().await.is_empty());
        std::fs::write(tmp.path().join("jobs.json"), "{broken").unwrap();
        assert!(store.load_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn add_update_remove_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(tmp.path());

        store.add_job(one_shot("a", 1000)).await.unwrap();
        store.add_job(one_shot("b", 2000)).await.unwrap();
        assert_eq!(store.load_jobs().await.len(), 2);

        let found = store
            .update_job("a", |j| j.sent_at_ms = Some(999))
            .await
            .unwrap();
        assert!(found);
        let jobs = store.load_jobs().await;
        assert_eq!(
            jobs.iter().find(|j| j.id == "a").unwrap().sent_at_ms,
            Some(999)
        );

        assert!(store.remove_job("a").await.unwrap());
        assert!(!store.remove_job("a").await.unwrap());
        assert_eq!(store.load_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn update_missing_job_reports_false() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(tmp.path());
        assert!(!store.update_job("ghost", |_| {}).await.unwrap());
    }

    #[tokio::test]
    async fn store_survives_reload_and_keeps_version() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let store = store_in(tmp.path());
            store
                .add_job(CronJob {
                    id: "r".to_string(),
                    name: "stretch".to_string(),
                    enabled: true,
                    schedule: Schedule::Recurring {
                        expr: "*/5 * * * *".to_string(),
                        tz: Some("Europe/Amsterdam".to_string()),
                    },
                    message: "stretch now".to_string(),
                    jid: "31600000000@s.whatsapp.net".to_string(),
                    sent_at_ms: None,
                })
                .await
                .unwrap();
        }

        let raw: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join("jobs.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["jobs"][0]["schedule"]["kind"], "recurring");
        assert_eq!(raw["jobs"][0]["schedule"]["expr"], "*/5 * * * *");

        let store = store_in(tmp.path());
        let jobs = store.load_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].is_one_shot());
    }

    #[tokio::test]
    async fn one_shot_serializes_at_ms_tag() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store_in(tmp.path());
        store.add_job(one_shot("x", 1234)).await.unwrap();

        let raw: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join("jobs.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["jobs"][0]["schedule"]["kind"], "oneShot");
        assert_eq!(raw["jobs"][0]["schedule"]["atMs"], 1234);
        // Unsent one-shots carry no delivery mark on disk.
        assert!(raw["jobs"][0].get("sentAtMs").is_none());
    }
}
