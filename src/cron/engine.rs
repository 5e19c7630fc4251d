//! The scheduler and executor behind the cron store.
//!
//! A tick loop scans the store for due jobs; the cron skill wakes it early
//! when a job is added. One-shots are marked before they run (`sentAtMs`)
//! so a crash anywhere after the mark can never produce a second send, and
//! overdue one-shots found at startup run sequentially under the same rule.
//! Recurring jobs have no delivery mark: a tick missed while the process
//! was down is simply missed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::agent::Agent;
use crate::chatlog::{self, ChatLogEntry};
use crate::config::AppConfig;
use crate::cron::{next_occurrence, CronJob, CronStore, Schedule};
use crate::traits::{TransportSet, TurnContext};

const DEFAULT_TICK: Duration = Duration::from_secs(1);
/// Backoff before the second and third delivery attempts.
const DEFAULT_RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(5), Duration::from_secs(15)];

pub struct CronEngine {
    store: Arc<CronStore>,
    agent: Arc<Agent>,
    transports: Arc<TransportSet>,
    config: Arc<AppConfig>,
    workspace: PathBuf,
    store_dir: PathBuf,
    tick: Duration,
    retry_delays: Vec<Duration>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
    /// Recurring job id → next fire time (unix millis). Rebuilt lazily.
    next_runs: Mutex<HashMap<String, i64>>,
}

impl CronEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<CronStore>,
        agent: Arc<Agent>,
        transports: Arc<TransportSet>,
        config: Arc<AppConfig>,
        workspace: PathBuf,
        store_dir: PathBuf,
        wake_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            store,
            agent,
            transports,
            config,
            workspace,
            store_dir,
            tick: DEFAULT_TICK,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
            wake_rx: Mutex::new(Some(wake_rx)),
            next_runs: Mutex::new(HashMap::new()),
        }
    }

    /// Shrink timers for tests.
    #[cfg(test)]
    pub fn with_timing(mut self, tick: Duration, retry_delays: Vec<Duration>) -> Self {
        self.tick = tick;
        self.retry_delays = retry_delays;
        self
    }

    /// Spawn the scheduler loop. Runs the startup pass first.
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            self.startup_pass().await;

            let mut wake_rx = self
                .wake_rx
                .lock()
                .await
                .take()
                .expect("CronEngine started twice");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.tick) => {},
                    _ = wake_rx.recv() => {},
                }
                if let Err(e) = self.tick_once().await {
                    error!("Cron tick failed: {:#}", e);
                }
            }
        });
        info!("Cron engine started");
    }

    /// Handle jobs that came due while the process was down. One-shots
    /// already marked as sent are skipped entirely; overdue unsent ones run
    /// sequentially, each observing mark-before-run.
    pub async fn startup_pass(&self) {
        let now = Utc::now().timestamp_millis();
        for job in self.store.load_jobs().await {
            if !job.enabled {
                continue;
            }
            match &job.schedule {
                Schedule::OneShot { at_ms } => {
                    if job.sent_at_ms.is_some() {
                        info!(job = %job.name, "Skipping one-shot already marked sent");
                        continue;
                    }
                    if *at_ms <= now {
                        info!(job = %job.name, "Running overdue one-shot from startup");
                        self.execute_job(&job).await;
                    }
                }
                Schedule::Recurring { .. } => {
                    self.arm_recurring(&job, now).await;
                }
            }
        }
    }

    async fn arm_recurring(&self, job: &CronJob, now_ms: i64) {
        let Schedule::Recurring { expr, tz } = &job.schedule else {
            return;
        };
        let after = Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(Utc::now);
        match next_occurrence(expr, tz.as_deref(), self.config.user_tz(), after) {
            Ok(next) => {
                self.next_runs
                    .lock()
                    .await
                    .insert(job.id.clone(), next.timestamp_millis());
            }
            Err(e) => {
                warn!(job = %job.name, "Cannot compute next run, leaving unarmed: {:#}", e);
            }
        }
    }

    pub async fn tick_once(&self) -> anyhow::Result<()> {
        let now = Utc::now().timestamp_millis();
        let jobs = self.store.load_jobs().await;

        // Drop armed entries for jobs that were removed or disabled.
        {
            let mut next_runs = self.next_runs.lock().await;
            next_runs.retain(|id, _| jobs.iter().any(|j| &j.id == id && j.enabled));
        }

        for job in &jobs {
            if !job.enabled {
                continue;
            }
            match &job.schedule {
                Schedule::OneShot { at_ms } => {
                    if job.sent_at_ms.is_none() && *at_ms <= now {
                        self.execute_job(job).await;
                    }
                }
                Schedule::Recurring { .. } => {
                    let due = {
                        let next_runs = self.next_runs.lock().await;
                        next_runs.get(&job.id).copied()
                    };
                    match due {
                        None => self.arm_recurring(job, now).await,
                        Some(at) if at <= now => {
                            self.execute_job(job).await;
                            self.arm_recurring(job, now).await;
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Run one job to completion: mark, execute through the agent, deliver,
    /// retry on failure, apologise when all attempts are spent.
    async fn execute_job(&self, job: &CronJob) {
        if job.is_one_shot() {
            let now = Utc::now().timestamp_millis();
            let marked = self
                .store
                .update_job(&job.id, |j| j.sent_at_ms = Some(now))
                .await;
            match marked {
                Ok(true) => {}
                Ok(false) => {
                    warn!(job = %job.name, "One-shot vanished before the mark; skipping");
                    return;
                }
                Err(e) => {
                    error!(job = %job.name, "Failed to persist delivery mark, not running: {:#}", e);
                    return;
                }
            }
        }

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=self.retry_delays.len() {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delays[attempt - 1]).await;
            }
            match self.run_and_send(job).await {
                Ok(()) => {
                    info!(job = %job.name, attempt, "Cron job delivered");
                    if job.is_one_shot() {
                        if let Err(e) = self.store.remove_job(&job.id).await {
                            warn!(job = %job.name, "Failed to remove fired one-shot: {:#}", e);
                        }
                    }
                    return;
                }
                Err(e) => {
                    warn!(job = %job.name, attempt, "Cron delivery failed: {:#}", e);
                    last_err = Some(e);
                }
            }
        }

        // All attempts spent. The one-shot keeps its mark so a restart never
        // re-sends; the apology is the user-visible acknowledgement and is
        // itself best-effort.
        let err = last_err
            .map(|e| format!("{:#}", e))
            .unwrap_or_else(|| "unknown error".to_string());
        error!(job = %job.name, "Cron job failed after all retries: {}", err);
        if let Some(transport) = self.transports.for_jid(&job.jid) {
            let apology = format!(
                "[Bot] Moo — reminder '{}' didn't go through: {}",
                job.name, err
            );
            if let Err(e) = transport.send_text(&job.jid, &apology).await {
                warn!(job = %job.name, "Apology message also failed: {:#}", e);
            }
        }
    }

    /// One delivery attempt: agent turn on the job message, then send the
    /// reply over the transport selected by the jid shape.
    async fn run_and_send(&self, job: &CronJob) -> anyhow::Result<()> {
        let transport = self
            .transports
            .for_jid(&job.jid)
            .ok_or_else(|| anyhow::anyhow!("No transport wired for jid '{}'", job.jid))?;

        let ctx = TurnContext::new(&job.jid, false, self.workspace.clone(), self.store_dir.clone());
        let history_lines =
            chatlog::read_last_private(&self.workspace, &job.jid, 6).unwrap_or_default();
        let history: Vec<serde_json::Value> = history_lines
            .iter()
            .map(|h| serde_json::json!({ "role": h.role, "content": h.content }))
            .collect();

        let system_prompt = self.agent.system_prompt();
        let out = self
            .agent
            .run_turn(&ctx, &system_prompt, &history, &job.message)
            .await;

        transport.send_text(&job.jid, &out.text).await?;

        let entry = ChatLogEntry {
            ts: Utc::now().timestamp_millis(),
            jid: job.jid.clone(),
            user: job.message.clone(),
            assistant: out.text.clone(),
        };
        if let Err(e) = chatlog::append_private(&self.workspace, self.config.user_tz(), &entry) {
            warn!(job = %job.name, "Chat log append failed: {:#}", e);
        }
        Ok(())
    }
}
