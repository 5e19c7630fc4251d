//! Tide: the periodic idle-wake scheduler.
//!
//! Every cooldown interval it asks one question per tracked chat: has the
//! conversation been quiet long enough, and are we outside the quiet window?
//! If so, the agent runs without a user message and may send one short
//! nudge. Tide counts its own sends as activity, so it never double-texts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use tracing::{info, warn};

use crate::agent::Agent;
use crate::bridge::ActivityTracker;
use crate::chatlog;
use crate::config::AppConfig;
use crate::traits::{TransportSet, TurnContext};

/// Internal stand-in for the missing user message on a Tide turn.
const TIDE_WAKE_TEXT: &str =
    "(Idle check: the user has not written anything new. Reply with at most one short, \
     context-tied message, or nothing worth sending.)";

pub struct Tide {
    agent: Arc<Agent>,
    transports: Arc<TransportSet>,
    config: Arc<AppConfig>,
    workspace: PathBuf,
    store_dir: PathBuf,
    activity: Arc<ActivityTracker>,
    last_sent: std::sync::Mutex<HashMap<String, i64>>,
}

/// Whether `now` falls inside the `[start, end]` window. The window wraps
/// midnight when end < start; a degenerate window (start == end) never
/// matches. Times are "HH:MM".
pub fn in_quiet_window(now: NaiveTime, start: &str, end: &str) -> bool {
    let (Ok(start), Ok(end)) = (
        NaiveTime::parse_from_str(start, "%H:%M"),
        NaiveTime::parse_from_str(end, "%H:%M"),
    ) else {
        warn!(start, end, "Unparseable quiet window; treating as disabled");
        return false;
    };
    if start == end {
        false
    } else if start < end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

impl Tide {
    pub fn new(
        agent: Arc<Agent>,
        transports: Arc<TransportSet>,
        config: Arc<AppConfig>,
        workspace: PathBuf,
        store_dir: PathBuf,
        activity: Arc<ActivityTracker>,
    ) -> Self {
        Self {
            agent,
            transports,
            config,
            workspace,
            store_dir,
            activity,
            last_sent: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The chat Tide talks to. Explicit config first, then the owner's chat;
    /// with neither set Tide has no target and stays silent.
    pub fn target_jid(&self) -> Option<String> {
        if let Some(jid) = self.config.tide.jid.as_ref().filter(|j| !j.is_empty()) {
            return Some(jid.clone());
        }
        self.config
            .owner
            .telegram_user_id
            .map(|id| id.to_string())
    }

    pub fn start(self: Arc<Self>) {
        if self.target_jid().is_none() {
            warn!("Tide enabled but no target chat (tide.jid or owner id); not starting");
            return;
        }
        let cooldown = Duration::from_secs(self.config.tide_cooldown_secs());
        info!(cooldown_secs = cooldown.as_secs(), "Tide started");
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(cooldown).await;
                if let Err(e) = self.wake_once().await {
                    warn!("Tide wake failed: {:#}", e);
                }
            }
        });
    }

    /// One wake: apply the quiet-window and silence rules, then maybe send a
    /// single nudge. Returns whether a message went out.
    pub async fn wake_once(&self) -> anyhow::Result<bool> {
        let Some(jid) = self.target_jid() else {
            return Ok(false);
        };

        let tz = self.config.user_tz();
        let now_local = Utc::now().with_timezone(&tz).time();
        if in_quiet_window(
            now_local,
            &self.config.tide.inactive_start,
            &self.config.tide.inactive_end,
        ) {
            return Ok(false);
        }

        let cooldown_ms = (self.config.tide_cooldown_secs() * 1000) as i64;
        let now_ms = Utc::now().timestamp_millis();
        let last_chat = self.activity.last_activity_ms(&jid).unwrap_or(0);
        let last_tide = self
            .last_sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&jid)
            .copied()
            .unwrap_or(0);
        if now_ms - last_chat.max(last_tide) < cooldown_ms {
            return Ok(false);
        }

        let history_lines =
            chatlog::read_last_private(&self.workspace, &jid, 6).unwrap_or_default();
        let history: Vec<serde_json::Value> = history_lines
            .iter()
            .map(|h| serde_json::json!({ "role": h.role, "content": h.content }))
            .collect();

        let ctx = TurnContext::new(&jid, false, self.workspace.clone(), self.store_dir.clone());
        let prompt = self.agent.tide_prompt();
        let out = self.agent.run_turn(&ctx, &prompt, &history, TIDE_WAKE_TEXT).await;
        if out.text.trim().is_empty() {
            return Ok(false);
        }

        let transport = self
            .transports
            .for_jid(&jid)
            .ok_or_else(|| anyhow::anyhow!("No transport wired for Tide target '{}'", jid))?;
        transport.send_text(&jid, &out.text).await?;

        info!(jid = %jid, "Tide nudge sent");
        self.last_sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(jid.clone(), now_ms);
        self.activity.record(&jid);
        Ok(true)
    }
}
