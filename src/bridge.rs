//! Transport bridge: the glue between inbound messages and the agent loop.
//!
//! Turns for different chats run in parallel; turns for the same chat are
//! serialised behind a per-chat lock so history writes and tool effects keep
//! their order. Each chat also has a shallow queue: past depth 8 the bridge
//! answers "busy" instead of piling up turns.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::agent::Agent;
use crate::chatlog::{self, ChatLogEntry};
use crate::config::AppConfig;
use crate::traits::{ReplyPayload, TransportSet, TurnContext};

const MAX_QUEUE_DEPTH: usize = 8;
const HISTORY_EXCHANGES: usize = 12;

/// Last-message timestamps per chat, shared between the bridge and Tide.
/// Inbound and outbound traffic both count as activity.
#[derive(Default)]
pub struct ActivityTracker {
    last: std::sync::Mutex<HashMap<String, i64>>,
}

impl ActivityTracker {
    pub fn record(&self, jid: &str) {
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(jid.to_string(), Utc::now().timestamp_millis());
    }

    pub fn last_activity_ms(&self, jid: &str) -> Option<i64> {
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(jid)
            .copied()
    }
}

pub struct Bridge {
    agent: Arc<Agent>,
    transports: Arc<TransportSet>,
    config: Arc<AppConfig>,
    workspace: PathBuf,
    store_dir: PathBuf,
    activity: Arc<ActivityTracker>,
    chat_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    pending: std::sync::Mutex<HashMap<String, usize>>,
}

impl Bridge {
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
            chat_locks: std::sync::Mutex::new(HashMap::new()),
            pending: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn chat_lock(&self, jid: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.chat_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(jid.to_string())
            .or_default()
            .clone()
    }

    /// Returns false when the chat's queue is already at capacity.
    fn try_enqueue(&self, jid: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let depth = pending.entry(jid.to_string()).or_insert(0);
        if *depth >= MAX_QUEUE_DEPTH {
            return false;
        }
        *depth += 1;
        true
    }

    fn dequeue(&self, jid: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(depth) = pending.get_mut(jid) {
            *depth = depth.saturating_sub(1);
        }
    }

    /// Ingest one inbound message: resolve context, run the agent turn,
    /// deliver the reply and its side payloads, log the exchange. Returns
    /// the reply text (the test CLI prints it).
    pub async fn handle_inbound(
        &self,
        jid: &str,
        is_group: bool,
        text: &str,
    ) -> anyhow::Result<String> {
        self.activity.record(jid);

        if !self.try_enqueue(jid) {
            let busy = "I'm still working through your earlier messages; give me a moment.";
            self.send_text_logged(jid, busy).await;
            return Ok(busy.to_string());
        }

        let lock = self.chat_lock(jid);
        let _turn_guard = lock.lock().await;
        let result = self.run_turn_locked(jid, is_group, text).await;
        self.dequeue(jid);
        result
    }

    async fn run_turn_locked(
        &self,
        jid: &str,
        is_group: bool,
        text: &str,
    ) -> anyhow::Result<String> {
        let tz = self.config.user_tz();
        let history_lines = if is_group {
            chatlog::read_last_group(&self.workspace, tz, jid, HISTORY_EXCHANGES)?
        } else {
            chatlog::read_last_private(&self.workspace, jid, HISTORY_EXCHANGES)?
        };
        let history: Vec<Value> = history_lines
            .iter()
            .map(|h| json!({ "role": h.role, "content": h.content }))
            .collect();

        let ctx = TurnContext::new(jid, is_group, self.workspace.clone(), self.store_dir.clone());
        let system_prompt = self.agent.system_prompt();
        let out = self.agent.run_turn(&ctx, &system_prompt, &history, text).await;

        self.send_text_logged(jid, &out.text).await;
        self.deliver_payloads(jid, &out.payloads).await;

        let entry = ChatLogEntry {
            ts: Utc::now().timestamp_millis(),
            jid: jid.to_string(),
            user: text.to_string(),
            assistant: out.text.clone(),
        };
        if is_group {
            chatlog::append_group(&self.workspace, tz, jid, &entry)?;
        } else {
            chatlog::append_private(&self.workspace, tz, &entry)?;
        }
        self.activity.record(jid);

        Ok(out.text)
    }

    /// Live-chat sends are not retried; a failure is surfaced to the logs
    /// and the turn moves on.
    async fn send_text_logged(&self, jid: &str, text: &str) {
        let Some(transport) = self.transports.for_jid(jid) else {
            error!(jid, "No transport wired; dropping reply");
            return;
        };
        if let Err(e) = transport.send_text(jid, text).await {
            error!(jid, transport = %transport.name(), "Failed to send reply: {:#}", e);
        }
    }

    async fn deliver_payloads(&self, jid: &str, payloads: &[ReplyPayload]) {
        if payloads.is_empty() {
            return;
        }
        let Some(transport) = self.transports.for_jid(jid) else {
            return;
        };
        for payload in payloads {
            let result = match payload {
                ReplyPayload::Image { path, caption } => {
                    transport.send_image(jid, path, caption.as_deref()).await
                }
                ReplyPayload::Voice { path } => transport.send_voice(jid, path).await,
            };
            if let Err(e) = result {
                error!(jid, "Failed to deliver side payload: {:#}", e);
            }
        }
        info!(jid, count = payloads.len(), "Side payloads delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_agent, text as reply, TestTransport};
    use crate::traits::{Transport, TransportKind};

    struct Rig {
        bridge: Bridge,
        transport: Arc<TestTransport>,
        workspace: PathBuf,
        _tmp: tempfile::TempDir,
    }

    fn rig(replies: Vec<crate::traits::ChatReply>) -> Rig {
        let tmp = tempfile::TempDir::new().unwrap();
        let workspace = tmp.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();
        let (agent, _model) = scripted_agent(replies);
        let transport = Arc::new(TestTransport::new(TransportKind::BotApi));
        let bridge = Bridge::new(
            agent,
            Arc::new(TransportSet::new(vec![
                transport.clone() as Arc<dyn Transport>
            ])),
            Arc::new(AppConfig::default()),
            workspace.clone(),
            tmp.path().to_path_buf(),
            Arc::new(ActivityTracker::default()),
        );
        Rig {
            bridge,
            transport,
            workspace,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn inbound_message_gets_reply_and_log() {
        let rig = rig(vec![reply("hello there")]);
        let out = rig.bridge.handle_inbound("123", false, "hi").await.unwrap();
        assert_eq!(out, "hello there");
        assert_eq!(rig.transport.sent_texts().await, vec!["hello there"]);

        let history = chatlog::read_last_private(&rig.workspace, "123", 5).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].content, "hello there");
    }

    #[tokio::test]
    async fn group_messages_stay_out_of_private_logs() {
        let rig = rig(vec![reply("group reply")]);
        rig.bridge
            .handle_inbound("team@g.us", true, "hello group")
            .await
            .unwrap();

        assert!(!rig.workspace.join("chat-log").exists());
        assert!(rig.workspace.join("group-chat-log").exists());
    }

    #[tokio::test]
    async fn history_is_injected_on_later_turns() {
        let rig = rig(vec![reply("first"), reply("second")]);
        rig.bridge.handle_inbound("123", false, "one").await.unwrap();
        rig.bridge.handle_inbound("123", false, "two").await.unwrap();

        let history = chatlog::read_last_private(&rig.workspace, "123", 5).unwrap();
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn queue_overflow_answers_busy() {
        let rig = rig(vec![]);
        // Saturate the pending counter without running turns.
        for _ in 0..MAX_QUEUE_DEPTH {
            assert!(rig.bridge.try_enqueue("123"));
        }
        let out = rig.bridge.handle_inbound("123", false, "one more").await.unwrap();
        assert!(out.contains("give me a moment"));
        // The busy notice went out over the transport too.
        assert_eq!(rig.transport.sent_texts().await.len(), 1);
    }

    #[tokio::test]
    async fn activity_is_recorded_for_tide() {
        let rig = rig(vec![reply("noted")]);
        assert!(rig.bridge.activity.last_activity_ms("123").is_none());
        rig.bridge.handle_inbound("123", false, "hi").await.unwrap();
        assert!(rig.bridge.activity.last_activity_ms("123").is_some());
    }
}
