use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

/// One callable tool a skill exposes to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-Schema-subset object: `{type: "object", properties, required}`.
    pub parameters: Value,
}

/// Side payloads a tool can attach to the turn's reply. The agent passes
/// them through unchanged; the transport bridge delivers them after the text.
#[derive(Debug, Clone)]
pub enum ReplyPayload {
    Image {
        path: PathBuf,
        caption: Option<String>,
    },
    Voice {
        path: PathBuf,
    },
}

/// Per-turn context handed to skill executors.
///
/// Skills hold their long-lived dependencies themselves (store handles,
/// model client); this carries only what varies per turn.
pub struct TurnContext {
    pub jid: String,
    pub is_group: bool,
    pub workspace_dir: PathBuf,
    pub store_dir: PathBuf,
    payloads: Mutex<Vec<ReplyPayload>>,
}

impl TurnContext {
    pub fn new(jid: &str, is_group: bool, workspace_dir: PathBuf, store_dir: PathBuf) -> Self {
        Self {
            jid: jid.to_string(),
            is_group,
            workspace_dir,
            store_dir,
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub async fn push_payload(&self, payload: ReplyPayload) {
        self.payloads.lock().await.push(payload);
    }

    pub async fn take_payloads(&self) -> Vec<ReplyPayload> {
        std::mem::take(&mut *self.payloads.lock().await)
    }
}

/// A named capability with one or more tools behind a uniform executor.
///
/// Single-tool skills expose one tool whose name equals the skill id;
/// multi-tool skills declare a list and receive the called tool's name.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Stable identifier used in `skills.enabled`.
    fn id(&self) -> &str;

    /// Optional usage note injected into the system prompt.
    fn doc(&self) -> Option<String> {
        None
    }

    fn tools(&self) -> Vec<ToolSpec>;

    /// Whether this skill may run in group chats. Defaults to yes; skills
    /// touching the local machine opt out.
    fn group_safe(&self) -> bool {
        true
    }

    /// Execute one tool call. Errors are captured by the registry and fed
    /// back to the model as a tool-result string.
    async fn execute(
        &self,
        ctx: &TurnContext,
        tool_name: &str,
        args: &Value,
    ) -> anyhow::Result<String>;
}
