//! Test infrastructure: MockModel, EchoSkill, TestTransport.
//!
//! Provides a wired Agent with a scripted model, suitable for tests that
//! exercise the real agent loop, the cron engine, and the bridge.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::Agent;
use crate::config::AppConfig;
use crate::providers::ProviderError;
use crate::skills::SkillRegistry;
use crate::traits::{
    ChatReply, GeneratedImage, ModelClient, Skill, ToolCall, ToolSpec, Transport, TransportKind,
    TurnContext,
};

// ---------------------------------------------------------------------------
// MockModel
// ---------------------------------------------------------------------------

/// Scripted model: returns queued replies in order, records every call.
pub struct MockModel {
    responses: Mutex<Vec<ChatReply>>,
    call_log: Mutex<Vec<Vec<Value>>>,
    fail: bool,
}

impl MockModel {
    pub fn scripted(responses: Vec<ChatReply>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_log: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A model whose every chat call fails with a server error.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            call_log: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn calls(&self) -> usize {
        self.call_log.lock().await.len()
    }

    pub async fn messages_of_call(&self, idx: usize) -> Vec<Value> {
        self.call_log.lock().await[idx].clone()
    }
}

/// Build a text-only reply.
pub fn text(content: &str) -> ChatReply {
    ChatReply {
        text: Some(content.to_string()),
        tool_calls: Vec::new(),
    }
}

/// Build a single-tool-call reply.
pub fn tool_call(name: &str, arguments: &str) -> ChatReply {
    ChatReply {
        text: None,
        tool_calls: vec![ToolCall {
            id: format!("call_{}", Uuid::new_v4()),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn chat(
        &self,
        messages: &[Value],
        _tools: &[Value],
        _max_tokens: Option<u32>,
    ) -> anyhow::Result<ChatReply> {
        self.call_log.lock().await.push(messages.to_vec());
        if self.fail {
            return Err(ProviderError::from_status(503, "scripted outage").into());
        }
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            Ok(text("Mock response"))
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }

    async fn describe_image(
        &self,
        _image_ref: &str,
        _prompt: &str,
        _system_prompt: &str,
    ) -> anyhow::Result<String> {
        Ok("a mock image".to_string())
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _size: Option<&str>,
    ) -> anyhow::Result<GeneratedImage> {
        Ok(GeneratedImage {
            path: std::env::temp_dir().join("mock.png"),
            caption: prompt.to_string(),
        })
    }

    async fn transcribe(&self, _audio_path: &Path) -> anyhow::Result<String> {
        Ok("mock transcript".to_string())
    }

    async fn synthesize(&self, _text: &str) -> anyhow::Result<PathBuf> {
        Ok(std::env::temp_dir().join("mock.ogg"))
    }
}

// ---------------------------------------------------------------------------
// EchoSkill — minimal tool for loop tests
// ---------------------------------------------------------------------------

pub struct EchoSkill;

#[async_trait]
impl Skill for EchoSkill {
    fn id(&self) -> &str {
        "echo_tool"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "echo_tool".to_string(),
            description: "echoes its value argument".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "value": { "type": "string" } },
                "required": ["value"]
            }),
        }]
    }

    async fn execute(
        &self,
        _ctx: &TurnContext,
        _tool_name: &str,
        args: &Value,
    ) -> anyhow::Result<String> {
        Ok(format!("echo: {}", args["value"].as_str().unwrap_or("")))
    }
}

// ---------------------------------------------------------------------------
// Agent wiring helpers
// ---------------------------------------------------------------------------

pub fn agent_with_model(model: MockModel) -> (Arc<Agent>, Arc<MockModel>) {
    let model = Arc::new(model);
    let registry = Arc::new(SkillRegistry::new(
        vec![Arc::new(EchoSkill)],
        &["echo_tool".to_string()],
    ));
    let agent = Arc::new(Agent::new(
        model.clone(),
        registry,
        Arc::new(AppConfig::default()),
    ));
    (agent, model)
}

pub fn scripted_agent(responses: Vec<ChatReply>) -> (Arc<Agent>, Arc<MockModel>) {
    agent_with_model(MockModel::scripted(responses))
}

// ---------------------------------------------------------------------------
// TestTransport
// ---------------------------------------------------------------------------

/// Captures outgoing messages; can be told to fail its first N sends to
/// exercise retry paths.
pub struct TestTransport {
    kind: TransportKind,
    pub sent: Mutex<Vec<(String, String)>>,
    fail_remaining: AtomicUsize,
}

impl TestTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            sent: Mutex::new(Vec::new()),
            fail_remaining: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(kind: TransportKind, failures: usize) -> Self {
        Self {
            kind,
            sent: Mutex::new(Vec::new()),
            fail_remaining: AtomicUsize::new(failures),
        }
    }

    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl Transport for TestTransport {
    fn name(&self) -> String {
        "test".to_string()
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send_text(&self, jid: &str, text: &str) -> anyhow::Result<()> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("scripted send failure");
        }
        self.sent
            .lock()
            .await
            .push((jid.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_image(
        &self,
        jid: &str,
        path: &Path,
        _caption: Option<&str>,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .await
            .push((jid.to_string(), format!("[image {}]", path.display())));
        Ok(())
    }

    async fn send_voice(&self, jid: &str, audio_path: &Path) -> anyhow::Result<()> {
        self.sent
            .lock()
            .await
            .push((jid.to_string(), format!("[voice {}]", audio_path.display())));
        Ok(())
    }
}
