use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use super::ToolCall;

/// The LLM's answer to one chat call: terminal text, or tool calls to run.
/// Providers guarantee at least one of the two is present.
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// A generated image saved locally, plus the caption to send with it.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub path: PathBuf,
    pub caption: String,
}

/// Uniform access to LLM capabilities irrespective of provider.
///
/// `chat` takes messages and tool definitions in the OpenAI-compatible wire
/// shape; the other methods cover embeddings, vision, image generation and
/// speech. Implementations fail with a classified `ProviderError` so callers
/// can pick a recovery strategy.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[Value],
        tools: &[Value],
        max_tokens: Option<u32>,
    ) -> anyhow::Result<ChatReply>;

    /// One vector per input text; dimensions are provider-fixed.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// `image_ref` is a URL, data URI, or local path (local paths are
    /// converted to data URIs before they hit the wire).
    async fn describe_image(
        &self,
        image_ref: &str,
        prompt: &str,
        system_prompt: &str,
    ) -> anyhow::Result<String>;

    async fn generate_image(
        &self,
        prompt: &str,
        size: Option<&str>,
    ) -> anyhow::Result<GeneratedImage>;

    async fn transcribe(&self, audio_path: &Path) -> anyhow::Result<String>;

    /// Returns the path of the synthesised audio file.
    async fn synthesize(&self, text: &str) -> anyhow::Result<PathBuf>;
}
