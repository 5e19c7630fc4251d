//! Model providers and the capability router.
//!
//! Config declares an ordered provider list; for each capability the first
//! entry that both advertises it and has resolvable credentials wins.
//! Vision, image generation and speech can name explicit fallback entries.

mod error;
mod openai_compatible;
mod stub;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

pub use error::{ProviderError, ProviderErrorKind};
pub use openai_compatible::OpenAiCompatibleClient;
pub use stub::StubClient;

use crate::config::{AppConfig, Capability, ProviderEntry, ProviderKind};
use crate::traits::{ChatReply, GeneratedImage, ModelClient};

/// Shared HTTP client with sane deadlines so a stuck provider cannot
/// monopolise the turn budget.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Routes each capability to the provider selected for it.
pub struct ModelRouter {
    chat: Arc<dyn ModelClient>,
    embed: Option<Arc<dyn ModelClient>>,
    vision: Option<Arc<dyn ModelClient>>,
    image: Option<Arc<dyn ModelClient>>,
    speech: Option<Arc<dyn ModelClient>>,
}

fn instantiate(entry: &ProviderEntry, output_dir: &Path) -> anyhow::Result<Arc<dyn ModelClient>> {
    match entry.provider {
        ProviderKind::Stub => Ok(Arc::new(StubClient::new(output_dir.to_path_buf()))),
        ProviderKind::OpenaiCompatible => {
            let api_key = crate::config::resolve_env_ref(&entry.api_key)?;
            if api_key.trim().is_empty() {
                anyhow::bail!(
                    "Provider entry '{}' has an empty API key",
                    entry.name.as_deref().unwrap_or(&entry.model)
                );
            }
            let client = OpenAiCompatibleClient::new(
                &entry.base_url,
                &api_key,
                &entry.model,
                entry.embedding_model.as_deref(),
                output_dir.to_path_buf(),
            )
            .map_err(|e| anyhow::anyhow!(e))?;
            Ok(Arc::new(client))
        }
    }
}

/// First entry in declared order that advertises the capability and whose
/// credentials resolve. Entries with broken credentials are skipped with a
/// warning rather than failing the whole startup.
fn select(
    entries: &[ProviderEntry],
    capability: Capability,
    output_dir: &Path,
) -> Option<Arc<dyn ModelClient>> {
    for entry in entries {
        if !entry.capabilities.contains(&capability) {
            continue;
        }
        match instantiate(entry, output_dir) {
            Ok(client) => {
                info!(
                    model = %entry.model,
                    capability = ?capability,
                    "Selected provider"
                );
                return Some(client);
            }
            Err(e) => {
                warn!(
                    model = %entry.model,
                    capability = ?capability,
                    "Skipping provider entry: {}",
                    e
                );
            }
        }
    }
    None
}

/// Resolve an explicit capability fallback entry, if configured.
fn explicit(
    entry: &Option<ProviderEntry>,
    output_dir: &Path,
) -> anyhow::Result<Option<Arc<dyn ModelClient>>> {
    match entry {
        Some(e) => Ok(Some(instantiate(e, output_dir)?)),
        None => Ok(None),
    }
}

impl ModelRouter {
    /// Build the router from config. Fails when no usable chat provider
    /// exists — the agent cannot run without one.
    pub fn from_config(config: &AppConfig, output_dir: &Path) -> anyhow::Result<Self> {
        let models = &config.llm.models;

        let chat = select(models, Capability::Chat, output_dir)
            .ok_or_else(|| anyhow::anyhow!("No usable chat provider in llm.models"))?;

        // Embedding selection is explicit when memory.embedding names an
        // entry; no silent fallback between providers in that case.
        let embed = match config.memory.embedding.as_deref() {
            Some(name) => {
                let entry = models
                    .iter()
                    .find(|e| e.name.as_deref() == Some(name))
                    .ok_or_else(|| {
                        anyhow::anyhow!("memory.embedding names unknown provider entry '{}'", name)
                    })?;
                Some(instantiate(entry, output_dir)?)
            }
            None => select(models, Capability::Embed, output_dir),
        };

        let vision = match explicit(&config.llm.vision, output_dir)? {
            Some(c) => Some(c),
            None => select(models, Capability::Vision, output_dir),
        };
        let image = match explicit(&config.llm.image, output_dir)? {
            Some(c) => Some(c),
            None => select(models, Capability::Image, output_dir),
        };
        let speech = match explicit(&config.llm.speech, output_dir)? {
            Some(c) => Some(c),
            None => select(models, Capability::Speech, output_dir),
        };

        Ok(Self {
            chat,
            embed,
            vision,
            image,
            speech,
        })
    }

    fn missing(capability: &str) -> anyhow::Error {
        anyhow::anyhow!("No provider configured for {}", capability)
    }
}

#[async_trait]
impl ModelClient for ModelRouter {
    async fn chat(
        &self,
        messages: &[Value],
        tools: &[Value],
        max_tokens: Option<u32>,
    ) -> anyhow::Result<ChatReply> {
        self.chat.chat(messages, tools, max_tokens).await
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        match &self.embed {
            Some(client) => client.embed(texts).await,
            None => Err(Self::missing("embeddings")),
        }
    }

    async fn describe_image(
        &self,
        image_ref: &str,
        prompt: &str,
        system_prompt: &str,
    ) -> anyhow::Result<String> {
        match &self.vision {
            Some(client) => client.describe_image(image_ref, prompt, system_prompt).await,
            None => Err(Self::missing("vision")),
        }
    }

    async fn generate_image(
        &self,
        prompt: &str,
        size: Option<&str>,
    ) -> anyhow::Result<GeneratedImage> {
        match &self.image {
            Some(client) => client.generate_image(prompt, size).await,
            None => Err(Self::missing("image generation")),
        }
    }

    async fn transcribe(&self, audio_path: &Path) -> anyhow::Result<String> {
        match &self.speech {
            Some(client) => client.transcribe(audio_path).await,
            None => Err(Self::missing("speech")),
        }
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<PathBuf> {
        match &self.speech {
            Some(client) => client.synthesize(text).await,
            None => Err(Self::missing("speech")),
        }
    }
}
