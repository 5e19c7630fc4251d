use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::providers::{build_http_client, ProviderError};
use crate::traits::{ChatReply, GeneratedImage, ModelClient, ToolCall};

/// Client for any OpenAI-compatible HTTP API: chat completions with tool
/// calling, embeddings, image generation, vision and audio endpoints.
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    /// Where generated images and synthesised audio land.
    output_dir: PathBuf,
}

/// Validate the base URL for security: HTTPS required for remote hosts,
/// HTTP allowed only for localhost LLM servers.
fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("Invalid base_url '{}': {}", base_url, e))?;

    let host = parsed.host_str().unwrap_or("");
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                warn!(
                    "Using unencrypted HTTP for local LLM server at '{}'",
                    base_url
                );
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote base_url '{}'; use HTTPS",
                    base_url
                ))
            }
        }
        other => Err(format!(
            "Unsupported URL scheme '{}' in base_url '{}'",
            other, base_url
        )),
    }
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        embedding_model: Option<&str>,
        output_dir: PathBuf,
    ) -> Result<Self, String> {
        validate_base_url(base_url)?;
        let client = build_http_client(Duration::from_secs(25))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            embedding_model: embedding_model.unwrap_or("text-embedding-3-small").to_string(),
            output_dir,
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn post_json(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = match self
            .with_auth(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(url = %url, "HTTP request failed: {}", e);
                return Err(ProviderError::network(&e).into());
            }
        };

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            error!(status = %status, url = %url, "Provider API error: {}", text);
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }

        serde_json::from_str(&text).map_err(|e| {
            ProviderError::contract(format!("JSON parse error from {}: {}", url, e)).into()
        })
    }

    /// Convert a local file path to a data URI; URLs and data URIs pass
    /// through unchanged.
    fn to_image_url(image_ref: &str) -> anyhow::Result<String> {
        if image_ref.starts_with("http://")
            || image_ref.starts_with("https://")
            || image_ref.starts_with("data:")
        {
            return Ok(image_ref.to_string());
        }
        let bytes = std::fs::read(image_ref)?;
        let mime = match Path::new(image_ref)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        };
        Ok(format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ))
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    async fn chat(
        &self,
        messages: &[Value],
        tools: &[Value],
        max_tokens: Option<u32>,
    ) -> anyhow::Result<ChatReply> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if let Some(max) = max_tokens {
            body["max_tokens"] = json!(max);
        }

        info!(model = %self.model, tools = tools.len(), "Calling chat completions");
        let data = self.post_json("/chat/completions", &body).await?;

        let message = &data["choices"][0]["message"];
        if message.is_null() {
            return Err(ProviderError::contract("No choices in response").into());
        }

        let text = message["content"]
            .as_str()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty());

        let mut tool_calls = Vec::new();
        if let Some(tcs) = message["tool_calls"].as_array() {
            debug!(count = tcs.len(), "Tool calls in response");
            for tc in tcs {
                tool_calls.push(ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments: tc["function"]["arguments"]
                        .as_str()
                        .unwrap_or("{}")
                        .to_string(),
                });
            }
        }

        if text.is_none() && tool_calls.is_empty() {
            return Err(
                ProviderError::contract("Response carried neither text nor tool calls").into(),
            );
        }

        Ok(ChatReply { text, tool_calls })
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });
        let data = self.post_json("/embeddings", &body).await?;

        let rows = data["data"]
            .as_array()
            .ok_or_else(|| ProviderError::contract("No data array in embeddings response"))?;
        let mut vectors = Vec::with_capacity(rows.len());
        for row in rows {
            let vec: Vec<f32> = row["embedding"]
                .as_array()
                .ok_or_else(|| ProviderError::contract("Embedding row is not an array"))?
                .iter()
                .filter_map(|v| v.as_f64())
                .map(|v| v as f32)
                .collect();
            vectors.push(vec);
        }
        if vectors.len() != texts.len() {
            return Err(ProviderError::contract(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            ))
            .into());
        }
        Ok(vectors)
    }

    async fn describe_image(
        &self,
        image_ref: &str,
        prompt: &str,
        system_prompt: &str,
    ) -> anyhow::Result<String> {
        let image_url = Self::to_image_url(image_ref)?;
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ]},
            ],
        });
        let data = self.post_json("/chat/completions", &body).await?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::contract("Vision response had no text").into())
    }

    async fn generate_image(
        &self,
        prompt: &str,
        size: Option<&str>,
    ) -> anyhow::Result<GeneratedImage> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "size": size.unwrap_or("1024x1024"),
            "response_format": "b64_json",
            "n": 1,
        });
        let data = self.post_json("/images/generations", &body).await?;

        let b64 = data["data"][0]["b64_json"]
            .as_str()
            .ok_or_else(|| ProviderError::contract("Image response had no b64_json"))?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64)?;

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("image-{}.png", uuid::Uuid::new_v4()));
        std::fs::write(&path, bytes)?;

        let caption = data["data"][0]["revised_prompt"]
            .as_str()
            .unwrap_or(prompt)
            .to_string();
        Ok(GeneratedImage { path, caption })
    }

    async fn transcribe(&self, audio_path: &Path) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.ogg".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
            .part("file", part);

        let url = format!("{}/audio/transcriptions", self.base_url);
        let resp = self
            .with_auth(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| anyhow::Error::from(ProviderError::network(&e)))?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }
        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::contract(format!("Transcription parse error: {}", e)))?;
        data["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::contract("Transcription had no text").into())
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<PathBuf> {
        let body = json!({
            "model": "tts-1",
            "voice": "alloy",
            "input": text,
            "response_format": "opus",
        });
        let url = format!("{}/audio/speech", self.base_url);
        let resp = self
            .with_auth(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::Error::from(ProviderError::network(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }
        let bytes = resp.bytes().await?;

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("voice-{}.ogg", uuid::Uuid::new_v4()));
        std::fs::write(&path, &bytes)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_accepted() {
        assert!(validate_base_url("https://api.openai.com/v1").is_ok());
    }

    #[test]
    fn http_localhost_accepted() {
        assert!(validate_base_url("http://localhost:8080/v1").is_ok());
        assert!(validate_base_url("http://127.0.0.1:1234").is_ok());
    }

    #[test]
    fn http_remote_rejected() {
        let err = validate_base_url("http://api.example.com").unwrap_err();
        assert!(err.contains("HTTP is not allowed"));
    }

    #[test]
    fn bad_scheme_rejected() {
        assert!(validate_base_url("ftp://example.com").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn trailing_slash_trimmed() {
        let client = OpenAiCompatibleClient::new(
            "https://api.openai.com/v1/",
            "key",
            "gpt-4o-mini",
            None,
            std::env::temp_dir(),
        )
        .unwrap();
        assert!(!client.base_url.ends_with('/'));
    }

    #[test]
    fn urls_and_data_uris_pass_through() {
        assert_eq!(
            OpenAiCompatibleClient::to_image_url("https://example.com/a.png").unwrap(),
            "https://example.com/a.png"
        );
        assert_eq!(
            OpenAiCompatibleClient::to_image_url("data:image/png;base64,AAAA").unwrap(),
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn local_paths_become_data_uris() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("pic.png");
        std::fs::write(&path, b"notapng").unwrap();
        let uri = OpenAiCompatibleClient::to_image_url(path.to_str().unwrap()).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
