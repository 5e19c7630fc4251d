use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{ChatReply, GeneratedImage, ModelClient};

/// Deterministic offline model used by the test entry-point.
///
/// Chat echoes the last user message; embeddings are a hashed bag-of-words,
/// so texts sharing vocabulary score high on cosine similarity. No network.
pub struct StubClient {
    output_dir: PathBuf,
}

const EMBED_DIM: usize = 128;

/// Function words carry no retrieval signal and would drown out the content
/// tokens in short queries.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "do", "doe", "for", "how", "i", "in", "is", "it", "my", "of", "on",
    "or", "that", "the", "to", "we", "what", "when", "where", "which", "who", "why", "you",
];

impl StubClient {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Lowercased alphanumeric tokens with a crude plural strip, so
/// "prefers" and "prefer" land in the same bucket.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.strip_suffix('s').filter(|r| r.len() >= 3).unwrap_or(t))
        .filter(|t| !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

pub(crate) fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut vec = vec![0f32; EMBED_DIM];
    for token in tokenize(text) {
        let idx = (fnv1a(&token) % EMBED_DIM as u64) as usize;
        vec[idx] += 1.0;
    }
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

#[async_trait]
impl ModelClient for StubClient {
    async fn chat(
        &self,
        messages: &[Value],
        _tools: &[Value],
        _max_tokens: Option<u32>,
    ) -> anyhow::Result<ChatReply> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m["role"] == "user")
            .and_then(|m| m["content"].as_str())
            .unwrap_or("");
        Ok(ChatReply {
            text: Some(format!("Moo! You said: {}", last_user)),
            tool_calls: Vec::new(),
        })
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hashed_embedding(t)).collect())
    }

    async fn describe_image(
        &self,
        image_ref: &str,
        _prompt: &str,
        _system_prompt: &str,
    ) -> anyhow::Result<String> {
        Ok(format!("A stub description of {}", image_ref))
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _size: Option<&str>,
    ) -> anyhow::Result<GeneratedImage> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("stub-image-{}.png", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"stub image bytes")?;
        Ok(GeneratedImage {
            path,
            caption: prompt.to_string(),
        })
    }

    async fn transcribe(&self, audio_path: &Path) -> anyhow::Result<String> {
        Ok(format!(
            "(stub transcript of {})",
            audio_path.file_name().unwrap_or_default().to_string_lossy()
        ))
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("stub-voice-{}.ogg", uuid::Uuid::new_v4()));
        std::fs::write(&path, text.as_bytes())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn embeddings_are_deterministic() {
        assert_eq!(hashed_embedding("dark mode"), hashed_embedding("dark mode"));
    }

    #[test]
    fn shared_vocabulary_scores_high() {
        let note = hashed_embedding("User prefers dark mode.");
        let query = hashed_embedding("what does the user prefer?");
        let unrelated = hashed_embedding("quarterly revenue projections spreadsheet");
        assert!(cosine(&note, &query) > cosine(&note, &unrelated));
        assert!(cosine(&note, &query) >= 0.5);
    }

    #[tokio::test]
    async fn chat_echoes_last_user_message() {
        let stub = StubClient::new(std::env::temp_dir());
        let reply = stub
            .chat(
                &[serde_json::json!({"role":"user","content":"ping"})],
                &[],
                None,
            )
            .await
            .unwrap();
        assert!(reply.text.unwrap().contains("ping"));
    }
}
