use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::skills::require_str;
use crate::traits::{ModelClient, ReplyPayload, Skill, ToolSpec, TurnContext};

/// Voice replies: synthesise speech and attach it as a side payload.
pub struct VoiceSkill {
    model: Arc<dyn ModelClient>,
}

impl VoiceSkill {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Skill for VoiceSkill {
    fn id(&self) -> &str {
        "voice"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "voice_reply".to_string(),
            description: "Speak a short message as a voice note instead of text.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "What to say" }
                },
                "required": ["text"]
            }),
        }]
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        _tool_name: &str,
        args: &Value,
    ) -> anyhow::Result<String> {
        let text = require_str(args, "text")?;
        let path = self.model.synthesize(text).await?;
        ctx.push_payload(ReplyPayload::Voice { path }).await;
        Ok("Voice note queued for delivery.".to_string())
    }
}
