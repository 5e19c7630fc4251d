use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::skills::require_str;
use crate::traits::{ModelClient, ReplyPayload, Skill, ToolSpec, TurnContext};

/// Image generation. The produced file is attached to the turn as a side
/// payload; the tool result is a directive the transport layer understands.
pub struct ImageSkill {
    model: Arc<dyn ModelClient>,
}

impl ImageSkill {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Skill for ImageSkill {
    fn id(&self) -> &str {
        "image"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "generate_image".to_string(),
            description: "Generate an image from a prompt and send it to the chat.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "What to draw" },
                    "size": { "type": "string", "description": "e.g. 1024x1024 (optional)" }
                },
                "required": ["prompt"]
            }),
        }]
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        _tool_name: &str,
        args: &Value,
    ) -> anyhow::Result<String> {
        let prompt = require_str(args, "prompt")?;
        let size = args["size"].as_str();

        let image = self.model.generate_image(prompt, size).await?;
        let directive = json!({
            "imageReply": {
                "path": image.path.to_string_lossy(),
                "caption": image.caption,
            }
        })
        .to_string();

        ctx.push_payload(ReplyPayload::Image {
            path: image.path,
            caption: Some(image.caption),
        })
        .await;

        Ok(directive)
    }
}
