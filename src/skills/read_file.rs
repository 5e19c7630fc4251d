use async_trait::async_trait;
use serde_json::{json, Value};

use crate::skills::edit_file::resolve_path;
use crate::skills::require_str;
use crate::traits::{Skill, ToolSpec, TurnContext};

const MAX_RESULT_CHARS: usize = 12_000;

/// Windowed file reads with line numbers. Not exposed in group chats.
pub struct ReadFileSkill;

#[async_trait]
impl Skill for ReadFileSkill {
    fn id(&self) -> &str {
        "read_file"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "read_file".to_string(),
            description: "Read a text file, optionally a line window. Line numbers included."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path, relative to the workspace" },
                    "from": { "type": "integer", "description": "1-indexed first line (default 1)" },
                    "lines": { "type": "integer", "description": "Line count (default 200)" }
                },
                "required": ["path"]
            }),
        }]
    }

    fn group_safe(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        ctx: &TurnContext,
        _tool_name: &str,
        args: &Value,
    ) -> anyhow::Result<String> {
        let path_str = require_str(args, "path")?;
        let from = args["from"].as_u64().unwrap_or(1).max(1) as usize;
        let count = args["lines"].as_u64().unwrap_or(200).max(1) as usize;

        let path = resolve_path(ctx, path_str);
        if !path.exists() {
            anyhow::bail!("File not found: {}", path_str);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let all: Vec<&str> = content.lines().collect();
        if from > all.len() && !all.is_empty() {
            anyhow::bail!("Line {} is past the end of {} ({} lines)", from, path_str, all.len());
        }

        let end = (from - 1 + count).min(all.len());
        // Emit whole numbered lines until the character budget runs out, so
        // the model never sees a line cut mid-way.
        let mut out = String::new();
        let mut budget = MAX_RESULT_CHARS;
        for (i, line) in all[from - 1..end].iter().enumerate() {
            let numbered = format!("{:>5} | {}", from + i, line);
            if numbered.chars().count() + 1 > budget {
                out.push_str("\n[remaining lines omitted]");
                break;
            }
            budget -= numbered.chars().count() + 1;
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&numbered);
        }
        Ok(out)
    }
}
