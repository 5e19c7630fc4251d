use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::skills::require_str;
use crate::traits::{Skill, ToolSpec, TurnContext};

/// Find-and-replace editing of workspace files. Fails safely when the text
/// isn't found or is ambiguous; writes go through temp-file + rename.
pub struct EditFileSkill;

/// Relative paths resolve against the workspace; absolute paths are allowed
/// for the owner's own machine.
pub(crate) fn resolve_path(ctx: &TurnContext, path_str: &str) -> PathBuf {
    let path = Path::new(path_str);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.workspace_dir.join(path)
    }
}

#[async_trait]
impl Skill for EditFileSkill {
    fn id(&self) -> &str {
        "edit_file"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "edit_file".to_string(),
            description: "Find and replace text in a file. The old text must match exactly, \
                          including whitespace. Errors if the match is ambiguous unless \
                          replace_all is set."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path, relative to the workspace" },
                    "old_text": { "type": "string", "description": "Exact text to find" },
                    "new_text": { "type": "string", "description": "Replacement text" },
                    "replace_all": { "type": "boolean", "description": "Replace every occurrence (default false)" }
                },
                "required": ["path", "old_text", "new_text"]
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
        let old_text = args["old_text"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: old_text"))?;
        let new_text = args["new_text"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: new_text"))?;
        let replace_all = args["replace_all"].as_bool().unwrap_or(false);

        let path = resolve_path(ctx, path_str);
        if !path.exists() {
            anyhow::bail!("File not found: {}", path_str);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let count = content.matches(old_text).count();

        if count == 0 {
            anyhow::bail!(
                "Text not found in {}. old_text must match exactly, including whitespace.",
                path_str
            );
        }
        if count > 1 && !replace_all {
            anyhow::bail!(
                "Found {} occurrences in {}. Set replace_all=true or provide more context.",
                count,
                path_str
            );
        }

        let new_content = if replace_all {
            content.replace(old_text, new_text)
        } else {
            content.replacen(old_text, new_text, 1)
        };

        let tmp_path = path.with_extension("tmp_edit");
        tokio::fs::write(&tmp_path, &new_content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        let replaced = if replace_all { count } else { 1 };
        Ok(format!(
            "Edited {}: replaced {} occurrence{}",
            path_str,
            replaced,
            if replaced == 1 { "" } else { "s" }
        ))
    }
}
