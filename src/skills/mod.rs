//! Skill registry: names, schemas, and dispatch for the enabled skills.
//!
//! The set is static — each skill is constructed at startup and registered
//! here. Tool names map to skills (multi-tool skills share one executor).
//! Dispatch never propagates executor failures: the model gets them back as
//! `{"error": "..."}` tool results and can self-correct.

mod cron;
mod edit_file;
mod image;
mod memory;
mod read_file;
mod shell;
mod voice;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

pub use cron::CronSkill;
pub use edit_file::EditFileSkill;
pub use image::ImageSkill;
pub use memory::MemorySkill;
pub use read_file::ReadFileSkill;
pub use shell::ShellSkill;
pub use voice::VoiceSkill;

use crate::traits::{Skill, TurnContext};

pub struct SkillRegistry {
    skills: Vec<Arc<dyn Skill>>,
    tool_to_skill: HashMap<String, usize>,
}

impl SkillRegistry {
    /// Keep only the skills named in `enabled`, preserving declared order.
    pub fn new(available: Vec<Arc<dyn Skill>>, enabled: &[String]) -> Self {
        let mut skills = Vec::new();
        for skill in available {
            if enabled.iter().any(|id| id == skill.id()) {
                skills.push(skill);
            }
        }
        for id in enabled {
            if !skills.iter().any(|s| s.id() == id) {
                warn!(skill = %id, "Enabled skill is not registered; ignoring");
            }
        }

        let mut tool_to_skill = HashMap::new();
        for (idx, skill) in skills.iter().enumerate() {
            for tool in skill.tools() {
                if tool_to_skill.insert(tool.name.clone(), idx).is_some() {
                    warn!(tool = %tool.name, "Duplicate tool name across skills");
                }
            }
        }

        info!(count = skills.len(), "Skill registry built");
        Self {
            skills,
            tool_to_skill,
        }
    }

    /// OpenAI-format tool definitions for the enabled set, filtered for the
    /// chat context (machine-touching skills stay hidden in groups).
    pub fn tool_defs(&self, is_group: bool) -> Vec<Value> {
        self.skills
            .iter()
            .filter(|s| !is_group || s.group_safe())
            .flat_map(|s| s.tools())
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    /// Skill usage notes for the system prompt.
    pub fn docs(&self) -> String {
        let mut out = String::new();
        for skill in &self.skills {
            if let Some(doc) = skill.doc() {
                out.push_str(&format!("- {}: {}\n", skill.id(), doc));
            }
        }
        out
    }

    /// Execute one tool call. Always returns a tool-result string; failures
    /// come back as a JSON error object for the model to react to.
    pub async fn dispatch(&self, ctx: &TurnContext, tool_name: &str, raw_args: &str) -> String {
        let Some(&idx) = self.tool_to_skill.get(tool_name) else {
            return error_result(&format!("Unknown tool '{}'", tool_name));
        };
        let skill = &self.skills[idx];

        if ctx.is_group && !skill.group_safe() {
            return error_result(&format!(
                "Tool '{}' is not available in group chats",
                tool_name
            ));
        }

        let args: Value = match serde_json::from_str(raw_args) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) => return error_result("Tool arguments must be a JSON object"),
            Err(e) => return error_result(&format!("Malformed tool arguments: {}", e)),
        };

        match skill.execute(ctx, tool_name, &args).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = tool_name, "Skill execution failed: {:#}", e);
                error_result(&format!("{:#}", e))
            }
        }
    }
}

fn error_result(message: &str) -> String {
    json!({ "error": message }).to_string()
}

/// Pull a required string argument, tolerating absent object shapes.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {}", key))
}
