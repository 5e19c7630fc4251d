use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::config::ShellConfig;
use crate::skills::require_str;
use crate::traits::{Skill, ToolSpec, TurnContext};

/// Allow-listed command execution. The guardrails are data (config): command
/// prefixes, a hard timeout, and an output cap. Shell operators are rejected
/// outright, and the skill never appears in group chats.
pub struct ShellSkill {
    config: ShellConfig,
}

impl ShellSkill {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    fn is_allowed(&self, command: &str) -> bool {
        let first_word = command.split_whitespace().next().unwrap_or("");
        self.config
            .allowed_prefixes
            .iter()
            .any(|prefix| prefix == first_word || command.starts_with(&format!("{} ", prefix)))
    }
}

fn contains_shell_operator(command: &str) -> bool {
    ["&&", "||", ";", "|", "`", "$(", ">", "<", "\n"]
        .iter()
        .any(|op| command.contains(op))
}

const TRUNCATION_MARK: &str = "\n[output truncated]";

/// Cap command output for the model. The cap counts characters, and the
/// mark fits inside it, so a capped result never exceeds `max_chars`.
fn cap_output(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARK.chars().count());
    let mut capped: String = s.chars().take(keep).collect();
    capped.push_str(TRUNCATION_MARK);
    capped.chars().take(max_chars).collect()
}

#[async_trait]
impl Skill for ShellSkill {
    fn id(&self) -> &str {
        "shell"
    }

    fn doc(&self) -> Option<String> {
        Some("run read-only inspection commands on the owner's machine".to_string())
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "shell".to_string(),
            description: format!(
                "Run an allow-listed command. Permitted prefixes: {}. No pipes, \
                 redirection or command chaining.",
                self.config.allowed_prefixes.join(", ")
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The command line to run" }
                },
                "required": ["command"]
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
        let command = require_str(args, "command")?.trim();

        if contains_shell_operator(command) {
            anyhow::bail!("Shell operators (;, |, &&, $(), redirection) are not allowed");
        }
        if !self.is_allowed(command) {
            anyhow::bail!(
                "Command '{}' is not on the allow-list",
                command.split_whitespace().next().unwrap_or(command)
            );
        }

        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or_default();
        let cmd_args: Vec<&str> = parts.collect();

        info!(command = %command, "Running shell command");
        let child = tokio::process::Command::new(program)
            .args(&cmd_args)
            .current_dir(&ctx.workspace_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs.min(300)),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!("Command timed out after {}s", self.config.timeout_secs)
        })??;

        let mut result = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            result.push_str("\n[stderr]\n");
            result.push_str(&stderr);
        }
        if !output.status.success() {
            result.push_str(&format!("\n[exit status: {}]", output.status));
        }
        if result.trim().is_empty() {
            result = "(no output)".to_string();
        }
        Ok(cap_output(&result, self.config.max_output_chars))
    }
}
