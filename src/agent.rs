//! The tool-using conversation loop.
//!
//! One `run_turn` call is one agent turn: build the message stack, call the
//! model with the enabled tool set, dispatch any tool calls in order, feed
//! the results back, and stop on terminal text, the iteration cap, or the
//! turn deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::providers::ProviderError;
use crate::skills::SkillRegistry;
use crate::traits::{assistant_message, tool_message, ModelClient, ReplyPayload, TurnContext};

/// Safety cap on model round-trips within one turn.
const MAX_TOOL_ITERATIONS: usize = 8;
/// Wall-clock budget for one turn.
const TURN_DEADLINE: Duration = Duration::from_secs(120);

/// What one turn produced: the text to send, plus side payloads tools
/// attached along the way (image/voice replies).
#[derive(Debug)]
pub struct TurnOutput {
    pub text: String,
    pub payloads: Vec<ReplyPayload>,
}

pub struct Agent {
    model: Arc<dyn ModelClient>,
    registry: Arc<SkillRegistry>,
    config: Arc<AppConfig>,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ModelClient>,
        registry: Arc<SkillRegistry>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            model,
            registry,
            config,
        }
    }

    /// The live-chat system prompt: identity, current time in the user's
    /// zone, skill notes, and the scheduling clarification rule.
    pub fn system_prompt(&self) -> String {
        let tz = self.config.user_tz();
        let now = Utc::now().with_timezone(&tz);
        let time_format = self.config.agents.defaults.time_format.as_str();
        let clock = if time_format == "12h" {
            now.format("%A %Y-%m-%d %I:%M %p").to_string()
        } else {
            now.format("%A %Y-%m-%d %H:%M").to_string()
        };

        let mut prompt = format!(
            "You are Moobot, a personal assistant reachable over chat. Keep replies short \
             and concrete; this is a messaging app, not a document editor.\n\
             Current time: {} ({}).",
            clock, tz
        );

        let docs = self.registry.docs();
        if !docs.is_empty() {
            prompt.push_str("\n\nSkill notes:\n");
            prompt.push_str(&docs);
        }

        prompt.push_str(
            "\n\nWhen a request to schedule something is ambiguous about the time, the \
             recipient, or the wording of the reminder, ask a clarifying question instead of \
             inventing the missing part.",
        );
        prompt
    }

    /// System prompt for Tide wakes: same identity, constrained output.
    pub fn tide_prompt(&self) -> String {
        format!(
            "{}\n\nThis is an idle check: the user has not written anything. If there is one \
             genuinely useful, context-tied thing to say (an open question, a finished task), \
             say it in a single short sentence. Do not manufacture small talk.",
            self.system_prompt()
        )
    }

    /// Run one agent turn and return the final reply.
    ///
    /// Everything recoverable is recovered here: provider failures become a
    /// short user-facing sentence, tool failures were already converted to
    /// tool-result strings by the registry.
    pub async fn run_turn(
        &self,
        ctx: &TurnContext,
        system_prompt: &str,
        history: &[Value],
        user_text: &str,
    ) -> TurnOutput {
        let started = Instant::now();
        let tools = self.registry.tool_defs(ctx.is_group);

        let mut messages: Vec<Value> = Vec::with_capacity(history.len() + 2);
        messages.push(json!({ "role": "system", "content": system_prompt }));
        messages.extend_from_slice(history);
        messages.push(json!({ "role": "user", "content": user_text }));

        let mut text = None;
        for iteration in 0..MAX_TOOL_ITERATIONS {
            let Some(remaining) = TURN_DEADLINE.checked_sub(started.elapsed()) else {
                warn!(jid = %ctx.jid, iteration, "Turn deadline exhausted");
                text = Some(
                    "I ran out of time on that one before finishing. Ask again and I'll pick it \
                     back up."
                        .to_string(),
                );
                break;
            };

            let reply = match tokio::time::timeout(
                remaining,
                self.model.chat(&messages, &tools, None),
            )
            .await
            {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    warn!(jid = %ctx.jid, "Model call failed: {:#}", e);
                    let sentence = match e.downcast_ref::<ProviderError>() {
                        Some(pe) => pe.user_message(),
                        None => "I couldn't reach the model just now.".to_string(),
                    };
                    text = Some(sentence);
                    break;
                }
                Err(_) => {
                    warn!(jid = %ctx.jid, iteration, "Turn deadline hit mid-call");
                    text = Some(
                        "That took longer than I allow for a single message; I had to stop \
                         partway through."
                            .to_string(),
                    );
                    break;
                }
            };

            if reply.tool_calls.is_empty() {
                text = Some(clean_reply(reply.text.as_deref().unwrap_or_default()));
                break;
            }

            info!(
                jid = %ctx.jid,
                iteration,
                calls = reply.tool_calls.len(),
                "Dispatching tool calls"
            );
            messages.push(assistant_message(reply.text.as_deref(), &reply.tool_calls));
            for call in &reply.tool_calls {
                let result = self.registry.dispatch(ctx, &call.name, &call.arguments).await;
                messages.push(tool_message(&call.id, &call.name, &result));
            }
        }

        let text = match text {
            Some(t) if !t.trim().is_empty() => t,
            Some(_) => "I don't have anything useful to add to that.".to_string(),
            None => {
                warn!(jid = %ctx.jid, "Turn hit the tool iteration cap");
                format!(
                    "I stopped after {} tool steps without reaching an answer. Try narrowing \
                     the request.",
                    MAX_TOOL_ITERATIONS
                )
            }
        };

        TurnOutput {
            text,
            payloads: ctx.take_payloads().await,
        }
    }
}

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think(?:ing)?>.*?</think(?:ing)?>").expect("static regex"));

/// Strip provider thinking blocks and chat prefix markers from a terminal
/// reply before it goes out.
pub fn clean_reply(raw: &str) -> String {
    let without_thinking = THINK_BLOCK.replace_all(raw, "");
    let mut text = without_thinking.trim();
    for marker in ["[Bot]", "Assistant:", "assistant:"] {
        if let Some(rest) = text.strip_prefix(marker) {
            text = rest.trim_start();
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_agent, text, tool_call, MockModel};
    use crate::traits::ChatReply;
    use std::path::PathBuf;

    fn ctx() -> TurnContext {
        TurnContext::new("123", false, PathBuf::from("/tmp"), PathBuf::from("/tmp"))
    }

    #[test]
    fn clean_reply_strips_thinking_and_markers() {
        assert_eq!(
            clean_reply("<think>hmm let me see</think>Sure thing"),
            "Sure thing"
        );
        assert_eq!(
            clean_reply("<thinking>deep\nthoughts</thinking>\n[Bot] done"),
            "done"
        );
        assert_eq!(clean_reply("Assistant: hello"), "hello");
        assert_eq!(clean_reply("  plain  "), "plain");
    }

    #[tokio::test]
    async fn terminal_text_ends_turn_immediately() {
        let (agent, model) = scripted_agent(vec![text("All good.")]);
        let out = agent.run_turn(&ctx(), "system", &[], "hello").await;
        assert_eq!(out.text, "All good.");
        assert_eq!(model.calls().await, 1);
    }

    #[tokio::test]
    async fn tool_calls_are_dispatched_then_answered() {
        let (agent, model) = scripted_agent(vec![
            tool_call("echo_tool", r#"{"value":"x"}"#),
            text("Tool said x."),
        ]);
        let out = agent.run_turn(&ctx(), "system", &[], "use the tool").await;
        assert_eq!(out.text, "Tool said x.");
        assert_eq!(model.calls().await, 2);

        // The second call saw the assistant tool-call message and the tool
        // result, in order.
        let second = model.messages_of_call(1).await;
        let roles: Vec<String> = second
            .iter()
            .map(|m| m["role"].as_str().unwrap_or("").to_string())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
    }

    #[tokio::test]
    async fn unknown_tool_feeds_error_back_and_recovers() {
        let (agent, model) = scripted_agent(vec![
            tool_call("no_such_tool", "{}"),
            text("Recovered."),
        ]);
        let out = agent.run_turn(&ctx(), "system", &[], "go").await;
        assert_eq!(out.text, "Recovered.");

        let second = model.messages_of_call(1).await;
        let tool_result = second.last().unwrap();
        assert_eq!(tool_result["role"], "tool");
        assert!(tool_result["content"]
            .as_str()
            .unwrap()
            .contains("Unknown tool"));
    }

    #[tokio::test]
    async fn iteration_cap_yields_finite_reply() {
        // A model that never stops calling tools.
        let responses: Vec<ChatReply> = (0..20)
            .map(|_| tool_call("echo_tool", r#"{"value":"again"}"#))
            .collect();
        let (agent, model) = scripted_agent(responses);
        let out = agent.run_turn(&ctx(), "system", &[], "loop forever").await;
        assert!(!out.text.is_empty());
        assert!(out.text.contains("8 tool steps"));
        assert_eq!(model.calls().await, 8);
    }

    #[tokio::test]
    async fn provider_failure_becomes_user_sentence() {
        let model = MockModel::failing();
        let (agent, _) = crate::testing::agent_with_model(model);
        let out = agent.run_turn(&ctx(), "system", &[], "hi").await;
        assert!(!out.text.is_empty());
        assert!(out.text.to_lowercase().contains("model"));
    }

    #[tokio::test]
    async fn history_is_threaded_into_the_prompt() {
        let (agent, model) = scripted_agent(vec![text("ok")]);
        let history = vec![
            json!({"role": "user", "content": "earlier question"}),
            json!({"role": "assistant", "content": "earlier answer"}),
        ];
        agent.run_turn(&ctx(), "system", &history, "follow-up").await;

        let first = model.messages_of_call(0).await;
        assert_eq!(first.len(), 4);
        assert_eq!(first[1]["content"], "earlier question");
        assert_eq!(first[3]["content"], "follow-up");
    }
}
