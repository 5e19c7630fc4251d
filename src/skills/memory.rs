use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::{MemoryService, SearchQuery};
use crate::skills::require_str;
use crate::traits::{Skill, ToolSpec, TurnContext};

/// Semantic recall over notes, chat logs and filesystem listings.
/// Two tools: `memory_search` ranks chunks, `memory_get` reads a window of
/// the underlying source.
pub struct MemorySkill {
    memory: Arc<MemoryService>,
}

impl MemorySkill {
    pub fn new(memory: Arc<MemoryService>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Skill for MemorySkill {
    fn id(&self) -> &str {
        "memory"
    }

    fn doc(&self) -> Option<String> {
        Some(
            "search past conversations and notes before claiming you don't know something; \
             use memory_get to read more context around a hit"
                .to_string(),
        )
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "memory_search".to_string(),
                description: "Semantic search over notes, chat history and indexed directories. \
                              Returns scored snippets with their source path and line range."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "What to look for" },
                        "k": { "type": "integer", "description": "Max results (default from config)" },
                        "minScore": { "type": "number", "description": "Similarity floor, 0..1" },
                        "dateFrom": { "type": "string", "description": "YYYY-MM-DD inclusive lower bound" },
                        "dateTo": { "type": "string", "description": "YYYY-MM-DD inclusive upper bound" },
                        "dateRange": {
                            "type": "string",
                            "enum": ["yesterday", "last_week", "last_7_days", "last_month"],
                            "description": "Shorthand window, computed in the user's timezone"
                        }
                    },
                    "required": ["query"]
                }),
            },
            ToolSpec {
                name: "memory_get".to_string(),
                description: "Read lines from a source returned by memory_search \
                              (notes and chat logs only)."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Source path from a search result" },
                        "from": { "type": "integer", "description": "1-indexed first line (default 1)" },
                        "lines": { "type": "integer", "description": "Line count (default 100)" }
                    },
                    "required": ["path"]
                }),
            },
        ]
    }

    async fn execute(
        &self,
        _ctx: &TurnContext,
        tool_name: &str,
        args: &Value,
    ) -> anyhow::Result<String> {
        match tool_name {
            "memory_search" => {
                let query = require_str(args, "query")?;
                let opts = SearchQuery {
                    k: args["k"].as_u64().map(|v| v as usize),
                    min_score: args["minScore"].as_f64().map(|v| v as f32),
                    date_from: args["dateFrom"].as_str().map(|s| s.to_string()),
                    date_to: args["dateTo"].as_str().map(|s| s.to_string()),
                    date_range: args["dateRange"].as_str().map(|s| s.to_string()),
                };
                let hits = self.memory.search(query, &opts).await?;
                if hits.is_empty() {
                    return Ok("No matching memories found.".to_string());
                }
                Ok(serde_json::to_string(&hits)?)
            }
            "memory_get" => {
                let path = require_str(args, "path")?;
                let from = args["from"].as_u64().map(|v| v as usize);
                let lines = args["lines"].as_u64().map(|v| v as usize);
                self.memory.read_source(path, from, lines).await
            }
            other => anyhow::bail!("Unknown memory tool '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::stub_service;
    use std::path::PathBuf;

    fn ctx() -> TurnContext {
        TurnContext::new("1", false, PathBuf::from("/tmp"), PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn search_tool_returns_hits_as_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = tmp.path().join("workspace");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join("MEMORY.md"), "User prefers dark mode.\n").unwrap();

        let memory = Arc::new(stub_service(&ws, tmp.path(), vec![]).await);
        memory.sync().await.unwrap();
        let skill = MemorySkill::new(memory);

        let result = skill
            .execute(
                &ctx(),
                "memory_search",
                &json!({"query": "what does the user prefer?", "minScore": 0.3}),
            )
            .await
            .unwrap();
        assert!(result.contains("dark mode"));
        assert!(result.contains("MEMORY.md"));
    }

    #[tokio::test]
    async fn empty_results_read_as_sentence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = tmp.path().join("workspace");
        std::fs::create_dir_all(&ws).unwrap();

        let memory = Arc::new(stub_service(&ws, tmp.path(), vec![]).await);
        let skill = MemorySkill::new(memory);
        let result = skill
            .execute(&ctx(), "memory_search", &json!({"query": "anything"}))
            .await
            .unwrap();
        assert_eq!(result, "No matching memories found.");
    }

    #[tokio::test]
    async fn get_tool_requires_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = tmp.path().join("workspace");
        std::fs::create_dir_all(&ws).unwrap();
        let memory = Arc::new(stub_service(&ws, tmp.path(), vec![]).await);
        let skill = MemorySkill::new(memory);
        assert!(skill.execute(&ctx(), "memory_get", &json!({})).await.is_err());
    }
}
