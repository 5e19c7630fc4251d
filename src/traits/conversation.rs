use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single tool call as returned by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object, exactly as the provider sent it.
    pub arguments: String,
}

/// Wire-format assistant message carrying tool calls, in the
/// OpenAI-compatible shape the providers consume.
pub fn assistant_message(text: Option<&str>, tool_calls: &[ToolCall]) -> Value {
    let calls: Vec<Value> = tool_calls
        .iter()
        .map(|tc| {
            json!({
                "id": tc.id,
                "type": "function",
                "function": { "name": tc.name, "arguments": tc.arguments },
            })
        })
        .collect();
    let mut msg = json!({ "role": "assistant", "content": text });
    if !calls.is_empty() {
        msg["tool_calls"] = json!(calls);
    }
    msg
}

/// Wire-format tool-result message answering one tool call.
pub fn tool_message(tool_call_id: &str, name: &str, content: &str) -> Value {
    json!({
        "role": "tool",
        "tool_call_id": tool_call_id,
        "name": name,
        "content": content,
    })
}
