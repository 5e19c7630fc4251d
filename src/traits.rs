//! Shared domain types + core interfaces (traits) used across the codebase.
//!
//! Kept as a thin re-export layer so `crate::traits::*` stays stable for call
//! sites while each area (provider, transport, skill) evolves on its own.

mod conversation;
mod provider;
mod skill;
mod transport;

pub use conversation::{assistant_message, tool_message, ToolCall};
pub use provider::{ChatReply, GeneratedImage, ModelClient};
pub use skill::{ReplyPayload, Skill, ToolSpec, TurnContext};
pub use transport::{Transport, TransportKind, TransportSet};
