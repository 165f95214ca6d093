//! Events produced by the agent backend while a turn is running.
//!
//! The enum is matched exhaustively by the event processor, so a new kind of
//! event cannot be added without deciding how it is displayed.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::tagged_text;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A user message echoed back by the backend, e.g. for turns
    /// synthesized by a delegated sub-agent.
    UserMessage { content: String },
    Assistant { content: String },
    Reasoning { content: String },
    ToolCall(ToolCallEvent),
    ToolResult(ToolResultEvent),
    ToolStream(ToolStreamEvent),
    CompactStart {
        current_context_tokens: u64,
        threshold: u64,
    },
    CompactEnd {
        old_context_tokens: u64,
        new_context_tokens: u64,
        summary_length: usize,
    },
    /// Anything the processor has no dedicated handling for.
    Unrecognized { kind: String, payload: Value },
}

impl AgentEvent {
    pub fn assistant(content: impl Into<String>) -> Self {
        AgentEvent::Assistant {
            content: content.into(),
        }
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        AgentEvent::Reasoning {
            content: content.into(),
        }
    }

    /// Whether live streaming buffers must be closed before this event is
    /// handled. Text chunks manage their own buffers and tool progress
    /// leaves them open.
    pub fn finalizes_streaming(&self) -> bool {
        !matches!(
            self,
            AgentEvent::Assistant { .. } | AgentEvent::Reasoning { .. } | AgentEvent::ToolStream(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCallEvent {
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResultEvent {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub duration: Option<Duration>,
}

impl ToolResultEvent {
    pub fn success(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failure(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn skipped(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            skipped: true,
            skip_reason: reason,
            ..Self::default()
        }
    }

    /// A skip the user asked for, as opposed to one the backend decided on.
    pub fn is_user_cancellation(&self) -> bool {
        self.skipped
            && self
                .skip_reason
                .as_deref()
                .is_some_and(tagged_text::is_user_cancellation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStreamEvent {
    pub tool_call_id: String,
    pub tool_name: String,
    pub message: String,
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentEvent::UserMessage { content } => write!(f, "user: {content}"),
            AgentEvent::Assistant { content } => write!(f, "assistant: {content}"),
            AgentEvent::Reasoning { content } => write!(f, "reasoning: {content}"),
            AgentEvent::ToolCall(call) => {
                write!(f, "tool call {} ({})", call.tool_name, call.tool_call_id)
            }
            AgentEvent::ToolResult(result) => {
                write!(f, "tool result {} ({})", result.tool_name, result.tool_call_id)
            }
            AgentEvent::ToolStream(stream) => {
                write!(f, "tool stream {}: {}", stream.tool_name, stream.message)
            }
            AgentEvent::CompactStart {
                current_context_tokens,
                threshold,
            } => write!(f, "compact start ({current_context_tokens}/{threshold} tokens)"),
            AgentEvent::CompactEnd {
                old_context_tokens,
                new_context_tokens,
                ..
            } => write!(
                f,
                "compact end ({old_context_tokens} -> {new_context_tokens} tokens)"
            ),
            AgentEvent::Unrecognized { kind, payload } => write!(f, "{kind}: {payload}"),
        }
    }
}
