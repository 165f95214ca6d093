//! Interface to the agent backend.
//!
//! The backend owns the model conversation and tool execution. The core only
//! consumes the event stream it produces and answers its approval and
//! question callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::AgentError;
use crate::core::events::AgentEvent;

pub type EventStream = BoxStream<'static, Result<AgentEvent, AgentError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPermission {
    Always,
    Ask,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    Yes,
    No,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuestionArgs {
    pub questions: Vec<Question>,
}

impl QuestionArgs {
    pub fn single(question: impl Into<String>) -> Self {
        Self {
            questions: vec![Question {
                question: question.into(),
                options: Vec::new(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuestionResult {
    pub answers: Vec<String>,
    pub cancelled: bool,
}

impl QuestionResult {
    pub fn answered(answers: Vec<String>) -> Self {
        Self {
            answers,
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            answers: Vec::new(),
            cancelled: true,
        }
    }
}

/// Invoked by the backend before running a tool that needs consent.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn request_approval(
        &self,
        tool: &str,
        args: &Value,
        tool_call_id: &str,
    ) -> (ApprovalResponse, Option<String>);
}

/// Invoked by the backend when a tool asks the user something.
#[async_trait]
pub trait UserInputCallback: Send + Sync {
    async fn request_user_input(&self, args: QuestionArgs) -> QuestionResult;
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Starts one turn. Dropping the stream abandons the turn.
    fn act(&self, prompt: String) -> EventStream;

    /// Summarises the conversation history in place.
    async fn compact(&self) -> Result<(), AgentError>;

    fn context_tokens(&self) -> u64;

    /// Number of messages in the conversation, system prompt included.
    fn history_len(&self) -> usize;

    /// Tools available to the agent right now.
    fn active_tools(&self) -> Vec<String>;

    fn set_tool_permission(
        &self,
        tool: &str,
        permission: ToolPermission,
        save_permanently: bool,
    ) -> Result<(), AgentError>;

    /// Called once when the controller is built.
    fn register_callbacks(
        &self,
        approval: Arc<dyn ApprovalCallback>,
        user_input: Arc<dyn UserInputCallback>,
    );
}
