use thiserror::Error;

use crate::core::config::Plan;

/// Errors raised by the agent backend while producing a turn or compacting.
///
/// Tool failures are not represented here; they travel as data on
/// [`ToolResultEvent`](crate::core::events::ToolResultEvent).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Rate limits exceeded. Please wait a moment before trying again.")]
    RateLimit { provider: String, model: String },

    #[error("{0}")]
    Backend(String),

    #[error("Failed to persist tool permission for {tool}: {reason}")]
    Permission { tool: String, reason: String },

    /// The backend stopped because the user cancelled from its side.
    #[error("operation cancelled")]
    Cancelled,
}

/// Error taxonomy surfaced by the turn controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// The user asked for something that cannot happen right now; rendered
    /// as an error entry, nothing is torn down.
    #[error("{0}")]
    Recoverable(String),

    #[error("Rate limits exceeded for {provider}/{model}.")]
    RateLimit { provider: String, model: String },

    /// Anything escaping the event stream that is not a rate limit.
    #[error("{0}")]
    Unexpected(String),

    /// Intentional interrupt. Never rendered as an error.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        CoreError::Recoverable(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }

    /// Text shown in the transcript for this error.
    pub fn user_message(&self, plan: Plan) -> String {
        match self {
            CoreError::RateLimit { provider, model } => match plan {
                Plan::Free => format!(
                    "Rate limits exceeded for {provider}/{model} on the free plan. \
                     Upgrade your plan for higher limits, or wait a moment before trying again."
                ),
                Plan::Paid => format!(
                    "Rate limits exceeded for {provider}/{model}. \
                     Please wait a moment before trying again."
                ),
            },
            other => other.to_string(),
        }
    }
}

impl From<AgentError> for CoreError {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::RateLimit { provider, model } => CoreError::RateLimit { provider, model },
            AgentError::Cancelled => CoreError::Cancelled,
            other => CoreError::Unexpected(other.to_string()),
        }
    }
}
