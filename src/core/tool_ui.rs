//! Per-tool display adapters.
//!
//! Tools can customise how their calls and results look in the transcript.
//! Anything without a registered adapter falls back to [`DefaultToolUi`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::core::events::{ToolCallEvent, ToolResultEvent};

const MAX_SUMMARY_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDisplay {
    pub summary: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultDisplay {
    pub message: String,
    pub warnings: Vec<String>,
}

pub trait ToolUi: Send + Sync {
    fn call_display(&self, call: &ToolCallEvent) -> ToolCallDisplay;

    fn result_display(&self, result: &ToolResultEvent) -> ToolResultDisplay;

    /// Text for the loading indicator while the call runs.
    fn status_text(&self, call: &ToolCallEvent) -> String;

    /// Overrides the default success rule for results of this tool.
    fn success(&self, _result: &ToolResultEvent) -> Option<bool> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultToolUi;

impl ToolUi for DefaultToolUi {
    fn call_display(&self, call: &ToolCallEvent) -> ToolCallDisplay {
        let args = summarize_args(&call.args);
        let summary = if args.is_empty() {
            call.tool_name.clone()
        } else {
            format!("{}({args})", call.tool_name)
        };
        ToolCallDisplay {
            summary,
            content: None,
        }
    }

    fn result_display(&self, result: &ToolResultEvent) -> ToolResultDisplay {
        let message = if let Some(error) = &result.error {
            error.clone()
        } else if result.skipped {
            result
                .skip_reason
                .clone()
                .unwrap_or_else(|| "Skipped".to_string())
        } else {
            match &result.result {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => "Done".to_string(),
                Some(other) => other.to_string(),
            }
        };
        ToolResultDisplay {
            message,
            warnings: Vec::new(),
        }
    }

    fn status_text(&self, call: &ToolCallEvent) -> String {
        format!("Running {}", call.tool_name)
    }
}

fn summarize_args(args: &Value) -> String {
    let text = match args {
        Value::Null => return String::new(),
        Value::Object(map) if map.is_empty() => return String::new(),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}={s}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    truncate_chars(&text, MAX_SUMMARY_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// Maps tool names to their display adapters.
#[derive(Clone, Default)]
pub struct ToolUiRegistry {
    adapters: HashMap<String, Arc<dyn ToolUi>>,
    fallback: DefaultToolUi,
}

impl ToolUiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool_name: impl Into<String>, adapter: Arc<dyn ToolUi>) {
        self.adapters.insert(tool_name.into(), adapter);
    }

    pub fn get(&self, tool_name: &str) -> &dyn ToolUi {
        match self.adapters.get(tool_name) {
            Some(adapter) => adapter.as_ref(),
            None => &self.fallback,
        }
    }
}

impl std::fmt::Debug for ToolUiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.adapters.keys().collect();
        names.sort();
        f.debug_struct("ToolUiRegistry")
            .field("adapters", &names)
            .finish()
    }
}
