//! Presentation boundary.
//!
//! The core never renders anything itself. It describes what should appear in
//! the transcript as [`Widget`]s and later mutates them through
//! [`WidgetUpdate`]s addressed by [`WidgetId`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::agent::QuestionArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId(pub u64);

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Monotonic id source shared by everything that mounts widgets.
#[derive(Debug, Clone, Default)]
pub struct WidgetIds {
    next: Arc<AtomicU64>,
}

impl WidgetIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> WidgetId {
        WidgetId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    User {
        content: String,
    },
    Assistant {
        content: String,
    },
    Reasoning {
        content: String,
        collapsed: bool,
    },
    ToolCall {
        tool_name: String,
        summary: String,
        content: Option<String>,
    },
    ToolResult {
        tool_name: String,
        message: String,
        success: bool,
        warnings: Vec<String>,
        collapsed: bool,
    },
    /// Live record of a compaction; resolved through
    /// [`WidgetUpdate::CompactionComplete`] or [`WidgetUpdate::CompactionError`].
    Compaction,
    Error {
        message: String,
    },
    Interrupted,
    Notice {
        message: String,
    },
    Unknown {
        description: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetUpdate {
    AppendText(String),
    /// Ends streaming on an assistant or reasoning widget.
    StopStream,
    StopSpinner {
        success: bool,
    },
    SetStreamMessage(String),
    UpdateToolCall {
        summary: String,
        content: Option<String>,
    },
    CompactionComplete {
        old_tokens: u64,
        new_tokens: u64,
    },
    CompactionError(String),
    Remove,
}

/// Which interactive element occupies the bottom of the screen.
#[derive(Debug, Clone, PartialEq)]
pub enum BottomView {
    Input,
    Approval { tool: String, args: Value },
    Question { args: QuestionArgs },
}

/// Everything the core needs from a front end.
///
/// Implementations must not call back into the controller; they only draw.
#[async_trait]
pub trait PresentationSink: Send + Sync {
    /// Adds a widget to the transcript, after `after` when given, otherwise at
    /// the end.
    async fn mount(&self, id: WidgetId, widget: Widget, after: Option<WidgetId>);

    fn update(&self, id: WidgetId, update: WidgetUpdate);

    fn scroll_to_bottom(&self);

    fn tools_collapsed(&self) -> bool;

    fn todos_collapsed(&self) -> bool;

    /// `Some(status)` shows the loading indicator with that status text,
    /// `None` hides it.
    fn set_loading(&self, status: Option<&str>);

    fn set_todo_area_visible(&self, visible: bool);

    fn show_view(&self, view: BottomView);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widget_ids_are_unique_across_clones() {
        let ids = WidgetIds::new();
        let other = ids.clone();
        let a = ids.next();
        let b = other.next();
        let c = ids.next();
        assert!(a < b && b < c);
        assert_eq!(a.to_string(), "w1");
    }
}
