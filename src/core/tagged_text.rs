//! Inline tags the backend wraps around machine-generated text.
//!
//! Error and skip messages reach the UI wrapped in tags such as
//! `<tool_error>...</tool_error>`; the tags are stripped before display.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

pub const CANCELLATION_TAG: &str = "user_cancellation";
pub const TOOL_ERROR_TAG: &str = "tool_error";
pub const STOP_EVENT_TAG: &str = "stop_event";
pub const WARNING_TAG: &str = "warning";

pub const KNOWN_TAGS: [&str; 4] = [CANCELLATION_TAG, TOOL_ERROR_TAG, STOP_EVENT_TAG, WARNING_TAG];

// The regex crate has no backreferences, so the closing tag is matched by hand.
static OPENING_TAG: LazyLock<Regex> = LazyLock::new(|| {
    let names = KNOWN_TAGS
        .iter()
        .map(|tag| regex::escape(tag))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("<({names})>")).expect("valid regex")
});

fn known_tag(name: &str) -> Option<&'static str> {
    KNOWN_TAGS.iter().copied().find(|tag| *tag == name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedText {
    pub message: String,
    pub tag: Option<&'static str>,
}

impl TaggedText {
    pub fn new(message: impl Into<String>, tag: Option<&'static str>) -> Self {
        Self {
            message: message.into(),
            tag,
        }
    }

    /// Strips every known tag pair, keeping the inner text. Pairs are matched
    /// left to right without nesting: tags inside a matched pair stay as
    /// written. The first tag matched is reported.
    pub fn parse(text: &str) -> Self {
        let mut message = String::with_capacity(text.len());
        let mut first = None;
        let mut copied = 0;
        let mut search = 0;

        while let Some(caps) = OPENING_TAG.captures_at(text, search) {
            let (Some(open), Some(name)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let closing = format!("</{}>", name.as_str());
            let Some(offset) = text[open.end()..].find(&closing) else {
                // Unclosed here; a later opening tag may still match.
                search = open.start() + 1;
                continue;
            };
            let inner_end = open.end() + offset;
            message.push_str(&text[copied..open.start()]);
            message.push_str(&text[open.end()..inner_end]);
            copied = inner_end + closing.len();
            search = copied;
            first = first.or_else(|| known_tag(name.as_str()));
        }

        match first {
            Some(tag) => {
                message.push_str(&text[copied..]);
                Self::new(message, Some(tag))
            }
            None => Self::new(text, None),
        }
    }
}

impl fmt::Display for TaggedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            Some(tag) => write!(f, "<{tag}>{}</{tag}>", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Returns the display form of a possibly tagged message.
pub fn strip_tags(text: &str) -> String {
    TaggedText::parse(text).message
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    OperationCancelled,
    ToolInterrupted,
    ToolNoResponse,
    ToolSkipped,
}

/// Standard feedback handed back to the agent when the user declines or
/// interrupts something.
pub fn cancellation_message(reason: CancellationReason) -> TaggedText {
    let message = match reason {
        CancellationReason::OperationCancelled => "User cancelled the operation.",
        CancellationReason::ToolInterrupted => "Tool execution interrupted by user.",
        CancellationReason::ToolNoResponse => "Tool execution interrupted - no response available",
        CancellationReason::ToolSkipped => "Tool execution skipped by user.",
    };
    TaggedText::new(message, Some(CANCELLATION_TAG))
}

pub fn is_user_cancellation(text: &str) -> bool {
    text.contains(&format!("<{CANCELLATION_TAG}>"))
}
