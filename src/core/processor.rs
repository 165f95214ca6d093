//! Turns agent events into transcript mutations.
//!
//! The processor owns the live streaming buffers, the in-flight tool-call
//! registry and the live compaction record. Every method is driven from a
//! single task at a time; the controller hands the processor to whichever
//! operation is running.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::events::{AgentEvent, ToolCallEvent, ToolResultEvent, ToolStreamEvent};
use crate::core::sink::{PresentationSink, Widget, WidgetId, WidgetIds, WidgetUpdate};
use crate::core::tagged_text::strip_tags;
use crate::core::tool_ui::ToolUiRegistry;

pub const DEFAULT_LOADING_STATUS: &str = "Generating";
pub const COMPACTION_INTERRUPTED: &str = "Compaction interrupted";
const TODO_TOOL: &str = "todo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Assistant,
    Reasoning,
}

#[derive(Debug, Clone)]
pub struct StreamingBuffer {
    pub kind: StreamKind,
    pub text: String,
    pub widget: WidgetId,
}

#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool_name: String,
    pub widget: WidgetId,
}

pub struct EventProcessor {
    sink: Arc<dyn PresentationSink>,
    tool_uis: Arc<ToolUiRegistry>,
    ids: WidgetIds,
    tool_calls: HashMap<String, ToolCallRecord>,
    assistant: Option<StreamingBuffer>,
    reasoning: Option<StreamingBuffer>,
    compaction: Option<WidgetId>,
    loading_active: bool,
}

impl EventProcessor {
    pub fn new(
        sink: Arc<dyn PresentationSink>,
        tool_uis: Arc<ToolUiRegistry>,
        ids: WidgetIds,
    ) -> Self {
        Self {
            sink,
            tool_uis,
            ids,
            tool_calls: HashMap::new(),
            assistant: None,
            reasoning: None,
            compaction: None,
            loading_active: false,
        }
    }

    pub fn live_tool_calls(&self) -> usize {
        self.tool_calls.len()
    }

    pub fn has_tool_call(&self, id: &str) -> bool {
        self.tool_calls.contains_key(id)
    }

    pub fn live_buffer(&self, kind: StreamKind) -> Option<&StreamingBuffer> {
        match kind {
            StreamKind::Assistant => self.assistant.as_ref(),
            StreamKind::Reasoning => self.reasoning.as_ref(),
        }
    }

    pub fn compaction_widget(&self) -> Option<WidgetId> {
        self.compaction
    }

    pub fn is_loading(&self) -> bool {
        self.loading_active
    }

    pub async fn handle_event(&mut self, event: AgentEvent) {
        trace!(%event, "processing agent event");

        if event.finalizes_streaming() {
            self.finalize_streaming();
        }

        match event {
            AgentEvent::Reasoning { content } => self.handle_reasoning(content).await,
            AgentEvent::Assistant { content } => self.handle_assistant(content).await,
            AgentEvent::ToolCall(call) => self.handle_tool_call(call).await,
            AgentEvent::ToolResult(result) => self.handle_tool_result(result).await,
            AgentEvent::ToolStream(stream) => self.handle_tool_stream(stream),
            AgentEvent::CompactStart { .. } => {
                self.begin_compaction().await;
            }
            AgentEvent::CompactEnd {
                old_context_tokens,
                new_context_tokens,
                ..
            } => self.complete_compaction(old_context_tokens, new_context_tokens),
            AgentEvent::UserMessage { .. } => {}
            unknown @ AgentEvent::Unrecognized { .. } => {
                let description = unknown.to_string();
                self.mount(Widget::Unknown { description }, None).await;
            }
        }
    }

    async fn handle_reasoning(&mut self, content: String) {
        self.finalize_assistant(true);

        if let Some(buffer) = self.reasoning.as_mut() {
            buffer.text.push_str(&content);
            self.sink
                .update(buffer.widget, WidgetUpdate::AppendText(content));
            return;
        }

        let collapsed = self.sink.tools_collapsed();
        let widget = self
            .mount(
                Widget::Reasoning {
                    content: content.clone(),
                    collapsed,
                },
                None,
            )
            .await;
        self.reasoning = Some(StreamingBuffer {
            kind: StreamKind::Reasoning,
            text: content,
            widget,
        });
    }

    async fn handle_assistant(&mut self, content: String) {
        self.finalize_reasoning();

        if let Some(buffer) = self.assistant.as_mut() {
            buffer.text.push_str(&content);
            self.sink
                .update(buffer.widget, WidgetUpdate::AppendText(content));
            return;
        }

        let widget = self
            .mount(
                Widget::Assistant {
                    content: content.clone(),
                },
                None,
            )
            .await;
        self.assistant = Some(StreamingBuffer {
            kind: StreamKind::Assistant,
            text: content,
            widget,
        });
    }

    async fn handle_tool_call(&mut self, call: ToolCallEvent) {
        let adapter = self.tool_uis.get(&call.tool_name);
        let display = adapter.call_display(&call);
        let status = adapter.status_text(&call);

        if let Some(record) = self.tool_calls.get(&call.tool_call_id) {
            self.sink.update(
                record.widget,
                WidgetUpdate::UpdateToolCall {
                    summary: display.summary,
                    content: display.content,
                },
            );
        } else {
            let widget = self
                .mount(
                    Widget::ToolCall {
                        tool_name: call.tool_name.clone(),
                        summary: display.summary,
                        content: display.content,
                    },
                    None,
                )
                .await;
            if call.tool_call_id.is_empty() {
                debug!(tool = %call.tool_name, "tool call without id, not tracked");
            } else {
                self.tool_calls.insert(
                    call.tool_call_id.clone(),
                    ToolCallRecord {
                        id: call.tool_call_id,
                        tool_name: call.tool_name,
                        widget,
                    },
                );
            }
        }

        if self.loading_active {
            self.sink.set_loading(Some(&status));
        }
    }

    async fn handle_tool_result(&mut self, result: ToolResultEvent) {
        let result = sanitize_result(result);
        let adapter = self.tool_uis.get(&result.tool_name);
        let success = adapter
            .success(&result)
            .unwrap_or(result.error.is_none() && !result.skipped);
        let display = adapter.result_display(&result);

        let call_widget = match self.tool_calls.remove(&result.tool_call_id) {
            Some(record) => {
                self.sink
                    .update(record.widget, WidgetUpdate::StopSpinner { success });
                Some(record.widget)
            }
            None => {
                debug!(
                    tool = %result.tool_name,
                    id = %result.tool_call_id,
                    "tool result without a live call"
                );
                None
            }
        };

        let collapsed = if result.tool_name == TODO_TOOL {
            self.sink.todos_collapsed()
        } else {
            self.sink.tools_collapsed()
        };
        self.mount(
            Widget::ToolResult {
                tool_name: result.tool_name,
                message: display.message,
                success,
                warnings: display.warnings,
                collapsed,
            },
            call_widget,
        )
        .await;

        if self.loading_active && self.tool_calls.is_empty() {
            self.sink.set_loading(Some(DEFAULT_LOADING_STATUS));
        }
    }

    fn handle_tool_stream(&mut self, stream: ToolStreamEvent) {
        match self.tool_calls.get(&stream.tool_call_id) {
            Some(record) => self
                .sink
                .update(record.widget, WidgetUpdate::SetStreamMessage(stream.message)),
            None => trace!(id = %stream.tool_call_id, "ignoring stream for unknown tool call"),
        }
    }

    /// Mounts a fresh compaction record. A record left live by an earlier
    /// compaction is failed first so at most one stays live.
    pub async fn begin_compaction(&mut self) -> WidgetId {
        self.stop_compaction();
        let widget = self.mount(Widget::Compaction, None).await;
        self.compaction = Some(widget);
        widget
    }

    pub fn complete_compaction(&mut self, old_tokens: u64, new_tokens: u64) {
        if let Some(widget) = self.compaction.take() {
            self.sink.update(
                widget,
                WidgetUpdate::CompactionComplete {
                    old_tokens,
                    new_tokens,
                },
            );
        }
    }

    pub fn fail_compaction(&mut self, message: &str) {
        if let Some(widget) = self.compaction.take() {
            self.sink
                .update(widget, WidgetUpdate::CompactionError(message.to_string()));
        }
    }

    /// Marks a live compaction record as interrupted.
    pub fn stop_compaction(&mut self) {
        self.fail_compaction(COMPACTION_INTERRUPTED);
    }

    /// Stops every live tool-call spinner and forgets the calls.
    pub fn stop_all_tool_calls(&mut self, success: bool) {
        for (_, record) in self.tool_calls.drain() {
            debug!(tool = %record.tool_name, id = %record.id, success, "stopping tool call");
            self.sink
                .update(record.widget, WidgetUpdate::StopSpinner { success });
        }
    }

    /// Ends both streaming buffers, reasoning first. Calling it again does
    /// nothing.
    pub fn finalize_streaming(&mut self) {
        self.finalize_reasoning();
        self.finalize_assistant(false);
    }

    fn finalize_reasoning(&mut self) {
        if let Some(buffer) = self.reasoning.take() {
            self.sink.update(buffer.widget, WidgetUpdate::StopStream);
        }
    }

    fn finalize_assistant(&mut self, drop_if_blank: bool) {
        let Some(buffer) = self.assistant.take() else {
            return;
        };
        if drop_if_blank && buffer.text.trim().is_empty() {
            self.sink.update(buffer.widget, WidgetUpdate::Remove);
        } else {
            self.sink.update(buffer.widget, WidgetUpdate::StopStream);
        }
    }

    pub fn start_loading(&mut self) {
        self.start_loading_with(DEFAULT_LOADING_STATUS);
    }

    pub fn start_loading_with(&mut self, status: &str) {
        self.loading_active = true;
        self.sink.set_loading(Some(status));
        self.sink.set_todo_area_visible(true);
    }

    pub fn stop_loading(&mut self) {
        if !self.loading_active {
            return;
        }
        self.loading_active = false;
        self.sink.set_loading(None);
        self.sink.set_todo_area_visible(false);
    }

    /// Mounts a widget at the end of the transcript (or after `after`) and
    /// scrolls to it.
    pub async fn mount(&mut self, widget: Widget, after: Option<WidgetId>) -> WidgetId {
        let id = self.ids.next();
        self.sink.mount(id, widget, after).await;
        self.sink.scroll_to_bottom();
        id
    }
}

fn sanitize_result(mut result: ToolResultEvent) -> ToolResultEvent {
    result.error = result.error.map(|error| strip_tags(&error));
    result.skip_reason = result.skip_reason.map(|reason| strip_tags(&reason));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tool_ui::{DefaultToolUi, ToolCallDisplay, ToolResultDisplay, ToolUi};
    use crate::utils::test_utils::{RecordingSink, SinkCall};
    use serde_json::json;

    fn processor(sink: &Arc<RecordingSink>) -> EventProcessor {
        EventProcessor::new(
            sink.clone(),
            Arc::new(ToolUiRegistry::new()),
            WidgetIds::new(),
        )
    }

    fn call(id: &str, tool: &str) -> AgentEvent {
        AgentEvent::ToolCall(ToolCallEvent::new(id, tool, json!({"path": "a.txt"})))
    }

    #[tokio::test]
    async fn assistant_chunks_accumulate_in_one_widget() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(AgentEvent::assistant("Hel")).await;
        processor.handle_event(AgentEvent::assistant("lo")).await;

        let buffer = processor.live_buffer(StreamKind::Assistant).unwrap();
        assert_eq!(buffer.text, "Hello");
        assert_eq!(sink.mounts().len(), 1);
        assert_eq!(
            sink.updates_for(buffer.widget),
            vec![WidgetUpdate::AppendText("lo".into())]
        );
    }

    #[tokio::test]
    async fn reasoning_and_assistant_finalize_each_other() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(AgentEvent::reasoning("thinking")).await;
        let reasoning = processor.live_buffer(StreamKind::Reasoning).unwrap().widget;

        processor.handle_event(AgentEvent::assistant("answer")).await;
        assert!(processor.live_buffer(StreamKind::Reasoning).is_none());
        assert_eq!(sink.updates_for(reasoning), vec![WidgetUpdate::StopStream]);
        let assistant = processor.live_buffer(StreamKind::Assistant).unwrap().widget;

        processor.handle_event(AgentEvent::reasoning("more")).await;
        assert!(processor.live_buffer(StreamKind::Assistant).is_none());
        assert_eq!(sink.updates_for(assistant), vec![WidgetUpdate::StopStream]);
        assert!(processor.live_buffer(StreamKind::Reasoning).is_some());
    }

    #[tokio::test]
    async fn blank_assistant_is_removed_when_reasoning_starts() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(AgentEvent::assistant("  \n")).await;
        let assistant = processor.live_buffer(StreamKind::Assistant).unwrap().widget;
        processor.handle_event(AgentEvent::reasoning("hmm")).await;

        assert_eq!(sink.updates_for(assistant), vec![WidgetUpdate::Remove]);
    }

    #[tokio::test]
    async fn reasoning_honours_tools_collapsed() {
        let sink = Arc::new(RecordingSink::new());
        sink.set_tools_collapsed(true);
        let mut processor = processor(&sink);

        processor.handle_event(AgentEvent::reasoning("x")).await;
        assert!(matches!(
            sink.mounts()[0].1,
            Widget::Reasoning {
                collapsed: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn tool_call_then_result_clears_registry() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(AgentEvent::assistant("let me look")).await;
        processor.handle_event(call("c1", "read_file")).await;
        assert!(processor.live_buffer(StreamKind::Assistant).is_none());
        assert!(processor.has_tool_call("c1"));

        let call_widget = sink.mounts()[1].0;
        processor
            .handle_event(AgentEvent::ToolResult(ToolResultEvent::success(
                "c1",
                "read_file",
                json!("contents"),
            )))
            .await;

        assert!(!processor.has_tool_call("c1"));
        assert_eq!(
            sink.updates_for(call_widget),
            vec![WidgetUpdate::StopSpinner { success: true }]
        );
        let (_, widget, after) = sink.mount_calls().pop().unwrap();
        assert_eq!(after, Some(call_widget));
        assert!(matches!(widget, Widget::ToolResult { success: true, .. }));
    }

    #[tokio::test]
    async fn repeated_tool_call_updates_in_place() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(call("c1", "read_file")).await;
        processor.handle_event(call("c1", "read_file")).await;

        assert_eq!(sink.mounts().len(), 1);
        let widget = sink.mounts()[0].0;
        assert!(matches!(
            sink.updates_for(widget).as_slice(),
            [WidgetUpdate::UpdateToolCall { .. }]
        ));
    }

    #[tokio::test]
    async fn empty_tool_call_id_is_mounted_but_not_tracked() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(call("", "bash")).await;
        assert_eq!(sink.mounts().len(), 1);
        assert_eq!(processor.live_tool_calls(), 0);
    }

    #[tokio::test]
    async fn failed_result_strips_tags_and_reports_failure() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(call("c1", "bash")).await;
        processor
            .handle_event(AgentEvent::ToolResult(ToolResultEvent::failure(
                "c1",
                "bash",
                "<tool_error>exit status 2</tool_error>",
            )))
            .await;

        let (_, widget) = sink.mounts().pop().unwrap();
        assert_eq!(
            widget,
            Widget::ToolResult {
                tool_name: "bash".into(),
                message: "exit status 2".into(),
                success: false,
                warnings: Vec::new(),
                collapsed: false,
            }
        );
    }

    struct StrictLint;

    impl ToolUi for StrictLint {
        fn call_display(&self, call: &ToolCallEvent) -> ToolCallDisplay {
            DefaultToolUi.call_display(call)
        }

        fn result_display(&self, _result: &ToolResultEvent) -> ToolResultDisplay {
            ToolResultDisplay {
                message: "lint finished".into(),
                warnings: vec!["unused import".into()],
            }
        }

        fn status_text(&self, _call: &ToolCallEvent) -> String {
            "Linting".into()
        }

        fn success(&self, result: &ToolResultEvent) -> Option<bool> {
            Some(result.result == Some(json!("clean")))
        }
    }

    #[tokio::test]
    async fn adapter_success_predicate_and_status_text_win() {
        let sink = Arc::new(RecordingSink::new());
        let mut registry = ToolUiRegistry::new();
        registry.register("lint", Arc::new(StrictLint));
        let mut processor = EventProcessor::new(sink.clone(), Arc::new(registry), WidgetIds::new());

        processor.start_loading();
        processor.handle_event(call("c1", "lint")).await;
        assert_eq!(sink.last_loading(), Some(Some("Linting".to_string())));

        processor
            .handle_event(AgentEvent::ToolResult(ToolResultEvent::success(
                "c1",
                "lint",
                json!("3 warnings"),
            )))
            .await;

        let (_, widget) = sink.mounts().pop().unwrap();
        assert!(matches!(
            widget,
            Widget::ToolResult { success: false, ref warnings, .. } if warnings.len() == 1
        ));
        assert_eq!(
            sink.last_loading(),
            Some(Some(DEFAULT_LOADING_STATUS.to_string()))
        );
    }

    #[tokio::test]
    async fn orphan_result_renders_standalone() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor
            .handle_event(AgentEvent::ToolResult(ToolResultEvent::skipped(
                "ghost",
                "bash",
                Some("<user_cancellation>Tool execution skipped by user.</user_cancellation>".into()),
            )))
            .await;

        let (_, widget, after) = sink.mount_calls().pop().unwrap();
        assert_eq!(after, None);
        assert!(matches!(
            widget,
            Widget::ToolResult { success: false, ref message, .. }
                if message == "Tool execution skipped by user."
        ));
    }

    #[tokio::test]
    async fn tool_stream_updates_live_call_only() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(AgentEvent::assistant("working")).await;
        processor.handle_event(call("c1", "bash")).await;
        let call_widget = sink.mounts()[1].0;

        processor.handle_event(AgentEvent::assistant("still")).await;
        let assistant = processor.live_buffer(StreamKind::Assistant).unwrap().widget;
        let stream = |id: &str| {
            AgentEvent::ToolStream(ToolStreamEvent {
                tool_call_id: id.into(),
                tool_name: "bash".into(),
                message: "50%".into(),
            })
        };
        processor.handle_event(stream("c1")).await;
        processor.handle_event(stream("unknown")).await;

        // Tool streams leave the live assistant buffer open.
        assert!(processor.live_buffer(StreamKind::Assistant).is_some());
        assert!(sink.updates_for(assistant).is_empty());
        assert_eq!(
            sink.updates_for(call_widget),
            vec![WidgetUpdate::SetStreamMessage("50%".into())]
        );

        // The next chunk extends the same widget instead of mounting another.
        let mounted = sink.mounts().len();
        processor.handle_event(AgentEvent::assistant(" more")).await;
        assert_eq!(sink.mounts().len(), mounted);
        assert_eq!(
            sink.updates_for(assistant),
            vec![WidgetUpdate::AppendText(" more".into())]
        );
    }

    #[tokio::test]
    async fn finalize_streaming_is_idempotent() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(AgentEvent::assistant("done")).await;
        processor.finalize_streaming();
        let after_first = sink.calls().len();
        processor.finalize_streaming();
        assert_eq!(sink.calls().len(), after_first);
    }

    #[tokio::test]
    async fn stop_all_tool_calls_fails_every_live_call_once() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(call("c1", "bash")).await;
        processor.handle_event(call("c2", "grep")).await;
        processor.stop_all_tool_calls(false);
        processor.stop_all_tool_calls(false);

        let stops = sink.count(|call| {
            matches!(
                call,
                SinkCall::Update {
                    update: WidgetUpdate::StopSpinner { success: false },
                    ..
                }
            )
        });
        assert_eq!(stops, 2);
        assert_eq!(processor.live_tool_calls(), 0);
    }

    #[tokio::test]
    async fn compaction_events_resolve_the_record() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor
            .handle_event(AgentEvent::CompactStart {
                current_context_tokens: 9_000,
                threshold: 8_000,
            })
            .await;
        let record = processor.compaction_widget().unwrap();
        processor
            .handle_event(AgentEvent::CompactEnd {
                old_context_tokens: 9_000,
                new_context_tokens: 1_200,
                summary_length: 300,
            })
            .await;

        assert_eq!(processor.compaction_widget(), None);
        assert_eq!(
            sink.updates_for(record),
            vec![WidgetUpdate::CompactionComplete {
                old_tokens: 9_000,
                new_tokens: 1_200,
            }]
        );
    }

    #[tokio::test]
    async fn stale_compaction_record_is_failed_on_restart() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        let first = processor.begin_compaction().await;
        let second = processor.begin_compaction().await;

        assert_ne!(first, second);
        assert_eq!(
            sink.updates_for(first),
            vec![WidgetUpdate::CompactionError(COMPACTION_INTERRUPTED.into())]
        );
        assert_eq!(processor.compaction_widget(), Some(second));
    }

    #[tokio::test]
    async fn unknown_events_mount_fallback_and_user_echo_only_finalizes() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.handle_event(AgentEvent::assistant("hi")).await;
        processor
            .handle_event(AgentEvent::UserMessage {
                content: "echo".into(),
            })
            .await;
        assert!(processor.live_buffer(StreamKind::Assistant).is_none());
        assert_eq!(sink.mounts().len(), 1);

        processor
            .handle_event(AgentEvent::Unrecognized {
                kind: "telemetry".into(),
                payload: json!({"n": 1}),
            })
            .await;
        assert!(matches!(
            sink.mounts().pop().unwrap().1,
            Widget::Unknown { ref description } if description.starts_with("telemetry")
        ));
    }

    #[tokio::test]
    async fn loading_toggles_todo_area() {
        let sink = Arc::new(RecordingSink::new());
        let mut processor = processor(&sink);

        processor.start_loading();
        processor.stop_loading();
        processor.stop_loading();

        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Loading(Some(DEFAULT_LOADING_STATUS.into())),
                SinkCall::TodoArea(true),
                SinkCall::Loading(None),
                SinkCall::TodoArea(false),
            ]
        );
    }
}
