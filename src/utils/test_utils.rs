use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::sink::{BottomView, PresentationSink, Widget, WidgetId, WidgetUpdate};

/// Everything a [`RecordingSink`] was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Mount {
        id: WidgetId,
        widget: Widget,
        after: Option<WidgetId>,
    },
    Update {
        id: WidgetId,
        update: WidgetUpdate,
    },
    Scroll,
    Loading(Option<String>),
    TodoArea(bool),
    View(BottomView),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    tools_collapsed: AtomicBool,
    todos_collapsed: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tools_collapsed(&self, collapsed: bool) {
        self.tools_collapsed.store(collapsed, Ordering::SeqCst);
    }

    fn push(&self, call: SinkCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Every recorded call except scrolling, which would drown the rest.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| !matches!(call, SinkCall::Scroll))
            .cloned()
            .collect()
    }

    pub fn mount_calls(&self) -> Vec<(WidgetId, Widget, Option<WidgetId>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Mount { id, widget, after } => Some((id, widget, after)),
                _ => None,
            })
            .collect()
    }

    pub fn mounts(&self) -> Vec<(WidgetId, Widget)> {
        self.mount_calls()
            .into_iter()
            .map(|(id, widget, _)| (id, widget))
            .collect()
    }

    pub fn widgets(&self) -> Vec<Widget> {
        self.mounts().into_iter().map(|(_, widget)| widget).collect()
    }

    pub fn updates_for(&self, target: WidgetId) -> Vec<WidgetUpdate> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Update { id, update } if id == target => Some(update),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&SinkCall) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    pub fn count_widgets(&self, predicate: impl Fn(&Widget) -> bool) -> usize {
        self.widgets().iter().filter(|widget| predicate(widget)).count()
    }

    pub fn last_loading(&self) -> Option<Option<String>> {
        self.calls().into_iter().rev().find_map(|call| match call {
            SinkCall::Loading(status) => Some(status),
            _ => None,
        })
    }

    pub fn last_view(&self) -> Option<BottomView> {
        self.calls().into_iter().rev().find_map(|call| match call {
            SinkCall::View(view) => Some(view),
            _ => None,
        })
    }
}

#[async_trait]
impl PresentationSink for RecordingSink {
    async fn mount(&self, id: WidgetId, widget: Widget, after: Option<WidgetId>) {
        self.push(SinkCall::Mount { id, widget, after });
    }

    fn update(&self, id: WidgetId, update: WidgetUpdate) {
        self.push(SinkCall::Update { id, update });
    }

    fn scroll_to_bottom(&self) {
        self.push(SinkCall::Scroll);
    }

    fn tools_collapsed(&self) -> bool {
        self.tools_collapsed.load(Ordering::SeqCst)
    }

    fn todos_collapsed(&self) -> bool {
        self.todos_collapsed.load(Ordering::SeqCst)
    }

    fn set_loading(&self, status: Option<&str>) {
        self.push(SinkCall::Loading(status.map(str::to_string)));
    }

    fn set_todo_area_visible(&self, visible: bool) {
        self.push(SinkCall::TodoArea(visible));
    }

    fn show_view(&self, view: BottomView) {
        self.push(SinkCall::View(view));
    }
}

/// Polls `condition` until it holds, yielding to other tasks in between.
/// Panics after a generous deadline so a broken test fails instead of hanging.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
