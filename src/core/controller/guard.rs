use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::slot::{OperationKind, OperationSlot};
use super::Shared;
use crate::core::processor::EventProcessor;

/// Owns the event processor for the lifetime of one operation and puts the
/// controller back in order when dropped, however the operation ended.
pub(super) struct OperationGuard {
    shared: Arc<Shared>,
    id: u64,
    kind: OperationKind,
    cancel: CancellationToken,
    processor: Option<EventProcessor>,
    succeeded: bool,
}

impl OperationGuard {
    pub(super) fn acquire(
        shared: Arc<Shared>,
        id: u64,
        kind: OperationKind,
        cancel: CancellationToken,
    ) -> Self {
        let processor = shared.lock_state().processor.take();
        Self {
            shared,
            id,
            kind,
            cancel,
            processor,
            succeeded: false,
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub(super) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(super) fn processor(&mut self) -> &mut EventProcessor {
        self.processor
            .get_or_insert_with(|| self.shared.new_processor())
    }

    /// Records that a compaction finished, which allows the queued message
    /// to be promoted on drop.
    pub(super) fn mark_succeeded(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut processor = self
            .processor
            .take()
            .unwrap_or_else(|| self.shared.new_processor());
        processor.finalize_streaming();
        processor.stop_all_tool_calls(false);
        processor.stop_compaction();
        processor.stop_loading();

        let mut state = self.shared.lock_state();
        state.processor = Some(processor);
        state.context_tokens = self.shared.agent.context_tokens();

        if state.slot.id() == Some(self.id) {
            state.slot = OperationSlot::Idle;
        }

        if self.kind == OperationKind::Compaction {
            match state.queued.take() {
                Some(message)
                    if self.succeeded && !self.cancel.is_cancelled() && state.slot.is_idle() =>
                {
                    info!(operation = self.id, "starting queued message after compaction");
                    self.shared.start_turn_locked(&mut state, message);
                }
                Some(message) => {
                    debug!(
                        operation = self.id,
                        chars = message.chars().count(),
                        "discarding queued message"
                    );
                }
                None => {}
            }
        }

        self.shared.publish_status(&state);
        debug!(operation = self.id, kind = ?self.kind, "operation cleaned up");
    }
}
