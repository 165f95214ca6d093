use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{error, info, warn};

use super::guard::OperationGuard;
use super::slot::OperationOutcome;
use super::Shared;
use crate::core::error::{AgentError, CoreError};
use crate::core::processor::COMPACTION_INTERRUPTED;
use crate::core::sink::Widget;

const COMPACTING_STATUS: &str = "Compacting conversation";

/// Drives one turn: streams agent events into the processor until the
/// stream ends, fails, or the operation is cancelled.
pub(super) async fn drive_turn(
    shared: Arc<Shared>,
    mut guard: OperationGuard,
    prompt: String,
) -> OperationOutcome {
    let id = guard.id();
    let cancel = guard.cancel_token();
    let plan = shared.settings.plan;
    info!(operation = id, "turn started");

    let processor = guard.processor();
    processor
        .mount(
            Widget::User {
                content: prompt.clone(),
            },
            None,
        )
        .await;
    processor.start_loading();

    let mut stream = shared.agent.act(prompt);
    let outcome = loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break OperationOutcome::Cancelled,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(event)) => processor.handle_event(event).await,
            Some(Err(err)) => break OperationOutcome::from_error(CoreError::from(err)),
            None => break OperationOutcome::Completed,
        }
    };
    // Dropping the stream releases any gate the agent is suspended on.
    drop(stream);

    if let OperationOutcome::Failed(err) = &outcome {
        error!(operation = id, error = %err, "turn failed");
        processor.finalize_streaming();
        processor.stop_all_tool_calls(false);
        processor.stop_loading();
        processor
            .mount(
                Widget::Error {
                    message: err.user_message(plan),
                },
                None,
            )
            .await;
    }

    info!(operation = id, ?outcome, "turn finished");
    outcome
}

/// Runs a compaction and resolves the compaction record with its result.
pub(super) async fn drive_compaction(
    shared: Arc<Shared>,
    mut guard: OperationGuard,
) -> OperationOutcome {
    let id = guard.id();
    let cancel = guard.cancel_token();
    let plan = shared.settings.plan;
    let old_tokens = shared.agent.context_tokens();
    info!(operation = id, old_tokens, "compaction started");

    let processor = guard.processor();
    processor.begin_compaction().await;
    processor.start_loading_with(COMPACTING_STATUS);

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = shared.agent.compact() => Some(result),
    };

    let outcome = match result {
        None => {
            processor.fail_compaction(COMPACTION_INTERRUPTED);
            OperationOutcome::Cancelled
        }
        Some(Ok(())) => {
            let new_tokens = shared.agent.context_tokens();
            processor.complete_compaction(old_tokens, new_tokens);
            info!(operation = id, old_tokens, new_tokens, "compaction finished");
            OperationOutcome::Completed
        }
        Some(Err(AgentError::Cancelled)) => {
            processor.fail_compaction(COMPACTION_INTERRUPTED);
            OperationOutcome::Cancelled
        }
        Some(Err(err)) => {
            let err = CoreError::from(err);
            warn!(operation = id, error = %err, "compaction failed");
            processor.fail_compaction(&err.user_message(plan));
            OperationOutcome::Failed(err)
        }
    };

    if outcome == OperationOutcome::Completed {
        guard.mark_succeeded();
    }
    outcome
}
