//! Turn orchestration.
//!
//! [`TurnController`] owns the operation slot and the queued message. It
//! starts turns and compactions as background tasks, interrupts them, and
//! routes slash commands. Every public operation that changes the slot is
//! serialized through an async lock, and the shared state lives behind a
//! short std mutex that is never held across an await.

mod guard;
pub mod slot;
mod tasks;


use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub use slot::{OperationHandle, OperationKind, OperationOutcome, OperationSlot, OperationStatus};

use self::guard::OperationGuard;
use crate::commands::{find_command, help_text, CommandKind, CommandOutcome};
use crate::core::agent::{Agent, QuestionResult};
use crate::core::config::{Config, Plan};
use crate::core::error::CoreError;
use crate::core::gate::{ApprovalDecision, ApprovalGate, QuestionGate};
use crate::core::processor::EventProcessor;
use crate::core::sink::{PresentationSink, Widget, WidgetId, WidgetIds};
use crate::core::tool_ui::ToolUiRegistry;

pub const COMPACT_BUSY: &str = "Cannot compact while agent loop is processing. Please wait.";
pub const COMPACT_NOTHING: &str = "No conversation history to compact yet.";
pub const QUEUED_NOTICE: &str = "Message queued. It will be sent once compaction finishes.";

#[derive(Debug, Clone, Default)]
pub struct ControllerSettings {
    pub plan: Plan,
    pub auto_approve: bool,
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            plan: config.plan,
            auto_approve: config.auto_approve,
        }
    }
}

/// What [`TurnController::submit`] did with the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started,
    Queued,
    Command(CommandOutcome),
    Ignored,
}

struct ControllerState {
    slot: OperationSlot,
    queued: Option<String>,
    /// Lent to the running operation and returned by its guard.
    processor: Option<EventProcessor>,
    context_tokens: u64,
}

struct Shared {
    agent: Arc<dyn Agent>,
    sink: Arc<dyn PresentationSink>,
    tool_uis: Arc<ToolUiRegistry>,
    ids: WidgetIds,
    approvals: Arc<ApprovalGate>,
    questions: Arc<QuestionGate>,
    settings: ControllerSettings,
    state: Mutex<ControllerState>,
    ops: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<OperationStatus>,
    next_operation: AtomicU64,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_processor(&self) -> EventProcessor {
        EventProcessor::new(self.sink.clone(), self.tool_uis.clone(), self.ids.clone())
    }

    // Called with the state lock held so status updates follow slot changes
    // in order.
    fn publish_status(&self, state: &ControllerState) {
        self.status_tx.send_replace(state.slot.status());
    }

    fn start_turn_locked(self: &Arc<Self>, state: &mut ControllerState, prompt: String) -> bool {
        self.launch_locked(state, OperationKind::Turn, move |shared, guard| {
            tasks::drive_turn(shared, guard, prompt)
        })
    }

    fn start_compaction_locked(self: &Arc<Self>, state: &mut ControllerState) -> bool {
        self.launch_locked(state, OperationKind::Compaction, tasks::drive_compaction)
    }

    fn launch_locked<F, Fut>(
        self: &Arc<Self>,
        state: &mut ControllerState,
        kind: OperationKind,
        body: F,
    ) -> bool
    where
        F: FnOnce(Arc<Shared>, OperationGuard) -> Fut + Send + 'static,
        Fut: Future<Output = OperationOutcome> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            error!(?kind, "no async runtime to run the operation on");
            return false;
        };

        let id = self.next_operation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let shared = Arc::clone(self);
        let token = cancel.clone();
        // The guard is built inside the task: it locks the state, which the
        // caller holds right now.
        let task = runtime.spawn(async move {
            let guard = OperationGuard::acquire(shared.clone(), id, kind, token);
            body(shared, guard).await
        });

        state.slot = OperationSlot::new(
            kind,
            OperationHandle {
                id,
                cancel,
                task: Some(task),
            },
        );
        self.publish_status(state);
        debug!(operation = id, ?kind, "operation launched");
        true
    }
}

/// Drives turns against an [`Agent`] and reports everything through a
/// [`PresentationSink`]. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TurnController {
    shared: Arc<Shared>,
}

impl TurnController {
    pub fn new(
        agent: Arc<dyn Agent>,
        sink: Arc<dyn PresentationSink>,
        tool_uis: ToolUiRegistry,
        settings: ControllerSettings,
    ) -> Self {
        let approvals = Arc::new(ApprovalGate::new(
            sink.clone(),
            Arc::downgrade(&agent),
            settings.auto_approve,
        ));
        let questions = Arc::new(QuestionGate::new(sink.clone()));
        agent.register_callbacks(approvals.clone(), questions.clone());

        let tool_uis = Arc::new(tool_uis);
        let ids = WidgetIds::new();
        let processor = EventProcessor::new(sink.clone(), tool_uis.clone(), ids.clone());
        let (status_tx, _) = watch::channel(OperationStatus::Idle);
        let context_tokens = agent.context_tokens();

        Self {
            shared: Arc::new(Shared {
                agent,
                sink,
                tool_uis,
                ids,
                approvals,
                questions,
                settings,
                state: Mutex::new(ControllerState {
                    slot: OperationSlot::Idle,
                    queued: None,
                    processor: Some(processor),
                    context_tokens,
                }),
                ops: tokio::sync::Mutex::new(()),
                status_tx,
                next_operation: AtomicU64::new(0),
            }),
        }
    }

    /// Handles one line of user input.
    ///
    /// Slash commands run immediately in every state; a running turn is
    /// interrupted first. While compacting, other text replaces any queued
    /// message. Anything else starts a turn.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SubmitOutcome::Ignored;
        }

        let _ops = self.shared.ops.lock().await;
        let command = find_command(text);

        let status = {
            let mut state = self.shared.lock_state();
            let status = state.slot.status();
            if status == OperationStatus::Compacting
                && command.is_none()
                && state.queued.replace(text.to_string()).is_some()
            {
                debug!("replacing previously queued message");
            }
            status
        };

        match status {
            OperationStatus::Compacting if command.is_none() => {
                info!("message queued behind compaction");
                self.post(Widget::Notice {
                    message: QUEUED_NOTICE.to_string(),
                })
                .await;
                return SubmitOutcome::Queued;
            }
            OperationStatus::Running => {
                self.interrupt_locked().await;
            }
            OperationStatus::Compacting | OperationStatus::Idle => {}
        }

        if let Some(command) = command {
            let outcome = self.run_command_locked(command.kind, text).await;
            return SubmitOutcome::Command(outcome);
        }

        let mut state = self.shared.lock_state();
        if self.shared.start_turn_locked(&mut state, text.to_string()) {
            SubmitOutcome::Started
        } else {
            SubmitOutcome::Ignored
        }
    }

    /// Cancels the running operation and waits for its cleanup. Returns
    /// `false` when nothing was running.
    pub async fn interrupt(&self) -> bool {
        let _ops = self.shared.ops.lock().await;
        self.interrupt_locked().await
    }

    async fn interrupt_locked(&self) -> bool {
        let (kind, task) = {
            let mut state = self.shared.lock_state();
            let Some(kind) = state.slot.kind() else {
                return false;
            };
            let Some(handle) = state.slot.handle_mut() else {
                return false;
            };
            handle.cancel.cancel();
            (kind, handle.task.take())
        };
        info!(?kind, "interrupting operation");

        let outcome = match task {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    if err.is_panic() {
                        error!(?kind, "operation panicked");
                    }
                    OperationOutcome::Cancelled
                }
            },
            None => {
                self.wait_until_idle().await;
                OperationOutcome::Cancelled
            }
        };

        if kind == OperationKind::Turn && outcome == OperationOutcome::Cancelled {
            self.post(Widget::Interrupted).await;
        }
        debug!(?kind, ?outcome, "interrupt complete");
        true
    }

    /// Starts compacting the conversation in the background.
    pub async fn compact(&self) -> Result<(), CoreError> {
        let _ops = self.shared.ops.lock().await;
        self.compact_locked()
    }

    fn compact_locked(&self) -> Result<(), CoreError> {
        let mut state = self.shared.lock_state();
        if !state.slot.is_idle() {
            return Err(CoreError::recoverable(COMPACT_BUSY));
        }
        if self.shared.agent.history_len() <= 1 {
            return Err(CoreError::recoverable(COMPACT_NOTHING));
        }
        if !self.shared.start_compaction_locked(&mut state) {
            return Err(CoreError::Unexpected(
                "no async runtime to run the compaction on".to_string(),
            ));
        }
        Ok(())
    }

    async fn run_command_locked(&self, kind: CommandKind, input: &str) -> CommandOutcome {
        self.post(Widget::User {
            content: input.to_string(),
        })
        .await;
        debug!(?kind, "running command");

        let notice = match kind {
            CommandKind::Help => help_text(),
            CommandKind::Compact => {
                if let Err(err) = self.compact_locked() {
                    self.post(Widget::Error {
                        message: err.user_message(self.shared.settings.plan),
                    })
                    .await;
                }
                return CommandOutcome::Continue;
            }
            CommandKind::Status => self.status_report(),
            CommandKind::AutoApprove => {
                if self.toggle_auto_approve() {
                    "Auto-approve enabled.".to_string()
                } else {
                    "Auto-approve disabled.".to_string()
                }
            }
            CommandKind::Exit => return CommandOutcome::Exit,
        };

        self.post(Widget::Notice { message: notice }).await;
        CommandOutcome::Continue
    }

    fn status_report(&self) -> String {
        let state = self.shared.lock_state();
        format!(
            "Context: {} tokens\nAuto-approve: {}\nOperation: {}",
            state.context_tokens,
            if self.auto_approve() { "on" } else { "off" },
            state.slot.status(),
        )
    }

    /// Mounts a widget outside any operation.
    async fn post(&self, widget: Widget) -> WidgetId {
        let id = self.shared.ids.next();
        self.shared.sink.mount(id, widget, None).await;
        self.shared.sink.scroll_to_bottom();
        id
    }

    /// Answers the pending approval request.
    pub fn resolve_approval(&self, decision: ApprovalDecision) -> bool {
        self.shared.approvals.resolve(decision)
    }

    pub fn pending_approval(&self) -> Option<String> {
        self.shared.approvals.pending_tool()
    }

    pub fn answer_question(&self, answers: Vec<String>) -> bool {
        self.shared.questions.resolve(QuestionResult::answered(answers))
    }

    pub fn question_pending(&self) -> bool {
        self.shared.questions.is_pending()
    }

    /// Cancels the pending question and interrupts the turn that asked it.
    pub async fn cancel_question(&self) -> bool {
        let _ops = self.shared.ops.lock().await;
        let resolved = self.shared.questions.resolve(QuestionResult::cancelled());
        self.interrupt_locked().await;
        resolved
    }

    pub fn auto_approve(&self) -> bool {
        self.shared.approvals.auto_approve()
    }

    /// Flips global auto-approve and returns the new value.
    pub fn toggle_auto_approve(&self) -> bool {
        let enabled = !self.auto_approve();
        self.shared.approvals.set_auto_approve(enabled);
        enabled
    }

    pub fn status(&self) -> OperationStatus {
        self.shared.lock_state().slot.status()
    }

    pub fn queued_message(&self) -> Option<String> {
        self.shared.lock_state().queued.clone()
    }

    pub fn context_tokens(&self) -> u64 {
        self.shared.lock_state().context_tokens
    }

    pub fn subscribe_status(&self) -> watch::Receiver<OperationStatus> {
        self.shared.status_tx.subscribe()
    }

    pub async fn wait_until_idle(&self) {
        let mut status = self.subscribe_status();
        let _ = status
            .wait_for(|status| *status == OperationStatus::Idle)
            .await;
    }
}
