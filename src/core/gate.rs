//! Human-in-the-loop gates.
//!
//! The agent backend suspends inside [`ApprovalGate::request_approval`] or
//! [`QuestionGate::request_user_input`] until the front end resolves the
//! pending request. Each gate holds at most one outstanding request; the
//! result travels over a oneshot channel. If the suspended request is
//! dropped because its turn was cancelled, the slot is cleared and the input
//! view comes back.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::core::agent::{
    Agent, ApprovalCallback, ApprovalResponse, QuestionArgs, QuestionResult, ToolPermission,
    UserInputCallback,
};
use crate::core::sink::{BottomView, PresentationSink};
use crate::core::tagged_text::{cancellation_message, CancellationReason};

/// How the user answered an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Granted,
    /// Grant and stop asking for this tool.
    GrantedAlways { save_permanently: bool },
    /// Grant and turn on global auto-approve.
    GrantedAutoApprove,
    Rejected,
}

struct Pending<T> {
    id: u64,
    label: String,
    tx: oneshot::Sender<T>,
}

/// Single-slot rendezvous between a suspended request and its resolver.
struct GateSlot<T> {
    pending: Mutex<Option<Pending<T>>>,
    next_id: AtomicU64,
}

impl<T> GateSlot<T> {
    fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, label: &str) -> (u64, oneshot::Receiver<T>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let previous = self.lock().replace(Pending {
            id,
            label: label.to_string(),
            tx,
        });
        if let Some(previous) = previous {
            warn!(label = %previous.label, "replacing an unanswered request");
        }
        (id, rx)
    }

    fn take(&self) -> Option<Pending<T>> {
        self.lock().take()
    }

    /// Clears request `id` if it is still pending. Returns `false` when a
    /// newer request has taken the slot.
    fn release(&self, id: u64) -> bool {
        let mut pending = self.lock();
        match pending.as_ref() {
            Some(p) if p.id != id => false,
            Some(_) => {
                *pending = None;
                true
            }
            None => true,
        }
    }

    fn pending_label(&self) -> Option<String> {
        self.lock().as_ref().map(|p| p.label.clone())
    }
}

/// Clears the slot and restores the input view when the request ends,
/// whether it was answered or dropped.
struct RequestGuard<'a, T> {
    slot: &'a GateSlot<T>,
    id: u64,
    sink: &'a dyn PresentationSink,
}

impl<T> Drop for RequestGuard<'_, T> {
    fn drop(&mut self) {
        if self.slot.release(self.id) {
            self.sink.show_view(BottomView::Input);
        }
    }
}

type ApprovalReply = (ApprovalResponse, Option<String>);

pub struct ApprovalGate {
    sink: Arc<dyn PresentationSink>,
    agent: Weak<dyn Agent>,
    auto_approve: AtomicBool,
    slot: GateSlot<ApprovalReply>,
}

impl ApprovalGate {
    pub fn new(
        sink: Arc<dyn PresentationSink>,
        agent: Weak<dyn Agent>,
        auto_approve: bool,
    ) -> Self {
        Self {
            sink,
            agent,
            auto_approve: AtomicBool::new(auto_approve),
            slot: GateSlot::new(),
        }
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve.load(Ordering::SeqCst)
    }

    pub fn set_auto_approve(&self, enabled: bool) {
        self.auto_approve.store(enabled, Ordering::SeqCst);
        info!(enabled, "auto-approve changed");
    }

    /// Tool name of the request awaiting a decision, if any.
    pub fn pending_tool(&self) -> Option<String> {
        self.slot.pending_label()
    }

    // Auto-approve only covers tools the agent currently has enabled.
    fn bypasses(&self, tool: &str) -> bool {
        if !self.auto_approve() {
            return false;
        }
        match self.agent.upgrade() {
            Some(agent) => agent.active_tools().iter().any(|active| active == tool),
            None => false,
        }
    }

    /// Resolves the pending request. Returns `false` when nothing was pending.
    pub fn resolve(&self, decision: ApprovalDecision) -> bool {
        let Some(pending) = self.slot.take() else {
            debug!(?decision, "no approval pending");
            return false;
        };
        let tool = pending.label;

        let reply = match decision {
            ApprovalDecision::Granted => (ApprovalResponse::Yes, None),
            ApprovalDecision::GrantedAlways { save_permanently } => {
                self.persist_always(&tool, save_permanently);
                (ApprovalResponse::Yes, None)
            }
            ApprovalDecision::GrantedAutoApprove => {
                self.set_auto_approve(true);
                (ApprovalResponse::Yes, None)
            }
            ApprovalDecision::Rejected => (
                ApprovalResponse::No,
                Some(cancellation_message(CancellationReason::OperationCancelled).to_string()),
            ),
        };

        info!(%tool, ?decision, "approval resolved");
        if pending.tx.send(reply).is_err() {
            debug!(%tool, "approval requester went away");
        }
        true
    }

    fn persist_always(&self, tool: &str, save_permanently: bool) {
        let Some(agent) = self.agent.upgrade() else {
            warn!(%tool, "agent dropped before permission could be stored");
            return;
        };
        if let Err(err) = agent.set_tool_permission(tool, ToolPermission::Always, save_permanently)
        {
            warn!(%tool, error = %err, "failed to store tool permission");
        }
    }
}

#[async_trait]
impl ApprovalCallback for ApprovalGate {
    async fn request_approval(
        &self,
        tool: &str,
        args: &Value,
        tool_call_id: &str,
    ) -> (ApprovalResponse, Option<String>) {
        if self.bypasses(tool) {
            debug!(%tool, %tool_call_id, "auto-approved");
            return (ApprovalResponse::Yes, None);
        }

        let (id, rx) = self.slot.open(tool);
        let _guard = RequestGuard {
            slot: &self.slot,
            id,
            sink: self.sink.as_ref(),
        };
        info!(%tool, %tool_call_id, "waiting for approval");
        self.sink.show_view(BottomView::Approval {
            tool: tool.to_string(),
            args: args.clone(),
        });

        // A closed channel means a newer request displaced this one.
        rx.await.unwrap_or_else(|_| {
            (
                ApprovalResponse::No,
                Some(cancellation_message(CancellationReason::ToolInterrupted).to_string()),
            )
        })
    }
}

pub struct QuestionGate {
    sink: Arc<dyn PresentationSink>,
    slot: GateSlot<QuestionResult>,
}

impl QuestionGate {
    pub fn new(sink: Arc<dyn PresentationSink>) -> Self {
        Self {
            sink,
            slot: GateSlot::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot.pending_label().is_some()
    }

    /// Delivers `result` to the pending question. Returns `false` when no
    /// question was pending.
    pub fn resolve(&self, result: QuestionResult) -> bool {
        let Some(pending) = self.slot.take() else {
            debug!("no question pending");
            return false;
        };
        info!(cancelled = result.cancelled, "question resolved");
        if pending.tx.send(result).is_err() {
            debug!("question requester went away");
        }
        true
    }
}

#[async_trait]
impl UserInputCallback for QuestionGate {
    async fn request_user_input(&self, args: QuestionArgs) -> QuestionResult {
        let label = args
            .questions
            .first()
            .map(|q| q.question.clone())
            .unwrap_or_default();
        let (id, rx) = self.slot.open(&label);
        let _guard = RequestGuard {
            slot: &self.slot,
            id,
            sink: self.sink.as_ref(),
        };
        info!(questions = args.questions.len(), "waiting for user input");
        self.sink.show_view(BottomView::Question { args });

        rx.await.unwrap_or_else(|_| QuestionResult::cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scripted::{PermissionChange, ScriptedAgent};
    use crate::utils::test_utils::{wait_until, RecordingSink, SinkCall};
    use serde_json::json;

    fn setup(
        active: &[&str],
        auto_approve: bool,
    ) -> (Arc<ScriptedAgent>, Arc<RecordingSink>, Arc<ApprovalGate>) {
        let agent = Arc::new(ScriptedAgent::new().with_active_tools(active.iter().copied()));
        let sink = Arc::new(RecordingSink::new());
        let dyn_agent: Arc<dyn Agent> = agent.clone();
        let gate = Arc::new(ApprovalGate::new(
            sink.clone(),
            Arc::downgrade(&dyn_agent),
            auto_approve,
        ));
        (agent, sink, gate)
    }

    fn spawn_request(
        gate: &Arc<ApprovalGate>,
        tool: &'static str,
    ) -> tokio::task::JoinHandle<(ApprovalResponse, Option<String>)> {
        let gate = gate.clone();
        tokio::spawn(async move {
            gate.request_approval(tool, &json!({"command": "rm -rf target"}), "c1")
                .await
        })
    }

    #[tokio::test]
    async fn granted_resolves_yes_and_restores_input() {
        let (_agent, sink, gate) = setup(&["bash"], false);
        let request = spawn_request(&gate, "bash");

        wait_until(|| gate.pending_tool().is_some()).await;
        assert!(matches!(
            sink.last_view(),
            Some(BottomView::Approval { ref tool, .. }) if tool == "bash"
        ));

        assert!(gate.resolve(ApprovalDecision::Granted));
        assert_eq!(request.await.unwrap(), (ApprovalResponse::Yes, None));
        assert_eq!(sink.last_view(), Some(BottomView::Input));
        assert_eq!(gate.pending_tool(), None);
    }

    #[tokio::test]
    async fn rejected_returns_cancellation_feedback() {
        let (_agent, _sink, gate) = setup(&["bash"], false);
        let request = spawn_request(&gate, "bash");

        wait_until(|| gate.pending_tool().is_some()).await;
        gate.resolve(ApprovalDecision::Rejected);

        let (response, feedback) = request.await.unwrap();
        assert_eq!(response, ApprovalResponse::No);
        assert_eq!(
            feedback.as_deref(),
            Some("<user_cancellation>User cancelled the operation.</user_cancellation>")
        );
    }

    #[tokio::test]
    async fn granted_always_persists_before_resolving() {
        let (agent, _sink, gate) = setup(&["bash"], false);
        let request = spawn_request(&gate, "bash");

        wait_until(|| gate.pending_tool().is_some()).await;
        gate.resolve(ApprovalDecision::GrantedAlways {
            save_permanently: true,
        });

        assert_eq!(request.await.unwrap(), (ApprovalResponse::Yes, None));
        assert_eq!(
            agent.permissions(),
            vec![PermissionChange {
                tool: "bash".into(),
                permission: ToolPermission::Always,
                save_permanently: true,
            }]
        );
    }

    #[tokio::test]
    async fn granted_always_still_approves_when_persisting_fails() {
        let (agent, _sink, gate) = setup(&["bash"], false);
        agent.fail_permission_changes("config is read-only");
        let request = spawn_request(&gate, "bash");

        wait_until(|| gate.pending_tool().is_some()).await;
        gate.resolve(ApprovalDecision::GrantedAlways {
            save_permanently: false,
        });
        assert_eq!(request.await.unwrap().0, ApprovalResponse::Yes);
    }

    #[tokio::test]
    async fn granted_auto_approve_skips_later_prompts() {
        let (_agent, sink, gate) = setup(&["bash"], false);
        let request = spawn_request(&gate, "bash");

        wait_until(|| gate.pending_tool().is_some()).await;
        gate.resolve(ApprovalDecision::GrantedAutoApprove);
        assert_eq!(request.await.unwrap().0, ApprovalResponse::Yes);
        assert!(gate.auto_approve());

        let approval_views =
            || sink.count(|call| matches!(call, SinkCall::View(BottomView::Approval { .. })));
        let before = approval_views();
        let second = gate.request_approval("bash", &json!({}), "c2").await;
        assert_eq!(second, (ApprovalResponse::Yes, None));
        assert_eq!(approval_views(), before);
    }

    #[tokio::test]
    async fn auto_approve_refused_for_inactive_tool() {
        let (_agent, sink, gate) = setup(&["read_file"], true);
        let request = spawn_request(&gate, "write_file");

        wait_until(|| gate.pending_tool().is_some()).await;
        assert_eq!(gate.pending_tool().as_deref(), Some("write_file"));
        assert!(matches!(
            sink.last_view(),
            Some(BottomView::Approval { ref tool, .. }) if tool == "write_file"
        ));

        gate.resolve(ApprovalDecision::Rejected);
        assert_eq!(request.await.unwrap().0, ApprovalResponse::No);
    }

    #[tokio::test]
    async fn auto_approve_bypasses_active_tool() {
        let (_agent, sink, gate) = setup(&["read_file"], true);
        let reply = gate.request_approval("read_file", &json!({}), "c1").await;
        assert_eq!(reply, (ApprovalResponse::Yes, None));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn displaced_request_is_rejected_as_interrupted() {
        let (_agent, sink, gate) = setup(&[], false);
        let first = spawn_request(&gate, "bash");
        wait_until(|| gate.pending_tool().as_deref() == Some("bash")).await;

        let second = spawn_request(&gate, "write_file");
        wait_until(|| gate.pending_tool().as_deref() == Some("write_file")).await;

        let (response, feedback) = first.await.unwrap();
        assert_eq!(response, ApprovalResponse::No);
        assert_eq!(
            feedback,
            Some(cancellation_message(CancellationReason::ToolInterrupted).to_string())
        );

        // The displaced request leaves the newer prompt in place.
        assert_eq!(gate.pending_tool().as_deref(), Some("write_file"));
        assert!(matches!(
            sink.last_view(),
            Some(BottomView::Approval { ref tool, .. }) if tool == "write_file"
        ));
        gate.resolve(ApprovalDecision::Granted);
        assert_eq!(second.await.unwrap(), (ApprovalResponse::Yes, None));
    }

    #[tokio::test]
    async fn dropped_request_clears_slot_and_restores_input() {
        let (_agent, sink, gate) = setup(&["bash"], false);
        let request = spawn_request(&gate, "bash");

        wait_until(|| gate.pending_tool().is_some()).await;
        request.abort();
        let _ = request.await;

        assert_eq!(gate.pending_tool(), None);
        assert_eq!(sink.last_view(), Some(BottomView::Input));
        assert!(!gate.resolve(ApprovalDecision::Granted));
    }

    #[tokio::test]
    async fn question_answers_and_cancellation() {
        let sink = Arc::new(RecordingSink::new());
        let gate = Arc::new(QuestionGate::new(sink.clone()));

        let asking = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request_user_input(QuestionArgs::single("Which branch?"))
                    .await
            })
        };
        wait_until(|| gate.is_pending()).await;
        assert!(matches!(sink.last_view(), Some(BottomView::Question { .. })));
        gate.resolve(QuestionResult::answered(vec!["main".into()]));
        assert_eq!(
            asking.await.unwrap(),
            QuestionResult::answered(vec!["main".into()])
        );

        let asking = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.request_user_input(QuestionArgs::single("Why?")).await })
        };
        wait_until(|| gate.is_pending()).await;
        gate.resolve(QuestionResult::cancelled());
        assert!(asking.await.unwrap().cancelled);
        assert_eq!(sink.last_view(), Some(BottomView::Input));
        assert!(!gate.resolve(QuestionResult::cancelled()));
    }
}
