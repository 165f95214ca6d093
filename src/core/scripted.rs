//! In-process agent backend that replays prepared scripts.
//!
//! Each call to [`Agent::act`] consumes the next queued turn script, or echoes
//! the prompt back when none is queued. Compactions consume
//! [`CompactScript`]s the same way. The demo binary and the test suite both
//! drive the controller through it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::core::agent::{
    Agent, ApprovalCallback, ApprovalResponse, EventStream, QuestionArgs, QuestionResult,
    ToolPermission, UserInputCallback,
};
use crate::core::error::AgentError;
use crate::core::events::{AgentEvent, ToolCallEvent, ToolResultEvent};
use crate::core::tagged_text::{cancellation_message, CancellationReason};

pub const QUESTION_TOOL: &str = "ask_user_question";
const SYSTEM_PROMPT_TOKENS: u64 = 120;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(AgentEvent),
    /// Ends the stream with an error.
    Fail(AgentError),
    /// Asks for approval of `call`, then reports the tool as run with
    /// `output` or as skipped with the returned feedback.
    Approve { call: ToolCallEvent, output: Value },
    /// Asks the user a question through the question tool.
    Ask {
        tool_call_id: String,
        args: QuestionArgs,
    },
    /// Never yields again; only cancellation ends the turn.
    Stall,
    Sleep(Duration),
}

#[derive(Debug, Clone)]
pub enum CompactScript {
    Succeed { new_tokens: u64 },
    Fail(String),
    Stall,
    /// Waits for `release` to be notified, then behaves like `then`.
    Held {
        release: Arc<Notify>,
        then: Box<CompactScript>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionChange {
    pub tool: String,
    pub permission: ToolPermission,
    pub save_permanently: bool,
}

#[derive(Debug)]
struct ScriptState {
    turns: VecDeque<Vec<ScriptStep>>,
    compactions: VecDeque<CompactScript>,
    prompts: Vec<String>,
    history_len: usize,
    context_tokens: u64,
    active_tools: Vec<String>,
    permissions: Vec<PermissionChange>,
    permission_error: Option<String>,
}

#[derive(Default)]
struct Callbacks {
    approval: Option<Arc<dyn ApprovalCallback>>,
    user_input: Option<Arc<dyn UserInputCallback>>,
}

pub struct ScriptedAgent {
    state: Mutex<ScriptState>,
    callbacks: Mutex<Callbacks>,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState {
                turns: VecDeque::new(),
                compactions: VecDeque::new(),
                prompts: Vec::new(),
                history_len: 1,
                context_tokens: SYSTEM_PROMPT_TOKENS,
                active_tools: Vec::new(),
                permissions: Vec::new(),
                permission_error: None,
            }),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    pub fn with_active_tools<I, S>(self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_active_tools(tools);
        self
    }

    pub fn with_history(self, history_len: usize) -> Self {
        self.state().history_len = history_len;
        self
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_turn(&self, steps: Vec<ScriptStep>) {
        self.state().turns.push_back(steps);
    }

    /// Withdraws the most recently pushed turn script that no turn used.
    pub fn take_last_turn(&self) -> Option<Vec<ScriptStep>> {
        self.state().turns.pop_back()
    }

    pub fn queued_turns(&self) -> usize {
        self.state().turns.len()
    }

    pub fn push_compaction(&self, script: CompactScript) {
        self.state().compactions.push_back(script);
    }

    pub fn set_active_tools<I, S>(&self, tools: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().active_tools = tools.into_iter().map(Into::into).collect();
    }

    /// Makes the next permission changes fail with `reason`.
    pub fn fail_permission_changes(&self, reason: impl Into<String>) {
        self.state().permission_error = Some(reason.into());
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state().prompts.clone()
    }

    pub fn permissions(&self) -> Vec<PermissionChange> {
        self.state().permissions.clone()
    }

    fn echo_script(prompt: &str) -> Vec<ScriptStep> {
        vec![
            ScriptStep::Emit(AgentEvent::reasoning("Repeating the message back.")),
            ScriptStep::Emit(AgentEvent::assistant(format!("You said: {prompt}"))),
        ]
    }
}

fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

struct Playback {
    steps: VecDeque<ScriptStep>,
    approval: Option<Arc<dyn ApprovalCallback>>,
    user_input: Option<Arc<dyn UserInputCallback>>,
}

impl Playback {
    async fn next_item(&mut self) -> Option<Result<AgentEvent, AgentError>> {
        loop {
            let step = self.steps.pop_front()?;
            match step {
                ScriptStep::Emit(event) => return Some(Ok(event)),
                ScriptStep::Fail(error) => {
                    self.steps.clear();
                    return Some(Err(error));
                }
                ScriptStep::Approve { call, output } => {
                    let event = self.approve(call, output).await;
                    return Some(Ok(self.end_if_cancelled(event)));
                }
                ScriptStep::Ask { tool_call_id, args } => {
                    let event = self.ask(tool_call_id, args).await;
                    return Some(Ok(self.end_if_cancelled(event)));
                }
                ScriptStep::Stall => std::future::pending::<()>().await,
                ScriptStep::Sleep(duration) => tokio::time::sleep(duration).await,
            }
        }
    }

    // A user cancellation ends the turn once its result is reported.
    fn end_if_cancelled(&mut self, event: AgentEvent) -> AgentEvent {
        if let AgentEvent::ToolResult(result) = &event {
            if result.is_user_cancellation() {
                debug!(tool = %result.tool_name, "user cancelled, ending turn");
                self.steps.clear();
            }
        }
        event
    }

    async fn approve(&self, call: ToolCallEvent, output: Value) -> AgentEvent {
        let (response, feedback) = match &self.approval {
            Some(callback) => {
                callback
                    .request_approval(&call.tool_name, &call.args, &call.tool_call_id)
                    .await
            }
            None => {
                warn!(tool = %call.tool_name, "no approval handler registered");
                (
                    ApprovalResponse::No,
                    Some(cancellation_message(CancellationReason::ToolNoResponse).to_string()),
                )
            }
        };
        let result = match response {
            ApprovalResponse::Yes => {
                ToolResultEvent::success(call.tool_call_id, call.tool_name, output)
            }
            ApprovalResponse::No => {
                let reason = feedback.unwrap_or_else(|| {
                    cancellation_message(CancellationReason::ToolSkipped).to_string()
                });
                ToolResultEvent::skipped(call.tool_call_id, call.tool_name, Some(reason))
            }
        };
        AgentEvent::ToolResult(result)
    }

    async fn ask(&self, tool_call_id: String, args: QuestionArgs) -> AgentEvent {
        let answer = match &self.user_input {
            Some(callback) => callback.request_user_input(args).await,
            None => {
                warn!("no user input handler registered");
                QuestionResult::cancelled()
            }
        };
        let result = if answer.cancelled {
            let reason = cancellation_message(CancellationReason::ToolSkipped).to_string();
            ToolResultEvent::skipped(tool_call_id, QUESTION_TOOL, Some(reason))
        } else {
            ToolResultEvent::success(tool_call_id, QUESTION_TOOL, json!(answer.answers))
        };
        AgentEvent::ToolResult(result)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn act(&self, prompt: String) -> EventStream {
        let steps = {
            let mut state = self.state();
            let steps = state
                .turns
                .pop_front()
                .unwrap_or_else(|| Self::echo_script(&prompt));
            let produced: u64 = steps
                .iter()
                .filter_map(|step| match step {
                    ScriptStep::Emit(AgentEvent::Assistant { content }) => {
                        Some(estimate_tokens(content))
                    }
                    _ => None,
                })
                .sum();
            state.context_tokens += estimate_tokens(&prompt) + produced;
            state.history_len += 2;
            state.prompts.push(prompt);
            steps
        };
        debug!(steps = steps.len(), "starting scripted turn");

        let callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        let playback = Playback {
            steps: steps.into(),
            approval: callbacks.approval.clone(),
            user_input: callbacks.user_input.clone(),
        };
        drop(callbacks);

        stream::unfold(playback, |mut playback| async move {
            let item = playback.next_item().await?;
            Some((item, playback))
        })
        .boxed()
    }

    async fn compact(&self) -> Result<(), AgentError> {
        let mut script = self
            .state()
            .compactions
            .pop_front()
            .unwrap_or(CompactScript::Succeed {
                new_tokens: SYSTEM_PROMPT_TOKENS,
            });

        loop {
            match script {
                CompactScript::Succeed { new_tokens } => {
                    let mut state = self.state();
                    state.context_tokens = new_tokens;
                    state.history_len = 2;
                    return Ok(());
                }
                CompactScript::Fail(message) => return Err(AgentError::Backend(message)),
                CompactScript::Stall => return std::future::pending().await,
                CompactScript::Held { release, then } => {
                    release.notified().await;
                    script = *then;
                }
            }
        }
    }

    fn context_tokens(&self) -> u64 {
        self.state().context_tokens
    }

    fn history_len(&self) -> usize {
        self.state().history_len
    }

    fn active_tools(&self) -> Vec<String> {
        self.state().active_tools.clone()
    }

    fn set_tool_permission(
        &self,
        tool: &str,
        permission: ToolPermission,
        save_permanently: bool,
    ) -> Result<(), AgentError> {
        let mut state = self.state();
        if let Some(reason) = state.permission_error.clone() {
            return Err(AgentError::Permission {
                tool: tool.to_string(),
                reason,
            });
        }
        state.permissions.push(PermissionChange {
            tool: tool.to_string(),
            permission,
            save_permanently,
        });
        Ok(())
    }

    fn register_callbacks(
        &self,
        approval: Arc<dyn ApprovalCallback>,
        user_input: Arc<dyn UserInputCallback>,
    ) {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        callbacks.approval = Some(approval);
        callbacks.user_input = Some(user_input);
    }
}
