//! Line-oriented front end.
//!
//! Reads stdin line by line and forwards input to a [`TurnController`] that
//! drives a [`ScriptedAgent`]. Output is plain text on stdout.

use std::collections::HashMap;
use std::error::Error;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::commands::CommandOutcome;
use crate::core::agent::QuestionArgs;
use crate::core::config::Config;
use crate::core::controller::{ControllerSettings, SubmitOutcome, TurnController};
use crate::core::events::{AgentEvent, ToolCallEvent};
use crate::core::gate::ApprovalDecision;
use crate::core::scripted::{ScriptStep, ScriptedAgent};
use crate::core::sink::{BottomView, PresentationSink, Widget, WidgetId, WidgetUpdate};
use crate::core::tool_ui::ToolUiRegistry;

const DEMO_TOOLS: [&str; 2] = ["read_file", "grep"];

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplInput {
    Interrupt,
    Decide(ApprovalDecision),
    Answer(String),
    CancelQuestion,
    /// `!command`: script a turn that asks to run a shell command.
    Shell(String),
    /// `?question`: script a turn that asks the user something.
    Ask(String),
    Message(String),
    Unknown(String),
}

pub fn parse_line(line: &str) -> ReplInput {
    let trimmed = line.trim();
    if let Some(control) = trimmed.strip_prefix(':') {
        let (verb, rest) = control
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((control, ""));
        return match verb {
            "interrupt" => ReplInput::Interrupt,
            "approve" => ReplInput::Decide(ApprovalDecision::Granted),
            "always" => ReplInput::Decide(ApprovalDecision::GrantedAlways {
                save_permanently: rest == "save",
            }),
            "auto" => ReplInput::Decide(ApprovalDecision::GrantedAutoApprove),
            "reject" => ReplInput::Decide(ApprovalDecision::Rejected),
            "answer" => ReplInput::Answer(rest.to_string()),
            "cancel" => ReplInput::CancelQuestion,
            _ => ReplInput::Unknown(trimmed.to_string()),
        };
    }
    if let Some(command) = trimmed.strip_prefix('!') {
        return ReplInput::Shell(command.trim().to_string());
    }
    if let Some(question) = trimmed.strip_prefix('?') {
        return ReplInput::Ask(question.trim().to_string());
    }
    ReplInput::Message(line.to_string())
}

fn shell_script(command: &str) -> Vec<ScriptStep> {
    let call = ToolCallEvent::new("call-bash", "bash", json!({ "command": command }));
    vec![
        ScriptStep::Emit(AgentEvent::reasoning("The user wants a shell command run.")),
        ScriptStep::Emit(AgentEvent::ToolCall(call.clone())),
        ScriptStep::Approve {
            call,
            output: json!(format!("$ {command}\n(demo backend: nothing was executed)")),
        },
        ScriptStep::Emit(AgentEvent::assistant("Done.")),
    ]
}

fn question_script(question: &str) -> Vec<ScriptStep> {
    vec![
        ScriptStep::Ask {
            tool_call_id: "call-question".into(),
            args: QuestionArgs::single(question),
        },
        ScriptStep::Emit(AgentEvent::assistant("Thanks, noted.")),
    ]
}

/// What `:interrupt` did. Like Escape in a full-screen client, it first
/// answers whatever prompt is open before stopping the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptRoute {
    RejectedApproval,
    CancelledQuestion,
    Interrupted,
    NothingRunning,
}

async fn route_interrupt(controller: &TurnController) -> InterruptRoute {
    if controller.pending_approval().is_some()
        && controller.resolve_approval(ApprovalDecision::Rejected)
    {
        return InterruptRoute::RejectedApproval;
    }
    if controller.question_pending() && controller.cancel_question().await {
        return InterruptRoute::CancelledQuestion;
    }
    if controller.interrupt().await {
        InterruptRoute::Interrupted
    } else {
        InterruptRoute::NothingRunning
    }
}

/// Submits `prompt` with `steps` as the script for the turn it starts. The
/// script is withdrawn when no turn starts right away, so it cannot leak
/// into a later turn.
async fn submit_scripted(
    controller: &TurnController,
    agent: &ScriptedAgent,
    steps: Vec<ScriptStep>,
    prompt: &str,
) -> SubmitOutcome {
    agent.push_turn(steps);
    let outcome = controller.submit(prompt).await;
    if outcome != SubmitOutcome::Started {
        debug!(?outcome, "withdrawing unused turn script");
        agent.take_last_turn();
    }
    outcome
}

pub async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let agent = Arc::new(ScriptedAgent::new().with_active_tools(DEMO_TOOLS));
    let sink = Arc::new(TerminalSink::new(config.tools_collapsed));
    let controller = TurnController::new(
        agent.clone(),
        sink.clone(),
        ToolUiRegistry::new(),
        ControllerSettings::from(&config),
    );

    sink.line("turnwise: type a message, /help for commands, :interrupt to stop a turn.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            ReplInput::Interrupt => {
                if route_interrupt(&controller).await == InterruptRoute::NothingRunning {
                    sink.line("Nothing to interrupt.");
                }
            }
            ReplInput::Decide(decision) => {
                if !controller.resolve_approval(decision) {
                    sink.line("No tool call is waiting for approval.");
                }
            }
            ReplInput::Answer(answer) => {
                if !controller.answer_question(vec![answer]) {
                    sink.line("No question is waiting for an answer.");
                }
            }
            ReplInput::CancelQuestion => {
                if !controller.cancel_question().await {
                    sink.line("No question is waiting for an answer.");
                }
            }
            ReplInput::Shell(command) => {
                let prompt = format!("run `{command}`");
                submit_scripted(&controller, &agent, shell_script(&command), &prompt).await;
            }
            ReplInput::Ask(question) => {
                let prompt = format!("ask me: {question}");
                submit_scripted(&controller, &agent, question_script(&question), &prompt).await;
            }
            ReplInput::Message(text) => {
                if controller.submit(&text).await == SubmitOutcome::Command(CommandOutcome::Exit) {
                    info!("exit requested");
                    controller.interrupt().await;
                    return Ok(());
                }
            }
            ReplInput::Unknown(input) => sink.line(&format!("Unknown control: {input}")),
        }
    }

    // End of input: let a running turn finish unless it is waiting on us.
    if controller.pending_approval().is_some() || controller.question_pending() {
        controller.interrupt().await;
    } else {
        controller.wait_until_idle().await;
    }
    debug!("stdin closed");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shown {
    Assistant,
    Reasoning { collapsed: bool },
    ToolCall,
    Compaction,
}

/// Prints the transcript as plain lines. Streaming text is written as it
/// arrives and terminated when the stream stops.
pub struct TerminalSink {
    tools_collapsed: AtomicBool,
    todos_collapsed: AtomicBool,
    mid_line: AtomicBool,
    shown: Mutex<HashMap<WidgetId, (Shown, String)>>,
    loading: Mutex<Option<String>>,
}

impl TerminalSink {
    pub fn new(tools_collapsed: bool) -> Self {
        Self {
            tools_collapsed: AtomicBool::new(tools_collapsed),
            todos_collapsed: AtomicBool::new(false),
            mid_line: AtomicBool::new(false),
            shown: Mutex::new(HashMap::new()),
            loading: Mutex::new(None),
        }
    }

    fn write(&self, text: &str, newline: bool) {
        let mut out = io::stdout().lock();
        if self.mid_line.swap(!newline, Ordering::SeqCst) {
            let _ = writeln!(out);
        }
        let _ = if newline {
            writeln!(out, "{text}")
        } else {
            write!(out, "{text}")
        };
        let _ = out.flush();
    }

    fn append(&self, text: &str) {
        let mut out = io::stdout().lock();
        let _ = write!(out, "{text}");
        let _ = out.flush();
        self.mid_line.store(true, Ordering::SeqCst);
    }

    pub fn line(&self, text: &str) {
        self.write(text, true);
    }

    fn remember(&self, id: WidgetId, shown: Shown, label: &str) {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (shown, label.to_string()));
    }

    fn lookup(&self, id: WidgetId) -> Option<(Shown, String)> {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl PresentationSink for TerminalSink {
    async fn mount(&self, id: WidgetId, widget: Widget, _after: Option<WidgetId>) {
        match widget {
            Widget::User { content } => self.line(&format!("> {content}")),
            Widget::Assistant { content } => {
                self.remember(id, Shown::Assistant, "");
                self.write(&content, false);
            }
            Widget::Reasoning { content, collapsed } => {
                self.remember(id, Shown::Reasoning { collapsed }, "");
                if collapsed {
                    self.line("(thinking…)");
                } else {
                    self.write(&format!("(thinking) {content}"), false);
                }
            }
            Widget::ToolCall {
                tool_name,
                summary,
                content,
            } => {
                self.remember(id, Shown::ToolCall, &tool_name);
                self.line(&format!("⚙ {summary}"));
                if let Some(content) = content {
                    self.line(&content);
                }
            }
            Widget::ToolResult {
                tool_name,
                message,
                success,
                warnings,
                collapsed,
            } => {
                let mark = if success { "ok" } else { "failed" };
                if collapsed {
                    self.line(&format!("  → {tool_name} {mark}"));
                } else {
                    self.line(&format!("  → {tool_name} {mark}: {message}"));
                }
                for warning in warnings {
                    self.line(&format!("    warning: {warning}"));
                }
            }
            Widget::Compaction => {
                self.remember(id, Shown::Compaction, "");
                self.line("Compacting conversation…");
            }
            Widget::Error { message } => self.line(&format!("error: {message}")),
            Widget::Interrupted => self.line("Interrupted by user."),
            Widget::Notice { message } => self.line(&message),
            Widget::Unknown { description } => self.line(&format!("? {description}")),
        }
    }

    fn update(&self, id: WidgetId, update: WidgetUpdate) {
        let Some((shown, label)) = self.lookup(id) else {
            debug!(%id, "update for unknown widget");
            return;
        };
        match (shown, update) {
            (Shown::Assistant, WidgetUpdate::AppendText(text))
            | (Shown::Reasoning { collapsed: false }, WidgetUpdate::AppendText(text)) => {
                self.append(&text)
            }
            (Shown::Assistant | Shown::Reasoning { .. }, WidgetUpdate::StopStream) => {
                if self.mid_line.swap(false, Ordering::SeqCst) {
                    let _ = writeln!(io::stdout());
                }
            }
            (Shown::ToolCall, WidgetUpdate::StopSpinner { success }) => {
                if !success {
                    self.line(&format!("  ✗ {label} stopped"));
                }
            }
            (Shown::ToolCall, WidgetUpdate::SetStreamMessage(message)) => {
                self.line(&format!("  … {message}"));
            }
            (Shown::ToolCall, WidgetUpdate::UpdateToolCall { summary, .. }) => {
                self.line(&format!("⚙ {summary}"));
            }
            (
                Shown::Compaction,
                WidgetUpdate::CompactionComplete {
                    old_tokens,
                    new_tokens,
                },
            ) => self.line(&format!(
                "Compaction complete: {old_tokens} → {new_tokens} tokens"
            )),
            (Shown::Compaction, WidgetUpdate::CompactionError(message)) => {
                self.line(&format!("Compaction failed: {message}"))
            }
            (_, other) => debug!(%id, ?other, "update not shown"),
        }
    }

    fn scroll_to_bottom(&self) {}

    fn tools_collapsed(&self) -> bool {
        self.tools_collapsed.load(Ordering::SeqCst)
    }

    fn todos_collapsed(&self) -> bool {
        self.todos_collapsed.load(Ordering::SeqCst)
    }

    fn set_loading(&self, status: Option<&str>) {
        let mut loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if loading.as_deref() == status {
            return;
        }
        *loading = status.map(str::to_string);
        drop(loading);
        if let Some(status) = status {
            self.line(&format!("[{status}…]"));
        }
    }

    fn set_todo_area_visible(&self, visible: bool) {
        debug!(visible, "todo area");
    }

    fn show_view(&self, view: BottomView) {
        match view {
            BottomView::Input => {}
            BottomView::Approval { tool, args } => self.line(&format!(
                "Approve {tool} {args}? (:approve, :always [save], :auto, :reject)"
            )),
            BottomView::Question { args } => {
                for question in &args.questions {
                    self.line(&format!("Question: {}", question.question));
                    for option in &question.options {
                        self.line(&format!("  - {option}"));
                    }
                }
                self.line("(:answer <text>, :cancel)");
            }
        }
    }
}
