use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::planner::{Planner, PlannerReply};
use crate::agent_engine::session_log::{
    LogId, LogRecord, LogStatus, LogType, SessionId, SessionLog, SessionStatus,
};
use crate::agent_engine::state::{AgentAction, AgentStatus, Phase};
use crate::config::AgentConfig;
use crate::errors::{TapClawError, TapClawResult};
use crate::executor::command::Command;
use crate::executor::coordinator::Device;
use crate::executor::dispatcher::CommandExecutor;
use crate::llm::types::ChatMessage;
use crate::perception::render::{render_apps, render_tree};
use crate::perception::snapshot::Snapshot;

pub const SYSTEM_PROMPT: &str = "\
You are TapClaw, an autonomous mobile device agent. You control a phone by using tools.

WORKFLOW:
1. First understand the user's goal.
2. If you need to open an app, use get_installed_apps to find the package name, then launch_app to open it.
3. After any navigation action (launch, click, back, scroll), the current screen is sent to you again.
4. Use the node indices from the latest screen to interact with elements via click, type_text, or scroll.
5. Continue step by step until the user's goal is fully completed.

RULES:
- Only use node indices from the most recent screen; older indices are invalid.
- Call get_screen whenever you are unsure what is currently shown.
- If a click didn't change the screen, try scrolling to find the target element.
- If you are stuck, try go_back and re-approach.
- After typing into a text field, press the UI submit button so the input is registered.
- When the task is complete, respond with a summary of what you did and no tool call.";

const NO_SCREEN: &str = "ERROR: Could not capture screen. No UI root is available.";
const ITERATION_LIMIT: &str = "iteration limit exceeded";

/// Mutable state of one `run`.
struct Session {
    id: SessionId,
    conversation: Vec<ChatMessage>,
    loop_ctrl: LoopController,
    cancel: CancellationToken,
    /// Snapshot the planner last saw; node commands resolve against it.
    snapshot: Option<Snapshot>,
}

/// Drives one goal from observation to a terminal status.
///
/// Each iteration observes the screen, asks the planner for one action and
/// executes it. The planner call is the only point where the loop waits on
/// something it does not control; cancellation interrupts that wait and is
/// otherwise checked between steps.
pub struct AgentLoop {
    config: AgentConfig,
    executor: CommandExecutor,
    planner: Arc<dyn Planner>,
    log: Arc<dyn SessionLog>,
    cancel: Mutex<CancellationToken>,
    status_tx: watch::Sender<AgentStatus>,
}

impl AgentLoop {
    pub fn new(
        device: Device,
        planner: Arc<dyn Planner>,
        log: Arc<dyn SessionLog>,
        config: AgentConfig,
    ) -> Self {
        let executor = CommandExecutor::new(device)
            .with_action_timeout(Duration::from_secs(config.action_timeout_secs));
        let (status_tx, _) = watch::channel(AgentStatus::Idle);
        Self {
            config,
            executor,
            planner,
            log,
            cancel: Mutex::new(CancellationToken::new()),
            status_tx,
        }
    }

    /// Token of the current (or most recent) run. Each `run` starts with a
    /// fresh token, so cancelling only ever stops one session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|p| p.into_inner()) = token.clone();
        token
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> AgentStatus {
        self.status_tx.borrow().clone()
    }

    /// Run `goal` to completion.
    ///
    /// Returns `Err(TapClawError::NotStarted)` carrying a user-facing notice
    /// when the session cannot start; every failure after that ends in the
    /// returned status.
    pub async fn run(&self, goal: &str) -> TapClawResult<AgentStatus> {
        let goal = goal.trim();
        if goal.is_empty() {
            tracing::warn!("refusing to start: empty goal");
            return Err(TapClawError::NotStarted("Please enter a goal".into()));
        }
        if !self.planner.has_credential() {
            tracing::warn!(planner = %self.planner.name(), "refusing to start: no API key");
            return Err(TapClawError::NotStarted(format!(
                "Please set an API key for {}",
                self.planner.name()
            )));
        }

        let cancel = self.fresh_token();
        tracing::info!(goal = %goal, planner = %self.planner.name(), "running agent");
        let session_id = self.log.create_session(goal, self.planner.name()).await?;
        self.publish(AgentStatus::Running);

        self.note(&session_id, LogRecord::info(format!("Goal: {goal}"))).await;
        self.note(&session_id, LogRecord::info(format!("Provider: {}", self.planner.name())))
            .await;
        let started = self
            .note(
                &session_id,
                LogRecord::info("Agent started...").with_status(LogStatus::Ongoing),
            )
            .await;

        let system_prompt = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| SYSTEM_PROMPT.to_string());
        let mut session = Session {
            id: session_id,
            conversation: vec![ChatMessage::system(system_prompt), ChatMessage::user(goal)],
            loop_ctrl: LoopController::new(self.config.max_iterations),
            cancel,
            snapshot: None,
        };

        let status = self.drive(&mut session).await;
        tracing::info!(
            session = %session.id,
            iterations = session.loop_ctrl.iterations(),
            failures = session.loop_ctrl.failures(),
            elapsed = ?session.loop_ctrl.elapsed(),
            ?status,
            "agent loop ended"
        );
        self.wrap_up(&session.id, started, &status).await;
        self.publish(status.clone());
        Ok(status)
    }

    async fn drive(&self, session: &mut Session) -> AgentStatus {
        let mut phase = Phase::Observe;
        loop {
            phase = match phase {
                Phase::Observe => {
                    if session.cancel.is_cancelled() {
                        Phase::Finished(AgentStatus::Cancelled)
                    } else {
                        let screen = self.capture_screen(session).await;
                        session
                            .conversation
                            .push(ChatMessage::user(format!("Current screen:\n{screen}")));
                        Phase::Plan
                    }
                }
                Phase::Plan => self.plan(session).await,
                Phase::Execute { call_id, action } => self.execute(session, call_id, action).await,
                Phase::Finished(status) => return status,
            };
        }
    }

    async fn plan(&self, session: &mut Session) -> Phase {
        if session.cancel.is_cancelled() {
            return Phase::Finished(AgentStatus::Cancelled);
        }
        if !session.loop_ctrl.begin_iteration() {
            tracing::warn!(max = self.config.max_iterations, "iteration budget exhausted");
            return Phase::Finished(AgentStatus::Error(ITERATION_LIMIT.into()));
        }

        tracing::info!(
            iteration = session.loop_ctrl.iterations(),
            messages = session.conversation.len(),
            "Planning → calling planner"
        );
        let budget = Duration::from_secs(self.config.planner_timeout_secs);
        let reply = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => {
                tracing::info!("cancelled while waiting for the planner");
                return Phase::Finished(AgentStatus::Cancelled);
            }
            reply = tokio::time::timeout(budget, self.planner.next_action(&session.conversation)) => reply,
        };

        let reply = match reply {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "planner call failed");
                return Phase::Finished(AgentStatus::Error(e.to_string()));
            }
            Err(_) => {
                tracing::error!(timeout = ?budget, "planner call timed out");
                let e = TapClawError::Timeout(format!(
                    "planner did not answer within {}s",
                    budget.as_secs()
                ));
                return Phase::Finished(AgentStatus::Error(e.to_string()));
            }
        };

        match reply {
            PlannerReply::Done(summary) => {
                tracing::info!(summary = %summary, "planner finished");
                Phase::Finished(AgentStatus::Success(summary))
            }
            PlannerReply::ToolCall(tc) => {
                session
                    .conversation
                    .push(ChatMessage::assistant_tool_call("", tc.clone()));
                match AgentAction::from_tool_call(&tc) {
                    Ok(action) => {
                        tracing::info!(
                            tool = %tc.function.name,
                            args = %tc.function.arguments,
                            "Planning → dispatching tool call"
                        );
                        Phase::Execute { call_id: tc.id, action }
                    }
                    Err(message) => {
                        tracing::warn!(tool = %tc.function.name, error = %message, "unusable tool call");
                        session.loop_ctrl.record_failure();
                        session
                            .conversation
                            .push(ChatMessage::tool_result(tc.id.clone(), message.clone()));
                        let record = LogRecord::new(LogType::Error, message)
                            .with_detail(Some(tc.function.name.clone()));
                        self.note(&session.id, record).await;
                        Phase::Plan
                    }
                }
            }
        }
    }

    async fn execute(&self, session: &mut Session, call_id: String, action: AgentAction) -> Phase {
        tracing::info!(?action, "Executing");

        let (result, log_message, success, target) = match action.to_command() {
            None => {
                let screen = self.capture_screen(session).await;
                let captured = session.snapshot.is_some();
                let note = if captured { "Screen captured" } else { "Screen unavailable" };
                (screen, note.to_string(), captured, None)
            }
            Some(Command::ListApps) => {
                let report = self.executor.run_on(None, &Command::ListApps).await;
                match report.apps {
                    Some(apps) if report.success => {
                        let note = format!("Fetched {} installed apps", apps.len());
                        (render_apps(&apps), note, true, None)
                    }
                    _ => {
                        let text = "Failed to get installed apps".to_string();
                        (text.clone(), text, false, None)
                    }
                }
            }
            Some(command) => {
                let report = self.executor.run_on(session.snapshot.as_ref(), &command).await;
                let text = action.result_message(report.success);
                (text.clone(), text, report.success, report.target)
            }
        };

        if !success {
            session.loop_ctrl.record_failure();
        }
        let status = if success { LogStatus::Completed } else { LogStatus::Error };
        let record = LogRecord::new(LogType::ToolUse, log_message)
            .with_status(status)
            .with_detail(target);
        self.note(&session.id, record).await;
        session
            .conversation
            .push(ChatMessage::tool_result(call_id, result));

        if !action.is_state_changing() {
            return Phase::Plan;
        }
        if success {
            let settle = match action {
                AgentAction::LaunchApp { .. } => self.config.app_launch_delay_ms,
                _ => self.config.settle_delay_ms,
            };
            tracing::debug!(settle_ms = settle, "waiting for UI to settle");
            tokio::time::sleep(Duration::from_millis(settle)).await;
        }
        Phase::Observe
    }

    /// Capture and render the current screen, pinning the snapshot for the
    /// next command.
    async fn capture_screen(&self, session: &mut Session) -> String {
        match self.executor.device().capture().await {
            Ok(Some(snapshot)) => {
                let text = render_tree(snapshot.root());
                session.snapshot = Some(snapshot);
                text
            }
            Ok(None) => {
                session.snapshot = None;
                NO_SCREEN.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "screen capture failed");
                session.snapshot = None;
                NO_SCREEN.to_string()
            }
        }
    }

    async fn wrap_up(&self, session: &SessionId, started: Option<LogId>, status: &AgentStatus) {
        let (started_status, closing, session_status, summary) = match status {
            AgentStatus::Success(summary) => {
                let message = if summary.is_empty() { "Agent completed" } else { summary.as_str() };
                (
                    LogStatus::Completed,
                    LogRecord::new(LogType::Reply, message),
                    SessionStatus::Success,
                    Some(summary.as_str()),
                )
            }
            AgentStatus::Error(message) => (
                LogStatus::Error,
                LogRecord::new(LogType::Error, format!("Error: {message}")),
                SessionStatus::Error,
                Some(message.as_str()),
            ),
            _ => (
                LogStatus::Completed,
                LogRecord::info("Agent cancelled"),
                SessionStatus::Cancelled,
                None,
            ),
        };

        if let Some(id) = started {
            if let Err(e) = self.log.update_status(id, started_status).await {
                tracing::warn!(error = %e, "session log status update failed");
            }
        }
        self.note(session, closing).await;
        if let Err(e) = self.log.finish(session, session_status, summary).await {
            tracing::warn!(error = %e, "session log finish failed");
        }
    }

    /// Append to the session log. A failing log never stops the session.
    async fn note(&self, session: &SessionId, record: LogRecord) -> Option<LogId> {
        match self.log.append(session, record).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "session log append failed");
                None
            }
        }
    }

    fn publish(&self, status: AgentStatus) {
        self.status_tx.send_replace(status);
    }
}
