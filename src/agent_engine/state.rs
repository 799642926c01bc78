use serde::{Deserialize, Serialize};

use crate::executor::command::{Command, ScrollDirection};
use crate::llm::types::ToolCall;

/// Externally visible status of an agent session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Success(String),
    Error(String),
    Cancelled,
}

/// Phases of one running session. `Plan` is the only phase that waits on
/// the planner.
#[derive(Debug, Clone)]
pub(crate) enum Phase {
    Observe,
    Plan,
    Execute { call_id: String, action: AgentAction },
    Finished(AgentStatus),
}

/// A tool call from the planner, validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    GetScreen,
    Click { node_index: usize },
    TypeText { node_index: usize, text: String },
    Scroll { node_index: usize, direction: ScrollDirection },
    GoBack,
    LaunchApp { package_name: String },
    GetInstalledApps,
}

impl AgentAction {
    pub fn tool_name(&self) -> &'static str {
        match self {
            AgentAction::GetScreen => "get_screen",
            AgentAction::Click { .. } => "click",
            AgentAction::TypeText { .. } => "type_text",
            AgentAction::Scroll { .. } => "scroll",
            AgentAction::GoBack => "go_back",
            AgentAction::LaunchApp { .. } => "launch_app",
            AgentAction::GetInstalledApps => "get_installed_apps",
        }
    }

    /// The device command this action runs, if any. `get_screen` is served
    /// by the snapshot builder directly.
    pub fn to_command(&self) -> Option<Command> {
        match self {
            AgentAction::GetScreen => None,
            AgentAction::Click { node_index } => Some(Command::Click { index: *node_index }),
            AgentAction::TypeText { node_index, text } => Some(Command::Type {
                index: *node_index,
                text: text.clone(),
            }),
            AgentAction::Scroll { node_index, direction } => Some(Command::Scroll {
                index: *node_index,
                direction: *direction,
            }),
            AgentAction::GoBack => Some(Command::GoBack),
            AgentAction::LaunchApp { package_name } => Some(Command::LaunchApp {
                app_id: package_name.clone(),
            }),
            AgentAction::GetInstalledApps => Some(Command::ListApps),
        }
    }

    /// Whether success means the screen changed and must be observed again.
    pub fn is_state_changing(&self) -> bool {
        self.to_command().is_some_and(|c| c.changes_screen())
    }

    /// Tool result text returned to the planner for a device command.
    pub fn result_message(&self, success: bool) -> String {
        match (self, success) {
            (AgentAction::Click { node_index }, true) => format!("Clicked node {node_index} successfully"),
            (AgentAction::Click { node_index }, false) => format!("Failed to click node {node_index}"),
            (AgentAction::TypeText { node_index, text }, true) => {
                format!("Typed '{text}' into node {node_index}")
            }
            (AgentAction::TypeText { node_index, .. }, false) => {
                format!("Failed to type into node {node_index}")
            }
            (AgentAction::Scroll { node_index, direction }, true) => {
                format!("Scrolled node {node_index} {direction}")
            }
            (AgentAction::Scroll { node_index, .. }, false) => format!("Failed to scroll node {node_index}"),
            (AgentAction::GoBack, true) => "Navigated back successfully".to_string(),
            (AgentAction::GoBack, false) => "Failed to go back".to_string(),
            (AgentAction::LaunchApp { package_name }, true) => {
                format!("Launched {package_name}. Call get_screen to see the current UI.")
            }
            (AgentAction::LaunchApp { package_name }, false) => {
                format!("Failed to launch {package_name}. Check the package name.")
            }
            (AgentAction::GetScreen, _) | (AgentAction::GetInstalledApps, _) => {
                format!("{} {}", self.tool_name(), if success { "succeeded" } else { "failed" })
            }
        }
    }

    /// Parse a planner tool call. The error is the text returned to the
    /// planner as the tool result.
    pub fn from_tool_call(tc: &ToolCall) -> Result<Self, String> {
        let raw = tc.function.arguments.trim();
        let args: serde_json::Value = if raw.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(raw).map_err(|e| {
                format!("ERROR: Arguments for {} are not valid JSON: {e}", tc.function.name)
            })?
        };
        let name = tc.function.name.as_str();

        match name {
            "get_screen" => Ok(AgentAction::GetScreen),
            "click" => Ok(AgentAction::Click {
                node_index: index_arg(name, &args)?,
            }),
            "type_text" => Ok(AgentAction::TypeText {
                node_index: index_arg(name, &args)?,
                text: str_arg(name, &args, &["text"])?,
            }),
            "scroll" => {
                let node_index = index_arg(name, &args)?;
                let raw = str_arg(name, &args, &["direction"])?;
                let direction = raw.parse::<ScrollDirection>().map_err(|e| format!("ERROR: {e}"))?;
                Ok(AgentAction::Scroll { node_index, direction })
            }
            "go_back" => Ok(AgentAction::GoBack),
            "launch_app" => Ok(AgentAction::LaunchApp {
                package_name: str_arg(name, &args, &["package_name", "packageName"])?,
            }),
            "get_installed_apps" => Ok(AgentAction::GetInstalledApps),
            other => Err(format!(
                "ERROR: Unknown tool '{other}'. Use get_screen, click, type_text, scroll, go_back, launch_app, or get_installed_apps."
            )),
        }
    }
}

fn index_arg(tool: &str, args: &serde_json::Value) -> Result<usize, String> {
    let value = args
        .get("node_index")
        .or_else(|| args.get("nodeIndex"))
        .ok_or_else(|| format!("ERROR: Missing argument 'node_index' for {tool}"))?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .map(|i| i as usize)
        .ok_or_else(|| format!("ERROR: 'node_index' for {tool} must be a non-negative integer, got {value}"))
}

fn str_arg(tool: &str, args: &serde_json::Value, keys: &[&str]) -> Result<String, String> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
        .ok_or_else(|| format!("ERROR: Missing argument '{}' for {tool}", keys[0]))
}
