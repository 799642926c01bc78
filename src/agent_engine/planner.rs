use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::{TapClawError, TapClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::registry::ProviderRegistry;
use crate::llm::tools::load_builtin_tools;
use crate::llm::types::{CallConfig, ChatMessage, ToolCall, ToolDef};

/// What the planner wants next.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerReply {
    /// Terminal reply; the goal is considered reached.
    Done(String),
    ToolCall(ToolCall),
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Display name, used in notices and the session log.
    fn name(&self) -> &str;

    fn has_credential(&self) -> bool;

    /// Choose exactly one next action from the conversation so far.
    async fn next_action(&self, conversation: &[ChatMessage]) -> TapClawResult<PlannerReply>;
}

/// Planner backed by a tool-calling chat model.
pub struct LlmPlanner {
    display_name: String,
    provider: Arc<dyn LlmProvider>,
    call: CallConfig,
    tools: Vec<ToolDef>,
}

impl LlmPlanner {
    pub fn new(display_name: String, provider: Arc<dyn LlmProvider>, call: CallConfig) -> TapClawResult<Self> {
        Ok(Self {
            display_name,
            provider,
            call,
            tools: load_builtin_tools()?,
        })
    }

    /// Resolve the `planner` role and cap replies at `max_tokens`.
    pub fn from_registry(registry: &ProviderRegistry, max_tokens: u32) -> TapClawResult<Self> {
        let (id, provider, mut call) = registry.call_config_for_role("planner")?;
        call.max_tokens = Some(max_tokens);
        Self::new(registry.display_name(&id), provider, call)
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    fn name(&self) -> &str {
        &self.display_name
    }

    fn has_credential(&self) -> bool {
        self.provider.has_credential()
    }

    async fn next_action(&self, conversation: &[ChatMessage]) -> TapClawResult<PlannerReply> {
        let response = self.provider.chat(conversation, &self.tools, &self.call).await?;

        if !response.reasoning.is_empty() {
            tracing::debug!(reasoning = %response.reasoning, "planner reasoning");
        }
        if response.tool_calls.len() > 1 {
            tracing::warn!(
                count = response.tool_calls.len(),
                "planner returned several tool calls; only the first is executed"
            );
        }

        match response.tool_calls.into_iter().next() {
            Some(mut call) => {
                if call.id.is_empty() {
                    call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                }
                Ok(PlannerReply::ToolCall(call))
            }
            None => Ok(PlannerReply::Done(response.content.trim().to_string())),
        }
    }
}

/// One step of a planner script file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    Done { done: String },
    Call {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

/// Replays a fixed list of replies. Used for offline runs of the CLI.
pub struct ScriptedPlanner {
    steps: Mutex<VecDeque<PlannerReply>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedPlanner {
    pub fn new(replies: Vec<PlannerReply>) -> Self {
        Self {
            steps: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        let replies = steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| match step {
                ScriptStep::Done { done } => PlannerReply::Done(done),
                ScriptStep::Call { tool, args } => {
                    let args = if args.is_null() { serde_json::json!({}) } else { args };
                    PlannerReply::ToolCall(ToolCall::function(format!("call_{i}"), tool, args.to_string()))
                }
            })
            .collect();
        Self::new(replies)
    }

    pub fn load(path: &std::path::Path) -> TapClawResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let steps: Vec<ScriptStep> = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), steps = steps.len(), "planner script loaded");
        Ok(Self::from_steps(steps))
    }

    /// Conversations passed to each call, oldest first.
    pub fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn has_credential(&self) -> bool {
        true
    }

    async fn next_action(&self, conversation: &[ChatMessage]) -> TapClawResult<PlannerReply> {
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(conversation.to_vec());
        self.steps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .ok_or_else(|| TapClawError::Planner("script has no more steps".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::LlmResponse;

    struct CannedProvider {
        key: String,
        response: LlmResponse,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn has_credential(&self) -> bool {
            !self.key.is_empty()
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            tools: &[ToolDef],
            cfg: &CallConfig,
        ) -> TapClawResult<LlmResponse> {
            assert_eq!(tools.len(), 7);
            assert_eq!(cfg.max_tokens, Some(1600));
            Ok(self.response.clone())
        }
    }

    fn planner(key: &str, response: LlmResponse) -> LlmPlanner {
        let call = CallConfig {
            model: "m".into(),
            stream: false,
            temperature: 0.1,
            max_tokens: Some(1600),
        };
        let provider = Arc::new(CannedProvider { key: key.into(), response });
        LlmPlanner::new("Canned".into(), provider, call).unwrap()
    }

    #[tokio::test]
    async fn first_tool_call_wins_and_gets_an_id() {
        let response = LlmResponse {
            tool_calls: vec![
                ToolCall::function("", "get_screen", "{}"),
                ToolCall::function("b", "go_back", "{}"),
            ],
            ..Default::default()
        };
        let reply = planner("k", response).next_action(&[]).await.unwrap();
        match reply {
            PlannerReply::ToolCall(call) => {
                assert_eq!(call.function.name, "get_screen");
                assert!(call.id.starts_with("call_"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn content_only_reply_is_terminal() {
        let response = LlmResponse {
            content: "  Opened the settings app.\n".into(),
            ..Default::default()
        };
        let p = planner("", response);
        assert!(!p.has_credential());
        assert_eq!(
            p.next_action(&[]).await.unwrap(),
            PlannerReply::Done("Opened the settings app.".into())
        );
    }

    #[tokio::test]
    async fn script_steps_replay_in_order_then_fail() {
        let steps: Vec<ScriptStep> = serde_json::from_str(
            r#"[ {"tool": "click", "args": {"node_index": 1}}, {"tool": "go_back"}, {"done": "ok"} ]"#,
        )
        .unwrap();
        let planner = ScriptedPlanner::from_steps(steps);
        let first = planner.next_action(&[ChatMessage::user("goal")]).await.unwrap();
        assert_eq!(
            first,
            PlannerReply::ToolCall(ToolCall::function("call_0", "click", r#"{"node_index":1}"#))
        );
        assert!(matches!(
            planner.next_action(&[]).await.unwrap(),
            PlannerReply::ToolCall(c) if c.function.arguments == "{}"
        ));
        assert_eq!(planner.next_action(&[]).await.unwrap(), PlannerReply::Done("ok".into()));
        assert!(planner.next_action(&[]).await.is_err());
        assert_eq!(planner.conversations().len(), 4);
    }
}
