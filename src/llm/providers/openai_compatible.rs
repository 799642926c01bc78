use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{TapClawError, TapClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunkKind, ToolCall, ToolDef,
};

/// Tool call accumulator entry: (id, type, name, accumulated_arguments).
type ToolCallBuilder = (String, String, String, String);

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        cfg: &CallConfig,
    ) -> TapClawResult<LlmResponse> {
        let body = request_body(messages, tools, cfg)?;

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );
        tracing::trace!(body = %body, "request body");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(TapClawError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Handle SSE streaming response and accumulate the full reply.
    async fn handle_stream(&self, response: reqwest::Response) -> TapClawResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut state = StreamState::default();

        while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            if state.feed(&bytes)? {
                break;
            }
        }
        state.flush()?;

        let resp = state.finish();
        tracing::info!(
            content_len = resp.content.len(),
            reasoning_len = resp.reasoning.len(),
            tool_calls = resp.tool_calls.len(),
            tools = ?resp.tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
            "LLM stream complete"
        );
        Ok(resp)
    }

    /// Handle a non-streaming JSON response.
    async fn handle_json(&self, response: reqwest::Response) -> TapClawResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let resp = parse_completion(&json)?;
        tracing::info!(
            content_len = resp.content.len(),
            tool_calls = resp.tool_calls.len(),
            "LLM JSON response received"
        );
        Ok(resp)
    }
}

fn request_body(
    messages: &[ChatMessage],
    tools: &[ToolDef],
    cfg: &CallConfig,
) -> TapClawResult<serde_json::Value> {
    let mut body = serde_json::json!({
        "model": cfg.model,
        "messages": messages,
        "stream": cfg.stream,
        "temperature": cfg.temperature,
    });
    if let Some(max_tokens) = cfg.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if !tools.is_empty() {
        body["tools"] = serde_json::to_value(tools)?;
        body["tool_choice"] = serde_json::json!("auto");
    }
    Ok(body)
}

/// Incremental SSE decoder. Lines are split on raw bytes so a multi-byte
/// character cut across network chunks is decoded whole.
#[derive(Default)]
struct StreamState {
    line_buf: Vec<u8>,
    content: String,
    reasoning: String,
    tc_builders: BTreeMap<usize, ToolCallBuilder>,
    done: bool,
}

impl StreamState {
    /// Consume a network chunk. Returns true once the stream signalled completion.
    fn feed(&mut self, bytes: &[u8]) -> TapClawResult<bool> {
        for &byte in bytes {
            if byte != b'\n' {
                self.line_buf.push(byte);
                continue;
            }
            let line = std::mem::take(&mut self.line_buf);
            if self.line(&String::from_utf8_lossy(&line))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Process a trailing line that had no newline.
    fn flush(&mut self) -> TapClawResult<()> {
        if self.done || self.line_buf.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.line_buf);
        self.line(&String::from_utf8_lossy(&line))?;
        Ok(())
    }

    fn line(&mut self, raw: &str) -> TapClawResult<bool> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(false);
        }
        match sse_parser::parse_sse_line(line) {
            Ok(Some(chunk)) => match chunk.kind {
                StreamChunkKind::Reasoning => self.reasoning.push_str(&chunk.content),
                StreamChunkKind::Content => self.content.push_str(&chunk.content),
                StreamChunkKind::ToolCall => merge_tool_call_deltas(&chunk.content, &mut self.tc_builders),
                StreamChunkKind::Done => {
                    self.done = true;
                    return Ok(true);
                }
            },
            Ok(None) => {}
            Err(e @ TapClawError::LlmProvider(_)) => return Err(e),
            Err(e) => tracing::debug!("SSE parse skipped: {e}"),
        }
        Ok(false)
    }

    fn finish(self) -> LlmResponse {
        LlmResponse {
            content: self.content,
            reasoning: self.reasoning,
            tool_calls: build_tool_calls(self.tc_builders),
        }
    }
}

/// Extract content and tool calls from a non-streaming completion body.
fn parse_completion(json: &serde_json::Value) -> TapClawResult<LlmResponse> {
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(TapClawError::LlmProvider(message.to_string()));
    }
    let message = &json["choices"][0]["message"];
    if message.is_null() {
        return Err(TapClawError::LlmProvider("response has no choices".into()));
    }

    let content = message["content"].as_str().unwrap_or("").to_string();
    let reasoning = message["reasoning_content"].as_str().unwrap_or("").to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    },
                })
                .filter(|tc| !tc.function.name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        reasoning,
        tool_calls,
    })
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(chunk_content: &str, builders: &mut BTreeMap<usize, ToolCallBuilder>) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str().filter(|s| !s.is_empty()) {
            entry.0 = id.to_string();
        }
        if let Some(t) = delta["type"].as_str().filter(|s| !s.is_empty()) {
            entry.1 = t.to_string();
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            entry.2.push_str(name);
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

/// Convert accumulated tool-call builders into typed `ToolCall` structs.
fn build_tool_calls(builders: BTreeMap<usize, ToolCallBuilder>) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|(_, _, name, _)| !name.is_empty())
        .map(|(id, call_type, name, arguments)| ToolCall {
            id,
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}
