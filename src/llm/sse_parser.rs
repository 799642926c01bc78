use crate::errors::{TapClawError, TapClawResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None if the line is a keep-alive or non-data line.
pub fn parse_sse_line(line: &str) -> TapClawResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(done()));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| TapClawError::SseParsing(e.to_string()))?;

    if let Some(message) = json["error"]["message"].as_str() {
        return Err(TapClawError::LlmProvider(message.to_string()));
    }

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };
    let delta = &first["delta"];

    // Reasoning content (some models like DeepSeek expose this)
    if let Some(reasoning) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Reasoning,
            content: reasoning.to_string(),
        }));
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array().filter(|a| !a.is_empty()) {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::ToolCall,
            content: serde_json::to_string(tool_calls)
                .map_err(|e| TapClawError::SseParsing(e.to_string()))?,
        }));
    }

    if let Some(content) = delta["content"].as_str().filter(|s| !s.is_empty()) {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Content,
            content: content.to_string(),
        }));
    }

    // Finish reason signals done
    if first["finish_reason"].as_str().is_some() {
        return Ok(Some(done()));
    }

    Ok(None)
}

fn done() -> StreamChunk {
    StreamChunk {
        kind: StreamChunkKind::Done,
        content: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(line: &str) -> Option<StreamChunkKind> {
        parse_sse_line(line).unwrap().map(|c| c.kind)
    }

    #[test]
    fn keep_alives_and_non_data_lines_are_ignored() {
        assert!(kind("").is_none());
        assert!(kind(": ping").is_none());
        assert!(kind("event: message").is_none());
    }

    #[test]
    fn done_marker_and_finish_reason_end_the_stream() {
        assert_eq!(kind("data: [DONE]"), Some(StreamChunkKind::Done));
        assert_eq!(
            kind(r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#),
            Some(StreamChunkKind::Done)
        );
    }

    #[test]
    fn content_and_tool_call_deltas_are_classified() {
        let chunk = parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Done."}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.kind, StreamChunkKind::Content);
        assert_eq!(chunk.content, "Done.");

        let chunk = parse_sse_line(
            r#"data:{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"node"}}]}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk.kind, StreamChunkKind::ToolCall);
        assert!(chunk.content.starts_with('['));
    }

    #[test]
    fn malformed_json_and_error_payloads_are_errors() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            Err(TapClawError::SseParsing(_))
        ));
        assert!(matches!(
            parse_sse_line(r#"data: {"error":{"message":"quota exceeded"}}"#),
            Err(TapClawError::LlmProvider(m)) if m == "quota exceeded"
        ));
    }
}
