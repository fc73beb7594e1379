use eventsource_stream::Eventsource;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::ChatStream;

/// Convert an OpenAI-compatible streaming response into a `ChatStream`.
pub(crate) fn delta_stream(response: reqwest::Response) -> ChatStream {
    let events = response.bytes_stream().eventsource();
    let mapped = events.filter_map(|event| match event {
        Ok(event) => parse_delta_event(&event.data),
        Err(e) => Some(Err(LlmError::SseParse(e.to_string()))),
    });
    Box::pin(mapped)
}

fn parse_delta_event(data: &str) -> Option<Result<String, LlmError>> {
    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
                .unwrap_or_default();

            if content.is_empty() {
                None
            } else {
                Some(Ok(content.to_owned()))
            }
        }
        Err(e) => Some(Err(LlmError::SseParse(format!(
            "failed to parse stream chunk: {e}"
        )))),
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_marker_ends_stream() {
        assert!(parse_delta_event("[DONE]").is_none());
    }

    #[test]
    fn content_delta_extracted() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"}}]}"#;
        let token = parse_delta_event(data).unwrap().unwrap();
        assert_eq!(token, "Hello");
    }

    #[test]
    fn whitespace_delta_passes_through() {
        let data = r#"{"choices":[{"delta":{"content":" "}}]}"#;
        let token = parse_delta_event(data).unwrap().unwrap();
        assert_eq!(token, " ");
    }

    #[test]
    fn empty_delta_skipped() {
        let data = r#"{"choices":[{"delta":{"content":""}}]}"#;
        assert!(parse_delta_event(data).is_none());
    }

    #[test]
    fn role_only_delta_skipped() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_delta_event(data).is_none());
    }

    #[test]
    fn empty_choices_skipped() {
        let data = r#"{"choices":[]}"#;
        assert!(parse_delta_event(data).is_none());
    }

    #[test]
    fn malformed_chunk_is_error() {
        let result = parse_delta_event("{not json").unwrap();
        assert!(matches!(result, Err(LlmError::SseParse(_))));
    }
}
