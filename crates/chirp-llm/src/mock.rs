//! Deterministic canned provider for mock agents and tests.
//!
//! Unlike a test double behind a feature gate, mock agents are selected at
//! runtime by configuration, so this module is always compiled.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message, SamplingParams};

const CANNED_REPLY: &str = "# Heading\n\
\n\
**bold** and *italic* text, `inline code`, ~~strikethrough~~.\n\
\n\
> a blockquote line\n\
\n\
1. first item\n\
2. second item\n\
\n\
- unordered one\n\
- unordered two\n\
\n\
[a link](https://www.example.com)\n\
\n\
| Column | Description |\n\
| ------ | ----------- |\n\
| left   | right       |\n\
\n\
```json\n\
{ \"firstName\": \"John\", \"lastName\": \"Smith\" }\n\
```\n\
\n\
- [x] done item\n\
- [ ] open item\n";

#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    tokens: Vec<String>,
    delay: Duration,
    prompts: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Mock agent yielding the canned markdown reply line by line.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let tokens = CANNED_REPLY.lines().map(|l| format!("{l}\n")).collect();
        Self {
            name: name.into(),
            tokens,
            delay: Duration::ZERO,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Mock agent yielding exactly the given tokens.
    #[must_use]
    pub fn with_tokens(name: impl Into<String>, tokens: Vec<String>) -> Self {
        Self {
            tokens,
            ..Self::new(name)
        }
    }

    /// Sleep this long before the stream opens.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Prompts received so far, one entry per `chat_stream` call. Clones of
    /// a provider share the record.
    ///
    /// # Panics
    ///
    /// Panics if a previous caller panicked while recording.
    #[must_use]
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmProvider for MockProvider {
    async fn chat_stream(
        &self,
        _params: &SamplingParams,
        messages: &[Message],
    ) -> Result<ChatStream, LlmError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let tokens: Vec<Result<String, LlmError>> =
            self.tokens.iter().cloned().map(Ok).collect();
        Ok(Box::pin(tokio_stream::iter(tokens)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn canned_reply_streams_line_by_line() {
        let mock = MockProvider::new("mock");
        let mut stream = mock
            .chat_stream(&SamplingParams::default(), &[])
            .await
            .unwrap();

        let mut full = String::new();
        while let Some(token) = stream.next().await {
            full.push_str(&token.unwrap());
        }
        assert_eq!(full, CANNED_REPLY);
    }

    #[tokio::test]
    async fn explicit_tokens_preserved_in_order() {
        let mock = MockProvider::with_tokens(
            "mock",
            vec!["Hello".into(), " ".into(), "world".into(), "!".into()],
        );
        let mut stream = mock
            .chat_stream(&SamplingParams::default(), &[])
            .await
            .unwrap();

        let mut tokens = Vec::new();
        while let Some(token) = stream.next().await {
            tokens.push(token.unwrap());
        }
        assert_eq!(tokens, vec!["Hello", " ", "world", "!"]);
    }

    #[test]
    fn name_reports_configured_agent() {
        assert_eq!(MockProvider::new("neko").name(), "neko");
    }
}
