//! OpenAI-compatible chat completions backend.
//!
//! Works against any service that speaks the `/chat/completions` wire
//! format (OpenAI, DeepSeek, Ollama's compatibility endpoint, vLLM, ...).

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message, SamplingParams};
use crate::sse::delta_stream;

pub struct OpenAiProvider {
    client: reqwest::Client,
    name: String,
    base_url: String,
    api_key: String,
    model: String,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Clone for OpenAiProvider {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
        }
    }
}

impl OpenAiProvider {
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized (should never happen
    /// with rustls).
    #[must_use]
    pub fn new(name: String, base_url: String, api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("chirp/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("default HTTP client construction must not fail");
        Self {
            client,
            name,
            base_url,
            api_key,
            model,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send_stream_request(
        &self,
        params: &SamplingParams,
        messages: &[Message],
    ) -> Result<reqwest::Response, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            temperature: params.temperature,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            max_tokens: params.max_tokens,
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("completions request to {} failed ({status}): {body}", self.name);
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat_stream(
        &self,
        params: &SamplingParams,
        messages: &[Message],
    ) -> Result<ChatStream, LlmError> {
        let response = self.send_stream_request(params, messages).await?;
        Ok(delta_stream(response))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    max_tokens: u32,
}
