use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged turn of a conversation. `name` attributes the turn to a
/// specific speaker for upstream APIs that support it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>, name: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, name: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name,
        }
    }
}

/// Per-request sampling knobs, passed through to the completions endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: 4096,
        }
    }
}

/// Lazy sequence of token fragments from an in-flight completion.
///
/// Finite, single pass, not resumable; suspension points are the upstream
/// read and each yielded fragment.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

pub trait LlmProvider: Send + Sync {
    /// Open a streaming chat completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or rejects the
    /// request. Errors after the stream is open surface as stream items.
    fn chat_stream(
        &self,
        params: &SamplingParams,
        messages: &[Message],
    ) -> impl Future<Output = Result<ChatStream, LlmError>> + Send;

    fn name(&self) -> &str;
}
