use crate::error::LlmError;
use crate::mock::MockProvider;
use crate::openai::OpenAiProvider;
use crate::provider::{ChatStream, LlmProvider, Message, SamplingParams};

/// Enum dispatch for runtime backend selection.
#[derive(Debug, Clone)]
pub enum AnyProvider {
    OpenAi(OpenAiProvider),
    Mock(MockProvider),
}

macro_rules! dispatch_provider {
    ($self:expr, $method:ident $(, $arg:expr)*) => {
        match $self {
            AnyProvider::OpenAi(p) => p.$method($($arg),*).await,
            AnyProvider::Mock(p) => p.$method($($arg),*).await,
        }
    };
}

impl LlmProvider for AnyProvider {
    async fn chat_stream(
        &self,
        params: &SamplingParams,
        messages: &[Message],
    ) -> Result<ChatStream, LlmError> {
        dispatch_provider!(self, chat_stream, params, messages)
    }

    fn name(&self) -> &str {
        match self {
            Self::OpenAi(p) => p.name(),
            Self::Mock(p) => p.name(),
        }
    }
}
