use chirp_llm::LlmError;
use chirp_memory::StoreError;

use crate::surface::SurfaceError;

/// Failure taxonomy of the generation pipeline.
///
/// Validation-class conditions (unknown agent, over-long prompt) never show
/// up here: the generator converts them to user-visible text at the point
/// of detection. These variants are the infrastructure-class failures plus
/// the typed results of `set_active_agent`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("agent \"{0}\" is not configured")]
    AgentNotFound(String),

    #[error("agent \"{0}\" can only be used on channels that allow restricted content")]
    AccessDenied(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),
}
