//! Closed set of configured agents and the restricted-access gate.

use chirp_llm::any::AnyProvider;
use chirp_llm::mock::MockProvider;
use chirp_llm::openai::OpenAiProvider;
use chirp_llm::provider::{Message, SamplingParams};

use crate::config::Config;
use crate::surface::Directory;

/// How often a failed message edit may be retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Give up after this many attempts.
    Limited(u32),
    /// Keep retrying until the edit lands.
    Unbounded,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Limited(9)
    }
}

impl RetryPolicy {
    /// Whether `attempt` (1-based) was the last allowed one.
    #[must_use]
    pub fn exhausted(self, attempt: u32) -> bool {
        match self {
            Self::Limited(max) => attempt >= max,
            Self::Unbounded => false,
        }
    }
}

impl<'de> serde::Deserialize<'de> for RetryPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = RetryPolicy;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a retry count or the string \"unbounded\"")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                u32::try_from(v)
                    .map(RetryPolicy::Limited)
                    .map_err(|_| E::custom("retry count out of range"))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u32::try_from(v)
                    .map(RetryPolicy::Limited)
                    .map_err(|_| E::custom("retry count out of range"))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == "unbounded" {
                    Ok(RetryPolicy::Unbounded)
                } else {
                    Err(E::custom(format!("unknown retry policy \"{v}\"")))
                }
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// Static generation settings for one agent. The set of profiles is closed
/// over the process lifetime.
#[derive(Clone, Debug)]
pub struct AgentProfile {
    pub name: String,
    pub wake_words: Vec<String>,
    pub can_wake_by_name: bool,
    /// Usable only on surfaces flagged as permitting restricted content.
    pub restricted: bool,
    pub max_prompt_length: usize,
    /// Window cap, counted in exchanges (one user turn + one assistant turn).
    pub max_context_turns: i64,
    /// Window size restored by a trim, counted in exchanges.
    pub trim_to_turns: i64,
    pub retry: RetryPolicy,
    pub sampling: SamplingParams,
    /// Prepended to every request; excluded from window accounting.
    pub system_preamble: Vec<Message>,
}

/// A profile bound to its upstream client.
#[derive(Debug)]
pub struct AgentHandle {
    pub profile: AgentProfile,
    pub provider: AnyProvider,
}

/// Name-keyed lookup over the configured agents, preserving configuration
/// order (wake-word routing picks the first match).
#[derive(Debug)]
pub struct AgentRegistry {
    agents: Vec<AgentHandle>,
    default_agent: String,
}

impl AgentRegistry {
    /// # Panics
    ///
    /// Panics if `default_agent` names no agent in `agents`; configuration
    /// validation rejects that before a registry is ever built.
    #[must_use]
    pub fn new(agents: Vec<AgentHandle>, default_agent: impl Into<String>) -> Self {
        let default_agent = default_agent.into();
        assert!(
            agents.iter().any(|a| a.profile.name == default_agent),
            "default agent \"{default_agent}\" is not in the agent list"
        );
        Self {
            agents,
            default_agent,
        }
    }

    /// Build the closed agent set from configuration. Expects a config
    /// that already passed `Config::validate`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let agents = config
            .agents
            .iter()
            .map(|a| {
                let provider = if a.mock {
                    AnyProvider::Mock(MockProvider::new(&a.name))
                } else {
                    AnyProvider::OpenAi(OpenAiProvider::new(
                        a.name.clone(),
                        a.base_url.clone(),
                        a.api_key.clone(),
                        a.model.clone(),
                    ))
                };
                AgentHandle {
                    profile: AgentProfile {
                        name: a.name.clone(),
                        wake_words: a.wake_words.clone(),
                        can_wake_by_name: a.can_wake_by_name,
                        restricted: a.restricted,
                        max_prompt_length: a.max_prompt_length,
                        max_context_turns: a.max_context_turns,
                        trim_to_turns: a.trim_to_turns,
                        retry: a.edit_retries,
                        sampling: a.sampling(),
                        system_preamble: a.system_prompt.clone(),
                    },
                    provider,
                }
            })
            .collect();
        Self::new(agents, config.default_agent.clone())
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&AgentHandle> {
        self.agents.iter().find(|a| a.profile.name == name)
    }

    #[must_use]
    pub fn default_name(&self) -> &str {
        &self.default_agent
    }

    #[must_use]
    pub fn default_agent(&self) -> &AgentHandle {
        self.resolve(&self.default_agent)
            .expect("default agent presence is checked at construction")
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentHandle> {
        self.agents.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Restricted-access gate: a restricted agent is usable in direct
    /// conversations, and in groups only on channels the surface flags as
    /// permitting restricted content. A failed surface query counts as
    /// not permitted.
    pub async fn can_use<D: Directory>(
        dir: &D,
        channel_id: &str,
        is_group: bool,
        profile: &AgentProfile,
    ) -> bool {
        if !profile.restricted || !is_group {
            return true;
        }
        match dir.allows_restricted(channel_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!("restricted-content check failed for {channel_id}: {e}");
                false
            }
        }
    }
}
