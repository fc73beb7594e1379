use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;

use chirp_llm::provider::{Message, SamplingParams};

use crate::registry::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Agent answering conversations that never woke anyone by name.
    pub default_agent: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub surface: SurfaceConfig,
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default)]
    pub kind: SurfaceKind,
    /// Bot token for the Discord surface.
    #[serde(default)]
    pub discord_token: String,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    #[default]
    Cli,
    Discord,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// Any OpenAI-compatible completions endpoint.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    /// Serve the canned deterministic reply instead of calling upstream.
    #[serde(default)]
    pub mock: bool,
    #[serde(default)]
    pub wake_words: Vec<String>,
    #[serde(default)]
    pub can_wake_by_name: bool,
    /// Usable only on channels flagged as permitting restricted content.
    #[serde(default)]
    pub restricted: bool,
    /// Window cap in exchanges; one question plus one answer is one exchange.
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: i64,
    /// Window size restored by a trim. Keeping it below the cap leaves
    /// room before the next trim and improves upstream cache hits.
    #[serde(default = "default_trim_to_turns")]
    pub trim_to_turns: i64,
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,
    /// Edit attempts for the final reply; `"unbounded"` to never give up.
    #[serde(default)]
    pub edit_retries: RetryPolicy,
    /// Prepended to every request, excluded from the window accounting.
    #[serde(default)]
    pub system_prompt: Vec<Message>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl AgentConfig {
    #[must_use]
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            max_tokens: self.max_tokens,
        }
    }
}

fn default_store_path() -> String {
    "chirp.db".into()
}

fn default_max_context_turns() -> i64 {
    20
}

fn default_trim_to_turns() -> i64 {
    10
}

fn default_max_prompt_length() -> usize {
    1000
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&content).context("failed to parse config file")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CHIRP_DISCORD_TOKEN") {
            self.surface.discord_token = v;
        }
        if let Ok(v) = std::env::var("CHIRP_STORE_PATH") {
            self.store.path = v;
        }
    }

    /// Reject configurations the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agents.is_empty() {
            bail!("at least one agent must be configured");
        }
        if !self.agents.iter().any(|a| a.name == self.default_agent) {
            bail!("default agent \"{}\" is not in the agent list", self.default_agent);
        }
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                bail!("agent names must not be blank");
            }
            let duplicates = self
                .agents
                .iter()
                .filter(|other| other.name == agent.name)
                .count();
            if duplicates > 1 {
                bail!("agent \"{}\" is configured more than once", agent.name);
            }
            if agent.trim_to_turns > agent.max_context_turns {
                bail!(
                    "agent \"{}\": trim_to_turns must not exceed max_context_turns",
                    agent.name
                );
            }
            if !agent.mock
                && (agent.base_url.is_empty() || agent.api_key.is_empty() || agent.model.is_empty())
            {
                bail!(
                    "agent \"{}\": base_url, api_key and model are required unless mock = true",
                    agent.name
                );
            }
        }
        if self.surface.kind == SurfaceKind::Discord && self.surface.discord_token.is_empty() {
            bail!("surface.discord_token is required for the discord surface");
        }
        Ok(())
    }
}
