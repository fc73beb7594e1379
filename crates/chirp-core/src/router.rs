//! Decides whether an inbound message should wake the responder, and which
//! agent owns the conversation afterward.

use std::sync::Arc;

use chirp_memory::{ContextStore, ConversationMeta};

use crate::error::EngineError;
use crate::registry::{AgentHandle, AgentRegistry};
use crate::surface::{Directory, Incoming};

#[derive(Clone)]
pub struct WakeupRouter {
    registry: Arc<AgentRegistry>,
    store: Arc<ContextStore>,
}

impl WakeupRouter {
    #[must_use]
    pub fn new(registry: Arc<AgentRegistry>, store: Arc<ContextStore>) -> Self {
        Self { registry, store }
    }

    fn matching_agents(&self, content: &str) -> Vec<&AgentHandle> {
        let content = content.to_lowercase();
        self.registry
            .iter()
            .filter(|a| {
                a.profile
                    .wake_words
                    .iter()
                    .any(|w| !w.is_empty() && content.contains(&w.to_lowercase()))
                    || (a.profile.can_wake_by_name
                        && content.contains(&a.profile.name.to_lowercase()))
            })
            .collect()
    }

    /// Whether this message should trigger generation. May reassign the
    /// conversation's active agent as a side effect: when some agent's wake
    /// word matches and the active agent is not among the matches, the
    /// first accessible match takes over. An inaccessible match (restricted
    /// gate) yields no trigger and no reassignment.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn should_respond<D: Directory>(
        &self,
        dir: &D,
        msg: &Incoming,
        meta: &ConversationMeta,
    ) -> Result<bool, EngineError> {
        if msg.from_me {
            return Ok(false);
        }

        let matches = self.matching_agents(&msg.content);
        if matches.is_empty() {
            if !msg.is_group() {
                return Ok(true);
            }
            return Ok(msg.mentions_me);
        }

        let active = self
            .store
            .active_agent(meta)
            .await?
            .unwrap_or_else(|| self.registry.default_name().to_owned());

        if matches.iter().any(|a| a.profile.name == active) {
            return Ok(true);
        }

        let candidate = matches[0];
        if AgentRegistry::can_use(dir, &msg.channel_id, msg.is_group(), &candidate.profile).await {
            self.store
                .set_active_agent(meta, &candidate.profile.name)
                .await?;
            tracing::info!(
                conversation = %meta.id,
                agent = %candidate.profile.name,
                "wake word switched active agent"
            );
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
