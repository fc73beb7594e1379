//! Serialized streaming generation over the context store.
//!
//! One invocation is the whole pipeline: resolve the active agent,
//! validate, trim the window, append the user turn, stream the upstream
//! completion re-chunked into flush-worthy fragments, then append the
//! assistant turn. The entire invocation runs inside the generation gate,
//! so a second caller blocks until the first has committed its final
//! history append.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures_core::Stream;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

use chirp_llm::provider::{LlmProvider, Message};
use chirp_memory::{ContextStore, ConversationMeta};

use crate::error::EngineError;
use crate::registry::{AgentRegistry, RetryPolicy};
use crate::surface::{Directory, Incoming, resolve_display_name};

/// Lazy, finite sequence of reply fragments. Single pass; dropping it
/// early releases the generation gate without appending an assistant turn.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// One generation request: the conversation it belongs to, the raw input,
/// and whatever speaker identity the transport knows.
#[derive(Clone, Debug)]
pub struct ReplyRequest {
    pub meta: ConversationMeta,
    pub content: String,
    pub author_id: String,
    pub author_name: Option<String>,
    pub author_nick: Option<String>,
}

impl ReplyRequest {
    #[must_use]
    pub fn from_incoming(meta: ConversationMeta, msg: &Incoming) -> Self {
        Self {
            meta,
            content: msg.content.clone(),
            author_id: msg.author_id.clone(),
            author_name: msg.author_name.clone(),
            author_nick: msg.author_nick.clone(),
        }
    }
}

/// Summary row for the agent listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentInfo {
    pub name: String,
    pub restricted: bool,
    pub active: bool,
}

#[derive(Clone)]
pub struct ChatEngine {
    registry: Arc<AgentRegistry>,
    store: Arc<ContextStore>,
    generation_gate: Arc<Mutex<()>>,
}

impl ChatEngine {
    #[must_use]
    pub fn new(registry: Arc<AgentRegistry>, store: Arc<ContextStore>) -> Self {
        Self {
            registry,
            store,
            generation_gate: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Stream a reply to `req`, holding the generation gate from the first
    /// poll until the assistant turn is committed.
    ///
    /// Unknown-agent and over-long-prompt conditions yield a single
    /// explanatory fragment and end the stream without touching state.
    /// Infrastructure failures surface as `Err` items and end the stream;
    /// mutations already committed stay committed.
    pub fn reply_stream<D>(&self, dir: D, req: ReplyRequest) -> ReplyStream
    where
        D: Directory + Send + Sync + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let store = Arc::clone(&self.store);
        let gate = Arc::clone(&self.generation_gate);

        Box::pin(try_stream! {
            let _generation = gate.lock().await;

            let active = store.active_agent(&req.meta).await?;
            let agent_name = active.unwrap_or_else(|| registry.default_name().to_owned());

            match registry.resolve(&agent_name) {
                None => {
                    yield format!("agent \"{agent_name}\" is not configured");
                }
                Some(agent) if req.content.chars().count() > agent.profile.max_prompt_length => {
                    yield format!(
                        "that prompt is too long, please keep it under {} characters",
                        agent.profile.max_prompt_length
                    );
                }
                Some(agent) => {
                    let profile = &agent.profile;

                    // Window cap check runs once, before the new user turn.
                    if store.window_size(&req.meta).await? > profile.max_context_turns * 2 {
                        store
                            .set_window_size(&req.meta, profile.trim_to_turns * 2)
                            .await?;
                    }

                    let speaker = resolve_display_name(
                        &dir,
                        req.author_nick.as_deref(),
                        req.author_name.as_deref(),
                        &req.author_id,
                    )
                    .await;
                    store
                        .push_history(
                            &req.meta,
                            &[Message::user(
                                format!("{speaker}:{}", req.content),
                                Some(speaker),
                            )],
                        )
                        .await?;
                    store.bump_window(&req.meta).await?;

                    // Prompt order: preamble first, then the trailing window,
                    // read only after the user turn landed.
                    let mut prompt = profile.system_preamble.clone();
                    prompt.extend(store.context(&req.meta).await?);

                    let mut upstream = agent
                        .provider
                        .chat_stream(&profile.sampling, &prompt)
                        .await?;

                    let mut pending = String::new();
                    let mut full = String::new();
                    while let Some(token) = upstream.next().await {
                        let token = token?;
                        pending.push_str(&token);
                        full.push_str(&token);
                        // Whitespace-only tokens are held, not flushed alone.
                        if !token.trim().is_empty() {
                            yield std::mem::take(&mut pending);
                        }
                    }
                    if !pending.is_empty() {
                        yield std::mem::take(&mut pending);
                    }

                    store
                        .push_history(
                            &req.meta,
                            &[Message::assistant(full, Some(profile.name.clone()))],
                        )
                        .await?;
                    store.bump_window(&req.meta).await?;
                }
            }
        })
    }

    /// Drain [`Self::reply_stream`] into one string.
    ///
    /// # Errors
    ///
    /// Returns the first infrastructure failure; validation-class
    /// conditions come back as the reply text itself.
    pub async fn reply<D>(&self, dir: D, req: ReplyRequest) -> Result<String, EngineError>
    where
        D: Directory + Send + Sync + 'static,
    {
        let mut stream = self.reply_stream(dir, req);
        let mut out = String::new();
        while let Some(fragment) = stream.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }

    /// The in-context view of a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn context(&self, meta: &ConversationMeta) -> Result<Vec<Message>, EngineError> {
        Ok(self.store.context(meta).await?)
    }

    /// Reset the context window without touching history.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn clear_context(&self, meta: &ConversationMeta) -> Result<(), EngineError> {
        Ok(self.store.clear_context(meta).await?)
    }

    /// Name of the agent currently answering for this conversation.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn active_agent(&self, meta: &ConversationMeta) -> Result<String, EngineError> {
        let active = self.store.active_agent(meta).await?;
        Ok(active.unwrap_or_else(|| self.registry.default_name().to_owned()))
    }

    /// Retry budget of the agent currently bound to this conversation.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn active_retry(&self, meta: &ConversationMeta) -> Result<RetryPolicy, EngineError> {
        let name = self.active_agent(meta).await?;
        Ok(self
            .registry
            .resolve(&name)
            .map(|a| a.profile.retry)
            .unwrap_or_default())
    }

    /// Bind a different agent to the conversation, subject to the
    /// restricted-access gate.
    ///
    /// # Errors
    ///
    /// `AgentNotFound` for unknown names, `AccessDenied` when the gate
    /// refuses, otherwise store failures. The binding is unchanged on any
    /// error.
    pub async fn set_active_agent<D: Directory>(
        &self,
        dir: &D,
        meta: &ConversationMeta,
        name: &str,
    ) -> Result<(), EngineError> {
        let Some(agent) = self.registry.resolve(name) else {
            return Err(EngineError::AgentNotFound(name.to_owned()));
        };
        if !AgentRegistry::can_use(dir, &meta.id, meta.is_group(), &agent.profile).await {
            return Err(EngineError::AccessDenied(name.to_owned()));
        }
        self.store.set_active_agent(meta, name).await?;
        Ok(())
    }

    /// All configured agents, flagging the one bound to this conversation.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn list_agents(
        &self,
        meta: &ConversationMeta,
    ) -> Result<Vec<AgentInfo>, EngineError> {
        let active = self.active_agent(meta).await?;
        Ok(self
            .registry
            .iter()
            .map(|a| AgentInfo {
                name: a.profile.name.clone(),
                restricted: a.profile.restricted,
                active: a.profile.name == active,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chirp_llm::any::AnyProvider;
    use chirp_llm::mock::MockProvider;
    use chirp_llm::provider::Role;

    use crate::registry::testing::{mock_handle, profile};
    use crate::registry::AgentHandle;
    use crate::surface::testing::StubDirectory;

    fn meta(id: &str) -> ConversationMeta {
        ConversationMeta::group(id, "general", "g1", "guild")
    }

    fn request(meta: ConversationMeta, content: &str) -> ReplyRequest {
        ReplyRequest {
            meta,
            content: content.into(),
            author_id: "u1".into(),
            author_name: Some("alice".into()),
            author_nick: None,
        }
    }

    async fn engine_with(handles: Vec<AgentHandle>, default: &str) -> ChatEngine {
        let registry = Arc::new(AgentRegistry::new(handles, default));
        let store = Arc::new(ContextStore::open(":memory:").await.unwrap());
        ChatEngine::new(registry, store)
    }

    fn hello_world_tokens() -> Vec<String> {
        vec!["Hello".into(), " ".into(), "world".into(), "!".into()]
    }

    #[tokio::test]
    async fn fragments_rechunk_and_concatenate() {
        let engine = engine_with(vec![mock_handle("neko", hello_world_tokens())], "neko").await;
        let m = meta("ch1");

        let mut stream = engine.reply_stream(StubDirectory::default(), request(m, "hi"));
        let mut fragments = Vec::new();
        while let Some(fragment) = stream.next().await {
            fragments.push(fragment.unwrap());
        }

        assert_eq!(fragments.concat(), "Hello world!");
        assert!(fragments.iter().all(|f| !f.is_empty()));
        // The lone space is held and flushed with the next word.
        assert_eq!(fragments, vec!["Hello", " world", "!"]);
    }

    #[tokio::test]
    async fn both_turns_committed_with_speaker_names() {
        let engine = engine_with(vec![mock_handle("neko", hello_world_tokens())], "neko").await;
        let m = meta("ch1");

        engine
            .reply(StubDirectory::default(), request(m.clone(), "hi"))
            .await
            .unwrap();

        let history = engine.store().chat_history(&m).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "alice:hi");
        assert_eq!(history[0].name.as_deref(), Some("alice"));
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "Hello world!");
        assert_eq!(history[1].name.as_deref(), Some("neko"));
        assert_eq!(engine.store().window_size(&m).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_agent_yields_text_without_mutation() {
        let engine = engine_with(vec![mock_handle("neko", hello_world_tokens())], "neko").await;
        let m = meta("ch1");
        engine.store().set_active_agent(&m, "ghost").await.unwrap();

        let reply = engine
            .reply(StubDirectory::default(), request(m.clone(), "hi"))
            .await
            .unwrap();

        assert!(reply.contains("ghost"));
        assert!(reply.contains("not configured"));
        assert!(engine.store().chat_history(&m).await.unwrap().is_empty());
        assert_eq!(engine.store().window_size(&m).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn long_prompt_yields_text_without_mutation() {
        let engine = engine_with(vec![mock_handle("neko", hello_world_tokens())], "neko").await;
        let m = meta("ch1");

        let long = "x".repeat(1001);
        let reply = engine
            .reply(StubDirectory::default(), request(m.clone(), &long))
            .await
            .unwrap();

        assert!(reply.contains("too long"));
        assert!(reply.contains("1000"));
        assert!(engine.store().chat_history(&m).await.unwrap().is_empty());
        assert_eq!(engine.store().window_size(&m).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn prompt_at_limit_is_accepted() {
        let engine = engine_with(vec![mock_handle("neko", hello_world_tokens())], "neko").await;
        let m = meta("ch1");

        let at_limit = "x".repeat(1000);
        engine
            .reply(StubDirectory::default(), request(m.clone(), &at_limit))
            .await
            .unwrap();

        assert_eq!(engine.store().window_size(&m).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn oversized_window_trimmed_before_user_turn() {
        let engine = engine_with(vec![mock_handle("neko", hello_world_tokens())], "neko").await;
        let m = meta("ch1");

        // Above the cap of 2 * max_context_turns = 40.
        engine.store().set_window_size(&m, 41).await.unwrap();
        engine
            .reply(StubDirectory::default(), request(m.clone(), "hi"))
            .await
            .unwrap();

        // Trimmed to 2 * trim_to_turns = 20, then +2 for the new exchange.
        assert_eq!(engine.store().window_size(&m).await.unwrap(), 22);
    }

    #[tokio::test]
    async fn window_at_cap_not_trimmed() {
        let engine = engine_with(vec![mock_handle("neko", hello_world_tokens())], "neko").await;
        let m = meta("ch1");

        engine.store().set_window_size(&m, 40).await.unwrap();
        engine
            .reply(StubDirectory::default(), request(m.clone(), "hi"))
            .await
            .unwrap();

        assert_eq!(engine.store().window_size(&m).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn prompt_is_preamble_plus_context() {
        let mock = MockProvider::with_tokens("neko", hello_world_tokens());
        let mut p = profile("neko");
        p.system_preamble = vec![Message::system("you are a cat")];
        let handle = AgentHandle {
            profile: p,
            provider: AnyProvider::Mock(mock.clone()),
        };
        let engine = engine_with(vec![handle], "neko").await;
        let m = meta("ch1");

        engine
            .reply(StubDirectory::default(), request(m.clone(), "hi"))
            .await
            .unwrap();

        let prompts = mock.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0][0].role, Role::System);
        assert_eq!(prompts[0][0].content, "you are a cat");
        // Context holds only the freshly appended user turn.
        assert_eq!(prompts[0].len(), 2);
        assert_eq!(prompts[0][1].content, "alice:hi");
    }

    #[tokio::test]
    async fn cleared_context_sends_preamble_and_new_turn_only() {
        let mock = MockProvider::with_tokens("neko", hello_world_tokens());
        let handle = AgentHandle {
            profile: profile("neko"),
            provider: AnyProvider::Mock(mock.clone()),
        };
        let engine = engine_with(vec![handle], "neko").await;
        let m = meta("ch1");

        engine
            .reply(StubDirectory::default(), request(m.clone(), "first"))
            .await
            .unwrap();
        engine.clear_context(&m).await.unwrap();
        engine
            .reply(StubDirectory::default(), request(m.clone(), "second"))
            .await
            .unwrap();

        let prompts = mock.prompts();
        assert_eq!(prompts[1].len(), 1);
        assert_eq!(prompts[1][0].content, "alice:second");
        // History still remembers everything.
        assert_eq!(engine.store().chat_history(&m).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn concurrent_replies_serialize_without_lost_turns() {
        let engine = engine_with(
            vec![mock_handle(
                "neko",
                vec!["ok".into()],
            )],
            "neko",
        )
        .await;
        let m = meta("ch1");

        let mut handles = Vec::new();
        for i in 0..4 {
            let engine = engine.clone();
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .reply(StubDirectory::default(), request(m, &format!("msg {i}")))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(engine.store().window_size(&m).await.unwrap(), 8);
        let history = engine.store().chat_history(&m).await.unwrap();
        assert_eq!(history.len(), 8);
        // Strict call-commit order: user/assistant pairs never interleave.
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }

    #[tokio::test]
    async fn dropped_stream_releases_gate() {
        let engine = engine_with(
            vec![mock_handle("neko", hello_world_tokens())],
            "neko",
        )
        .await;
        let m = meta("ch1");

        {
            let mut stream =
                engine.reply_stream(StubDirectory::default(), request(m.clone(), "hi"));
            // Take one fragment, then abandon the rest.
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first, "Hello");
        }

        // A second generation must not deadlock.
        let reply = tokio::time::timeout(
            Duration::from_secs(5),
            engine.reply(StubDirectory::default(), request(m, "again")),
        )
        .await
        .expect("generation gate was not released")
        .unwrap();
        assert_eq!(reply, "Hello world!");
    }

    #[tokio::test]
    async fn set_active_agent_unknown_name() {
        let engine = engine_with(vec![mock_handle("neko", hello_world_tokens())], "neko").await;
        let m = meta("ch1");

        let err = engine
            .set_active_agent(&StubDirectory::default(), &m, "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AgentNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn set_active_agent_denied_leaves_binding() {
        let mut restricted = profile("spicy");
        restricted.restricted = true;
        let handles = vec![
            mock_handle("neko", hello_world_tokens()),
            AgentHandle {
                profile: restricted,
                provider: AnyProvider::Mock(MockProvider::new("spicy")),
            },
        ];
        let engine = engine_with(handles, "neko").await;
        let m = meta("ch1");

        let err = engine
            .set_active_agent(&StubDirectory::default(), &m, "spicy")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied(_)));
        assert_eq!(engine.active_agent(&m).await.unwrap(), "neko");
    }

    #[tokio::test]
    async fn list_agents_flags_active() {
        let engine = engine_with(
            vec![
                mock_handle("neko", hello_world_tokens()),
                mock_handle("inu", hello_world_tokens()),
            ],
            "neko",
        )
        .await;
        let m = meta("ch1");
        engine
            .set_active_agent(&StubDirectory::default(), &m, "inu")
            .await
            .unwrap();

        let agents = engine.list_agents(&m).await.unwrap();
        assert_eq!(agents.len(), 2);
        assert!(!agents[0].active);
        assert!(agents[1].active);
        assert_eq!(agents[1].name, "inu");
    }
}
