//! Bootstrap and run loops for the configured surface.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;

use chirp_channels::{CliSurface, DiscordSurface};
use chirp_core::config::Config;
use chirp_core::engine::{ChatEngine, ReplyRequest};
use chirp_core::live_edit::LiveEditReconciler;
use chirp_core::registry::AgentRegistry;
use chirp_core::router::WakeupRouter;
use chirp_core::surface::{Incoming, Messenger, conversation_meta};
use chirp_memory::ContextStore;

pub async fn build(config: &Config) -> anyhow::Result<(ChatEngine, WakeupRouter)> {
    let registry = Arc::new(AgentRegistry::from_config(config));
    let store = Arc::new(
        ContextStore::open(&config.store.path)
            .await
            .context("failed to open context store")?,
    );
    tracing::info!(
        agents = registry.len(),
        store = %config.store.path,
        "chirp initialized"
    );
    let engine = ChatEngine::new(Arc::clone(&registry), Arc::clone(&store));
    let router = WakeupRouter::new(registry, store);
    Ok((engine, router))
}

/// Read lines from stdin and print streamed replies. The terminal is a
/// direct conversation: everything triggers unless a wake word hands the
/// conversation to another agent first.
pub async fn run_cli(engine: ChatEngine, router: WakeupRouter) -> anyhow::Result<()> {
    let surface = CliSurface;
    let user = std::env::var("USER").unwrap_or_else(|_| "user".into());
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let content = line.trim();
        if content.is_empty() {
            continue;
        }

        let msg = Incoming {
            channel_id: "cli".into(),
            author_id: user.clone(),
            author_name: Some(user.clone()),
            content: content.to_owned(),
            ..Incoming::default()
        };
        let meta = conversation_meta(&surface, &msg).await;
        if !router.should_respond(&surface, &msg, &meta).await? {
            continue;
        }

        let mut stream = engine.reply_stream(surface, ReplyRequest::from_incoming(meta, &msg));
        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => {
                    print!("{fragment}");
                    std::io::stdout().flush().ok();
                }
                Err(e) => {
                    tracing::error!("generation failed: {e:#}");
                    break;
                }
            }
        }
        println!();
    }
    Ok(())
}

/// Listen on the Discord gateway and answer with live-edited messages.
pub async fn run_discord(
    engine: ChatEngine,
    router: WakeupRouter,
    token: String,
) -> anyhow::Result<()> {
    let (surface, mut rx) = DiscordSurface::connect(token);
    tracing::info!("discord surface connected, waiting for messages");

    while let Some(msg) = rx.recv().await {
        let engine = engine.clone();
        let router = router.clone();
        let surface = surface.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_message(&engine, &router, surface, msg).await {
                tracing::error!("message handling failed: {e:#}");
            }
        });
    }
    Ok(())
}

async fn handle_message(
    engine: &ChatEngine,
    router: &WakeupRouter,
    surface: DiscordSurface,
    msg: Incoming,
) -> anyhow::Result<()> {
    let meta = conversation_meta(&surface, &msg).await;
    if !router.should_respond(&surface, &msg, &meta).await? {
        return Ok(());
    }

    let _ = surface.send_typing(&msg.channel_id).await;
    let message_id = surface.send_message(&msg.channel_id, "…").await?;
    let retry = engine.active_retry(&meta).await?;
    let mut reconciler =
        LiveEditReconciler::new(surface.clone(), msg.channel_id.clone(), message_id, retry);

    let mut stream = engine.reply_stream(surface, ReplyRequest::from_incoming(meta, &msg));
    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(fragment) => reconciler.push(&fragment),
            Err(e) => {
                // Mutations already committed stay in place; the reconciler
                // converges whatever text arrived before the failure.
                tracing::error!("generation failed mid-stream: {e:#}");
                break;
            }
        }
    }
    reconciler.finish().await?;
    Ok(())
}
