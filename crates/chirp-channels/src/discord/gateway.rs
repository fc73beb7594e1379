//! Discord Gateway WebSocket listener: hello/identify handshake,
//! heartbeats, reconnects, and MESSAGE_CREATE delivery as [`Incoming`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use chirp_core::surface::Incoming;

use super::rewrite_mentions;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type SessionError = Box<dyn std::error::Error + Send + Sync>;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

// Intents: GUILD_MESSAGES (1<<9) | DIRECT_MESSAGES (1<<12) | MESSAGE_CONTENT (1<<15)
const INTENTS: u64 = (1 << 9) | (1 << 12) | (1 << 15);

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct Payload {
    op: u8,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    d: Value,
}

#[derive(Serialize)]
struct Identify<'a> {
    op: u8,
    d: IdentifyData<'a>,
}

#[derive(Serialize)]
struct IdentifyData<'a> {
    token: &'a str,
    intents: u64,
    properties: IdentifyProperties,
}

#[derive(Serialize)]
struct IdentifyProperties {
    os: String,
    browser: String,
    device: String,
}

#[derive(Serialize)]
struct Heartbeat {
    op: u8,
    d: Option<u64>,
}

/// Spawn the gateway connection loop, returning a receiver of inbound
/// messages.
#[must_use]
pub fn spawn_gateway(token: String) -> mpsc::Receiver<Incoming> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(gateway_loop(token, tx));
    rx
}

async fn gateway_loop(token: String, tx: mpsc::Sender<Incoming>) {
    loop {
        match run_session(&token, &tx).await {
            Ok(()) => {
                tracing::info!("discord gateway session ended, reconnecting");
            }
            Err(e) => {
                tracing::warn!(
                    "discord gateway error: {e}, reconnecting in {}s",
                    RECONNECT_DELAY.as_secs()
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
        if tx.is_closed() {
            return;
        }
    }
}

async fn run_session(token: &str, tx: &mpsc::Sender<Incoming>) -> Result<(), SessionError> {
    let (ws_stream, _): (WsStream, _) = connect_async(GATEWAY_URL).await?;
    let (mut write, mut read) = ws_stream.split();

    // The server speaks first with Hello (op 10).
    let hello = read_next_payload(&mut read).await?;
    if hello.op != 10 {
        return Err(format!("expected Hello (op 10), got op {}", hello.op).into());
    }
    let heartbeat_interval = hello
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .unwrap_or(41_250);

    let identify = Identify {
        op: 2,
        d: IdentifyData {
            token,
            intents: INTENTS,
            properties: IdentifyProperties {
                os: std::env::consts::OS.into(),
                browser: "chirp".into(),
                device: "chirp".into(),
            },
        },
    };
    write
        .send(WsMessage::Text(serde_json::to_string(&identify)?.into()))
        .await?;

    let mut self_id = String::new();
    let mut sequence: Option<u64> = None;
    let mut heartbeat_timer = tokio::time::interval(Duration::from_millis(heartbeat_interval));

    loop {
        tokio::select! {
            _ = heartbeat_timer.tick() => {
                let hb = Heartbeat { op: 1, d: sequence };
                write.send(WsMessage::Text(serde_json::to_string(&hb)?.into())).await?;
            }
            msg = read.next() => {
                let Some(msg) = msg else {
                    return Ok(());
                };
                match msg? {
                    WsMessage::Text(text) => {
                        let payload: Payload = serde_json::from_str(&text)?;
                        if let Some(s) = payload.s {
                            sequence = Some(s);
                        }
                        match payload.op {
                            0 => match payload.t.as_deref() {
                                Some("READY") => {
                                    if let Some(id) = payload
                                        .d
                                        .get("user")
                                        .and_then(|u| u.get("id"))
                                        .and_then(Value::as_str)
                                    {
                                        self_id = id.to_owned();
                                        tracing::info!("discord gateway ready as user {self_id}");
                                    }
                                }
                                Some("MESSAGE_CREATE") => {
                                    if let Some(incoming) = parse_message(&payload.d, &self_id)
                                        && tx.send(incoming).await.is_err()
                                    {
                                        return Ok(());
                                    }
                                }
                                _ => {}
                            },
                            // Server-requested heartbeat.
                            1 => {
                                let hb = Heartbeat { op: 1, d: sequence };
                                write.send(WsMessage::Text(serde_json::to_string(&hb)?.into())).await?;
                            }
                            // Reconnect / invalid session: tear down and redial.
                            7 | 9 => return Ok(()),
                            _ => {}
                        }
                    }
                    WsMessage::Ping(data) => {
                        write.send(WsMessage::Pong(data)).await?;
                    }
                    WsMessage::Close(_) => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

async fn read_next_payload(
    read: &mut futures::stream::SplitStream<WsStream>,
) -> Result<Payload, SessionError> {
    while let Some(msg) = read.next().await {
        if let WsMessage::Text(text) = msg? {
            return Ok(serde_json::from_str(&text)?);
        }
    }
    Err("gateway closed before sending a payload".into())
}

fn parse_message(d: &Value, self_id: &str) -> Option<Incoming> {
    let author = d.get("author")?;
    let author_id = author.get("id")?.as_str()?.to_owned();
    let channel_id = d.get("channel_id")?.as_str()?.to_owned();
    let content = d.get("content").and_then(Value::as_str).unwrap_or_default();

    let mentions: Vec<(String, String)> = d
        .get("mentions")
        .and_then(Value::as_array)
        .map(|users| {
            users
                .iter()
                .filter_map(|u| {
                    let id = u.get("id")?.as_str()?.to_owned();
                    let name = u
                        .get("global_name")
                        .and_then(Value::as_str)
                        .or_else(|| u.get("username").and_then(Value::as_str))
                        .unwrap_or(&id)
                        .to_owned();
                    Some((id, name))
                })
                .collect()
        })
        .unwrap_or_default();
    let mentions_me = !self_id.is_empty() && mentions.iter().any(|(id, _)| id == self_id);

    Some(Incoming {
        channel_id,
        guild_id: d.get("guild_id").and_then(Value::as_str).map(str::to_owned),
        channel_name: None,
        author_name: author
            .get("global_name")
            .and_then(Value::as_str)
            .or_else(|| author.get("username").and_then(Value::as_str))
            .map(str::to_owned),
        author_nick: d
            .get("member")
            .and_then(|m| m.get("nick"))
            .and_then(Value::as_str)
            .map(str::to_owned),
        content: rewrite_mentions(content, self_id, &mentions),
        mentions_me,
        from_me: author_id == self_id,
        author_id,
    })
}
