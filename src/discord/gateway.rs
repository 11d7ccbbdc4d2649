//! Discord gateway connection for live MESSAGE_CREATE events.
//!
//! Implements the minimal protocol slice needed to stream new messages:
//! Hello, Identify, heartbeating, and dispatch handling. Dropped connections
//! are re-established with a capped backoff.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::types::Message;
use crate::harvest::listener::MessageEventSource;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = 1 | (1 << 9) | (1 << 15);

#[derive(Debug, Serialize, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Option<Value>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// Live event source backed by the Discord gateway websocket.
pub struct DiscordGateway {
    url: String,
    token: String,
}

impl DiscordGateway {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            url: GATEWAY_URL.to_string(),
            token: token.into(),
        }
    }

    fn identify_payload(&self) -> GatewayPayload {
        GatewayPayload {
            op: OP_IDENTIFY,
            d: Some(json!({
                "token": self.token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": env!("CARGO_PKG_NAME"),
                    "device": env!("CARGO_PKG_NAME"),
                },
            })),
            s: None,
            t: None,
        }
    }

    /// Runs a single gateway session until the connection drops.
    async fn run_session(&self, tx: &mpsc::Sender<Message>) -> Result<()> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .context("gateway connection failed")?;
        let (mut writer, mut reader) = ws.split();

        // First payload must be Hello with the heartbeat interval
        let hello = timeout(HELLO_TIMEOUT, reader.next())
            .await
            .context("timed out waiting for Hello")?
            .ok_or_else(|| anyhow!("gateway closed before Hello"))?
            .context("websocket error before Hello")?;
        let hello: GatewayPayload = match hello {
            WsMessage::Text(text) => serde_json::from_str(&text)?,
            other => return Err(anyhow!("unexpected frame before Hello: {other:?}")),
        };
        if hello.op != OP_HELLO {
            return Err(anyhow!("expected Hello, got op {}", hello.op));
        }
        let heartbeat_ms = hello
            .d
            .as_ref()
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("Hello missing heartbeat_interval"))?;
        debug!(interval_ms = heartbeat_ms, "Gateway Hello received");

        let payload = serde_json::to_string(&self.identify_payload())?;
        writer.send(WsMessage::Text(payload.into())).await?;

        let mut heartbeat = interval(Duration::from_millis(heartbeat_ms));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seq: Option<u64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = GatewayPayload {
                        op: OP_HEARTBEAT,
                        d: last_seq.map(|s| json!(s)),
                        s: None,
                        t: None,
                    };
                    let text = serde_json::to_string(&beat)?;
                    writer.send(WsMessage::Text(text.into())).await?;
                }
                frame = reader.next() => {
                    let frame = frame
                        .ok_or_else(|| anyhow!("gateway stream ended"))?
                        .context("websocket error")?;
                    match frame {
                        WsMessage::Text(text) => {
                            let payload: GatewayPayload = match serde_json::from_str(&text) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(error = %e, "Unparseable gateway payload");
                                    continue;
                                }
                            };
                            if let Some(seq) = payload.s {
                                last_seq = Some(seq);
                            }
                            match payload.op {
                                OP_DISPATCH => {
                                    if payload.t.as_deref() == Some("READY") {
                                        info!("Gateway ready");
                                    } else if payload.t.as_deref() == Some("MESSAGE_CREATE") {
                                        if let Some(data) = payload.d {
                                            match serde_json::from_value::<Message>(data) {
                                                Ok(message) => {
                                                    if tx.send(message).await.is_err() {
                                                        // Receiver gone, shut down
                                                        return Ok(());
                                                    }
                                                }
                                                Err(e) => {
                                                    warn!(error = %e, "Unparseable MESSAGE_CREATE");
                                                }
                                            }
                                        }
                                    }
                                }
                                OP_HEARTBEAT => {
                                    // Gateway asked for an immediate heartbeat
                                    let beat = GatewayPayload {
                                        op: OP_HEARTBEAT,
                                        d: last_seq.map(|s| json!(s)),
                                        s: None,
                                        t: None,
                                    };
                                    let text = serde_json::to_string(&beat)?;
                                    writer.send(WsMessage::Text(text.into())).await?;
                                }
                                OP_HEARTBEAT_ACK => {}
                                other => {
                                    debug!(op = other, "Unhandled gateway opcode");
                                }
                            }
                        }
                        WsMessage::Ping(data) => {
                            writer.send(WsMessage::Pong(data)).await?;
                        }
                        WsMessage::Close(frame) => {
                            return Err(anyhow!("gateway closed: {frame:?}"));
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessageEventSource for DiscordGateway {
    async fn run(&self, tx: mpsc::Sender<Message>) -> Result<()> {
        let mut backoff = Duration::from_secs(1);

        loop {
            match self.run_session(&tx).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "Gateway session ended, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_payload_shape() {
        let gw = DiscordGateway::new("t0ken");
        let payload = gw.identify_payload();
        assert_eq!(payload.op, OP_IDENTIFY);
        let d = payload.d.unwrap();
        assert_eq!(d["token"], "t0ken");
        assert_eq!(d["intents"], INTENTS);
    }

    #[test]
    fn test_dispatch_payload_parses() {
        let raw = r#"{"op":0,"d":{"id":"1","channel_id":"2"},"s":42,"t":"MESSAGE_CREATE"}"#;
        let payload: GatewayPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.op, OP_DISPATCH);
        assert_eq!(payload.s, Some(42));
        assert_eq!(payload.t.as_deref(), Some("MESSAGE_CREATE"));
    }
}
