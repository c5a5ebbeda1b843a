//! Minimal WebSocket client helpers for talking to the agent.

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::types::ServerEvent;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Adds `?token=` when a token is given; rejects non-websocket schemes.
pub fn agent_url(base: &str, token: Option<&str>) -> anyhow::Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid agent url '{base}'"))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        anyhow::bail!("agent url must start with ws:// or wss://, got '{base}'");
    }
    if let Some(t) = token {
        url.query_pairs_mut().append_pair("token", t);
    }
    Ok(url)
}

pub async fn connect(url: &Url) -> anyhow::Result<WsStream> {
    let (ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {url}"))?;
    Ok(ws)
}

pub async fn send_text(ws: &mut WsStream, text: String) -> anyhow::Result<()> {
    ws.send(Message::Text(text)).await.context("sending request")
}

pub async fn subscribe(ws: &mut WsStream, interest: &str) -> anyhow::Result<()> {
    send_text(ws, json!({"op": "subscribe", "interest": interest}).to_string()).await
}

pub async fn subscribe_logs(ws: &mut WsStream, instance: &str) -> anyhow::Result<()> {
    send_text(ws, json!({"op": "subscribeLogs", "instance": instance}).to_string()).await
}

pub async fn request_stream_status(ws: &mut WsStream) -> anyhow::Result<()> {
    send_text(ws, json!({"op": "streamStatus"}).to_string()).await
}

pub async fn request_metrics(ws: &mut WsStream) -> anyhow::Result<()> {
    send_text(ws, "get_metrics".into()).await
}

/// Next event the client understands; `None` once the agent closes the socket.
/// Frames for events this client doesn't know are skipped.
pub async fn next_event(ws: &mut WsStream) -> anyhow::Result<Option<ServerEvent>> {
    while let Some(msg) = ws.next().await {
        match msg.context("reading from agent")? {
            Message::Text(text) => {
                if let Ok(ev) = serde_json::from_str::<ServerEvent>(&text) {
                    return Ok(Some(ev));
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(None)
}
