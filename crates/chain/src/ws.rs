//! The `eth_subscribe("newHeads")` websocket transport used by live sync's
//! subscription mode, plus the short probe used to decide whether
//! subscription mode is even available.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::ChainError;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Sends `eth_subscribe("newHeads")` and waits for the subscription-id
/// response, confirming the endpoint actually supports it. Used only as a
/// probe; the connection is dropped afterwards.
pub async fn probe_new_heads(ws_url: &Url) -> Result<(), ChainError> {
    let (mut stream, _) = connect_async(ws_url.as_str())
        .await
        .map_err(|err| ChainError::Transport(format!("websocket connect failed: {err}")))?;

    send_subscribe(&mut stream).await?;
    let _subscription_id = read_subscription_id(&mut stream).await?;
    Ok(())
}

async fn send_subscribe(stream: &mut WsStream) -> Result<(), ChainError> {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["newHeads"],
    });
    stream
        .send(Message::Text(request.to_string()))
        .await
        .map_err(|err| ChainError::Transport(format!("websocket send failed: {err}")))
}

async fn read_subscription_id(stream: &mut WsStream) -> Result<String, ChainError> {
    loop {
        let message = stream
            .next()
            .await
            .ok_or_else(|| ChainError::Transport("websocket closed before subscription ack".to_owned()))?
            .map_err(|err| ChainError::Transport(format!("websocket recv failed: {err}")))?;
        let Message::Text(text) = message else {
            continue;
        };
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|err| ChainError::Abi(format!("malformed subscription ack: {err}")))?;
        if let Some(result) = parsed.get("result").and_then(Value::as_str) {
            return Ok(result.to_owned());
        }
    }
}

/// A live `newHeads` subscription. `next_head` resolves once per new block
/// header; callers don't need the header contents, only the signal that one
/// arrived.
pub struct NewHeadsSubscription {
    stream: WsStream,
    subscription_id: String,
}

impl NewHeadsSubscription {
    pub async fn connect(ws_url: &Url) -> Result<Self, ChainError> {
        let (mut stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|err| ChainError::Transport(format!("websocket connect failed: {err}")))?;
        send_subscribe(&mut stream).await?;
        let subscription_id = read_subscription_id(&mut stream).await?;
        Ok(Self { stream, subscription_id })
    }

    /// Waits for the next `eth_subscription` notification matching this
    /// subscription's id.
    pub async fn next_head(&mut self) -> Result<(), ChainError> {
        loop {
            let message = self
                .stream
                .next()
                .await
                .ok_or_else(|| ChainError::Transport("websocket closed during live subscription".to_owned()))?
                .map_err(|err| ChainError::Transport(format!("websocket recv failed: {err}")))?;
            let Message::Text(text) = message else {
                continue;
            };
            let parsed: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if parsed.get("method").and_then(Value::as_str) != Some("eth_subscription") {
                continue;
            }
            let matches_id = parsed
                .get("params")
                .and_then(|p| p.get("subscription"))
                .and_then(Value::as_str)
                == Some(self.subscription_id.as_str());
            if matches_id {
                return Ok(());
            }
        }
    }

    pub async fn close(mut self) -> Result<(), ChainError> {
        self.stream
            .close(None)
            .await
            .map_err(|err| ChainError::Transport(format!("websocket close failed: {err}")))
    }
}
