//! Streaming price endpoint
//!
//! The client upgrades to a WebSocket and sends one streamPrices envelope;
//! the server replies with an ack and then a frame per canonical price for
//! the subscribed pairs. The stream closes on client abort; on server
//! shutdown a STREAM_ABORTED error frame is sent before the close, and on
//! idle timeout a STREAM_TIMEOUT one. Slow subscribers lose the oldest
//! frames, never the connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use priceverse_core::{CoreError, ErrorCode, Pair, RpcRequest, RpcResponse};

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/rpc/stream", get(stream_handler))
}

#[derive(Debug, Deserialize)]
struct StreamInput {
    pairs: Vec<String>,
}

async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

/// Resolves once `shutdown` flips to `true`. Equivalent to
/// `shutdown.wait_for(|stop| *stop)`, but never holds the internal
/// `watch::Ref` guard across an `.await`, so the returned future stays
/// `Send` when used alongside other branches in `tokio::select!`.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn handle_stream(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown.clone();

    // First frame must be a streamPrices envelope
    let request = loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => {
                debug!("[Stream] server shutdown before subscribe");
                return;
            }

            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<RpcRequest>(&text) {
                        Ok(request) if request.method == "streamPrices" => break request,
                        Ok(request) => {
                            send_error(
                                &mut sender,
                                &request.id,
                                CoreError::invalid_params("expected a streamPrices request"),
                            )
                            .await;
                            return;
                        }
                        Err(e) => {
                            send_error(
                                &mut sender,
                                "unknown",
                                CoreError::invalid_params(format!("malformed envelope: {e}")),
                            )
                            .await;
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Err(e)) => {
                    debug!("[Stream] socket error during handshake: {}", e);
                    return;
                }
                _ => {}
            }
        }
    };

    let pairs = match parse_pairs(&request.input) {
        Ok(pairs) => pairs,
        Err(error) => {
            send_error(&mut sender, &request.id, error).await;
            return;
        }
    };

    info!("[Stream] {} subscribed to {:?}", request.id, pairs);
    let ack = RpcResponse::ok(
        request.id.clone(),
        serde_json::json!({"subscribed": pairs}),
    );
    if send_json(&mut sender, &ack).await.is_err() {
        return;
    }

    let mut updates = state.broadcaster.subscribe();
    let idle_timeout = Duration::from_secs(state.streaming.idle_timeout_secs.max(1));
    let mut idle_deadline = Instant::now() + idle_timeout;

    loop {
        tokio::select! {
            // Server side: supervisor shutdown aborts every open stream
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("[Stream] {} aborted by server shutdown", request.id);
                send_error(
                    &mut sender,
                    &request.id,
                    CoreError::new(ErrorCode::StreamAborted, "stream aborted by server shutdown"),
                )
                .await;
                return;
            }

            // Client side: any close or error aborts the stream
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("[Stream] {} aborted by client", request.id);
                        return;
                    }
                    Some(Err(e)) => {
                        debug!("[Stream] {} socket error: {}", request.id, e);
                        return;
                    }
                    _ => {}
                }
            }

            update = updates.recv() => {
                match update {
                    Ok(snapshot) if pairs.contains(&snapshot.pair) => {
                        let frame = serde_json::json!({
                            "pair": snapshot.pair,
                            "price": snapshot.price,
                            "timestamp": snapshot.timestamp,
                        });
                        if send_json(&mut sender, &frame).await.is_err() {
                            return;
                        }
                        idle_deadline = Instant::now() + idle_timeout;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[Stream] {} lagged, dropped {} oldest frames", request.id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return;
                    }
                }
            }

            _ = sleep_until(idle_deadline) => {
                info!("[Stream] {} idle for {:?}, closing", request.id, idle_timeout);
                send_error(
                    &mut sender,
                    &request.id,
                    CoreError::new(ErrorCode::StreamTimeout, "stream idle timeout"),
                )
                .await;
                return;
            }
        }
    }
}

fn parse_pairs(input: &serde_json::Value) -> Result<Vec<Pair>, CoreError> {
    let input: StreamInput = serde_json::from_value(input.clone())
        .map_err(|e| CoreError::invalid_params(format!("bad input: {e}")))?;
    if input.pairs.is_empty() {
        return Err(CoreError::invalid_params("pairs must not be empty"));
    }
    input.pairs.iter().map(|raw| Pair::from_str(raw)).collect()
}

async fn send_json<T: serde::Serialize>(
    sender: &mut (impl SinkExt<Message> + Unpin),
    value: &T,
) -> Result<(), ()> {
    let text = serde_json::to_string(value).map_err(|_| ())?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn send_error(
    sender: &mut (impl SinkExt<Message> + Unpin),
    id: &str,
    error: CoreError,
) {
    let reply = RpcResponse::err(id, error);
    let _ = send_json(sender, &reply).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs_validates() {
        let pairs = parse_pairs(&serde_json::json!({"pairs": ["btc-usd", "eth-rub"]})).unwrap();
        assert_eq!(pairs, vec![Pair::BtcUsd, Pair::EthRub]);

        let err = parse_pairs(&serde_json::json!({"pairs": []})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);

        let err = parse_pairs(&serde_json::json!({"pairs": ["doge-usd"]})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPair);
    }
}
