//! WebSocket event stream speaking the event-bus protocol.
//!
//! Client frames: `subscribe {last_received_seq}`, `ack {seq}`,
//! `replay {since_seq}`. Server frames: `subscribed`, serialized events
//! (`{type, data, at, seq}` where `type` is the dotted event name), and
//! `error`. The first client frame must be `subscribe`; replay of the
//! retained tail precedes live delivery, and deliveries are coalesced at
//! the batching window boundary with intra-window order preserved. A
//! subscriber that falls behind its queue cap is dropped with a
//! `gap-too-large` close reason and must resync from the store.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::services::event_bus::Event;

use super::AppState;

/// Client → server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Subscribe {
        #[serde(default)]
        last_received_seq: u64,
    },
    Ack {
        seq: u64,
    },
    Replay {
        since_seq: u64,
    },
}

pub async fn ws_events(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // The protocol starts with a subscribe frame.
    let last_received_seq = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                Ok(ClientFrame::Subscribe { last_received_seq }) => break last_received_seq,
                Ok(_) => {
                    let _ = send_error(&mut socket, "protocol", "expected subscribe frame").await;
                    return;
                }
                Err(e) => {
                    let _ = send_error(&mut socket, "protocol", &format!("bad frame: {e}")).await;
                    return;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            _ => return,
        }
    };

    let (subscriber_id, tail, receiver) =
        match state.bus.register_subscriber(last_received_seq).await {
            Ok(registered) => registered,
            Err(gap) => {
                let _ = send_error(
                    &mut socket,
                    "gap-too-large",
                    &format!("oldest retained seq {}, latest {}", gap.oldest, gap.latest),
                )
                .await;
                return;
            }
        };

    let subscribed = json!({
        "type": "subscribed",
        "subscriber_id": subscriber_id,
        "seq": state.bus.current_sequence().0,
    });
    if socket.send(Message::Text(subscribed.to_string().into())).await.is_err() {
        state.bus.drop_subscriber(subscriber_id).await;
        return;
    }

    // Replay the retained tail before any live event.
    for event in tail {
        if send_event(&mut socket, &event).await.is_err() {
            state.bus.drop_subscriber(subscriber_id).await;
            return;
        }
    }

    stream_live(&mut socket, &state, subscriber_id, receiver).await;
    state.bus.drop_subscriber(subscriber_id).await;
}

async fn stream_live(
    socket: &mut WebSocket,
    state: &AppState,
    subscriber_id: Uuid,
    mut receiver: broadcast::Receiver<Event>,
) {
    let mut pending: Vec<Event> = Vec::new();

    loop {
        // Coalesce deliveries: after the first event arrives, keep
        // collecting until the batching window elapses, then flush in
        // order.
        tokio::select! {
            received = receiver.recv() => match received {
                Ok(event) => {
                    pending.push(event);
                    let deadline = tokio::time::Instant::now() + state.batch_window;
                    loop {
                        tokio::select! {
                            more = receiver.recv() => match more {
                                Ok(event) => pending.push(event),
                                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                    tracing::warn!(subscriber = %subscriber_id, skipped, "subscriber overflowed");
                                    let _ = send_error(socket, "gap-too-large", "subscriber queue overflowed; resync required").await;
                                    return;
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                            },
                            () = tokio::time::sleep_until(deadline) => break,
                        }
                    }
                    for event in pending.drain(..) {
                        if send_event(socket, &event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(subscriber = %subscriber_id, skipped, "subscriber overflowed");
                    let _ = send_error(socket, "gap-too-large", "subscriber queue overflowed; resync required").await;
                    return;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },

            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(ClientFrame::Ack { seq }) => state.bus.ack(subscriber_id, seq).await,
                    Ok(ClientFrame::Replay { since_seq }) => {
                        match state.bus.replay_since(since_seq).await {
                            Ok(events) => {
                                for event in events {
                                    if send_event(socket, &event).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(gap) => {
                                let _ = send_error(
                                    socket,
                                    "gap-too-large",
                                    &format!(
                                        "oldest retained seq {}, latest {}",
                                        gap.oldest, gap.latest
                                    ),
                                )
                                .await;
                                return;
                            }
                        }
                    }
                    Ok(ClientFrame::Subscribe { .. }) => {
                        let _ = send_error(socket, "protocol", "already subscribed").await;
                    }
                    Err(e) => {
                        let _ = send_error(socket, "protocol", &format!("bad frame: {e}")).await;
                    }
                },
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(_)) => return,
            },
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(text.into())).await
}

async fn send_error(
    socket: &mut WebSocket,
    code: &str,
    message: &str,
) -> Result<(), axum::Error> {
    let frame = json!({ "type": "error", "code": code, "message": message });
    socket.send(Message::Text(frame.to_string().into())).await
}
