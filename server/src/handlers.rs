use crate::app_state::{Peer, Relayed, SharedState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::net::SocketAddr;
use std::sync::Arc;
use syncify_core::messages::{ClientMessage, ServerMessage};
use syncify_core::room::RoomCode;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

type Sink = SplitSink<WebSocket, Message>;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    tracing::debug!(%addr, "client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

pub async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: SharedState) {
    let session_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    // Nothing is relayed until the client names its room.
    let (room, self_delivery) = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Subscribe { room, self_delivery }) => break (room, self_delivery),
                Ok(ClientMessage::Unsubscribe) => return,
                Ok(ClientMessage::Broadcast(_)) => {
                    if !reply_error(&mut sender, "subscribe to a room first").await {
                        return;
                    }
                }
                Err(e) => {
                    if !reply_error(&mut sender, &format!("malformed frame: {e}")).await {
                        return;
                    }
                }
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => {}
        }
    };

    let tx = state.join(&room);
    let mut rx = tx.subscribe();
    state.peers.insert(
        session_id.clone(),
        Arc::new(Peer {
            addr,
            room: room.clone(),
        }),
    );
    tracing::info!(%addr, %room, session = %session_id, subscribers = tx.receiver_count(), "client subscribed");

    if reply(&mut sender, &ServerMessage::Subscribed { room: room.clone() }).await {
        relay(&mut sender, &mut receiver, &tx, &mut rx, &session_id, self_delivery, &room).await;
    }

    drop(rx);
    state.peers.remove(&session_id);
    state.release(&room);
    tracing::info!(%room, session = %session_id, "client disconnected");
}

async fn relay(
    sender: &mut Sink,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    tx: &tokio::sync::broadcast::Sender<Relayed>,
    rx: &mut tokio::sync::broadcast::Receiver<Relayed>,
    session_id: &str,
    self_delivery: bool,
    room: &RoomCode,
) {
    loop {
        tokio::select! {
            relayed = rx.recv() => match relayed {
                Ok(relayed) => {
                    if relayed.origin == session_id && !self_delivery {
                        continue;
                    }
                    if sender.send(Message::Text(relayed.frame.as_str().to_owned())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%room, session = %session_id, skipped, "subscriber lagged, frames dropped");
                }
                Err(RecvError::Closed) => break,
            },

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Broadcast(envelope)) => {
                        tracing::trace!(%room, event = %envelope.event, "relaying");
                        match serde_json::to_string(&ServerMessage::Broadcast(envelope)) {
                            Ok(frame) => {
                                let _ = tx.send(Relayed {
                                    origin: session_id.to_owned(),
                                    frame: Arc::new(frame),
                                });
                            }
                            Err(e) => tracing::warn!(error = %e, "could not re-encode broadcast"),
                        }
                    }
                    Ok(ClientMessage::Unsubscribe) => break,
                    Ok(ClientMessage::Subscribe { .. }) => {
                        if !reply_error(sender, "already subscribed").await {
                            break;
                        }
                    }
                    Err(e) => {
                        if !reply_error(sender, &format!("malformed frame: {e}")).await {
                            break;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, session = %session_id, "socket error");
                    break;
                }
            },
        }
    }
}

/// Returns `false` once the socket is gone.
async fn reply(sender: &mut Sink, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "could not encode reply");
            true
        }
    }
}

async fn reply_error(sender: &mut Sink, message: &str) -> bool {
    reply(
        sender,
        &ServerMessage::Error {
            message: message.to_owned(),
        },
    )
    .await
}
