//! Room channel over the WebSocket relay.

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::error::{Result, SyncError};
use crate::messages::{ClientMessage, RoomEvent, ServerMessage};
use crate::room::{RoomCode, RoomLink};

pub struct WsRoomChannel;

impl WsRoomChannel {
    /// Connects to the relay at `relay` (e.g. `ws://127.0.0.1:3000/ws`) and
    /// subscribes to `room`. Returns once the relay confirms the
    /// subscription, so events published on the link are never sent into
    /// the void.
    pub async fn connect(relay: &Url, room: &RoomCode, self_delivery: bool) -> Result<RoomLink> {
        let (ws_stream, _) = connect_async(relay.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = ClientMessage::Subscribe {
            room: room.clone(),
            self_delivery,
        };
        write
            .send(Message::Text(serde_json::to_string(&subscribe)?))
            .await?;

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text)? {
                    ServerMessage::Subscribed { room: joined } if joined == *room => break,
                    ServerMessage::Error { message } => return Err(SyncError::Transport(message)),
                    other => tracing::debug!(?other, "frame before subscription confirmed"),
                },
                Some(Ok(Message::Close(_))) | None => return Err(SyncError::ChannelClosed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
        tracing::info!(%room, %relay, "subscribed to room");

        let (link, mut published, delivered) = RoomLink::pair();
        let room = room.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = published.recv() => {
                        let Some(event) = outgoing else { break };
                        match encode(event) {
                            Ok(text) => {
                                if write.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "dropping unencodable event"),
                        }
                    }
                    incoming = read.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = decode(&text) {
                                // Receiver gone means we are shutting down; keep
                                // draining `published` so a final `leave` still goes out.
                                let _ = delivered.send(event).await;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "relay connection failed");
                            break;
                        }
                    },
                }
            }

            if let Ok(text) = serde_json::to_string(&ClientMessage::Unsubscribe) {
                let _ = write.send(Message::Text(text)).await;
            }
            let _ = write.close().await;
            tracing::info!(%room, "left room");
        });

        Ok(link)
    }
}

fn encode(event: RoomEvent) -> Result<String> {
    let frame = ClientMessage::Broadcast(event.into_envelope()?);
    Ok(serde_json::to_string(&frame)?)
}

/// Relay frames that are not room events for this protocol are skipped.
fn decode(text: &str) -> Option<RoomEvent> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::Broadcast(envelope)) => match RoomEvent::try_from(envelope) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(error = %e, "skipping foreign event");
                None
            }
        },
        Ok(ServerMessage::Error { message }) => {
            tracing::warn!(%message, "relay reported an error");
            None
        }
        Ok(ServerMessage::Subscribed { .. }) => None,
        Err(e) => {
            tracing::warn!(error = %e, "malformed relay frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Presence;
    use crate::room::ClientId;

    #[test]
    fn decode_skips_foreign_and_malformed_frames() {
        assert!(decode(r#"{"op":"broadcast","event":"debug","payload":{"msg":"hi"}}"#).is_none());
        assert!(decode(r#"{"op":"subscribed","room":"AB"}"#).is_none());
        assert!(decode("garbage").is_none());
        assert_eq!(
            decode(r#"{"op":"broadcast","event":"join","payload":{"clientId":"x1"}}"#),
            Some(RoomEvent::Join(Presence {
                client_id: ClientId::from("x1")
            }))
        );
    }

    #[test]
    fn encode_wraps_events_in_broadcast_frames() {
        let text = encode(RoomEvent::Leave(Presence {
            client_id: ClientId::from("x1"),
        }))
        .unwrap();
        let frame: ClientMessage = serde_json::from_str(&text).unwrap();
        assert!(matches!(frame, ClientMessage::Broadcast(env) if env.event == "leave"));
    }
}
