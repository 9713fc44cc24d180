//! Wire catalog for a room channel, plus the relay framing around it.
//!
//! Field names on the wire follow the browser clients (`currentTime`,
//! `downloadUrl`, `type`, ...) so mixed clients can share a room.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Millis;
use crate::error::{Result, SyncError};
use crate::room::{ClientId, RoomCode};
use crate::track::TrackInfo;

/// `ping`: listener asks the admin for its time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    pub sent_at: Millis,
    pub client_id: ClientId,
}

/// `pong`: admin's answer, broadcast to the whole room.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReply {
    pub client_id: ClientId,
    /// Echo of `ProbeRequest::sent_at`.
    pub sent_at: Millis,
    pub server_time: Millis,
}

/// Payload of `join` and `leave`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub client_id: ClientId,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Init,
    Play,
    Pause,
    Seek,
    /// Periodic heartbeat carrying the admin's current state.
    Sync,
}

/// Timestamped playback intent published by the admin on the `sync` event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackIntent {
    #[serde(rename = "type")]
    pub kind: IntentKind,
    /// Admin playback position in seconds at `sent_at`.
    #[serde(rename = "currentTime", default)]
    pub media_position: f64,
    pub sent_at: Millis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    /// Only this listener should act on the message.
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub target_client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "downloadUrl", default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
}

impl PlaybackIntent {
    /// `play`, `pause` or `seek` issued from an admin action.
    pub fn control(kind: IntentKind, media_position: f64, is_playing: bool, sent_at: Millis) -> Self {
        Self {
            kind,
            media_position,
            sent_at,
            is_playing: Some(is_playing),
            target_client_id: None,
            title: None,
            resource_url: None,
        }
    }

    pub fn heartbeat(media_position: f64, is_playing: bool, sent_at: Millis) -> Self {
        Self::control(IntentKind::Sync, media_position, is_playing, sent_at)
    }

    /// Late-join catch-up for exactly one listener.
    pub fn init(target: ClientId, track: &TrackInfo, media_position: f64, sent_at: Millis) -> Self {
        Self {
            kind: IntentKind::Init,
            media_position,
            sent_at,
            is_playing: None,
            target_client_id: Some(target),
            title: Some(track.title.clone()),
            resource_url: Some(track.resource_url.clone()),
        }
    }

    /// Track carried by an `init`. `None` when the resource URL is missing.
    pub fn track(&self) -> Option<TrackInfo> {
        let resource_url = self.resource_url.clone()?;
        Some(TrackInfo {
            title: self.title.clone().unwrap_or_default(),
            resource_url,
        })
    }
}

/// Everything that travels on a room channel, keyed by event name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum RoomEvent {
    Ping(ProbeRequest),
    Pong(ProbeReply),
    Sync(PlaybackIntent),
    Join(Presence),
    Leave(Presence),
}

impl RoomEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::Ping(_) => "ping",
            RoomEvent::Pong(_) => "pong",
            RoomEvent::Sync(_) => "sync",
            RoomEvent::Join(_) => "join",
            RoomEvent::Leave(_) => "leave",
        }
    }

    pub fn into_envelope(self) -> Result<Envelope> {
        let event = self.name().to_string();
        let payload = match serde_json::to_value(self)? {
            Value::Object(mut map) => map.remove("payload").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Ok(Envelope { event, payload })
    }
}

/// Event name plus an uninterpreted payload, as the relay sees it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl TryFrom<Envelope> for RoomEvent {
    type Error = SyncError;

    fn try_from(envelope: Envelope) -> Result<Self> {
        let Envelope { event, payload } = envelope;
        let parsed = match event.as_str() {
            "ping" => RoomEvent::Ping(serde_json::from_value(payload)?),
            "pong" => RoomEvent::Pong(serde_json::from_value(payload)?),
            "sync" => RoomEvent::Sync(serde_json::from_value(payload)?),
            "join" => RoomEvent::Join(serde_json::from_value(payload)?),
            "leave" => RoomEvent::Leave(serde_json::from_value(payload)?),
            _ => return Err(SyncError::UnknownEvent(event)),
        };
        Ok(parsed)
    }
}

/// Frames a room member sends to the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        room: RoomCode,
        /// Deliver this member's own broadcasts back to it.
        #[serde(rename = "self", default)]
        self_delivery: bool,
    },
    Broadcast(Envelope),
    Unsubscribe,
}

/// Frames the relay sends to a room member.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ServerMessage {
    Subscribed { room: RoomCode },
    Broadcast(Envelope),
    Error { message: String },
}

/// Admin playback controls.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlCommand {
    Play,
    Pause,
    /// Relative jump in seconds; the result is clamped at zero.
    Seek { delta_secs: f64 },
    /// Make every listener fetch the track again.
    Reload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intent_uses_browser_field_names() {
        let track = TrackInfo {
            title: "Song".into(),
            resource_url: "https://cdn.example/song.mp3".into(),
        };
        let intent = PlaybackIntent::init(ClientId::from("k3j9x0aa"), &track, 12.5, 1_000);
        let value = serde_json::to_value(RoomEvent::Sync(intent)).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "sync",
                "payload": {
                    "type": "init",
                    "currentTime": 12.5,
                    "sentAt": 1000,
                    "clientId": "k3j9x0aa",
                    "title": "Song",
                    "downloadUrl": "https://cdn.example/song.mp3"
                }
            })
        );
    }

    #[test]
    fn heartbeat_without_position_defaults_to_zero() {
        let intent: PlaybackIntent =
            serde_json::from_value(json!({"type": "sync", "sentAt": 5, "isPlaying": true})).unwrap();
        assert_eq!(intent.kind, IntentKind::Sync);
        assert_eq!(intent.media_position, 0.0);
        assert_eq!(intent.is_playing, Some(true));
        assert!(intent.track().is_none());
    }

    #[test]
    fn envelope_conversion_preserves_payload() {
        let ping = RoomEvent::Ping(ProbeRequest {
            sent_at: 42,
            client_id: ClientId::from("abc"),
        });
        let envelope = ping.clone().into_envelope().unwrap();
        assert_eq!(envelope.event, "ping");
        assert_eq!(envelope.payload, json!({"sentAt": 42, "clientId": "abc"}));
        assert_eq!(RoomEvent::try_from(envelope).unwrap(), ping);
    }

    #[test]
    fn unknown_events_are_reported() {
        let envelope = Envelope {
            event: "debug".into(),
            payload: json!({"msg": "hello"}),
        };
        assert!(matches!(
            RoomEvent::try_from(envelope),
            Err(SyncError::UnknownEvent(name)) if name == "debug"
        ));
    }

    #[test]
    fn relay_frames_are_flat() {
        let frame = ClientMessage::Broadcast(Envelope {
            event: "leave".into(),
            payload: json!({"clientId": "abc"}),
        });
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"op": "broadcast", "event": "leave", "payload": {"clientId": "abc"}})
        );

        let subscribe: ClientMessage =
            serde_json::from_str(r#"{"op":"subscribe","room":"7F3A9C01","self":true}"#).unwrap();
        assert_eq!(
            subscribe,
            ClientMessage::Subscribe {
                room: RoomCode::from("7F3A9C01"),
                self_delivery: true
            }
        );
    }
}
