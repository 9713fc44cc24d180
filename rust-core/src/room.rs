//! Room identities and the room channel abstraction.
//!
//! A room subscription is handed out as a [`RoomLink`]: a pair of queues
//! that carry decoded [`RoomEvent`]s out to and in from the transport.
//! Sessions only ever see a `RoomLink`, whether the other end is the
//! in-process [`LocalHub`] or a WebSocket relay.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::error::{Result, SyncError};
use crate::messages::RoomEvent;

const LINK_QUEUE: usize = 64;
const HUB_CAPACITY: usize = 256;
const ADMIN_ID: &str = "admin";

/// Identity of one participant for the lifetime of its session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Eight random base-36 characters.
    pub fn generate() -> Self {
        let mut n = uuid::Uuid::new_v4().as_u128();
        let mut id = String::with_capacity(8);
        for _ in 0..8 {
            let digit = (n % 36) as u32;
            id.push(std::char::from_digit(digit, 36).unwrap_or('0'));
            n /= 36;
        }
        Self(id)
    }

    /// Synthetic identity the admin uses for its own messages.
    pub fn admin() -> Self {
        Self(ADMIN_ID.to_string())
    }

    pub fn is_admin(&self) -> bool {
        self.0 == ADMIN_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short shareable code naming a room channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// First group of a v4 UUID, upper-cased.
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().to_string();
        let head = uuid.split('-').next().unwrap_or_default();
        Self(head.to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel topic the browser clients use for this room.
    pub fn topic(&self) -> String {
        format!("room-{}", self.0)
    }
}

impl From<&str> for RoomCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl FromStr for RoomCode {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self> {
        let code = raw.trim();
        let code = code.strip_prefix("room-").unwrap_or(code);
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SyncError::InvalidRoomCode(raw.to_string()));
        }
        Ok(Self(code.to_uppercase()))
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One subscription to a room channel.
///
/// Dropping the link (or calling [`RoomLink::close`]) unsubscribes; peers
/// are not told.
#[derive(Debug)]
pub struct RoomLink {
    outgoing: mpsc::Sender<RoomEvent>,
    incoming: mpsc::Receiver<RoomEvent>,
}

impl RoomLink {
    /// Builds a link from raw queues. Returns the link plus the transport's
    /// ends: the receiver of published events and the sender of delivered ones.
    pub fn pair() -> (Self, mpsc::Receiver<RoomEvent>, mpsc::Sender<RoomEvent>) {
        let (out_tx, out_rx) = mpsc::channel(LINK_QUEUE);
        let (in_tx, in_rx) = mpsc::channel(LINK_QUEUE);
        let link = Self {
            outgoing: out_tx,
            incoming: in_rx,
        };
        (link, out_rx, in_tx)
    }

    pub async fn publish(&self, event: RoomEvent) -> Result<()> {
        self.outgoing
            .send(event)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Next delivered event, `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        self.incoming.recv().await
    }

    pub fn close(self) {}
}

#[derive(Debug, Clone)]
struct Relayed {
    origin: u64,
    event: RoomEvent,
}

/// In-process room channel hub with the same fan-out rules as the relay.
#[derive(Clone, Default)]
pub struct LocalHub {
    rooms: Arc<DashMap<RoomCode, broadcast::Sender<Relayed>>>,
    next_member: Arc<AtomicU64>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins `room`. The subscription is live as soon as this returns.
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, room: &RoomCode, self_delivery: bool) -> RoomLink {
        let member = self.next_member.fetch_add(1, Ordering::Relaxed);
        let tx = self
            .rooms
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(HUB_CAPACITY).0)
            .clone();
        let mut rx = tx.subscribe();

        let (link, mut published, delivered) = RoomLink::pair();
        let rooms = Arc::clone(&self.rooms);
        let room = room.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = published.recv() => match outgoing {
                        Some(event) => {
                            let _ = tx.send(Relayed { origin: member, event });
                        }
                        None => break,
                    },
                    relayed = rx.recv() => match relayed {
                        Ok(relayed) => {
                            if relayed.origin == member && !self_delivery {
                                continue;
                            }
                            let _ = delivered.send(relayed.event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(%room, skipped, "room member lagged, events dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            drop(rx);
            rooms.remove_if(&room, |_, tx| tx.receiver_count() == 0);
        });

        link
    }

    pub fn member_count(&self, room: &RoomCode) -> usize {
        self.rooms
            .get(room)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Presence;

    fn leave(id: &str) -> RoomEvent {
        RoomEvent::Leave(Presence {
            client_id: ClientId::from(id),
        })
    }

    #[test]
    fn generated_ids_have_expected_shape() {
        let id = ClientId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert!(!id.is_admin());
        assert!(ClientId::admin().is_admin());

        let code = RoomCode::generate();
        assert_eq!(code.as_str().len(), 8);
        assert_eq!(code.as_str(), code.as_str().to_uppercase());
        assert_eq!(code.topic(), format!("room-{}", code));
    }

    #[test]
    fn room_codes_parse_loosely() {
        assert_eq!("  7f3a9c01 ".parse::<RoomCode>().unwrap(), RoomCode::from("7F3A9C01"));
        assert_eq!("room-ab12".parse::<RoomCode>().unwrap(), RoomCode::from("AB12"));
        assert!("".parse::<RoomCode>().is_err());
        assert!("../etc".parse::<RoomCode>().is_err());
    }

    #[tokio::test]
    async fn hub_fans_out_and_honours_self_delivery() {
        let hub = LocalHub::new();
        let room = RoomCode::from("ROOM1");
        let mut echo = hub.subscribe(&room, true);
        let mut quiet = hub.subscribe(&room, false);
        let mut other = hub.subscribe(&RoomCode::from("ROOM2"), true);

        quiet.publish(leave("q")).await.unwrap();
        assert_eq!(echo.recv().await, Some(leave("q")));

        echo.publish(leave("e")).await.unwrap();
        assert_eq!(echo.recv().await, Some(leave("e")));
        // `quiet` never sees its own message.
        assert_eq!(quiet.recv().await, Some(leave("e")));

        other.publish(leave("o")).await.unwrap();
        assert_eq!(other.recv().await, Some(leave("o")));
        assert_eq!(hub.member_count(&room), 2);
    }

    #[tokio::test]
    async fn closing_the_last_link_drops_the_room() {
        let hub = LocalHub::new();
        let room = RoomCode::from("GONE");
        let link = hub.subscribe(&room, false);
        assert_eq!(hub.member_count(&room), 1);
        link.close();
        for _ in 0..50 {
            if hub.member_count(&room) == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hub.member_count(&room), 0);
    }
}
