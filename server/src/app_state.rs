use dashmap::DashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use syncify_core::room::RoomCode;
use tokio::sync::broadcast;

pub type SharedState = Arc<AppState>;

const ROOM_CAPACITY: usize = 256;

/// One encoded broadcast frame and the session that sent it.
#[derive(Debug, Clone)]
pub struct Relayed {
    pub origin: String,
    pub frame: Arc<String>,
}

pub struct Peer {
    pub addr: SocketAddr,
    pub room: RoomCode,
}

pub struct AppState {
    // Per-room pub/sub topic
    pub rooms: DashMap<RoomCode, broadcast::Sender<Relayed>>,
    // Subscribed sessions
    pub peers: DashMap<String, Arc<Peer>>,
    // Served under /media when set
    pub media_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(media_dir: Option<PathBuf>) -> SharedState {
        Arc::new(Self {
            rooms: DashMap::new(),
            peers: DashMap::new(),
            media_dir,
        })
    }

    /// Topic for `room`, created on first subscription.
    pub fn join(&self, room: &RoomCode) -> broadcast::Sender<Relayed> {
        self.rooms
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .clone()
    }

    /// Drops the topic once its last subscriber is gone.
    pub fn release(&self, room: &RoomCode) {
        if self.rooms.remove_if(room, |_, tx| tx.receiver_count() == 0).is_some() {
            tracing::info!(%room, "room closed");
        }
    }

    pub fn subscriber_count(&self, room: &RoomCode) -> usize {
        self.rooms.get(room).map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}
