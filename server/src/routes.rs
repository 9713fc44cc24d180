use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use syncify_core::room::RoomCode;

use crate::app_state::{AppState, SharedState};
use crate::{handlers, media};

#[derive(Serialize)]
pub struct RoomStats {
    pub room: String,
    pub subscribers: usize,
    /// Remote addresses of the subscribed sessions.
    pub peers: Vec<String>,
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/rooms", get(list_rooms))
        .route("/media/:name", get(media::serve_media))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn list_rooms(State(state): State<SharedState>) -> Json<Vec<RoomStats>> {
    let mut rooms: Vec<RoomStats> = state
        .rooms
        .iter()
        .map(|entry| RoomStats {
            room: entry.key().to_string(),
            subscribers: entry.value().receiver_count(),
            peers: peers_in(&state, entry.key()),
        })
        .collect();
    rooms.sort_by(|a, b| a.room.cmp(&b.room));
    Json(rooms)
}

fn peers_in(state: &AppState, room: &RoomCode) -> Vec<String> {
    let mut addrs: Vec<String> = state
        .peers
        .iter()
        .filter(|peer| peer.room == *room)
        .map(|peer| peer.addr.to_string())
        .collect();
    addrs.sort();
    addrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::Peer;
    use std::sync::Arc;

    #[tokio::test]
    async fn rooms_list_their_peers() {
        let state = AppState::new(None);
        let room = RoomCode::from("PEERS1");
        let other = RoomCode::from("OTHER1");
        let _rx = state.join(&room).subscribe();
        let _other_rx = state.join(&other).subscribe();
        for (session, addr, room) in [
            ("s2", "127.0.0.1:4001", &room),
            ("s1", "127.0.0.1:4000", &room),
            ("s3", "10.0.0.7:5000", &other),
        ] {
            state.peers.insert(
                session.to_string(),
                Arc::new(Peer {
                    addr: addr.parse().unwrap(),
                    room: room.clone(),
                }),
            );
        }

        let Json(rooms) = list_rooms(State(state)).await;
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].room, "OTHER1");
        assert_eq!(rooms[0].peers, vec!["10.0.0.7:5000"]);
        assert_eq!(rooms[1].room, "PEERS1");
        assert_eq!(rooms[1].subscribers, 1);
        assert_eq!(rooms[1].peers, vec!["127.0.0.1:4000", "127.0.0.1:4001"]);
    }
}
