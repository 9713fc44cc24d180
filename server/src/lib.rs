pub mod app_state;
pub mod handlers;
pub mod media;
pub mod routes;

use std::net::SocketAddr;
use tokio::net::TcpListener;

pub use app_state::AppState; // Re-export for convenience

pub async fn run(port: u16, app_state: app_state::SharedState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    serve(listener, app_state).await
}

/// Serves the relay on an already bound listener until ctrl-c.
pub async fn serve(listener: TcpListener, app_state: app_state::SharedState) -> anyhow::Result<()> {
    let app = routes::create_router(app_state);
    tracing::info!("relay listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use syncify_core::messages::{Presence, RoomEvent};
    use syncify_core::room::{ClientId, RoomCode};
    use syncify_core::ws::WsRoomChannel;
    use tokio::time::timeout;
    use tokio_tungstenite::{connect_async, tungstenite::Message};
    use url::Url;

    async fn start() -> (Url, app_state::SharedState) {
        let state = AppState::new(None);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state.clone()));
        (Url::parse(&format!("ws://{addr}/ws")).unwrap(), state)
    }

    fn join(id: &str) -> RoomEvent {
        RoomEvent::Join(Presence {
            client_id: ClientId::from(id),
        })
    }

    fn leave(id: &str) -> RoomEvent {
        RoomEvent::Leave(Presence {
            client_id: ClientId::from(id),
        })
    }

    #[tokio::test]
    async fn broadcasts_reach_the_room_and_skip_the_sender() {
        let (url, _state) = start().await;
        let room = RoomCode::from("ROOM01");
        let mut quiet = WsRoomChannel::connect(&url, &room, false).await.unwrap();
        let mut echo = WsRoomChannel::connect(&url, &room, true).await.unwrap();

        quiet.publish(join("q")).await.unwrap();
        assert_eq!(echo.recv().await, Some(join("q")));

        echo.publish(leave("e")).await.unwrap();
        assert_eq!(echo.recv().await, Some(leave("e")));
        // The first thing `quiet` sees is echo's frame, not its own.
        assert_eq!(quiet.recv().await, Some(leave("e")));
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let (url, _state) = start().await;
        let mut a = WsRoomChannel::connect(&url, &RoomCode::from("AAAA"), false).await.unwrap();
        let b = WsRoomChannel::connect(&url, &RoomCode::from("BBBB"), false).await.unwrap();

        b.publish(join("b")).await.unwrap();
        assert!(timeout(Duration::from_millis(200), a.recv()).await.is_err());
    }

    #[tokio::test]
    async fn broadcast_before_subscribe_is_rejected() {
        let (url, _state) = start().await;
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        ws.send(Message::Text(r#"{"op":"broadcast","event":"join","payload":{"clientId":"x"}}"#.into()))
            .await
            .unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        let reply: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(reply["op"], "error");

        ws.send(Message::Text(r#"{"op":"subscribe","room":"RAW1","self":false}"#.into()))
            .await
            .unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply.to_text().unwrap(), r#"{"op":"subscribed","room":"RAW1"}"#);
    }

    #[tokio::test]
    async fn room_is_dropped_after_last_subscriber_leaves() {
        let (url, state) = start().await;
        let room = RoomCode::from("GONE");
        let link = WsRoomChannel::connect(&url, &room, false).await.unwrap();
        assert_eq!(state.subscriber_count(&room), 1);

        link.close();
        timeout(Duration::from_secs(5), async {
            while state.rooms.contains_key(&room) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(state.peers.is_empty());
    }
}
