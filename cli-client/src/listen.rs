use std::sync::Arc;
use std::time::Duration;

use syncify_core::cache::LastTrackCache;
use syncify_core::config::SyncConfig;
use syncify_core::media::VirtualPlayer;
use syncify_core::room::RoomCode;
use syncify_core::session::{ListenerSession, ListenerSnapshot, ListenerStatus};
use syncify_core::track::HttpFetcher;
use syncify_core::ws::WsRoomChannel;
use syncify_core::SystemClock;
use url::Url;

fn describe(status: &ListenerStatus) -> String {
    match status {
        ListenerStatus::Connecting => "Connecting...".into(),
        ListenerStatus::WaitingForAdmin => "Waiting for the admin...".into(),
        ListenerStatus::Downloading { title } => format!("Downloading \"{title}\"..."),
        ListenerStatus::Ready { title } => format!("Ready: \"{title}\""),
        ListenerStatus::FetchFailed { reason } => format!("Download failed: {reason}"),
        ListenerStatus::PlaybackRejected => "Playback blocked, waiting for the next admin action".into(),
        ListenerStatus::Left => "Left the room".into(),
    }
}

fn progress_line(snap: &ListenerSnapshot) -> Option<String> {
    let position = snap.position?;
    let mut line = format!(
        "{} {:>7.2}s  rate {:.3}",
        if snap.playing { ">" } else { "||" },
        position,
        snap.rate.unwrap_or(1.0),
    );
    if snap.offset_samples == 0 {
        line.push_str("  offset pending");
    } else {
        line.push_str(&format!("  offset {:+.1}ms", snap.offset_ms));
    }
    if let Some(delay) = snap.average_delay_ms {
        line.push_str(&format!("  delay {delay:.1}ms"));
    }
    Some(line)
}

pub async fn run(relay: &Url, room: RoomCode, config: SyncConfig) -> anyhow::Result<()> {
    let cache = match LastTrackCache::in_default_location() {
        Ok(cache) => Some(cache),
        Err(e) => {
            tracing::warn!(error = %e, "track cache disabled");
            None
        }
    };
    if let Some(cache) = &cache {
        if let Ok(Some(last)) = cache.load().await {
            println!("Last played: \"{}\"", last.title);
        }
    }

    let link = WsRoomChannel::connect(relay, &room, false).await?;
    let clock = SystemClock::shared();
    let mut session = ListenerSession::new(room.clone(), config, clock.clone(), Arc::new(HttpFetcher::default()));
    if let Some(cache) = cache {
        session = session.with_cache(cache);
    }

    let player_clock = clock.clone();
    let listener = session.spawn(link, move |track, bytes| {
        tracing::info!(title = %track.title, bytes = bytes.len(), "track loaded");
        Ok(VirtualPlayer::new(player_clock.clone()))
    });
    println!("Joined room {room} as {}", listener.client_id());

    let mut snapshot = listener.snapshot();
    let mut shown: Option<ListenerStatus> = None;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            changed = snapshot.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = snapshot.borrow_and_update().status.clone();
                if shown.as_ref() != Some(&status) {
                    println!("{}", describe(&status));
                    shown = Some(status.clone());
                }
                if status == ListenerStatus::Left {
                    break;
                }
            }

            _ = ticker.tick() => {
                let snap = snapshot.borrow().clone();
                if let Some(line) = progress_line(&snap) {
                    println!("{line}");
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    listener.leave().await?;
    Ok(())
}
