use std::time::Duration;

use tokio::sync::watch;

use crate::clock::Millis;
use crate::error::Result;
use crate::media::MediaElement;
use crate::messages::{IntentKind, PlaybackIntent, Presence, ProbeReply, ProbeRequest, RoomEvent};
use crate::registry::ClientRegistry;
use crate::room::ClientId;
use crate::track::TrackInfo;

/// Admin-side translation of local playback into room events.
///
/// Every method returns the events to publish, in order; the caller owns
/// the room channel and the admin's media element.
#[derive(Debug)]
pub struct PlaybackPublisher {
    track: TrackInfo,
    registry: ClientRegistry,
    idle_timeout: Option<Duration>,
}

impl PlaybackPublisher {
    pub fn new(track: TrackInfo) -> Self {
        Self {
            track,
            registry: ClientRegistry::new(),
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn track(&self) -> &TrackInfo {
        &self.track
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    pub fn subscribe_listener_count(&self) -> watch::Receiver<usize> {
        self.registry.subscribe()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    fn control<M: MediaElement>(&self, kind: IntentKind, media: &M, now: Millis) -> RoomEvent {
        RoomEvent::Sync(PlaybackIntent::control(
            kind,
            media.position(),
            media.is_playing(),
            now,
        ))
    }

    /// Starts local playback, then announces it. Nothing is published when
    /// the media element refuses to start.
    pub fn play<M: MediaElement>(&self, media: &mut M, now: Millis) -> Result<RoomEvent> {
        media.play()?;
        Ok(self.control(IntentKind::Play, media, now))
    }

    pub fn pause<M: MediaElement>(&self, media: &mut M, now: Millis) -> RoomEvent {
        media.pause();
        self.control(IntentKind::Pause, media, now)
    }

    /// Moves local playback by `delta_secs` (clamped at zero) and announces
    /// the new position.
    pub fn seek<M: MediaElement>(&self, media: &mut M, delta_secs: f64, now: Millis) -> RoomEvent {
        let target = (media.position() + delta_secs).max(0.0);
        media.set_position(target);
        self.control(IntentKind::Seek, media, now)
    }

    /// An `init` addressed to `"admin"`, which every listener accepts, so
    /// the whole room re-fetches the track and rejoins at the admin's position.
    pub fn reload<M: MediaElement>(&self, media: &M, now: Millis) -> RoomEvent {
        tracing::info!(title = %self.track.title, listeners = self.registry.len(), "asking room to reload track");
        RoomEvent::Sync(PlaybackIntent::init(
            ClientId::admin(),
            &self.track,
            media.position(),
            now,
        ))
    }

    /// Periodic state broadcast. Also returns listeners evicted for
    /// idleness when eviction is enabled.
    pub fn heartbeat<M: MediaElement>(&mut self, media: &M, now: Millis) -> (RoomEvent, Vec<ClientId>) {
        let evicted = match self.idle_timeout {
            Some(timeout) => self.registry.evict_idle(now, timeout),
            None => Vec::new(),
        };
        let event = RoomEvent::Sync(PlaybackIntent::heartbeat(
            media.position(),
            media.is_playing(),
            now,
        ));
        (event, evicted)
    }

    /// Answers a probe. A first probe from an unknown listener also yields a
    /// targeted `init`, published before the `pong`.
    pub fn on_probe<M: MediaElement>(&mut self, probe: &ProbeRequest, media: &M, now: Millis) -> Vec<RoomEvent> {
        let mut out = Vec::with_capacity(2);
        if let Some(init) = self.admit(&probe.client_id, media, now) {
            out.push(init);
        }
        out.push(RoomEvent::Pong(ProbeReply {
            client_id: probe.client_id.clone(),
            sent_at: probe.sent_at,
            server_time: now,
        }));
        out
    }

    /// Fallback join path for listeners whose probes never arrive.
    pub fn on_join<M: MediaElement>(&mut self, presence: &Presence, media: &M, now: Millis) -> Option<RoomEvent> {
        self.admit(&presence.client_id, media, now)
    }

    /// Returns `true` when a known listener was removed.
    pub fn on_leave(&mut self, presence: &Presence) -> bool {
        let removed = self.registry.remove(&presence.client_id);
        if removed {
            tracing::info!(client = %presence.client_id, listeners = self.registry.len(), "listener left");
        }
        removed
    }

    fn admit<M: MediaElement>(&mut self, client: &ClientId, media: &M, now: Millis) -> Option<RoomEvent> {
        if client.is_admin() || !self.registry.register(client, now) {
            return None;
        }
        tracing::info!(%client, listeners = self.registry.len(), "listener joined, sending init");
        Some(RoomEvent::Sync(PlaybackIntent::init(
            client.clone(),
            &self.track,
            media.position(),
            now,
        )))
    }
}
