//! Listener-side reconciliation of admin intents against the local media.
//!
//! For every intent the synchronizer extrapolates where the admin's track
//! is *now*:
//!
//! ```text
//! correctedNow   = localNow + offset
//! latency        = (correctedNow − sentAt) / 1000
//! targetPosition = mediaPosition + latency
//! ```
//!
//! and then either seeks to it or nudges the playback rate toward it (see
//! [`DriftCorrector`]). Intents carry absolute state, so re-applying one is
//! harmless and arrival order does not matter beyond `sentAt`.

use std::time::Duration;

use crate::clock::Millis;
use crate::config::SyncConfig;
use crate::drift::{Correction, DriftCorrector};
use crate::media::MediaElement;
use crate::messages::{IntentKind, PlaybackIntent};
use crate::room::ClientId;
use crate::track::TrackInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Uninitialized,
    /// Joined the room; waiting for `init` or for its track to download.
    AwaitingTrack,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// `init` addressed to a different listener.
    NotForUs,
    /// Older than an intent already applied.
    Stale,
    /// No track loaded yet.
    NoMedia,
    /// `init` without a resource URL.
    IncompleteInit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub kind: IntentKind,
    pub target_position: f64,
    /// Drift correction applied, for `play` and `sync`.
    pub correction: Option<Correction>,
    /// The media element refused to start playing.
    pub playback_rejected: bool,
    /// Arm (or re-arm) the rate reset timer for this long.
    pub rate_reset_after: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Ignored(IgnoreReason),
    /// An `init` for this listener: hand the track to the fetcher.
    FetchTrack(TrackInfo),
    Applied(Reconciliation),
}

/// Steers one listener's media element toward the admin's timeline.
pub struct PlaybackSynchronizer<M> {
    client_id: ClientId,
    corrector: DriftCorrector,
    rate_reset_after: Duration,
    discard_stale: bool,
    state: ListenerState,
    media: Option<M>,
    newest_sent_at: Option<Millis>,
}

impl<M: MediaElement> PlaybackSynchronizer<M> {
    pub fn new(client_id: ClientId, config: &SyncConfig) -> Self {
        Self {
            client_id,
            corrector: DriftCorrector::new(config.hard_correction_threshold_secs, config.rate_gain),
            rate_reset_after: config.rate_reset_after(),
            discard_stale: config.discard_stale_intents,
            state: ListenerState::Uninitialized,
            media: None,
            newest_sent_at: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn media(&self) -> Option<&M> {
        self.media.as_ref()
    }

    /// Subscribed and announced; an `init` is expected next.
    pub fn mark_joined(&mut self) {
        if self.state == ListenerState::Uninitialized {
            self.state = ListenerState::AwaitingTrack;
        }
    }

    /// The fetched track is ready to be steered.
    pub fn attach_media(&mut self, media: M) {
        self.media = Some(media);
        self.state = ListenerState::Ready;
    }

    /// The download for the pending `init` failed. Only a new `init` retries.
    pub fn fetch_failed(&mut self) {
        self.state = ListenerState::AwaitingTrack;
    }

    /// Expected position of the admin's track at local time `now`.
    pub fn target_position(intent: &PlaybackIntent, now: Millis, offset_ms: f64) -> f64 {
        let corrected_now = now as f64 + offset_ms;
        let latency = (corrected_now - intent.sent_at as f64) / 1000.0;
        intent.media_position + latency
    }

    pub fn apply(&mut self, intent: &PlaybackIntent, now: Millis, offset_ms: f64) -> SyncOutcome {
        if intent.kind == IntentKind::Init {
            return self.apply_init(intent);
        }

        if self.discard_stale {
            if let Some(newest) = self.newest_sent_at {
                if intent.sent_at < newest {
                    return SyncOutcome::Ignored(IgnoreReason::Stale);
                }
            }
        }

        let target = Self::target_position(intent, now, offset_ms);
        let Some(media) = self.media.as_mut() else {
            return SyncOutcome::Ignored(IgnoreReason::NoMedia);
        };
        self.newest_sent_at = Some(self.newest_sent_at.map_or(intent.sent_at, |n| n.max(intent.sent_at)));

        let mut rejected = false;
        match intent.kind {
            IntentKind::Play => {
                media.set_position(target);
                rejected |= start(media);
            }
            IntentKind::Pause => media.pause(),
            IntentKind::Seek => media.set_position(target),
            IntentKind::Sync | IntentKind::Init => {}
        }

        let mut correction = None;
        let mut rate_reset_after = None;
        if matches!(intent.kind, IntentKind::Play | IntentKind::Sync) {
            // `play` without the flag still means playing
            let should_play = intent.is_playing.unwrap_or(intent.kind == IntentKind::Play);
            if should_play {
                if !media.is_playing() {
                    rejected |= start(media);
                }
            } else if media.is_playing() {
                media.pause();
            }

            let c = self.corrector.next(target, media.position());
            match c {
                Correction::Hard { position } => media.set_position(position),
                Correction::Soft { rate } => {
                    media.set_playback_rate(rate);
                    rate_reset_after = Some(self.rate_reset_after);
                }
            }
            tracing::debug!(?intent.kind, target, correction = ?c, "drift corrected");
            correction = Some(c);
        }

        SyncOutcome::Applied(Reconciliation {
            kind: intent.kind,
            target_position: target,
            correction,
            playback_rejected: rejected,
            rate_reset_after,
        })
    }

    /// Rate reset timer fired with no newer correction.
    pub fn reset_rate(&mut self) {
        if let Some(media) = self.media.as_mut() {
            media.set_playback_rate(1.0);
        }
    }

    fn apply_init(&mut self, intent: &PlaybackIntent) -> SyncOutcome {
        if let Some(target) = &intent.target_client_id {
            if *target != self.client_id && !target.is_admin() {
                return SyncOutcome::Ignored(IgnoreReason::NotForUs);
            }
        }
        match intent.track() {
            Some(track) => {
                self.state = ListenerState::AwaitingTrack;
                SyncOutcome::FetchTrack(track)
            }
            None => SyncOutcome::Ignored(IgnoreReason::IncompleteInit),
        }
    }
}

/// Returns `true` when the media refused to start.
fn start<M: MediaElement>(media: &mut M) -> bool {
    match media.play() {
        Ok(()) => false,
        Err(err) => {
            tracing::warn!(error = %err, "local playback refused");
            true
        }
    }
}
