//! The local media element a synchronizer steers.

use crate::clock::{Millis, SharedClock};
use crate::error::{Result, SyncError};

/// A seekable, rate-adjustable playback head.
pub trait MediaElement: Send {
    /// Current position in seconds.
    fn position(&self) -> f64;
    fn set_position(&mut self, secs: f64);
    fn is_playing(&self) -> bool;
    /// Start playback. May be refused, e.g. before audio output is unlocked.
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn playback_rate(&self) -> f64;
    fn set_playback_rate(&mut self, rate: f64);
}

/// Playback head with no audio output: position advances with the clock at
/// the current rate while playing.
pub struct VirtualPlayer {
    clock: SharedClock,
    anchor_position: f64,
    anchor_at: Millis,
    playing: bool,
    rate: f64,
    duration: Option<f64>,
    locked: bool,
}

impl VirtualPlayer {
    pub fn new(clock: SharedClock) -> Self {
        let anchor_at = clock.now_ms();
        Self {
            clock,
            anchor_position: 0.0,
            anchor_at,
            playing: false,
            rate: 1.0,
            duration: None,
            locked: false,
        }
    }

    /// Stops at `secs` instead of running forever.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    /// Refuses `play` until [`VirtualPlayer::unlock`] is called, like a
    /// browser before the first user gesture.
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    fn clamp(&self, secs: f64) -> f64 {
        let secs = secs.max(0.0);
        match self.duration {
            Some(end) => secs.min(end),
            None => secs,
        }
    }

    /// Folds elapsed play time into the anchor so rate and state changes
    /// only affect time from now on.
    fn reanchor(&mut self) {
        let now = self.clock.now_ms();
        self.anchor_position = self.position();
        self.anchor_at = now;
    }
}

impl MediaElement for VirtualPlayer {
    fn position(&self) -> f64 {
        if !self.playing {
            return self.anchor_position;
        }
        let elapsed = (self.clock.now_ms() - self.anchor_at) as f64 / 1000.0;
        self.clamp(self.anchor_position + elapsed * self.rate)
    }

    fn set_position(&mut self, secs: f64) {
        self.anchor_position = self.clamp(secs);
        self.anchor_at = self.clock.now_ms();
    }

    fn is_playing(&self) -> bool {
        if !self.playing {
            return false;
        }
        match self.duration {
            Some(end) => self.position() < end,
            None => true,
        }
    }

    fn play(&mut self) -> Result<()> {
        if self.locked {
            return Err(SyncError::PlaybackRejected(
                "audio output not unlocked yet".into(),
            ));
        }
        if !self.playing {
            self.reanchor();
            self.playing = true;
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.playing {
            self.reanchor();
            self.playing = false;
        }
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.reanchor();
        self.rate = rate;
    }
}
