use crate::clock::{ClockOffset, Millis};
use crate::config::OffsetFilter;
use crate::messages::{ProbeReply, ProbeRequest};
use crate::room::ClientId;

/// Listener-side estimate of `adminClock − localClock`.
///
/// Fed by round-trip probes: [`probe`](Self::probe) builds the request,
/// [`observe`](Self::observe) folds in the admin's reply.
#[derive(Debug, Clone)]
pub struct ClockOffsetEstimator {
    client_id: ClientId,
    filter: OffsetFilter,
    offset: Option<f64>,
    latest: Option<ClockOffset>,
    samples: u64,
}

impl ClockOffsetEstimator {
    pub fn new(client_id: ClientId, filter: OffsetFilter) -> Self {
        Self {
            client_id,
            filter,
            offset: None,
            latest: None,
            samples: 0,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn probe(&self, now: Millis) -> ProbeRequest {
        ProbeRequest {
            sent_at: now,
            client_id: self.client_id.clone(),
        }
    }

    /// Folds in a reply received at local time `now`. Replies addressed to
    /// other listeners and replies with a negative round trip are ignored.
    pub fn observe(&mut self, reply: &ProbeReply, now: Millis) -> Option<ClockOffset> {
        if reply.client_id != self.client_id {
            return None;
        }

        let sample = ClockOffset::from_probe(reply.sent_at, reply.server_time, now);
        if sample.rtt < 0 {
            tracing::warn!(
                rtt = sample.rtt,
                "discarding probe reply, local clock went backwards"
            );
            return None;
        }

        let offset = match (self.filter, self.offset) {
            (OffsetFilter::Ewma { alpha }, Some(prev)) => prev + alpha * (sample.offset - prev),
            _ => sample.offset,
        };
        self.offset = Some(offset);
        self.latest = Some(sample);
        self.samples += 1;

        tracing::debug!(
            rtt = sample.rtt,
            sample = sample.offset,
            offset,
            "clock offset updated"
        );
        Some(sample)
    }

    /// Current estimate in milliseconds; zero until the first reply.
    pub fn offset_ms(&self) -> f64 {
        self.offset.unwrap_or(0.0)
    }

    /// Half the latest round trip, for display only.
    pub fn average_delay_ms(&self) -> Option<f64> {
        self.latest.map(|s| s.one_way_delay())
    }

    /// Replies folded in so far; zero means the offset is still assumed 0.
    pub fn samples(&self) -> u64 {
        self.samples
    }
}
