use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch, the unit every `sentAt`,
/// `serverTime` and offset on the wire is expressed in.
pub type Millis = i64;

/// Source of "now" for one device.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

pub type SharedClock = Arc<dyn Clock>;

/// Device wall clock.
///
/// The wall time is read once at construction and then advanced with the
/// tokio monotonic clock, so a running session never sees time step
/// backwards and paused-time tests stay deterministic.
#[derive(Debug, Clone)]
pub struct SystemClock {
    base_ms: Millis,
    started: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let base_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Millis)
            .unwrap_or_default();
        Self {
            base_ms,
            started: tokio::time::Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        self.base_ms + self.started.elapsed().as_millis() as Millis
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn starting_at(now: Millis) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Millis) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockOffset {
    /// Estimated `remote − local`, in milliseconds.
    pub offset: f64,
    pub rtt: Millis,
}

impl ClockOffset {
    /// Calculate offset and RTT from NTP timestamps
    /// t0: Client send time
    /// t1: Server receive time
    /// t2: Server transmit time
    /// t3: Client receive time
    pub fn calculate(t0: Millis, t1: Millis, t2: Millis, t3: Millis) -> Self {
        let rtt = (t3 - t0) - (t2 - t1);
        let offset = ((t1 - t0) + (t2 - t3)) as f64 / 2.0;

        Self { offset, rtt }
    }

    /// Single server timestamp variant: the admin stamps its reply once, so
    /// receive and transmit time coincide and the estimate reduces to
    /// `serverTime + rtt/2 − receivedAt`.
    pub fn from_probe(sent_at: Millis, server_time: Millis, received_at: Millis) -> Self {
        Self::calculate(sent_at, server_time, server_time, received_at)
    }

    /// Estimated one-way delay, assuming both legs are symmetric.
    pub fn one_way_delay(&self) -> f64 {
        self.rtt as f64 / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_calculation() {
        let t0 = 1000;
        let t1 = 1100; // Latency 100ms, Server time = Client time + 0
        let t2 = 1200; // Processing 100ms
        let t3 = 1300; // Latency 100ms

        let result = ClockOffset::calculate(t0, t1, t2, t3);
        assert_eq!(result.rtt, 200);
        assert_eq!(result.offset, 0.0);
    }

    #[test]
    fn test_probe_offset() {
        // sent at 1000, admin stamped 1200, reply seen at 1300
        let result = ClockOffset::from_probe(1000, 1200, 1300);
        assert_eq!(result.rtt, 300);
        assert_eq!(result.offset, 50.0);
        assert_eq!(result.one_way_delay(), 150.0);
    }

    #[test]
    fn probe_offset_matches_closed_form() {
        let triples = [
            (0, 0, 0),
            (1_000, 1_200, 1_300),
            (1_700_000_000_000, 1_700_000_004_321, 1_700_000_000_077),
            (5_000, 4_000, 5_001),
            (10, 99_999, 10),
        ];
        for (sent_at, server_time, now) in triples {
            let rtt = now - sent_at;
            let expected = server_time as f64 + rtt as f64 / 2.0 - now as f64;
            let result = ClockOffset::from_probe(sent_at, server_time, now);
            assert_eq!(result.rtt, rtt);
            assert_eq!(result.offset, expected, "triple {:?}", (sent_at, server_time, now));
        }
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::starting_at(100);
        let other = clock.clone();
        clock.advance(50);
        assert_eq!(other.now_ms(), 150);
        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }
}
