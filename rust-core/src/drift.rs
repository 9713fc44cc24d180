/// How a listener closes the gap between where it is and where the admin
/// says it should be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Jump straight to `position` (seconds). Playback rate is left alone.
    Hard { position: f64 },
    /// Play at `rate` for a while; positive drift speeds up, negative slows down.
    Soft { rate: f64 },
}

impl Correction {
    pub fn is_hard(&self) -> bool {
        matches!(self, Correction::Hard { .. })
    }
}

/// Proportional drift controller.
/// Drift strictly above `threshold` seconds is seeked away; anything at or
/// below it is absorbed by nudging the playback rate by `gain × drift`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftCorrector {
    threshold: f64,
    gain: f64,
}

impl DriftCorrector {
    pub fn new(threshold: f64, gain: f64) -> Self {
        Self { threshold, gain }
    }

    /// error: target − current, in seconds.
    pub fn next(&self, target: f64, current: f64) -> Correction {
        let diff = target - current;
        if diff.abs() > self.threshold {
            Correction::Hard { position: target }
        } else {
            Correction::Soft {
                rate: 1.0 + diff * self.gain,
            }
        }
    }
}

impl Default for DriftCorrector {
    fn default() -> Self {
        Self::new(0.3, 0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(c: Correction) -> f64 {
        match c {
            Correction::Soft { rate } => rate,
            Correction::Hard { .. } => panic!("expected soft correction, got {c:?}"),
        }
    }

    #[test]
    fn small_lead_speeds_up() {
        let c = DriftCorrector::default().next(10.05, 10.0);
        assert!((rate(c) - 1.01).abs() < 1e-9);
    }

    #[test]
    fn small_lag_slows_down() {
        let c = DriftCorrector::default().next(10.0, 10.1);
        assert!((rate(c) - 0.98).abs() < 1e-9);
    }

    #[test]
    fn large_drift_seeks_exactly_to_target() {
        let c = DriftCorrector::default().next(10.5, 9.0);
        assert_eq!(c, Correction::Hard { position: 10.5 });
        let c = DriftCorrector::default().next(3.0, 12.0);
        assert_eq!(c, Correction::Hard { position: 3.0 });
    }

    #[test]
    fn threshold_itself_is_soft() {
        let corrector = DriftCorrector::default();
        // 0.3 − 0.0 is exactly the threshold literal.
        assert!(!corrector.next(0.3, 0.0).is_hard());
        assert!(!corrector.next(0.0, 0.3).is_hard());
        assert!(corrector.next(0.3 + 1e-9, 0.0).is_hard());
    }

    #[test]
    fn test_soft_convergence() {
        let corrector = DriftCorrector::default();
        let mut target = 20.0;
        let mut current = 19.8;

        // 100 ms steps: target advances at 1x, local at the nudged rate.
        for _ in 0..200 {
            let r = rate(corrector.next(target, current));
            target += 0.1;
            current += 0.1 * r;
        }

        assert!((target - current).abs() < 0.02, "rate nudging should shrink drift");
    }
}
