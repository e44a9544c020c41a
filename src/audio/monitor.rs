use std::time::Duration;

/// A linear volume ramp from silence to `target` in a fixed number of steps.
#[derive(Debug, Clone, PartialEq)]
pub struct FadeRamp {
    target: f32,
    steps: u32,
    taken: u32,
}

impl FadeRamp {
    #[must_use]
    pub fn new(target: f32, steps: u32) -> Self {
        Self {
            target,
            steps: steps.max(1),
            taken: 0,
        }
    }

    /// Advances one step and returns the new volume, `None` once the ramp
    /// has reached its target.
    pub fn step(&mut self) -> Option<f32> {
        if self.is_done() {
            return None;
        }
        self.taken += 1;
        if self.is_done() {
            return Some(self.target);
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = self.taken as f32 / self.steps as f32;
        Some(self.target * fraction)
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.taken >= self.steps
    }
}

/// Counts position samples that didn't move.
///
/// Trips once when `limit` samples in a row equal the previous one; the
/// count starts over whenever the position advances. After tripping it stays
/// quiet, so one stuck source gives one failover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallDetector {
    limit: u32,
    last: Duration,
    unchanged: u32,
    tripped: bool,
}

impl StallDetector {
    /// `baseline` is the position when monitoring starts
    #[must_use]
    pub fn new(limit: u32, baseline: Duration) -> Self {
        Self {
            limit: limit.max(1),
            last: baseline,
            unchanged: 0,
            tripped: false,
        }
    }

    /// Returns true exactly when this sample completes a stall.
    pub fn sample(&mut self, position: Duration) -> bool {
        if self.tripped {
            return false;
        }
        if position == self.last {
            self.unchanged += 1;
        } else {
            self.unchanged = 0;
            self.last = position;
        }
        if self.unchanged >= self.limit {
            self.tripped = true;
        }
        self.tripped
    }

    /// forget the streak, e.g. while the output is deliberately paused
    pub fn reset(&mut self, position: Duration) {
        self.unchanged = 0;
        self.last = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn ramp_reaches_target_in_exactly_n_steps() {
        let mut ramp = FadeRamp::new(0.8, 60);

        let volumes: Vec<f32> = std::iter::from_fn(|| ramp.step()).collect();

        assert_eq!(volumes.len(), 60);
        assert!(volumes.windows(2).all(|w| w[0] < w[1]));
        assert!((volumes[29] - 0.4).abs() < 1e-5);
        assert!((volumes[59] - 0.8).abs() < f32::EPSILON);
        assert!(ramp.is_done());
        assert_eq!(ramp.step(), None);
    }

    #[test]
    fn three_identical_samples_trip_once() {
        let mut stall = StallDetector::new(3, Duration::ZERO);

        assert!(!stall.sample(Duration::ZERO));
        assert!(!stall.sample(Duration::ZERO));
        assert!(stall.sample(Duration::ZERO));
        // already handled, a fourth sample must not ask for another failover
        assert!(!stall.sample(Duration::ZERO));
    }

    #[test]
    fn progress_resets_the_streak() {
        let mut stall = StallDetector::new(3, Duration::ZERO);

        assert!(!stall.sample(secs(3)));
        assert!(!stall.sample(secs(3)));
        assert!(!stall.sample(secs(3)));
        assert!(!stall.sample(secs(6)));
        assert!(!stall.sample(secs(6)));
        assert!(!stall.sample(secs(6)));
        assert!(stall.sample(secs(6)));
    }

    #[test]
    fn reset_clears_the_streak() {
        let mut stall = StallDetector::new(2, secs(1));
        assert!(!stall.sample(secs(1)));
        stall.reset(secs(1));
        assert!(!stall.sample(secs(1)));
        assert!(stall.sample(secs(1)));
    }
}
