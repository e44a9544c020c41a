//! Bedtime and wake-up suggestions lined up with 90 minute sleep cycles.

use chrono::{NaiveTime, TimeDelta};

pub const CYCLE_MINUTES: i64 = 90;
/// assumed time between lying down and falling asleep
pub const FALL_ASLEEP_MINUTES: i64 = 14;
pub const MAX_CYCLES: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepOption {
    pub cycles: u32,
    pub at: NaiveTime,
}

impl SleepOption {
    /// time actually asleep, not counting falling asleep
    #[must_use]
    pub fn sleep_time(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.cycles) * CYCLE_MINUTES)
    }
}

fn span(cycles: u32) -> TimeDelta {
    TimeDelta::minutes(i64::from(cycles) * CYCLE_MINUTES + FALL_ASLEEP_MINUTES)
}

/// When to go to bed to wake up at `wake`, longest night first.
#[must_use]
pub fn bedtimes(wake: NaiveTime) -> Vec<SleepOption> {
    (1..=MAX_CYCLES)
        .rev()
        .map(|cycles| SleepOption {
            cycles,
            at: wake - span(cycles),
        })
        .collect()
}

/// When to get up after going to bed at `bed`, shortest night first.
#[must_use]
pub fn wake_times(bed: NaiveTime) -> Vec<SleepOption> {
    (1..=MAX_CYCLES)
        .map(|cycles| SleepOption {
            cycles,
            at: bed + span(cycles),
        })
        .collect()
}
