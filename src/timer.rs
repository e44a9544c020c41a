use std::{rc::Rc, time::Duration};

use crate::{clock::Clock, communication::Event, error::TimerError};

/// longest countdown that can be configured, 99:59:59
const MAX_TIMER_SECONDS: u32 = 99 * 3600 + 59 * 60 + 59;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerPhase {
    #[default]
    Configured,
    Running,
    Paused,
    Completed,
}

/// A countdown that moves one second per [`Timer::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timer {
    configured_seconds: u32,
    remaining_seconds: u32,
    phase: TimerPhase,
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures a new duration and puts the timer back in the
    /// configured state.
    pub fn set_time(&mut self, hours: u32, minutes: u32, seconds: u32) -> Result<(), TimerError> {
        if hours > 99 {
            return Err(TimerError::OutOfRange(hours, "hours"));
        }
        if minutes > 59 {
            return Err(TimerError::OutOfRange(minutes, "minutes"));
        }
        if seconds > 59 {
            return Err(TimerError::OutOfRange(seconds, "seconds"));
        }
        self.set_seconds(hours * 3600 + minutes * 60 + seconds)
    }

    pub fn set_seconds(&mut self, total: u32) -> Result<(), TimerError> {
        if total > MAX_TIMER_SECONDS {
            return Err(TimerError::OutOfRange(total, "seconds"));
        }
        self.configured_seconds = total;
        self.remaining_seconds = total;
        self.phase = TimerPhase::Configured;
        Ok(())
    }

    /// Returns false when there's nothing to count down.
    pub fn start(&mut self) -> bool {
        if self.phase != TimerPhase::Configured || self.remaining_seconds == 0 {
            return false;
        }
        self.phase = TimerPhase::Running;
        true
    }

    pub fn pause(&mut self) -> bool {
        if self.phase != TimerPhase::Running {
            return false;
        }
        self.phase = TimerPhase::Paused;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.phase != TimerPhase::Paused {
            return false;
        }
        self.phase = TimerPhase::Running;
        true
    }

    pub fn reset(&mut self) {
        self.remaining_seconds = self.configured_seconds;
        self.phase = TimerPhase::Configured;
    }

    /// Counts one second down. Returns the event to report, if any; reaching
    /// zero yields [`Event::TimerCompleted`] once and stops the countdown.
    pub fn tick(&mut self) -> Option<Event> {
        if self.phase != TimerPhase::Running || self.remaining_seconds == 0 {
            return None;
        }
        self.remaining_seconds -= 1;
        if self.remaining_seconds == 0 {
            self.phase = TimerPhase::Completed;
            return Some(Event::TimerCompleted);
        }
        Some(Event::TimerTick {
            remaining_seconds: self.remaining_seconds,
        })
    }

    #[must_use]
    pub const fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    #[must_use]
    pub const fn configured_seconds(&self) -> u32 {
        self.configured_seconds
    }

    #[must_use]
    pub const fn phase(&self) -> TimerPhase {
        self.phase
    }

    /// remaining time as `HH:MM:SS`
    #[must_use]
    pub fn display(&self) -> String {
        format_hms(self.remaining_seconds)
    }
}

#[must_use]
pub fn format_hms(total_seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        total_seconds / 3600,
        (total_seconds % 3600) / 60,
        total_seconds % 60
    )
}

/// Parses `90`, `1:30` (minutes and seconds) or `01:00:00`.
pub fn parse_duration(input: &str) -> Result<u32, TimerError> {
    let malformed = || TimerError::MalformedDuration(input.to_string());
    let parts = input
        .trim()
        .split(':')
        .map(|part| part.parse::<u32>().map_err(|_| malformed()))
        .collect::<Result<Vec<_>, _>>()?;
    let mut timer = Timer::new();
    match parts[..] {
        [seconds] => timer.set_seconds(seconds)?,
        [minutes, seconds] => timer.set_time(0, minutes, seconds)?,
        [hours, minutes, seconds] => timer.set_time(hours, minutes, seconds)?,
        _ => return Err(malformed()),
    }
    Ok(timer.configured_seconds())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopwatchPhase {
    Stopped,
    Running,
    Paused,
}

/// Measures elapsed time from the monotonic clock rather than by adding up
/// ticks, so a slow control loop can't make it drift.
pub struct Stopwatch {
    clock: Rc<dyn Clock>,
    /// time banked by earlier running stretches
    accumulated: Duration,
    /// monotonic reading when the current stretch started
    resumed_at: Option<Duration>,
    phase: StopwatchPhase,
    laps: Vec<Duration>,
}

impl std::fmt::Debug for Stopwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopwatch")
            .field("elapsed", &self.elapsed())
            .field("phase", &self.phase)
            .field("laps", &self.laps)
            .finish_non_exhaustive()
    }
}

impl Stopwatch {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            accumulated: Duration::ZERO,
            resumed_at: None,
            phase: StopwatchPhase::Stopped,
            laps: Vec::new(),
        }
    }

    pub fn start(&mut self) -> bool {
        if self.phase != StopwatchPhase::Stopped {
            return false;
        }
        self.accumulated = Duration::ZERO;
        self.resumed_at = Some(self.clock.elapsed());
        self.phase = StopwatchPhase::Running;
        true
    }

    pub fn pause(&mut self) -> bool {
        if self.phase != StopwatchPhase::Running {
            return false;
        }
        self.accumulated = self.elapsed();
        self.resumed_at = None;
        self.phase = StopwatchPhase::Paused;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.phase != StopwatchPhase::Paused {
            return false;
        }
        self.resumed_at = Some(self.clock.elapsed());
        self.phase = StopwatchPhase::Running;
        true
    }

    /// back to zero, laps included
    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.resumed_at = None;
        self.phase = StopwatchPhase::Stopped;
        self.laps.clear();
    }

    /// Records the current elapsed time. Only while running.
    pub fn lap(&mut self) -> Option<Event> {
        if self.phase != StopwatchPhase::Running {
            return None;
        }
        let elapsed = self.elapsed();
        self.laps.push(elapsed);
        Some(Event::StopwatchLap {
            index: self.laps.len(),
            elapsed,
        })
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let running = self
            .resumed_at
            .map_or(Duration::ZERO, |at| self.clock.elapsed().saturating_sub(at));
        self.accumulated + running
    }

    #[must_use]
    pub const fn phase(&self) -> StopwatchPhase {
        self.phase
    }

    /// in the order they were taken
    #[must_use]
    pub fn laps(&self) -> &[Duration] {
        &self.laps
    }

    /// `(lap number, elapsed)`, newest first, for display
    pub fn laps_newest_first(&self) -> impl Iterator<Item = (usize, Duration)> + '_ {
        self.laps
            .iter()
            .enumerate()
            .rev()
            .map(|(index, elapsed)| (index + 1, *elapsed))
    }

    /// elapsed time as `HH:MM:SS.cc`
    #[must_use]
    pub fn display(&self) -> String {
        format_centis(self.elapsed())
    }
}

#[must_use]
pub fn format_centis(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60,
        elapsed.subsec_millis() / 10
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn five_second_timer_completes_once() {
        let mut timer = Timer::new();
        timer.set_time(0, 0, 5).unwrap();
        assert!(timer.start());

        let events: Vec<Event> = (0..5).filter_map(|_| timer.tick()).collect();

        assert_eq!(timer.remaining_seconds(), 0);
        assert_eq!(timer.phase(), TimerPhase::Completed);
        assert_eq!(
            events.iter().filter(|e| **e == Event::TimerCompleted).count(),
            1
        );
        assert_eq!(events.last(), Some(&Event::TimerCompleted));
        // completed timers stay put
        assert_eq!(timer.tick(), None);
        assert!(!timer.start());
    }

    #[test]
    fn paused_timer_does_not_count() {
        let mut timer = Timer::new();
        timer.set_time(0, 1, 0).unwrap();
        timer.start();
        timer.tick();
        assert!(timer.pause());
        assert_eq!(timer.tick(), None);
        assert_eq!(timer.display(), "00:00:59");
        assert!(timer.resume());
        assert_eq!(timer.tick(), Some(Event::TimerTick { remaining_seconds: 58 }));

        timer.reset();
        assert_eq!(timer.phase(), TimerPhase::Configured);
        assert_eq!(timer.remaining_seconds(), 60);
    }

    #[test]
    fn zero_timer_does_not_start() {
        let mut timer = Timer::new();
        timer.set_time(0, 0, 0).unwrap();
        assert!(!timer.start());
        assert_eq!(timer.tick(), None);
    }

    #[test]
    fn rejects_out_of_range_parts() {
        let mut timer = Timer::new();
        assert_eq!(timer.set_time(0, 60, 0), Err(TimerError::OutOfRange(60, "minutes")));
        assert_eq!(timer.set_time(0, 0, 75), Err(TimerError::OutOfRange(75, "seconds")));
        assert_eq!(timer.configured_seconds(), 0);
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("90"), Ok(90));
        assert_eq!(parse_duration("1:30"), Ok(90));
        assert_eq!(parse_duration("01:00:05"), Ok(3605));
        assert!(parse_duration("-5").is_err());
        assert!(parse_duration("1:2:3:4").is_err());
        assert!(parse_duration("0:99").is_err());
    }

    #[test]
    fn formats() {
        assert_eq!(format_hms(3725), "01:02:05");
        assert_eq!(format_centis(Duration::from_millis(61_237)), "00:01:01.23");
    }

    #[test]
    fn stopwatch_excludes_paused_time() {
        let clock = ManualClock::starting_at(Local.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap());
        let mut stopwatch = Stopwatch::new(Rc::new(clock.clone()));

        stopwatch.start();
        clock.advance(Duration::from_secs(2));
        stopwatch.pause();
        clock.advance(Duration::from_secs(5));
        stopwatch.resume();
        clock.advance(Duration::from_secs(1));

        assert_eq!(stopwatch.elapsed(), Duration::from_secs(3));
        assert_eq!(stopwatch.display(), "00:00:03.00");
    }

    #[test]
    fn wall_clock_jumps_do_not_move_the_stopwatch() {
        let clock = ManualClock::starting_at(Local.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap());
        let mut stopwatch = Stopwatch::new(Rc::new(clock.clone()));

        stopwatch.start();
        clock.set_wall_clock(Local.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap());
        clock.advance(Duration::from_millis(1500));

        assert_eq!(stopwatch.elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn laps_are_kept_in_order() {
        let clock = ManualClock::starting_at(Local.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap());
        let mut stopwatch = Stopwatch::new(Rc::new(clock.clone()));

        assert_eq!(stopwatch.lap(), None);
        stopwatch.start();
        clock.advance(Duration::from_secs(10));
        stopwatch.lap();
        clock.advance(Duration::from_secs(5));
        assert_eq!(
            stopwatch.lap(),
            Some(Event::StopwatchLap {
                index: 2,
                elapsed: Duration::from_secs(15)
            })
        );
        stopwatch.pause();
        assert_eq!(stopwatch.lap(), None);

        assert_eq!(stopwatch.laps(), &[Duration::from_secs(10), Duration::from_secs(15)]);
        let newest_first: Vec<(usize, Duration)> = stopwatch.laps_newest_first().collect();
        assert_eq!(
            newest_first,
            vec![(2, Duration::from_secs(15)), (1, Duration::from_secs(10))]
        );

        stopwatch.reset();
        assert!(stopwatch.laps().is_empty());
        assert_eq!(stopwatch.elapsed(), Duration::ZERO);
    }
}
