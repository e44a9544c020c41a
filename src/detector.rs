use chrono::{DateTime, Local};

use crate::{alarm::AlarmId, scheduler::AlarmService};

/// Turns "the armed time has passed" into a single trigger edge.
///
/// The control loop polls far more often than once a second and wake
/// requests can arrive late, so instead of comparing wall-clock seconds the
/// detector remembers which target it already fired for and never fires for
/// it twice.
#[derive(Debug, Default)]
pub struct TriggerDetector {
    fired_for: Option<DateTime<Local>>,
}

impl TriggerDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the alarm if its target has passed. Returns true on the edge.
    pub fn poll(&mut self, alarms: &mut AlarmService) -> bool {
        let alarm = alarms.alarm();
        if !alarm.enabled || alarm.triggered {
            return false;
        }
        let Some(target) = alarm.next_trigger_at else {
            return false;
        };
        if alarms.now() < target || self.fired_for == Some(target) {
            return false;
        }
        self.fired_for = Some(target);
        alarms.fire(target);
        true
    }

    /// Brings a freshly loaded alarm up to date: one that came due while the
    /// process was down starts ringing now, any other gets its wake request
    /// back.
    pub fn reconcile(&mut self, alarms: &mut AlarmService) -> bool {
        if self.poll(alarms) {
            log::info!("alarm came due while not running");
            return true;
        }
        alarms.restore_wake();
        false
    }

    /// Handles a wake request from the host. Wakes may be late or early, so
    /// the alarm's own target decides; an early wake is simply re-armed.
    pub fn on_wake(&mut self, alarms: &mut AlarmService, id: AlarmId) -> bool {
        if id != alarms.alarm().id {
            log::warn!("wake for unknown alarm {id} ignored");
            return false;
        }
        if self.poll(alarms) {
            return true;
        }
        log::debug!("wake for alarm {id} arrived before it was due");
        alarms.restore_wake();
        false
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, Timelike};

    use super::*;
    use crate::{
        audio::PlaybackKind,
        communication::Event,
        scheduler::tests::{nine_am, rig},
    };

    const TICK: Duration = Duration::from_millis(100);

    #[test]
    fn alarm_a_minute_ahead_fires_exactly_once() {
        let mut rig = rig();
        let mut detector = TriggerDetector::new();
        let soon = nine_am() + TimeDelta::minutes(1);
        rig.service.set_time(soon.hour(), soon.minute()).unwrap();
        rig.service.set_enabled(true);

        let mut edges = 0;
        // two minutes of 100ms polls, crossing the target
        for _ in 0..1200 {
            rig.wait(TICK);
            if detector.poll(&mut rig.service) {
                edges += 1;
            }
        }

        assert_eq!(edges, 1);
        assert!(rig.service.alarm().triggered);
        assert!(rig.service.is_playing());
        assert_eq!(rig.alerts.posted.borrow().len(), 1);
        let triggered = rig
            .events
            .try_iter()
            .filter(|e| matches!(e, Event::AlarmTriggered { .. }))
            .count();
        assert_eq!(triggered, 1);
    }

    #[test]
    fn does_not_fire_before_the_target() {
        let mut rig = rig();
        let mut detector = TriggerDetector::new();
        rig.service.set_time(9, 5).unwrap();
        rig.service.set_enabled(true);

        rig.wait(Duration::from_secs(4 * 60 + 59));
        assert!(!detector.poll(&mut rig.service));
        rig.wait(Duration::from_secs(1));
        assert!(detector.poll(&mut rig.service));
    }

    #[test]
    fn disabled_alarm_never_fires() {
        let mut rig = rig();
        let mut detector = TriggerDetector::new();
        rig.service.set_time(9, 1).unwrap();

        rig.wait(Duration::from_secs(120));
        assert!(!detector.poll(&mut rig.service));
        assert!(!rig.service.alarm().triggered);
    }

    #[test]
    fn fresh_fire_resets_snooze_count_but_snooze_fire_does_not() {
        let mut rig = rig();
        let mut detector = TriggerDetector::new();
        rig.service.set_time(9, 1).unwrap();
        rig.service.set_enabled(true);
        rig.wait(Duration::from_secs(60));
        assert!(detector.poll(&mut rig.service));

        rig.service.snooze();
        rig.wait(Duration::from_secs(5 * 60));
        assert!(detector.poll(&mut rig.service));
        assert_eq!(rig.service.alarm().snooze_count, 1);
        assert_eq!(rig.backend.count(), 2);

        rig.service.snooze();
        assert_eq!(rig.service.alarm().snooze_count, 2);
        // moving the time drops the snooze, the next ring is a fresh one
        rig.service.set_time(9, 30).unwrap();
        rig.wait(Duration::from_secs(30 * 60));
        assert!(detector.poll(&mut rig.service));
        assert_eq!(rig.service.alarm().snooze_count, 0);
    }

    #[test]
    fn restart_after_the_target_rings_immediately() {
        let mut rig = rig();
        rig.service.set_time(9, 10).unwrap();
        rig.service.set_enabled(true);

        // the process was down from 9:00 until 9:30
        rig.wait(Duration::from_secs(30 * 60));
        let mut restarted = rig.restart();
        let mut detector = TriggerDetector::new();

        assert!(detector.reconcile(&mut restarted.service));
        assert!(restarted.service.alarm().triggered);
        assert_eq!(restarted.backend.kinds(), vec![PlaybackKind::Tone]);
    }

    #[test]
    fn restart_before_the_target_rearms_the_wake() {
        let mut rig = rig();
        rig.service.set_time(10, 0).unwrap();
        rig.service.set_enabled(true);
        let target = rig.service.alarm().next_trigger_at;

        let mut restarted = rig.restart();
        let id = restarted.service.alarm().id;
        assert_eq!(restarted.wake.armed(id), None);

        let mut detector = TriggerDetector::new();
        assert!(!detector.reconcile(&mut restarted.service));
        assert_eq!(restarted.wake.armed(id), target);
        assert!(!restarted.service.alarm().triggered);
    }

    #[test]
    fn early_wake_is_rearmed_and_late_wake_fires() {
        let mut rig = rig();
        let mut detector = TriggerDetector::new();
        rig.service.set_time(9, 2).unwrap();
        rig.service.set_enabled(true);
        let id = rig.service.alarm().id;
        let target = rig.service.alarm().next_trigger_at;

        rig.wait(Duration::from_secs(60));
        assert!(rig.wake.take_due(target.unwrap()).contains(&id));
        assert!(!detector.on_wake(&mut rig.service, id));
        assert_eq!(rig.wake.armed(id), target);

        rig.wait(Duration::from_secs(5 * 60));
        assert!(!detector.on_wake(&mut rig.service, crate::alarm::AlarmId::new()));
        assert!(detector.on_wake(&mut rig.service, id));
        assert!(rig.service.alarm().triggered);
    }
}
