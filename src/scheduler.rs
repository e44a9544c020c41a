//! Owns the alarm record: every change goes through [`AlarmService`], which
//! keeps the wake request, playback and the stored copy in line with it.

use std::{cell::RefCell, fmt, rc::Rc};

use chrono::{DateTime, Local, TimeDelta};

use crate::{
    alarm::{next_trigger, time_of_day, Alarm, TriggerOrigin, MAX_SNOOZE_MINUTES},
    audio::AudioEngine,
    clock::Clock,
    communication::{Event, Events},
    error::AlarmError,
    host::{AlertSurface, WakeService},
    station::CLASSIC_STATION_ID,
    store::{self, Store},
};

pub const ALARM_KEY: &str = "alarm";

const ALERT_TITLE: &str = "Alarm";

/// The services an [`AlarmService`] drives.
pub struct Collaborators {
    pub store: Box<dyn Store>,
    pub wake: Box<dyn WakeService>,
    pub alerts: Rc<dyn AlertSurface>,
    pub audio: Rc<RefCell<AudioEngine>>,
    pub clock: Rc<dyn Clock>,
    pub events: Events,
}

pub struct AlarmService {
    alarm: Alarm,
    /// the record as last written or read, to spot edits by other processes
    synced: Option<Alarm>,
    store: Box<dyn Store>,
    wake: Box<dyn WakeService>,
    alerts: Rc<dyn AlertSurface>,
    audio: Rc<RefCell<AudioEngine>>,
    clock: Rc<dyn Clock>,
    events: Events,
}

impl fmt::Debug for AlarmService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmService")
            .field("alarm", &self.alarm)
            .finish_non_exhaustive()
    }
}

impl AlarmService {
    /// Loads the stored alarm, or creates and stores the default one on first
    /// launch. A record that can't be decoded counts as missing.
    pub fn load(services: Collaborators, default_snooze_minutes: u32) -> Self {
        let stored = store::load::<Alarm>(services.store.as_ref(), ALARM_KEY);
        let first_launch = stored.is_none();
        let synced = stored.clone();
        let mut alarm = stored.unwrap_or_else(|| Alarm {
            snooze_minutes: default_snooze_minutes,
            ..Alarm::default()
        });
        sanitize(&mut alarm);

        let mut service = Self {
            alarm,
            synced,
            store: services.store,
            wake: services.wake,
            alerts: services.alerts,
            audio: services.audio,
            clock: services.clock,
            events: services.events,
        };
        if first_launch {
            log::info!("no saved alarm, starting with {}", service.alarm.time);
            service.persist();
        }
        service
    }

    /// Picks up a record another process stored since this one last wrote or
    /// read it, then re-arms for it. Returns true if the alarm changed.
    pub fn sync(&mut self) -> bool {
        let Some(stored) = store::load::<Alarm>(self.store.as_ref(), ALARM_KEY) else {
            return false;
        };
        if self.synced.as_ref() == Some(&stored) {
            return false;
        }
        self.synced = Some(stored.clone());
        let mut alarm = stored;
        sanitize(&mut alarm);
        if alarm == self.alarm {
            return false;
        }
        log::info!("alarm was changed elsewhere, now {}", alarm.time);

        let previous = std::mem::replace(&mut self.alarm, alarm);
        if previous.id != self.alarm.id {
            self.wake.cancel(previous.id);
        }
        if previous.triggered && !self.alarm.triggered {
            self.audio.borrow_mut().stop();
        }
        self.alerts.cancel_reminders();
        if !self.alarm.enabled || self.alarm.triggered {
            self.wake.cancel(self.alarm.id);
        } else if let Some(at) = self.alarm.next_trigger_at {
            self.wake.arm(at, self.alarm.id);
            self.alerts.remind_at(at, ALERT_TITLE, &self.alert_body());
        } else {
            self.arm_next();
            self.persist();
        }
        self.events.emit(&Event::AlarmChanged(self.alarm.clone()));
        true
    }

    #[must_use]
    pub const fn alarm(&self) -> &Alarm {
        &self.alarm
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.audio.borrow().is_playing()
    }

    /// Moves the alarm to `hour:minute`. An enabled alarm is re-armed for the
    /// new time, dropping any pending snooze.
    pub fn set_time(&mut self, hour: u32, minute: u32) -> Result<(), AlarmError> {
        self.alarm.time = time_of_day(hour, minute)?;
        if self.alarm.enabled && !self.alarm.triggered {
            self.alarm.origin = TriggerOrigin::Scheduled;
            self.arm_next();
        }
        self.commit();
        Ok(())
    }

    pub fn set_snooze_minutes(&mut self, minutes: u32) -> Result<(), AlarmError> {
        if !(1..=MAX_SNOOZE_MINUTES).contains(&minutes) {
            return Err(AlarmError::InvalidSnooze {
                got: minutes,
                max: MAX_SNOOZE_MINUTES,
            });
        }
        self.alarm.snooze_minutes = minutes;
        self.commit();
        Ok(())
    }

    pub fn set_fade_in(&mut self, fade_in: bool) {
        self.alarm.volume_fade_in = fade_in;
        self.commit();
    }

    /// Any id is accepted; one that doesn't resolve plays the built-in tone.
    pub fn set_station(&mut self, station_id: &str) {
        let station_id = station_id.trim();
        self.alarm.station = if station_id.is_empty() {
            CLASSIC_STATION_ID.to_string()
        } else {
            station_id.to_string()
        };
        self.commit();
    }

    pub fn toggle(&mut self) {
        self.set_enabled(!self.alarm.enabled);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.alarm.enabled = true;
            self.alarm.snooze_count = 0;
            self.alarm.origin = TriggerOrigin::Scheduled;
            if !self.alarm.triggered {
                self.arm_next();
            }
        } else {
            self.alarm.enabled = false;
            self.disarm();
        }
        log::info!(
            "alarm {} {}",
            self.alarm.time,
            if enabled { "enabled" } else { "disabled" }
        );
        self.commit();
    }

    /// Puts a ringing alarm off for its snooze duration. Does nothing unless
    /// the alarm is ringing.
    pub fn snooze(&mut self) -> bool {
        if !self.alarm.triggered {
            log::debug!("snooze ignored, alarm is not ringing");
            return false;
        }
        let until = self.now() + TimeDelta::minutes(i64::from(self.alarm.snooze_minutes));
        self.alarm.triggered = false;
        self.alarm.snooze_count += 1;
        self.alarm.origin = TriggerOrigin::Snooze;
        self.alarm.next_trigger_at = Some(until);
        self.audio.borrow_mut().stop();
        self.wake.arm(until, self.alarm.id);
        self.alerts.cancel_reminders();
        self.alerts.remind_at(until, ALERT_TITLE, "Snoozed alarm");
        log::info!(
            "alarm snoozed until {until} ({} time(s))",
            self.alarm.snooze_count
        );
        self.events.emit(&Event::AlarmSnoozed {
            alarm_id: self.alarm.id,
            until,
        });
        self.commit();
        true
    }

    /// Silences the alarm and switches it off.
    pub fn stop(&mut self) {
        let was_ringing = self.alarm.triggered;
        self.alarm.enabled = false;
        self.alarm.snooze_count = 0;
        self.disarm();
        if was_ringing {
            log::info!("alarm stopped");
        }
        self.events.emit(&Event::AlarmStopped {
            alarm_id: self.alarm.id,
        });
        self.commit();
    }

    /// Starts ringing. Called by the trigger detector once per armed target.
    pub(crate) fn fire(&mut self, target: DateTime<Local>) {
        self.alarm.triggered = true;
        if self.alarm.origin == TriggerOrigin::Scheduled {
            self.alarm.snooze_count = 0;
        }
        log::info!("alarm due at {target} is ringing");
        let fade_in = self.alarm.volume_fade_in;
        let station = self.alarm.station.clone();
        self.audio.borrow_mut().play(&station, fade_in);
        self.alerts.post_alert(ALERT_TITLE, &self.alert_body());
        self.events.emit(&Event::AlarmTriggered {
            alarm_id: self.alarm.id,
            at: self.now(),
        });
        self.commit();
    }

    /// Re-registers the pending wake request with the host. Used after a
    /// restart and when a wake arrived early.
    pub(crate) fn restore_wake(&mut self) {
        if !self.alarm.enabled || self.alarm.triggered {
            self.wake.cancel(self.alarm.id);
            return;
        }
        match self.alarm.next_trigger_at {
            Some(at) => self.wake.arm(at, self.alarm.id),
            None => {
                self.arm_next();
                self.commit();
            }
        }
    }

    fn arm_next(&mut self) {
        let at = next_trigger(self.alarm.time, &self.now());
        self.alarm.next_trigger_at = Some(at);
        self.wake.arm(at, self.alarm.id);
        self.alerts.cancel_reminders();
        self.alerts.remind_at(at, ALERT_TITLE, &self.alert_body());
        log::info!("alarm armed for {at}");
    }

    fn disarm(&mut self) {
        self.alarm.triggered = false;
        self.alarm.next_trigger_at = None;
        self.alarm.origin = TriggerOrigin::Scheduled;
        self.wake.cancel(self.alarm.id);
        self.alerts.cancel_reminders();
        self.audio.borrow_mut().stop();
    }

    fn alert_body(&self) -> String {
        format!("It's {}", self.alarm.time.format("%H:%M"))
    }

    fn persist(&mut self) {
        match store::save(self.store.as_mut(), ALARM_KEY, &self.alarm) {
            Ok(()) => self.synced = Some(self.alarm.clone()),
            Err(e) => log::error!("couldn't save alarm: {e}"),
        }
    }

    /// stores the complete record and tells listeners about it
    fn commit(&mut self) {
        self.persist();
        self.events.emit(&Event::AlarmChanged(self.alarm.clone()));
    }
}

/// Repairs values a hand-edited or older record may carry.
fn sanitize(alarm: &mut Alarm) {
    alarm.snooze_minutes = alarm.snooze_minutes.clamp(1, MAX_SNOOZE_MINUTES);
    if alarm.station.trim().is_empty() {
        alarm.station = CLASSIC_STATION_ID.to_string();
    }
    if !alarm.enabled {
        alarm.next_trigger_at = None;
    }
}
