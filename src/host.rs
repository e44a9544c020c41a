//! Services the host provides to the core: waking the process at a given
//! time and showing alerts to the user.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Local};

use crate::alarm::AlarmId;

/// One-shot wake requests, at most one outstanding per alarm.
///
/// Delivery is best effort and may be late, so whoever receives a wake
/// re-checks the alarm's own trigger time.
pub trait WakeService {
    /// replaces any request already armed for `id`
    fn arm(&mut self, at: DateTime<Local>, id: AlarmId);
    /// no-op when nothing is armed for `id`
    fn cancel(&mut self, id: AlarmId);
}

pub trait AlertSurface {
    fn post_alert(&self, title: &str, body: &str);
    /// a reminder the host shows at `at` even if the process is asleep
    fn remind_at(&self, at: DateTime<Local>, title: &str, body: &str);
    fn cancel_reminders(&self);
}

/// Wake requests kept in process and delivered by polling [`Self::take_due`]
/// from the control loop. Clones share the same requests.
#[derive(Debug, Clone, Default)]
pub struct LocalWakeService {
    armed: Arc<Mutex<HashMap<AlarmId, DateTime<Local>>>>,
}

impl LocalWakeService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn armed(&self, id: AlarmId) -> Option<DateTime<Local>> {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    /// Removes and returns every request due at `now`.
    pub fn take_due(&self, now: DateTime<Local>) -> Vec<AlarmId> {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        let due: Vec<AlarmId> = armed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            armed.remove(id);
        }
        due
    }
}

impl WakeService for LocalWakeService {
    fn arm(&mut self, at: DateTime<Local>, id: AlarmId) {
        log::debug!("wake for alarm {id} armed at {at}");
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, at);
    }

    fn cancel(&mut self, id: AlarmId) {
        if self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
        {
            log::debug!("wake for alarm {id} cancelled");
        }
    }
}

/// Alerts for a terminal session: written to stdout (with a bell) and the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerts;

impl AlertSurface for LogAlerts {
    fn post_alert(&self, title: &str, body: &str) {
        log::info!("alert: {title}: {body}");
        println!("\x07{title}: {body}");
    }

    fn remind_at(&self, at: DateTime<Local>, title: &str, body: &str) {
        log::info!("reminder `{title}: {body}` set for {at}");
    }

    fn cancel_reminders(&self) {
        log::info!("reminders cancelled");
    }
}
