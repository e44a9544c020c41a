use std::{
    str::FromStr,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use chrono::{DateTime, Local};

use crate::{
    alarm::{Alarm, AlarmId},
    audio::{FailoverReason, PlaybackKind},
};

/// State changes the core reports to whoever is listening (a UI, the CLI).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// complete snapshot after any alarm mutation
    AlarmChanged(Alarm),
    AlarmTriggered {
        alarm_id: AlarmId,
        at: DateTime<Local>,
    },
    AlarmSnoozed {
        alarm_id: AlarmId,
        until: DateTime<Local>,
    },
    AlarmStopped {
        alarm_id: AlarmId,
    },
    PlaybackStarted {
        station: String,
        kind: PlaybackKind,
    },
    PlaybackFailover {
        station: String,
        reason: FailoverReason,
    },
    PlaybackStopped,
    TimerTick {
        remaining_seconds: u32,
    },
    TimerCompleted,
    StopwatchLap {
        index: usize,
        elapsed: Duration,
    },
}

/// Fans events out to every subscriber. Clones share the subscriber list;
/// subscribers that hung up are dropped on the next send.
#[derive(Debug, Clone, Default)]
pub struct Events {
    senders: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl Events {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: &Event) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Requests fed into the control loop from outside it (stdin, signals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stop,
    Snooze,
    Toggle,
    Lap,
    Pause,
    Resume,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(Self::Stop),
            "snooze" => Ok(Self::Snooze),
            "toggle" => Ok(Self::Toggle),
            "lap" => Ok(Self::Lap),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "status" => Ok(Self::Status),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(format!("unknown command `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_each_event() {
        let events = Events::new();
        let first = events.subscribe();
        let second = events.clone().subscribe();

        events.emit(&Event::TimerCompleted);

        assert_eq!(first.try_recv(), Ok(Event::TimerCompleted));
        assert_eq!(second.try_recv(), Ok(Event::TimerCompleted));
    }

    #[test]
    fn hung_up_subscribers_are_dropped() {
        let events = Events::new();
        drop(events.subscribe());
        let alive = events.subscribe();

        events.emit(&Event::PlaybackStopped);
        events.emit(&Event::PlaybackStopped);

        assert_eq!(alive.try_iter().count(), 2);
        assert_eq!(events.senders.lock().unwrap().len(), 1);
    }

    #[test]
    fn parses_commands() {
        assert_eq!(" Snooze\n".parse(), Ok(Command::Snooze));
        assert_eq!("q".parse(), Ok(Command::Quit));
        assert!("dance".parse::<Command>().is_err());
    }
}
