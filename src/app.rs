//! The application root: builds every service once, hands each its
//! collaborators and drives them all from one control loop.

use std::{
    cell::RefCell,
    fmt,
    io::BufRead,
    path::PathBuf,
    rc::Rc,
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::Duration,
};

use crate::{
    audio::{AudioBackend, AudioEngine, PlaybackSettings, RodioBackend},
    clock::{Clock, SystemClock},
    communication::{Command, Event, Events},
    config::Config,
    detector::TriggerDetector,
    error::{Error, TimerError},
    host::{AlertSurface, LocalWakeService, LogAlerts},
    scheduler::{AlarmService, Collaborators},
    station::StationRegistry,
    store::{Store, TomlDirStore},
    tasks::{TaskHandle, TaskQueue},
    timer::{format_centis, Stopwatch, StopwatchPhase, Timer, TimerPhase},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopTask {
    TimerTick,
    Reload,
}

/// how often the loop looks for records changed by another process
const RELOAD_PERIOD: Duration = Duration::from_secs(1);

pub struct App {
    config: Config,
    clock: Rc<dyn Clock>,
    events: Events,
    wake: LocalWakeService,
    alerts: Rc<dyn AlertSurface>,
    stations: Rc<RefCell<StationRegistry>>,
    audio: Rc<RefCell<AudioEngine>>,
    alarms: AlarmService,
    detector: TriggerDetector,
    timer: Timer,
    stopwatch: Stopwatch,
    tasks: TaskQueue<LoopTask>,
    timer_tick: Option<TaskHandle>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("alarms", &self.alarms)
            .field("timer", &self.timer)
            .field("stopwatch", &self.stopwatch)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Wires the desktop services: records under `data_dir`, the default
    /// sound device and alerts on the terminal.
    pub fn open(config: Config, data_dir: PathBuf) -> Result<Self, Error> {
        let backend = RodioBackend::new()?;
        Ok(Self::new(
            config,
            TomlDirStore::new(data_dir),
            Box::new(backend),
            Rc::new(SystemClock::new()),
            Rc::new(LogAlerts),
        ))
    }

    pub fn new<S: Store + Clone + 'static>(
        config: Config,
        store: S,
        backend: Box<dyn AudioBackend>,
        clock: Rc<dyn Clock>,
        alerts: Rc<dyn AlertSurface>,
    ) -> Self {
        let events = Events::new();
        let stations = Rc::new(RefCell::new(StationRegistry::load(Box::new(store.clone()))));
        let audio = Rc::new(RefCell::new(AudioEngine::new(
            backend,
            Rc::clone(&stations),
            Rc::clone(&clock),
            PlaybackSettings::from(&config),
            events.clone(),
        )));
        let wake = LocalWakeService::new();
        let alarms = AlarmService::load(
            Collaborators {
                store: Box::new(store),
                wake: Box::new(wake.clone()),
                alerts: Rc::clone(&alerts),
                audio: Rc::clone(&audio),
                clock: Rc::clone(&clock),
                events: events.clone(),
            },
            config.default_snooze_minutes,
        );
        let mut tasks = TaskQueue::new();
        tasks.every(clock.elapsed(), RELOAD_PERIOD, LoopTask::Reload);
        Self {
            stopwatch: Stopwatch::new(Rc::clone(&clock)),
            config,
            clock,
            events,
            wake,
            alerts,
            stations,
            audio,
            alarms,
            detector: TriggerDetector::new(),
            timer: Timer::new(),
            tasks,
            timer_tick: None,
        }
    }

    #[must_use]
    pub const fn events(&self) -> &Events {
        &self.events
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn alarms(&self) -> &AlarmService {
        &self.alarms
    }

    pub fn alarms_mut(&mut self) -> &mut AlarmService {
        &mut self.alarms
    }

    #[must_use]
    pub fn stations(&self) -> std::cell::Ref<'_, StationRegistry> {
        self.stations.borrow()
    }

    pub fn stations_mut(&self) -> std::cell::RefMut<'_, StationRegistry> {
        self.stations.borrow_mut()
    }

    #[must_use]
    pub const fn timer(&self) -> &Timer {
        &self.timer
    }

    #[must_use]
    pub const fn stopwatch(&self) -> &Stopwatch {
        &self.stopwatch
    }

    /// Catches up with anything that happened while the process wasn't
    /// running. Call once before the first [`App::step`].
    pub fn reconcile(&mut self) {
        self.detector.reconcile(&mut self.alarms);
    }

    /// Starts a countdown of `seconds`, replacing any running one.
    pub fn start_timer(&mut self, seconds: u32) -> Result<(), TimerError> {
        self.timer.set_seconds(seconds)?;
        if let Some(handle) = self.timer_tick.take() {
            self.tasks.cancel(handle);
        }
        if self.timer.start() {
            self.timer_tick = Some(self.tasks.every(
                self.clock.elapsed(),
                Duration::from_secs(1),
                LoopTask::TimerTick,
            ));
        }
        Ok(())
    }

    pub fn start_stopwatch(&mut self) {
        self.stopwatch.reset();
        self.stopwatch.start();
    }

    /// Adopts alarm and station edits stored by another process, such as a
    /// CLI command run while this loop is up.
    pub fn reload(&mut self) {
        self.stations.borrow_mut().sync();
        self.alarms.sync();
    }

    /// One pass of the control loop: stored edits, wake requests, the
    /// trigger detector, playback upkeep and the countdown.
    pub fn step(&mut self) {
        let due = self.tasks.due(self.clock.elapsed());
        if due.iter().any(|(_, task)| *task == LoopTask::Reload) {
            self.reload();
        }
        for id in self.wake.take_due(self.clock.now()) {
            self.detector.on_wake(&mut self.alarms, id);
        }
        self.detector.poll(&mut self.alarms);
        self.audio.borrow_mut().poll();

        for (handle, task) in due {
            match task {
                LoopTask::Reload => {}
                LoopTask::TimerTick => {
                    let Some(event) = self.timer.tick() else {
                        if self.timer.phase() != TimerPhase::Paused {
                            self.tasks.cancel(handle);
                            self.timer_tick = None;
                        }
                        continue;
                    };
                    if event == Event::TimerCompleted {
                        self.tasks.cancel(handle);
                        self.timer_tick = None;
                        self.timer_done();
                    }
                    self.events.emit(&event);
                }
            }
        }
    }

    fn timer_done(&mut self) {
        log::info!("timer finished");
        // a ringing alarm keeps its station, the alert is enough
        if !self.alarms.alarm().triggered {
            self.audio.borrow_mut().play_tone(false);
        }
        self.alerts.post_alert("Timer", "Time's up");
    }

    /// Applies a command from outside the loop. Returns false on quit.
    pub fn handle(&mut self, command: Command) -> bool {
        log::debug!("command {command:?}");
        if command != Command::Quit {
            self.reload();
        }
        match command {
            Command::Stop => {
                if self.alarms.alarm().triggered {
                    self.alarms.stop();
                } else {
                    self.audio.borrow_mut().stop();
                }
            }
            Command::Snooze => {
                self.alarms.snooze();
            }
            Command::Toggle => self.alarms.toggle(),
            Command::Lap => {
                if let Some(event) = self.stopwatch.lap() {
                    self.events.emit(&event);
                }
            }
            Command::Pause => {
                self.timer.pause();
                self.stopwatch.pause();
            }
            Command::Resume => {
                self.timer.resume();
                if self.stopwatch.phase() == StopwatchPhase::Paused {
                    self.stopwatch.resume();
                }
            }
            Command::Status => println!("{}", self.status()),
            Command::Quit => return false,
        }
        true
    }

    /// one line describing the alarm, timer and stopwatch
    #[must_use]
    pub fn status(&self) -> String {
        let alarm = self.alarms.alarm();
        let mut status = format!(
            "alarm {} {}",
            alarm.time_string(&self.config.time_format),
            if alarm.triggered {
                "ringing".to_string()
            } else if alarm.enabled {
                format!("in {}", alarm.time_remaining(self.clock.now()))
            } else {
                "off".to_string()
            }
        );
        if self.timer.phase() != TimerPhase::Configured {
            status.push_str(&format!(
                " | timer {} {:?}",
                self.timer.display(),
                self.timer.phase()
            ));
        }
        if self.stopwatch.phase() != StopwatchPhase::Stopped {
            status.push_str(&format!(" | stopwatch {}", self.stopwatch.display()));
            let laps: Vec<String> = self
                .stopwatch
                .laps_newest_first()
                .map(|(index, elapsed)| format!("#{index} {}", format_centis(elapsed)))
                .collect();
            if !laps.is_empty() {
                status.push_str(&format!(" laps {}", laps.join(", ")));
            }
        }
        if let Some((station, kind)) = self.audio.borrow().now_playing() {
            status.push_str(&format!(" | playing {station} ({kind:?})"));
        }
        status
    }

    /// Runs until a quit command arrives. Commands are read from `commands`;
    /// if that channel closes the loop keeps going on its own.
    pub fn run(mut self, commands: Receiver<Command>) {
        let tick = self.config.tick();
        let mut commands = Some(commands);
        self.reconcile();
        loop {
            match commands.as_ref().map(|rx| rx.recv_timeout(tick)) {
                Some(Ok(command)) => {
                    if !self.handle(command) {
                        break;
                    }
                }
                Some(Err(RecvTimeoutError::Timeout)) => {}
                Some(Err(RecvTimeoutError::Disconnected)) => {
                    log::info!("command input closed");
                    commands = None;
                }
                None => thread::sleep(tick),
            }
            self.step();
        }
        self.audio.borrow_mut().stop();
        log::info!("control loop stopped");
    }
}

/// Reads commands from stdin on a background thread.
#[must_use]
pub fn stdin_commands() -> Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("{e}"),
            }
        }
    });
    rx
}
