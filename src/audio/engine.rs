use std::{cell::RefCell, fmt, rc::Rc};

use super::{
    AudioBackend, FadeRamp, FailoverReason, Output, OutputState, PlaybackKind, StallDetector,
};
use crate::{
    clock::Clock,
    communication::{Event, Events},
    config::{Config, FadeSettings, MonitorSettings, ToneSettings},
    error::AudioError,
    station::{StationRegistry, StationSource, CLASSIC_STATION_ID},
    tasks::{TaskHandle, TaskQueue},
};

/// The parts of [`Config`] playback cares about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    pub volume: f32,
    pub fade: FadeSettings,
    pub monitor: MonitorSettings,
    pub tone: ToneSettings,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PlaybackSettings {
    fn from(config: &Config) -> Self {
        Self {
            volume: config.volume,
            fade: config.fade,
            monitor: config.monitor,
            tone: config.tone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineTask {
    FadeStep,
    HealthCheck,
}

struct Session {
    id: u64,
    station: String,
    kind: PlaybackKind,
    output: Box<dyn Output>,
    fade: Option<(FadeRamp, TaskHandle)>,
    monitor: Option<(StallDetector, TaskHandle)>,
}

/// Plays the alarm sound and keeps it playing.
///
/// Every `play` starts a new session. Fade steps and health checks are
/// tagged with the session they belong to, and ending a session cancels them
/// before anything new starts, so a ramp from an old session can never touch
/// the volume of the next one.
pub struct AudioEngine {
    backend: Box<dyn AudioBackend>,
    stations: Rc<RefCell<StationRegistry>>,
    clock: Rc<dyn Clock>,
    settings: PlaybackSettings,
    events: Events,
    tasks: TaskQueue<(u64, EngineTask)>,
    session: Option<Session>,
    sessions: u64,
}

impl fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioEngine")
            .field("settings", &self.settings)
            .field("playing", &self.now_playing())
            .field("pending_tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl AudioEngine {
    pub fn new(
        backend: Box<dyn AudioBackend>,
        stations: Rc<RefCell<StationRegistry>>,
        clock: Rc<dyn Clock>,
        settings: PlaybackSettings,
        events: Events,
    ) -> Self {
        Self {
            backend,
            stations,
            clock,
            settings,
            events,
            tasks: TaskQueue::new(),
            session: None,
            sessions: 0,
        }
    }

    /// Starts playing `station_id`, replacing whatever is playing.
    ///
    /// Unknown stations and sources that can't be opened fall back to the
    /// built-in tone. Returns what actually started, `None` only when not even
    /// the tone could reach an output device.
    pub fn play(&mut self, station_id: &str, fade_in: bool) -> Option<PlaybackKind> {
        self.end_session();
        let source = self.stations.borrow().resolve(station_id).map(|s| s.source.clone());
        let source = source.unwrap_or_else(|| {
            log::warn!("station `{station_id}` not found, playing the built-in tone");
            StationSource::Tone
        });
        match self.open(&source, fade_in) {
            Ok((output, kind)) => {
                self.begin(station_id, kind, output, fade_in);
                Some(kind)
            }
            Err(e) if matches!(source, StationSource::Tone) => {
                log::error!("couldn't play the built-in tone: {e}");
                None
            }
            Err(e) => {
                log::warn!("couldn't play station `{station_id}`, playing the built-in tone: {e}");
                self.play_tone(fade_in)
            }
        }
    }

    pub fn play_tone(&mut self, fade_in: bool) -> Option<PlaybackKind> {
        self.play(CLASSIC_STATION_ID, fade_in)
    }

    /// Stops playback and cancels every pending fade step and health check.
    /// Safe to call when nothing is playing.
    pub fn stop(&mut self) {
        if self.end_session() {
            self.events.emit(&Event::PlaybackStopped);
        }
    }

    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.session.is_some()
    }

    /// station id and kind of the current session
    #[must_use]
    pub fn now_playing(&self) -> Option<(&str, PlaybackKind)> {
        self.session
            .as_ref()
            .map(|session| (session.station.as_str(), session.kind))
    }

    /// Runs whatever fade steps and health checks came due. Called from the
    /// control loop every tick.
    pub fn poll(&mut self) {
        if let Some(reason) = self.source_error() {
            self.failover(FailoverReason::SourceError(reason));
        }
        for (handle, (session_id, task)) in self.tasks.due(self.clock.elapsed()) {
            let Some(session) = self.session.as_mut().filter(|s| s.id == session_id) else {
                self.tasks.cancel(handle);
                continue;
            };
            match task {
                EngineTask::FadeStep => {
                    let Some((ramp, _)) = session.fade.as_mut() else {
                        self.tasks.cancel(handle);
                        continue;
                    };
                    if let Some(volume) = ramp.step() {
                        session.output.set_volume(volume);
                    }
                    if ramp.is_done() {
                        session.fade = None;
                        self.tasks.cancel(handle);
                    }
                }
                EngineTask::HealthCheck => {
                    let Some((stall, _)) = session.monitor.as_mut() else {
                        self.tasks.cancel(handle);
                        continue;
                    };
                    let position = session.output.position();
                    match session.output.state() {
                        OutputState::Playing => {
                            if stall.sample(position) {
                                self.failover(FailoverReason::Stalled);
                            }
                        }
                        OutputState::Paused => stall.reset(position),
                        OutputState::Failed(reason) => {
                            self.failover(FailoverReason::SourceError(reason));
                        }
                    }
                }
            }
        }
    }

    fn source_error(&self) -> Option<String> {
        let session = self.session.as_ref()?;
        if session.kind == PlaybackKind::Tone {
            return None;
        }
        match session.output.state() {
            OutputState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Swaps a broken source for the built-in tone at full volume. Only logged,
    /// the user just hears the tone.
    fn failover(&mut self, reason: FailoverReason) {
        let Some(station) = self.session.as_ref().map(|s| s.station.clone()) else {
            return;
        };
        log::warn!("station `{station}` failed ({reason:?}), switching to the built-in tone");
        self.end_session();
        self.events.emit(&Event::PlaybackFailover { station, reason });
        match self.open(&StationSource::Tone, false) {
            Ok((output, kind)) => self.begin(CLASSIC_STATION_ID, kind, output, false),
            Err(e) => log::error!("couldn't play the built-in tone: {e}"),
        }
    }

    fn open(
        &mut self,
        source: &StationSource,
        fade_in: bool,
    ) -> Result<(Box<dyn Output>, PlaybackKind), AudioError> {
        let volume = if fade_in { 0.0 } else { self.settings.volume };
        match source {
            StationSource::Tone => self
                .backend
                .tone(&self.settings.tone, volume)
                .map(|output| (output, PlaybackKind::Tone)),
            StationSource::Stream { url } => self
                .backend
                .stream(url, volume)
                .map(|output| (output, PlaybackKind::Stream)),
            StationSource::File { path } => self
                .backend
                .file(path, volume)
                .map(|output| (output, PlaybackKind::File)),
        }
    }

    fn begin(&mut self, station: &str, kind: PlaybackKind, output: Box<dyn Output>, fade_in: bool) {
        self.sessions += 1;
        let id = self.sessions;
        let now = self.clock.elapsed();

        let fade = fade_in.then(|| {
            let ramp = FadeRamp::new(self.settings.volume, self.settings.fade.steps);
            let handle = self
                .tasks
                .every(now, self.settings.fade.step_interval(), (id, EngineTask::FadeStep));
            (ramp, handle)
        });
        // local files and the tone can't stall, only the network can
        let monitor = (kind == PlaybackKind::Stream).then(|| {
            let stall = StallDetector::new(self.settings.monitor.stall_samples, output.position());
            let handle = self
                .tasks
                .every(now, self.settings.monitor.interval(), (id, EngineTask::HealthCheck));
            (stall, handle)
        });

        log::info!("playing station `{station}` ({kind:?})");
        self.session = Some(Session {
            id,
            station: station.to_string(),
            kind,
            output,
            fade,
            monitor,
        });
        self.events.emit(&Event::PlaybackStarted {
            station: station.to_string(),
            kind,
        });
    }

    /// returns whether a session was running
    fn end_session(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        if let Some((_, handle)) = session.fade.take() {
            self.tasks.cancel(handle);
        }
        if let Some((_, handle)) = session.monitor.take() {
            self.tasks.cancel(handle);
        }
        // anything left over belongs to this session too
        self.tasks.cancel_all();
        session.output.stop();
        log::debug!("stopped station `{}`", session.station);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::mpsc::Receiver,
        time::Duration,
    };

    use chrono::{Local, TimeZone};

    use super::*;
    use crate::{
        audio::fake::FakeBackend,
        clock::ManualClock,
        station::Station,
        store::MemoryStore,
    };

    struct Rig {
        engine: AudioEngine,
        backend: FakeBackend,
        clock: ManualClock,
        events: Receiver<Event>,
    }

    fn rig() -> Rig {
        let backend = FakeBackend::default();
        let clock = ManualClock::starting_at(Local.with_ymd_and_hms(2024, 5, 10, 6, 59, 0).unwrap());
        let mut stations = StationRegistry::load(Box::new(MemoryStore::new()));
        stations
            .add(Station::new(
                "night-radio",
                "Night Radio",
                StationSource::Stream {
                    url: "http://radio.example/live".to_string(),
                },
            ))
            .unwrap();
        stations
            .add(Station::new(
                "rooster",
                "Rooster",
                StationSource::File {
                    path: PathBuf::from("/sounds/rooster.mp3"),
                },
            ))
            .unwrap();
        let events = Events::new();
        let receiver = events.subscribe();
        let engine = AudioEngine::new(
            Box::new(backend.clone()),
            Rc::new(RefCell::new(stations)),
            Rc::new(clock.clone()),
            PlaybackSettings::default(),
            events,
        );
        Rig {
            engine,
            backend,
            clock,
            events: receiver,
        }
    }

    impl Rig {
        fn wait(&mut self, secs: u64) {
            self.clock.advance(Duration::from_secs(secs));
            self.engine.poll();
        }

        fn failovers(&self) -> Vec<FailoverReason> {
            self.events
                .try_iter()
                .filter_map(|event| match event {
                    Event::PlaybackFailover { reason, .. } => Some(reason),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn unknown_station_plays_the_tone() {
        let mut rig = rig();

        assert_eq!(rig.engine.play("deleted-station", false), Some(PlaybackKind::Tone));

        assert!(rig.engine.is_playing());
        assert_eq!(rig.backend.kinds(), vec![PlaybackKind::Tone]);
    }

    #[test]
    fn classic_aliases_play_the_tone() {
        let mut rig = rig();
        rig.engine.play("classic_beep", false);
        rig.engine.play("built-in-beep", false);
        assert_eq!(rig.backend.kinds(), vec![PlaybackKind::Tone, PlaybackKind::Tone]);
    }

    #[test]
    fn unreadable_file_falls_back_to_the_tone() {
        let mut rig = rig();
        *rig.backend.fail_files.borrow_mut() = true;

        assert_eq!(rig.engine.play("rooster", false), Some(PlaybackKind::Tone));
        assert_eq!(rig.engine.now_playing(), Some((CLASSIC_STATION_ID, PlaybackKind::Tone)));
    }

    #[test]
    fn no_output_device_means_nothing_plays() {
        let mut rig = rig();
        *rig.backend.fail_tone.borrow_mut() = true;

        assert_eq!(rig.engine.play("classic", false), None);
        assert!(!rig.engine.is_playing());
    }

    #[test]
    fn stalled_stream_fails_over_exactly_once() {
        let mut rig = rig();
        rig.engine.play("night-radio", false);
        let stream = rig.backend.last();

        rig.wait(3);
        rig.wait(3);
        assert_eq!(rig.backend.count(), 1);
        rig.wait(3);

        assert_eq!(rig.backend.kinds(), vec![PlaybackKind::Stream, PlaybackKind::Tone]);
        assert!(stream.0.borrow().stopped);
        assert_eq!(rig.failovers(), vec![FailoverReason::Stalled]);
        assert_eq!(rig.engine.now_playing(), Some((CLASSIC_STATION_ID, PlaybackKind::Tone)));

        // the position still isn't moving, but the tone is already playing
        rig.wait(3);
        rig.wait(3);
        assert_eq!(rig.backend.count(), 2);
        assert!(rig.failovers().is_empty());
    }

    #[test]
    fn advancing_stream_keeps_playing() {
        let mut rig = rig();
        rig.engine.play("night-radio", false);
        let stream = rig.backend.last();

        for tick in 1..=10 {
            stream.0.borrow_mut().position = Duration::from_secs(tick * 3);
            rig.wait(3);
        }

        assert_eq!(rig.backend.count(), 1);
        assert!(rig.failovers().is_empty());
    }

    #[test]
    fn paused_stream_is_not_a_stall() {
        let mut rig = rig();
        rig.engine.play("night-radio", false);
        rig.backend.last().0.borrow_mut().state = OutputState::Paused;

        for _ in 0..5 {
            rig.wait(3);
        }

        assert_eq!(rig.backend.count(), 1);
    }

    #[test]
    fn source_error_fails_over_on_the_next_poll() {
        let mut rig = rig();
        rig.engine.play("night-radio", true);
        rig.backend.last().0.borrow_mut().state = OutputState::Failed("connection reset".to_string());

        rig.engine.poll();

        assert_eq!(
            rig.failovers(),
            vec![FailoverReason::SourceError("connection reset".to_string())]
        );
        let tone = rig.backend.last();
        assert_eq!(tone.0.borrow().kind, PlaybackKind::Tone);
        assert!((tone.0.borrow().volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn fade_ramps_to_target_in_steps() {
        let mut rig = rig();
        rig.engine.play("classic", true);
        let tone = rig.backend.last();
        assert!(tone.0.borrow().volume.abs() < f32::EPSILON);

        rig.clock.advance(Duration::from_millis(500));
        rig.engine.poll();
        assert!((tone.0.borrow().volume - 1.0 / 60.0).abs() < 1e-6);

        for _ in 0..70 {
            rig.clock.advance(Duration::from_millis(500));
            rig.engine.poll();
        }

        let state = tone.0.borrow();
        assert!((state.volume - 1.0).abs() < f32::EPSILON);
        // the initial volume plus one entry per step
        assert_eq!(state.volume_history.len(), 61);
        assert!(rig.engine.tasks.is_empty());
    }

    #[test]
    fn replay_cancels_the_previous_ramp() {
        let mut rig = rig();
        rig.engine.play("classic", true);
        let first = rig.backend.last();
        rig.wait(1);

        rig.engine.play("classic", false);
        let second = rig.backend.last();
        let first_history = first.0.borrow().volume_history.clone();
        for _ in 0..10 {
            rig.wait(1);
        }

        assert!(first.0.borrow().stopped);
        assert_eq!(first.0.borrow().volume_history, first_history);
        assert_eq!(second.0.borrow().volume_history, vec![1.0]);
    }

    #[test]
    fn stop_is_idempotent_and_cancels_everything() {
        let mut rig = rig();
        rig.engine.stop();

        rig.engine.play("night-radio", true);
        let stream = rig.backend.last();
        rig.engine.stop();
        rig.engine.stop();

        assert!(!rig.engine.is_playing());
        assert!(stream.0.borrow().stopped);
        assert!(rig.engine.tasks.is_empty());
        let stops = rig
            .events
            .try_iter()
            .filter(|event| *event == Event::PlaybackStopped)
            .count();
        assert_eq!(stops, 1);

        for _ in 0..5 {
            rig.wait(3);
        }
        assert_eq!(rig.backend.count(), 1);
    }
}
