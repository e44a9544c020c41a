//! Alarm sound playback.
//!
//! [`AudioEngine`] decides *what* to play and keeps it playing; an
//! [`AudioBackend`] knows *how* to get samples to the speakers. Whatever goes
//! wrong on the way (unknown station, missing file, dead stream) ends with the
//! synthesized tone playing.

use std::{path::Path, time::Duration};

use crate::{config::ToneSettings, error::AudioError};

pub mod engine;
pub mod monitor;
pub mod rodio_backend;

pub use engine::{AudioEngine, PlaybackSettings};
pub use monitor::{FadeRamp, StallDetector};
pub use rodio_backend::RodioBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackKind {
    Tone,
    Stream,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverReason {
    /// position stopped moving while the output claimed to be playing
    Stalled,
    SourceError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputState {
    Playing,
    Paused,
    /// terminal, the output won't produce sound again
    Failed(String),
}

/// A sound that is currently playing.
pub trait Output {
    fn set_volume(&mut self, volume: f32);
    /// how far playback has advanced since it started
    fn position(&self) -> Duration;
    fn state(&self) -> OutputState;
    /// releases the device; calling it twice is fine
    fn stop(&mut self);
}

pub trait AudioBackend {
    fn tone(&mut self, tone: &ToneSettings, volume: f32) -> Result<Box<dyn Output>, AudioError>;
    fn file(&mut self, path: &Path, volume: f32) -> Result<Box<dyn Output>, AudioError>;
    /// must return quickly; connecting happens in the background and shows up
    /// through [`Output::state`] and [`Output::position`]
    fn stream(&mut self, url: &str, volume: f32) -> Result<Box<dyn Output>, AudioError>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! A backend with hand-driven outputs, so playback can be tested without
    //! a sound card or network.

    use std::{
        cell::RefCell,
        path::{Path, PathBuf},
        rc::Rc,
        time::Duration,
    };

    use super::{AudioBackend, Output, OutputState, PlaybackKind};
    use crate::{config::ToneSettings, error::AudioError};

    #[derive(Debug)]
    pub struct FakeOutputState {
        pub kind: PlaybackKind,
        pub locator: Option<String>,
        pub volume: f32,
        pub position: Duration,
        pub state: OutputState,
        pub stopped: bool,
        pub volume_history: Vec<f32>,
    }

    #[derive(Debug, Clone)]
    pub struct FakeOutput(pub Rc<RefCell<FakeOutputState>>);

    impl Output for FakeOutput {
        fn set_volume(&mut self, volume: f32) {
            let mut state = self.0.borrow_mut();
            state.volume = volume;
            state.volume_history.push(volume);
        }

        fn position(&self) -> Duration {
            self.0.borrow().position
        }

        fn state(&self) -> OutputState {
            self.0.borrow().state.clone()
        }

        fn stop(&mut self) {
            self.0.borrow_mut().stopped = true;
        }
    }

    /// Records every output it opens. Clones share the record.
    #[derive(Debug, Clone, Default)]
    pub struct FakeBackend {
        pub opened: Rc<RefCell<Vec<FakeOutput>>>,
        pub fail_files: Rc<RefCell<bool>>,
        pub fail_tone: Rc<RefCell<bool>>,
    }

    impl FakeBackend {
        fn open(&self, kind: PlaybackKind, locator: Option<String>, volume: f32) -> Box<dyn Output> {
            let output = FakeOutput(Rc::new(RefCell::new(FakeOutputState {
                kind,
                locator,
                volume,
                position: Duration::ZERO,
                state: OutputState::Playing,
                stopped: false,
                volume_history: vec![volume],
            })));
            self.opened.borrow_mut().push(output.clone());
            Box::new(output)
        }

        pub fn last(&self) -> FakeOutput {
            self.opened.borrow().last().cloned().expect("nothing was opened")
        }

        pub fn count(&self) -> usize {
            self.opened.borrow().len()
        }

        pub fn kinds(&self) -> Vec<PlaybackKind> {
            self.opened.borrow().iter().map(|o| o.0.borrow().kind).collect()
        }
    }

    impl AudioBackend for FakeBackend {
        fn tone(&mut self, _tone: &ToneSettings, volume: f32) -> Result<Box<dyn Output>, AudioError> {
            if *self.fail_tone.borrow() {
                return Err(AudioError::Output("no device".to_string()));
            }
            Ok(self.open(PlaybackKind::Tone, None, volume))
        }

        fn file(&mut self, path: &Path, volume: f32) -> Result<Box<dyn Output>, AudioError> {
            if *self.fail_files.borrow() {
                return Err(AudioError::File {
                    path: PathBuf::from(path),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
                });
            }
            Ok(self.open(
                PlaybackKind::File,
                Some(path.display().to_string()),
                volume,
            ))
        }

        fn stream(&mut self, url: &str, volume: f32) -> Result<Box<dyn Output>, AudioError> {
            Ok(self.open(PlaybackKind::Stream, Some(url.to_string()), volume))
        }
    }
}
