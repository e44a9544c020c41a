//! Playback through the default output device with rodio.
//!
//! Tones and files are appended to a [`Sink`] directly. Streams are fetched
//! with reqwest and decoded on a background thread which hands sample blocks
//! to a [`LiveSource`]; when the network falls behind the source plays
//! silence and its position stops moving, which is what the engine's health
//! check looks for.

use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, SyncSender, TryRecvError},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};

use rodio::{source::SineWave, Decoder, OutputStream, OutputStreamBuilder, Sink, Source};

use super::{AudioBackend, Output, OutputState};
use crate::{config::ToneSettings, error::AudioError};

/// how much of the start of a stream is kept so the decoder can rewind while
/// probing the format
const PROBE_WINDOW: usize = 256 * 1024;
const BLOCK_SAMPLES: usize = 4096;
/// Blocking reqwest applies this to each read of the body, so a server that
/// goes quiet ends the decoder thread instead of parking it for good.
const READ_TIMEOUT: Duration = Duration::from_secs(15);
/// decoded blocks queued ahead of the output, a few seconds of audio
const QUEUED_BLOCKS: usize = 64;

/// Opens the output device on first use, so commands that never play
/// anything work on machines without one.
pub struct RodioBackend {
    stream: Option<OutputStream>,
    http: reqwest::blocking::Client,
}

impl RodioBackend {
    pub fn new() -> Result<Self, AudioError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(READ_TIMEOUT)
            .user_agent(concat!("iskr_clock/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AudioError::Output(e.to_string()))?;
        Ok(Self { stream: None, http })
    }

    fn sink(&mut self, volume: f32) -> Result<Arc<Sink>, AudioError> {
        let stream = match &mut self.stream {
            Some(stream) => stream,
            empty => {
                let stream = OutputStreamBuilder::open_default_stream()
                    .map_err(|e| AudioError::Output(e.to_string()))?;
                log::info!("opened default audio output");
                empty.insert(stream)
            }
        };
        let sink = Sink::connect_new(stream.mixer());
        sink.set_volume(volume);
        Ok(Arc::new(sink))
    }
}

impl AudioBackend for RodioBackend {
    fn tone(&mut self, tone: &ToneSettings, volume: f32) -> Result<Box<dyn Output>, AudioError> {
        let sink = self.sink(volume)?;
        sink.append(alarm_tone(tone));
        Ok(Box::new(SinkOutput::started(sink)))
    }

    fn file(&mut self, path: &Path, volume: f32) -> Result<Box<dyn Output>, AudioError> {
        let file = File::open(path).map_err(|source| AudioError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let decoder =
            Decoder::new(BufReader::new(file)).map_err(|e| AudioError::Decode(e.to_string()))?;
        let sink = self.sink(volume)?;
        sink.append(decoder.repeat_infinite());
        Ok(Box::new(SinkOutput::started(sink)))
    }

    fn stream(&mut self, url: &str, volume: f32) -> Result<Box<dyn Output>, AudioError> {
        let output = SinkOutput::pending(self.sink(volume)?);
        let worker = StreamWorker {
            url: url.to_string(),
            http: self.http.clone(),
            sink: Arc::clone(&output.sink),
            shared: Arc::clone(&output.shared),
        };
        thread::Builder::new()
            .name("stream-decoder".to_string())
            .spawn(move || worker.run())
            .map_err(|e| AudioError::Stream {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(output))
    }
}

/// A gap of silence then a sine beep, repeated for as long as it's played.
fn alarm_tone(tone: &ToneSettings) -> impl Source + Send + 'static {
    SineWave::new(tone.frequency_hz)
        .take_duration(Duration::from_millis(tone.beep_ms))
        .amplify(tone.amplitude)
        .delay(Duration::from_millis(tone.gap_ms))
        .repeat_infinite()
}

/// State the stream thread reports back to the control loop.
#[derive(Debug, Default)]
struct Shared {
    started: AtomicBool,
    stopped: AtomicBool,
    failure: Mutex<Option<String>>,
    /// samples actually played, only counted for live streams
    played: AtomicU64,
    samples_per_second: AtomicU64,
}

impl Shared {
    fn fail(&self, reason: String) {
        log::warn!("stream failed: {reason}");
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(reason);
    }
}

struct SinkOutput {
    sink: Arc<Sink>,
    shared: Arc<Shared>,
    live: bool,
}

impl SinkOutput {
    fn started(sink: Arc<Sink>) -> Self {
        let shared = Shared::default();
        shared.started.store(true, Ordering::SeqCst);
        Self {
            sink,
            shared: Arc::new(shared),
            live: false,
        }
    }

    fn pending(sink: Arc<Sink>) -> Self {
        Self {
            sink,
            shared: Arc::default(),
            live: true,
        }
    }
}

impl Output for SinkOutput {
    fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume);
    }

    fn position(&self) -> Duration {
        if !self.live {
            return self.sink.get_pos();
        }
        let rate = self.shared.samples_per_second.load(Ordering::SeqCst);
        if rate == 0 {
            return Duration::ZERO;
        }
        let played = self.shared.played.load(Ordering::SeqCst);
        Duration::from_secs(played / rate)
            + Duration::from_nanos((played % rate) * 1_000_000_000 / rate)
    }

    fn state(&self) -> OutputState {
        if let Some(reason) = self
            .shared
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return OutputState::Failed(reason);
        }
        if self.shared.started.load(Ordering::SeqCst) && self.sink.empty() {
            return OutputState::Failed("source ended".to_string());
        }
        if self.sink.is_paused() {
            OutputState::Paused
        } else {
            OutputState::Playing
        }
    }

    fn stop(&mut self) {
        if !self.shared.stopped.swap(true, Ordering::SeqCst) {
            self.sink.stop();
        }
    }
}

impl Drop for SinkOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StreamWorker {
    url: String,
    http: reqwest::blocking::Client,
    sink: Arc<Sink>,
    shared: Arc<Shared>,
}

impl StreamWorker {
    fn run(self) {
        if let Err(e) = self.pump() {
            if !self.shared.stopped.load(Ordering::SeqCst) {
                self.shared.fail(e.to_string());
            }
        }
    }

    fn pump(&self) -> Result<(), AudioError> {
        let stream_error = |reason: String| AudioError::Stream {
            url: self.url.clone(),
            reason,
        };
        log::info!("connecting to {}", self.url);
        let response = self
            .http
            .get(&self.url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| stream_error(e.to_string()))?;
        let mut decoder = Decoder::new(StreamReader::new(response))
            .map_err(|e| AudioError::Decode(e.to_string()))?;

        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        self.shared
            .samples_per_second
            .store(u64::from(sample_rate) * u64::from(channels), Ordering::SeqCst);

        let (blocks, rx) = mpsc::sync_channel(QUEUED_BLOCKS);
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.sink.append(LiveSource {
            blocks: rx,
            current: Vec::new(),
            index: 0,
            channels,
            sample_rate,
            shared: Arc::clone(&self.shared),
        });
        self.shared.started.store(true, Ordering::SeqCst);
        log::info!("streaming {} ({channels} ch, {sample_rate} Hz)", self.url);

        Self::forward(&mut decoder, &blocks, &self.shared.stopped);
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }
        Err(stream_error("stream ended".to_string()))
    }

    /// returns when the decoder runs dry, the output hangs up or playback
    /// was stopped
    fn forward(
        decoder: &mut impl Iterator<Item = f32>,
        blocks: &SyncSender<Vec<f32>>,
        stopped: &AtomicBool,
    ) {
        while !stopped.load(Ordering::SeqCst) {
            let block: Vec<f32> = decoder.by_ref().take(BLOCK_SAMPLES).collect();
            if block.is_empty() || blocks.send(block).is_err() {
                return;
            }
        }
    }
}

/// Plays whatever the stream thread has decoded so far and silence while
/// it waits for more.
struct LiveSource {
    blocks: Receiver<Vec<f32>>,
    current: Vec<f32>,
    index: usize,
    channels: u16,
    sample_rate: u32,
    shared: Arc<Shared>,
}

impl Iterator for LiveSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        while self.index >= self.current.len() {
            match self.blocks.try_recv() {
                Ok(block) => {
                    self.current = block;
                    self.index = 0;
                }
                Err(TryRecvError::Empty) => return Some(0.0),
                Err(TryRecvError::Disconnected) => return None,
            }
        }
        let sample = self.current[self.index];
        self.index += 1;
        self.shared.played.fetch_add(1, Ordering::Relaxed);
        Some(sample)
    }
}

impl Source for LiveSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Makes a forward-only network body look seekable enough for the decoder.
///
/// Bytes are kept in a window so the decoder can rewind into what it has
/// already read; once reading passes [`PROBE_WINDOW`] everything behind the
/// read position is dropped.
struct StreamReader<R> {
    inner: Mutex<R>,
    window: Vec<u8>,
    /// absolute offset of `window[0]`
    base: u64,
    pos: u64,
}

impl<R: Read> StreamReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: Mutex::new(inner),
            window: Vec::new(),
            base: 0,
            pos: 0,
        }
    }

    fn end(&self) -> u64 {
        self.base + self.window.len() as u64
    }

    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0; 16 * 1024];
        let read = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read(&mut chunk)?;
        self.window.extend_from_slice(&chunk[..read]);
        Ok(read)
    }

    fn compact(&mut self) {
        let consumed = usize::try_from(self.pos - self.base).unwrap_or(usize::MAX);
        if self.pos >= PROBE_WINDOW as u64 && consumed > 0 {
            self.window.drain(..consumed.min(self.window.len()));
            self.base = self.pos;
        }
    }
}

impl<R: Read> Read for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.end() && self.fill()? == 0 {
            return Ok(0);
        }
        let start = usize::try_from(self.pos - self.base)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let available = &self.window[start..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n as u64;
        self.compact();
        Ok(n)
    }
}

impl<R: Read> Seek for StreamReader<R> {
    fn seek(&mut self, to: SeekFrom) -> io::Result<u64> {
        let target = match to {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(_) => None,
        };
        match target {
            Some(target) if target >= self.base && target <= self.end() => {
                self.pos = target;
                Ok(target)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "live stream can't seek outside what was already read",
            )),
        }
    }
}
