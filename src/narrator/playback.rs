//! Single-slot audio playback.
//!
//! IDLE → PLAYING → IDLE
//!
//! Synthesized WAV files wait in a FIFO. Only one is ever playing; the
//! next one is started after the previous cycle (load, play, settle
//! margin, cleanup) has fully returned to idle.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SettingsHandle;

/// Extra wait after a clip's nominal length so the tail is not cut off.
pub const SETTLE_MARGIN: Duration = Duration::from_millis(200);

const BEEP_SAMPLE_RATE: u32 = 44100;
const BEEP_FREQUENCY: f32 = 440.0;
const BEEP_DURATION: Duration = Duration::from_millis(300);
const BEEP_AMPLITUDE: f32 = 0.5;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to open audio output: {0}")]
    Output(String),

    #[error("failed to load {}: {source}", path.display())]
    Load { path: PathBuf, source: hound::Error },
}

/// Decoded audio, interleaved f32 samples.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Decode a WAV file. Blocking.
    pub fn load_wav(path: &Path) -> Result<Self, PlaybackError> {
        let load_err = |source| PlaybackError::Load {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = hound::WavReader::open(path).map_err(load_err)?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(load_err)?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(load_err)?
            }
        };

        Ok(Self {
            samples,
            channels: spec.channels.max(1),
            sample_rate: spec.sample_rate.max(1),
        })
    }

    /// Mono sine tone.
    pub fn tone(frequency: f32, duration: Duration, sample_rate: u32, amplitude: f32) -> Self {
        let count = (sample_rate as f32 * duration.as_secs_f32()) as usize;
        let samples = (0..count)
            .map(|i| {
                (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin()
                    * amplitude
            })
            .collect();
        Self {
            samples,
            channels: 1,
            sample_rate,
        }
    }

    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// The audio device as seen by the scheduler.
pub trait AudioOutput: Send + Sync {
    /// Start playing `clip`, releasing any clip still held first.
    fn start(&self, clip: AudioClip, volume: f32);

    fn set_volume(&self, volume: f32);

    /// Stop and drop the held clip, if any.
    fn release(&self);

    /// Fire-and-forget playback that does not touch the held clip.
    fn play_one_shot(&self, clip: AudioClip, volume: f32);
}

/// Default output device via rodio.
pub struct RodioOutput {
    // In rodio 0.21 the OutputStream is the handle; it must outlive every sink
    stream: OutputStream,
    active: Mutex<Option<Sink>>,
}

impl RodioOutput {
    pub fn open() -> Result<Self, PlaybackError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        Ok(Self {
            stream,
            active: Mutex::new(None),
        })
    }

    fn sink_for(&self, clip: AudioClip, volume: f32) -> Sink {
        let sink = Sink::connect_new(self.stream.mixer());
        sink.set_volume(volume);
        sink.append(SamplesBuffer::new(clip.channels, clip.sample_rate, clip.samples));
        sink
    }
}

impl AudioOutput for RodioOutput {
    fn start(&self, clip: AudioClip, volume: f32) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = active.take() {
            old.stop();
        }
        *active = Some(self.sink_for(clip, volume));
    }

    fn set_volume(&self, volume: f32) {
        if let Some(sink) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            sink.set_volume(volume);
        }
    }

    fn release(&self) {
        if let Some(sink) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sink.stop();
        }
    }

    fn play_one_shot(&self, clip: AudioClip, volume: f32) {
        self.sink_for(clip, volume).detach();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Playing => write!(f, "PLAYING"),
        }
    }
}

/// Sent when a playback cycle has fully finished, successfully or not.
#[derive(Debug)]
pub struct PlaybackDone;

pub struct PlaybackScheduler {
    queue: VecDeque<PathBuf>,
    state: PlaybackState,
    output: Arc<dyn AudioOutput>,
    settings: SettingsHandle,
    task: Option<JoinHandle<()>>,
    done_tx: mpsc::UnboundedSender<PlaybackDone>,
}

impl PlaybackScheduler {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        settings: SettingsHandle,
        done_tx: mpsc::UnboundedSender<PlaybackDone>,
    ) -> Self {
        Self {
            queue: VecDeque::new(),
            state: PlaybackState::Idle,
            output,
            settings,
            task: None,
            done_tx,
        }
    }

    pub fn enqueue(&mut self, path: PathBuf) {
        info!("Audio ready: {} (queue: {})", file_name(&path), self.queue.len() + 1);
        self.queue.push_back(path);
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Start the next clip if idle.
    pub fn pump(&mut self) {
        if self.state != PlaybackState::Idle {
            return;
        }
        let Some(path) = self.queue.pop_front() else {
            return;
        };

        self.transition(PlaybackState::Playing);

        let output = self.output.clone();
        let settings = self.settings.clone();
        let done_tx = self.done_tx.clone();
        self.task = Some(tokio::spawn(async move {
            play_clip(output.as_ref(), &settings, &path).await;
            let _ = done_tx.send(PlaybackDone);
        }));
    }

    pub fn on_finished(&mut self) {
        self.task = None;
        self.transition(PlaybackState::Idle);
    }

    fn transition(&mut self, next: PlaybackState) {
        debug!("State: {} → {next}", self.state);
        self.state = next;
    }

    /// Push the live volume setting to the clip being played.
    pub fn sync_volume(&self) {
        if self.is_playing() {
            self.output.set_volume(self.settings.volume());
        }
    }

    /// Diagnostic tone, independent of the queue.
    pub fn test_beep(&self) {
        let beep = AudioClip::tone(BEEP_FREQUENCY, BEEP_DURATION, BEEP_SAMPLE_RATE, BEEP_AMPLITUDE);
        self.output.play_one_shot(beep, self.settings.volume());
        info!("Playing test beep");
    }

    /// Abandon the current cycle and release the held clip.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.output.release();
        self.queue.clear();
        self.state = PlaybackState::Idle;
    }
}

async fn play_clip(output: &dyn AudioOutput, settings: &SettingsHandle, path: &Path) {
    info!("Loading audio: {}", file_name(path));

    let load_path = path.to_path_buf();
    let clip = match tokio::task::spawn_blocking(move || AudioClip::load_wav(&load_path)).await {
        Ok(Ok(clip)) => clip,
        Ok(Err(e)) => {
            error!("{e}");
            return;
        }
        Err(e) => {
            error!("Audio load task failed: {e}");
            return;
        }
    };

    let duration = clip.duration();
    let volume = settings.volume();
    output.start(clip, volume);
    info!("Playing: {:.1}s at volume {volume:.2}", duration.as_secs_f32());

    tokio::time::sleep(duration + SETTLE_MARGIN).await;

    output.release();
    info!("Finished playing");

    if settings.snapshot().cleanup_old_files {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Deleted: {}", file_name(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not delete audio file {}: {e}", path.display()),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
