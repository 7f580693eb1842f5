//! The narrator: one owned pipeline and its control loop.
//!
//! Producers hold a cloneable [`Narrator`] handle and submit events
//! without ever blocking. A single control-loop task owns the admission
//! gate, the pending-request set and the playback queue, so none of them
//! need locking. Network requests and playback cycles run as separate
//! tasks and report back to the loop when they finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::dispatcher::{DispatchError, Dispatcher, SynthesisClient, SynthesisDone};
use super::filter::{self, Category, Interaction, NarrationEvent, Rejection, WorldState};
use super::gate::{preview, AdmissionGate};
use super::playback::{AudioOutput, PlaybackDone, PlaybackScheduler};
use super::sanitizer;
use crate::config::{Settings, SettingsHandle};

const INTAKE_CAPACITY: usize = 256;
const VOLUME_SYNC_INTERVAL: Duration = Duration::from_millis(100);

pub const TEST_NARRATION: &str =
    "This is a test narration to check if everything is working correctly.";

enum Command {
    Submit(NarrationEvent),
    TestBeep,
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStatus {
    pub queued: usize,
    pub pending: usize,
    pub playing: bool,
    pub last_event: Option<Instant>,
}

impl PipelineStatus {
    pub fn outstanding(&self) -> usize {
        self.queued + self.pending
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0 && !self.playing
    }
}

/// Handle to the running pipeline.
#[derive(Clone)]
pub struct Narrator {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<PipelineStatus>,
    settings: SettingsHandle,
    client: SynthesisClient,
}

impl Narrator {
    /// Spawn the control loop. Must be called inside a tokio runtime.
    pub fn start(
        settings: SettingsHandle,
        output: Arc<dyn AudioOutput>,
    ) -> Result<(Self, JoinHandle<()>), DispatchError> {
        let client = SynthesisClient::new()?;
        let (command_tx, command_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (status_tx, status_rx) = watch::channel(PipelineStatus::default());
        let (synth_tx, synth_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();

        let control = ControlLoop {
            settings: settings.clone(),
            gate: AdmissionGate::default(),
            dispatcher: Dispatcher::new(client.clone(), synth_tx),
            playback: PlaybackScheduler::new(output, settings.clone(), playback_tx),
            status_tx,
        };
        let handle = tokio::spawn(control.run(command_rx, synth_rx, playback_rx));

        let narrator = Self {
            commands: command_tx,
            status: status_rx,
            settings,
            client,
        };
        Ok((narrator, handle))
    }

    /// Fire-and-forget entry point for producers.
    pub fn submit(&self, text: impl Into<String>, category: Category) {
        self.submit_event(NarrationEvent::new(text, category));
    }

    pub fn submit_letter(&self, label: &str, body: &str) {
        self.submit_event(NarrationEvent::letter(label, body));
    }

    pub fn submit_interaction(&self, interaction: &Interaction, world: WorldState) {
        let event = NarrationEvent::social(interaction, world);
        if event.raw_text.is_empty() {
            trace!("No speakable text for interaction {}", interaction.def_name);
            return;
        }
        self.submit_event(event);
    }

    pub fn submit_event(&self, event: NarrationEvent) {
        match self.commands.try_send(Command::Submit(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Intake channel full, dropping event"),
            Err(TrySendError::Closed(_)) => debug!("Narrator stopped, dropping event"),
        }
    }

    /// Push a fixed message through the whole pipeline.
    pub fn test_narration(&self) {
        info!("Queuing test narration");
        self.submit(TEST_NARRATION, Category::Message);
    }

    pub fn test_beep(&self) {
        if self.commands.try_send(Command::TestBeep).is_err() {
            warn!("Narrator busy or stopped, test beep skipped");
        }
    }

    /// Fetch the backend's voice list into the settings.
    pub async fn refresh_voices(&self) -> Result<Vec<String>, DispatchError> {
        let server_url = self.settings.snapshot().server_url;
        let voices = self.client.voices(&server_url).await?;
        // Clamping keeps the list non-empty and the selection inside it
        let updated = self.settings.update(|s| s.available_voices = voices.clone());
        info!(
            "Refreshed voice list: {} voices (selected: {})",
            updated.available_voices.len(),
            updated.selected_voice
        );
        Ok(voices)
    }

    pub async fn test_connection(&self) -> Result<String, DispatchError> {
        let server_url = self.settings.snapshot().server_url;
        info!("Testing connection to {server_url}/health...");
        let body = self.client.health(&server_url).await?;
        info!("Server connected: {body}");
        Ok(body)
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Stop the control loop, abandoning in-flight work.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

struct ControlLoop {
    settings: SettingsHandle,
    gate: AdmissionGate,
    dispatcher: Dispatcher,
    playback: PlaybackScheduler,
    status_tx: watch::Sender<PipelineStatus>,
}

impl ControlLoop {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut synth_rx: mpsc::UnboundedReceiver<SynthesisDone>,
        mut playback_rx: mpsc::UnboundedReceiver<PlaybackDone>,
    ) {
        let mut volume_sync = tokio::time::interval(VOLUME_SYNC_INTERVAL);
        volume_sync.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Narrator ready");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Submit(event)) => self.on_event(event),
                        Some(Command::TestBeep) => self.playback.test_beep(),
                        Some(Command::Shutdown) | None => break,
                    }
                }
                Some(done) = synth_rx.recv() => self.on_synthesized(done),
                Some(PlaybackDone) = playback_rx.recv() => self.playback.on_finished(),
                _ = volume_sync.tick() => self.playback.sync_volume(),
            }

            self.playback.pump();
            self.publish_status();
        }

        self.dispatcher.abort_all();
        self.playback.shutdown();
        self.publish_status();
        info!("Narrator stopped");
    }

    fn on_event(&mut self, event: NarrationEvent) {
        let settings = self.settings.snapshot();
        match self.admit(&event, &settings) {
            Ok(text) => {
                self.dispatcher.dispatch(text, event.category, &settings);
            }
            Err(reason) => trace!("Rejected [{}]: {reason}", event.category),
        }
    }

    /// Filter, clean and gate one event, returning the text to synthesize.
    fn admit(&mut self, event: &NarrationEvent, settings: &Settings) -> Result<String, Rejection> {
        filter::accept(event, settings, self.gate.last_social())?;

        let text = sanitizer::clean(&event.raw_text, settings.max_text_length);
        filter::accept_sanitized(event.category, &text)?;

        let outstanding = self.dispatcher.pending_len() + self.playback.queued_len();
        self.gate.try_admit(
            &text,
            event.category,
            outstanding,
            settings.max_queue_size,
            event.timestamp,
        )?;
        Ok(text)
    }

    fn on_synthesized(&mut self, done: SynthesisDone) {
        let text = self.dispatcher.complete(done.id).unwrap_or_default();
        match done.outcome {
            Ok(path) => self.playback.enqueue(path),
            Err(e) => error!("Dropping narration \"{}\": {e}", preview(&text)),
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(PipelineStatus {
            queued: self.playback.queued_len(),
            pending: self.dispatcher.pending_len(),
            playing: self.playback.is_playing(),
            last_event: self.gate.last_event(),
        });
    }
}
