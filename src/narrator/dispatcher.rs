//! Synthesis backend client and in-flight request tracking.
//!
//! Each admitted text becomes one `POST {server_url}/event`. The request
//! is tracked as pending from before it is sent until its completion is
//! handed back to the control loop, whatever the outcome. Failures are
//! never retried.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::filter::Category;
use super::gate::preview;
use crate::config::Settings;

const EVENT_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server error ({status}): {body}")]
    Status { status: StatusCode, body: String },

    #[error("unparsable response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("response missing 'audio_path': {0}")]
    MissingAudioPath(String),

    #[error("audio file not found: {}", .0.display())]
    MissingFile(PathBuf),
}

#[derive(Debug, Serialize)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    #[serde(rename = "type")]
    pub category: Category,
    pub voice: &'a str,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Vec<String>,
}

/// HTTP client for the synthesis backend.
#[derive(Debug, Clone)]
pub struct SynthesisClient {
    client: Client,
}

impl SynthesisClient {
    pub fn new() -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(EVENT_TIMEOUT).build()?;
        Ok(Self { client })
    }

    /// Request synthesis and return the path of the produced audio file.
    ///
    /// The path is only returned if the file exists locally.
    pub async fn synthesize(
        &self,
        server_url: &str,
        request: &SynthesisRequest<'_>,
    ) -> Result<PathBuf, DispatchError> {
        let url = format!("{server_url}/event");
        let resp = self
            .client
            .post(&url)
            .timeout(EVENT_TIMEOUT)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(DispatchError::Status { status, body });
        }
        debug!("Server response: {body}");

        let data: serde_json::Value = serde_json::from_str(&body)?;
        let audio_path = data
            .get("audio_path")
            .and_then(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DispatchError::MissingAudioPath(body.clone()))?;

        let path = PathBuf::from(audio_path);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DispatchError::MissingFile(path));
        }
        Ok(path)
    }

    pub async fn voices(&self, server_url: &str) -> Result<Vec<String>, DispatchError> {
        let resp = self
            .client
            .get(format!("{server_url}/voices"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(DispatchError::Status { status, body });
        }
        let parsed: VoicesResponse = serde_json::from_str(&body)?;
        Ok(parsed.voices)
    }

    /// Connectivity check; returns the response body on any 2xx.
    pub async fn health(&self, server_url: &str) -> Result<String, DispatchError> {
        let resp = self
            .client
            .get(format!("{server_url}/health"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(DispatchError::Status { status, body })
        }
    }
}

/// Completion of one dispatched request.
#[derive(Debug)]
pub struct SynthesisDone {
    pub id: u64,
    pub outcome: Result<PathBuf, DispatchError>,
}

struct PendingRequest {
    text: String,
    task: JoinHandle<()>,
}

/// Owns the pending-request set.
pub struct Dispatcher {
    client: SynthesisClient,
    pending: HashMap<u64, PendingRequest>,
    next_id: u64,
    done_tx: mpsc::UnboundedSender<SynthesisDone>,
}

impl Dispatcher {
    pub fn new(client: SynthesisClient, done_tx: mpsc::UnboundedSender<SynthesisDone>) -> Self {
        Self {
            client,
            pending: HashMap::new(),
            next_id: 0,
            done_tx,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Spawn the request for `text`. It counts as pending immediately.
    pub fn dispatch(&mut self, text: String, category: Category, settings: &Settings) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        info!("Queuing [{category}]: {}...", preview(&text));

        let client = self.client.clone();
        let server_url = settings.server_url.clone();
        let voice = settings.selected_voice.clone();
        let body = text.clone();
        let done_tx = self.done_tx.clone();

        let task = tokio::spawn(async move {
            let request = SynthesisRequest {
                text: &body,
                category,
                voice: &voice,
            };
            let outcome = client.synthesize(&server_url, &request).await;
            let _ = done_tx.send(SynthesisDone { id, outcome });
        });

        self.pending.insert(id, PendingRequest { text, task });
        id
    }

    /// Drop the pending entry for `id`, returning its text.
    pub fn complete(&mut self, id: u64) -> Option<String> {
        self.pending.remove(&id).map(|p| p.text)
    }

    /// Abandon every in-flight request.
    pub fn abort_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.task.abort();
        }
    }
}
