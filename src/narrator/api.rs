//! Local HTTP intake for out-of-process producers.
//!
//! Event endpoints only hand the event to the narrator and answer
//! `{"status":"queued"}` right away; whether it is narrated is decided by
//! the pipeline. Runs on 127.0.0.1:8768 by default.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::filter::{Category, Interaction, WorldState};
use super::pipeline::Narrator;

#[derive(Clone)]
pub struct ApiState {
    pub narrator: Narrator,
}

#[derive(Deserialize)]
struct LetterRequest {
    label: String,
    #[serde(default)]
    body: String,
}

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

#[derive(Deserialize)]
struct SocialRequest {
    interaction: Interaction,
    #[serde(default)]
    world: WorldState,
}

#[derive(Deserialize)]
struct SetVoiceRequest {
    voice: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub enabled: bool,
    pub playing: bool,
    pub queued: usize,
    pub pending: usize,
    pub voice: String,
    pub last_event_secs_ago: Option<f64>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voices: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            voice: None,
            voices: None,
            detail: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::ok("error")
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/letter", post(handle_letter))
        .route("/message", post(handle_message))
        .route("/social", post(handle_social))
        .route("/set-voice", post(handle_set_voice))
        .route("/voices/refresh", post(handle_refresh_voices))
        .route("/test-connection", post(handle_test_connection))
        .route("/test-beep", post(handle_test_beep))
        .route("/test-narration", post(handle_test_narration))
        .with_state(state)
}

/// Start the intake API as a background tokio task.
pub async fn start_api(state: ApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind intake API on {addr}: {e}");
            return;
        }
    };
    info!("Intake API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Intake API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let status = state.narrator.status();
    let settings = state.narrator.settings().snapshot();
    Json(StatusResponse {
        enabled: settings.enabled,
        playing: status.playing,
        queued: status.queued,
        pending: status.pending,
        voice: settings.selected_voice,
        last_event_secs_ago: status.last_event.map(|t| t.elapsed().as_secs_f64()),
    })
}

async fn handle_letter(
    State(state): State<ApiState>,
    Json(req): Json<LetterRequest>,
) -> Json<SimpleResponse> {
    state.narrator.submit_letter(&req.label, &req.body);
    Json(SimpleResponse::ok("queued"))
}

async fn handle_message(
    State(state): State<ApiState>,
    Json(req): Json<MessageRequest>,
) -> Json<SimpleResponse> {
    state.narrator.submit(req.text, Category::Message);
    Json(SimpleResponse::ok("queued"))
}

async fn handle_social(
    State(state): State<ApiState>,
    Json(req): Json<SocialRequest>,
) -> Json<SimpleResponse> {
    state.narrator.submit_interaction(&req.interaction, req.world);
    Json(SimpleResponse::ok("queued"))
}

async fn handle_set_voice(
    State(state): State<ApiState>,
    Json(req): Json<SetVoiceRequest>,
) -> Json<SimpleResponse> {
    let settings = state.narrator.settings();
    if !settings.snapshot().available_voices.contains(&req.voice) {
        return Json(SimpleResponse::err(format!("Unknown voice: {}", req.voice)));
    }
    settings.update(|s| s.selected_voice = req.voice.clone());
    info!("Voice set to {}", req.voice);
    Json(SimpleResponse {
        voice: Some(req.voice),
        ..SimpleResponse::ok("ok")
    })
}

async fn handle_refresh_voices(State(state): State<ApiState>) -> Json<SimpleResponse> {
    match state.narrator.refresh_voices().await {
        Ok(voices) => Json(SimpleResponse {
            voices: Some(voices),
            voice: Some(state.narrator.settings().snapshot().selected_voice),
            ..SimpleResponse::ok("ok")
        }),
        Err(e) => {
            warn!("Voice refresh failed: {e}");
            Json(SimpleResponse::err(e.to_string()))
        }
    }
}

async fn handle_test_connection(State(state): State<ApiState>) -> Json<SimpleResponse> {
    match state.narrator.test_connection().await {
        Ok(body) => Json(SimpleResponse {
            detail: Some(body),
            ..SimpleResponse::ok("connected")
        }),
        Err(e) => {
            warn!("Connection test failed: {e}");
            Json(SimpleResponse::err(e.to_string()))
        }
    }
}

async fn handle_test_beep(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.narrator.test_beep();
    Json(SimpleResponse::ok("beeping"))
}

async fn handle_test_narration(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.narrator.test_narration();
    Json(SimpleResponse::ok("queued"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, SettingsHandle};
    use crate::narrator::playback::tests::{FakeOutput, OutputEvent};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Intake API in front of a narrator whose backend is `backend_url`.
    async fn intake(backend_url: &str) -> (String, Narrator, Arc<FakeOutput>) {
        let output = Arc::new(FakeOutput::default());
        let settings = SettingsHandle::new(Settings {
            server_url: backend_url.to_string(),
            available_voices: vec!["narrator".into(), "anna".into()],
            ..Settings::default()
        });
        let (narrator, _handle) = Narrator::start(settings, output.clone()).unwrap();
        let url = serve(router(ApiState {
            narrator: narrator.clone(),
        }))
        .await;
        (url, narrator, output)
    }

    async fn post_json(url: &str, body: Value) -> Value {
        reqwest::Client::new()
            .post(url)
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn status_reports_settings_and_pipeline() {
        let (url, _narrator, _output) = intake("http://127.0.0.1:1").await;
        let status: StatusResponse = reqwest::get(format!("{url}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(status.enabled);
        assert!(!status.playing);
        assert_eq!(status.queued + status.pending, 0);
        assert_eq!(status.voice, "narrator");
        assert!(status.last_event_secs_ago.is_none());
    }

    #[tokio::test]
    async fn events_are_acknowledged_immediately() {
        let (url, narrator, _output) = intake("http://127.0.0.1:1").await;

        let resp = post_json(
            &format!("{url}/letter"),
            json!({"label": "Raid", "body": "Pirates are approaching from the east."}),
        )
        .await;
        assert_eq!(resp["status"], "queued");

        let resp = post_json(&format!("{url}/message"), json!({"text": "short"})).await;
        assert_eq!(resp["status"], "queued");

        let resp = post_json(
            &format!("{url}/social"),
            json!({
                "interaction": {
                    "def_name": "Insult",
                    "label": "insulted",
                    "initiator": {"label": "Anna", "spawned": true, "position": {"x": 1, "z": 1}},
                    "recipient": {"label": "Bob", "spawned": true},
                },
                "world": {"time_speed": "normal", "view": {"min_x": 0, "min_z": 0, "max_x": 9, "max_z": 9}},
            }),
        )
        .await;
        assert_eq!(resp["status"], "queued");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while narrator.status().last_event.is_none() {
            assert!(std::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn set_voice_requires_known_voice() {
        let (url, narrator, _output) = intake("http://127.0.0.1:1").await;

        let resp = post_json(&format!("{url}/set-voice"), json!({"voice": "ghost"})).await;
        assert_eq!(resp["status"], "error");
        assert_eq!(narrator.settings().snapshot().selected_voice, "narrator");

        let resp = post_json(&format!("{url}/set-voice"), json!({"voice": "anna"})).await;
        assert_eq!(resp["status"], "ok");
        assert_eq!(resp["voice"], "anna");
        assert_eq!(narrator.settings().snapshot().selected_voice, "anna");
    }

    #[tokio::test]
    async fn diagnostics_report_backend_failures() {
        let (url, _narrator, output) = intake("http://127.0.0.1:1").await;

        let resp = post_json(&format!("{url}/test-connection"), json!({})).await;
        assert_eq!(resp["status"], "error");
        let resp = post_json(&format!("{url}/voices/refresh"), json!({})).await;
        assert_eq!(resp["status"], "error");

        let resp = post_json(&format!("{url}/test-beep"), json!({})).await;
        assert_eq!(resp["status"], "beeping");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !output
            .events()
            .iter()
            .any(|e| matches!(e, OutputEvent::OneShot { .. }))
        {
            assert!(std::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn refresh_voices_through_api() {
        let backend = serve(
            Router::new()
                .route("/voices", get(|| async { Json(json!({"voices": ["bob", "carl"]})) }))
                .route("/health", get(|| async { "ok" })),
        )
        .await;
        let (url, narrator, _output) = intake(&backend).await;

        let resp = post_json(&format!("{url}/voices/refresh"), json!({})).await;
        assert_eq!(resp["status"], "ok");
        assert_eq!(resp["voices"], json!(["bob", "carl"]));
        assert_eq!(resp["voice"], "bob");
        assert_eq!(narrator.settings().snapshot().selected_voice, "bob");

        let resp = post_json(&format!("{url}/test-connection"), json!({})).await;
        assert_eq!(resp["status"], "connected");
        assert_eq!(resp["detail"], "ok");
    }
}
