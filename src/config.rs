//! Configuration management for narrator-rs.
//!
//! Loads config from YAML files in standard locations. The `narration`
//! section is the live settings snapshot read by every pipeline stage;
//! it is shared through [`SettingsHandle`] so the intake API can change
//! it while the pipeline runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

pub const DEFAULT_VOICE: &str = "narrator";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enabled: bool,
    pub volume: f32,
    pub server_url: String,

    // Social interactions
    pub enable_social: bool,
    pub only_1x_speed: bool,
    pub drama_only: bool,
    pub only_on_screen: bool,
    pub social_cooldown_seconds: f32,

    // Voice
    pub selected_voice: String,
    pub available_voices: Vec<String>,

    // Performance
    pub max_queue_size: usize,
    pub max_text_length: usize,
    pub cleanup_old_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 0.8,
            server_url: "http://127.0.0.1:8000".into(),
            enable_social: true,
            only_1x_speed: true,
            drama_only: false,
            only_on_screen: true,
            social_cooldown_seconds: 20.0,
            selected_voice: DEFAULT_VOICE.into(),
            available_voices: vec![DEFAULT_VOICE.into()],
            max_queue_size: 5,
            max_text_length: 200,
            cleanup_old_files: true,
        }
    }
}

impl Settings {
    /// Clamp every field into the range the settings surface allows.
    pub fn clamped(mut self) -> Self {
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            Self::default().volume
        };
        self.social_cooldown_seconds = if self.social_cooldown_seconds.is_finite() {
            self.social_cooldown_seconds.clamp(5.0, 120.0)
        } else {
            Self::default().social_cooldown_seconds
        };
        self.max_queue_size = self.max_queue_size.clamp(1, 20);
        self.max_text_length = self.max_text_length.clamp(50, 500);
        self.server_url = self.server_url.trim().trim_end_matches('/').to_string();
        if self.available_voices.is_empty() {
            self.available_voices = vec![DEFAULT_VOICE.into()];
        }
        if !self.available_voices.contains(&self.selected_voice) {
            self.selected_voice = self.available_voices[0].clone();
        }
        self
    }

    pub fn social_cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f32(self.social_cooldown_seconds.max(0.0))
    }
}

/// Shared, live view of [`Settings`].
///
/// Readers take cloned snapshots; there is no transactional guarantee
/// between two snapshots taken mid-cycle.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings.clamped())),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to the settings and re-clamp the result.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> Settings {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        f(&mut next);
        *guard = next.clamped();
        guard.clone()
    }

    pub fn volume(&self) -> f32 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .volume
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub narration: Settings,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./narrator.yaml
    /// 2. ~/.config/narrator-rs/config.yaml
    /// 3. /etc/narrator-rs/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("narrator.yaml")),
                dirs::home_dir().map(|h| h.join(".config/narrator-rs/config.yaml")),
                Some(PathBuf::from("/etc/narrator-rs/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        let mut config: Self = serde_yml::from_str(contents)?;
        config.narration = config.narration.clamped();
        Ok(config)
    }
}
