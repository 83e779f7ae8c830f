//! Runtime configuration, loaded from an optional JSON file.
//! Unknown or missing fields fall back to the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub celebration: CelebrationConfig,
    pub audio: AudioConfig,
    pub generation: GenerationConfig,
}

/// Celebration sequence tuning. Threshold and skip availability are product
/// choices, kept here rather than in the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CelebrationConfig {
    /// Average spectral energy (0-255) above which the candles count as blown.
    pub blow_threshold: f32,
    /// Whether the "skip to party" gesture is offered while candles are lit.
    pub allow_manual_skip: bool,
    pub cut_celebration_delay_ms: u64,
    pub gift_opening_ms: u64,
    /// Tick rate of the frame clock driving the sampler.
    pub frame_rate_hz: u32,
}

impl Default for CelebrationConfig {
    fn default() -> Self {
        Self {
            blow_threshold: 70.0,
            allow_manual_skip: true,
            cut_celebration_delay_ms: 500,
            gift_opening_ms: 1000,
            frame_rate_hz: 60,
        }
    }
}

impl CelebrationConfig {
    pub fn cut_celebration_delay(&self) -> Duration {
        Duration::from_millis(self.cut_celebration_delay_ms)
    }

    pub fn gift_opening(&self) -> Duration {
        Duration::from_millis(self.gift_opening_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_hz.max(1) as f64)
    }
}

/// Microphone analysis and cue playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub fft_size: usize,
    /// Smoothing time constant between consecutive spectra, in [0, 1).
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
    pub ring_buffer_secs: f32,
    pub play_sounds: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
            ring_buffer_secs: 1.0,
            play_sounds: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub wish_model: String,
    pub image_model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub image_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".into(),
            wish_model: "gemini-3-flash-preview".into(),
            image_model: "gemini-2.5-flash-image".into(),
            api_key_env: "API_KEY".into(),
            timeout_secs: 30,
            image_timeout_secs: 20,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if given, logging and falling back to defaults on any error.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load_from_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "config loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config load failed, using defaults");
                Self::default()
            }
        }
    }
}
