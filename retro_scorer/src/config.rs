// THEORY:
// Every tunable of the scorer, the tracker and the interactive player lives in
// one `RetroConfig`. All fields have defaults equal to the values the tool has
// always shipped with, so the configuration file is optional and any subset of
// keys may be given. Values that would make an operation meaningless (an even
// blur kernel, zero tracked frames, a non-positive display scale) are rejected
// when the file is loaded rather than when a selection is scored.

use crate::core_modules::tracker::MatchMethod;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetroConfig {
    pub scorer: ScorerConfig,
    pub tracker: TrackerConfig,
    pub player: PlayerConfig,
    pub logging: LoggingConfig,
}

/// Parameters of the Otsu-masked intensity score.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Width of the Gaussian low-pass kernel in pixels. Must be odd.
    pub blur_kernel_width: u32,
    /// Height of the Gaussian low-pass kernel in pixels. Must be odd.
    pub blur_kernel_height: u32,
    /// Lower hysteresis threshold for the display outline.
    pub edge_low_threshold: f32,
    /// Upper hysteresis threshold for the display outline.
    pub edge_high_threshold: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            blur_kernel_width: 25,
            blur_kernel_height: 75,
            edge_low_threshold: 0.25,
            edge_high_threshold: 0.75,
        }
    }
}

/// Parameters of the forward tracker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// How many frames after the selection are matched and scored.
    pub frames: u32,
    /// Template matching metric, fixed for the lifetime of the tracker.
    pub method: MatchMethod,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            frames: 30,
            method: MatchMethod::CrossCorrelationNormalized,
        }
    }
}

/// Parameters of the interactive player.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Scale applied to large frames before display.
    pub display_scale: f64,
    /// Seconds skipped by the arrow keys.
    pub seek_step_secs: u32,
    /// Frames taller than this are shown at `display_scale`.
    pub max_display_height: u32,
    /// Frames wider than this are shown at `display_scale`.
    pub max_display_width: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            display_scale: 0.5,
            seek_step_secs: 10,
            max_display_height: 810,
            max_display_width: 1440,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl RetroConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RetroConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_kernel("scorer.blur_kernel_width", self.scorer.blur_kernel_width)?;
        check_kernel("scorer.blur_kernel_height", self.scorer.blur_kernel_height)?;
        if self.scorer.edge_low_threshold > self.scorer.edge_high_threshold {
            return Err(ConfigError::Invalid {
                key: "scorer.edge_low_threshold",
                reason: "must not exceed scorer.edge_high_threshold".into(),
            });
        }
        if self.tracker.frames == 0 {
            return Err(ConfigError::Invalid {
                key: "tracker.frames",
                reason: "must track at least one frame".into(),
            });
        }
        if !(self.player.display_scale > 0.0 && self.player.display_scale <= 1.0) {
            return Err(ConfigError::Invalid {
                key: "player.display_scale",
                reason: format!("{} is outside (0, 1]", self.player.display_scale),
            });
        }
        Ok(())
    }
}

fn check_kernel(key: &'static str, size: u32) -> Result<(), ConfigError> {
    if size == 0 || size % 2 == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: format!("kernel size {size} must be odd and positive"),
        });
    }
    Ok(())
}
