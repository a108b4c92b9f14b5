//! # Pacing Configuration
//!
//! Loaded once at startup and handed to the sync core and controllers.
//! Runtime changes go through dedicated entry points
//! (`set_render_refresh_rate`), never by mutating this struct.

use crate::error::{ConfigError, CoreResult};
use serde::{Deserialize, Serialize};

/// Configuration for the frame-pacing core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Display ticks consumed per rendered frame. 1 renders every vsync,
    /// 2 renders every other vsync, and so on.
    pub vsyncs_per_render: u32,
    /// How many frames the update role may prepare ahead of the render
    /// role before it is blocked (back-pressure bound).
    pub max_frames_ahead: u32,
    /// Nominal display refresh period in microseconds.
    pub frame_interval_micros: u64,
    /// Consecutive idle update frames before the core goes to sleep.
    pub idle_frames_before_sleep: u32,
    /// Interval in seconds between FPS log lines. 0 disables FPS tracking.
    pub fps_tracking_seconds: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            vsyncs_per_render: 1,
            max_frames_ahead: 2,
            // 60Hz
            frame_interval_micros: 16_667,
            idle_frames_before_sleep: 3,
            fps_tracking_seconds: 0,
        }
    }
}

impl PacingConfig {
    /// Parses a config from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML and
    /// [`ConfigError::ZeroField`] when a mandatory field is zero.
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can actually pace frames.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroField`] when `vsyncs_per_render`,
    /// `max_frames_ahead`, `frame_interval_micros` or
    /// `idle_frames_before_sleep` is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.vsyncs_per_render == 0 {
            return Err(ConfigError::ZeroField {
                field: "vsyncs_per_render",
            });
        }
        if self.max_frames_ahead == 0 {
            return Err(ConfigError::ZeroField {
                field: "max_frames_ahead",
            });
        }
        if self.frame_interval_micros == 0 {
            return Err(ConfigError::ZeroField {
                field: "frame_interval_micros",
            });
        }
        if self.idle_frames_before_sleep == 0 {
            return Err(ConfigError::ZeroField {
                field: "idle_frames_before_sleep",
            });
        }
        Ok(())
    }

    /// The minimum interval between rendered frames, in microseconds.
    #[must_use]
    pub fn minimum_frame_time_interval_micros(&self) -> u64 {
        u64::from(self.vsyncs_per_render) * self.frame_interval_micros
    }
}
