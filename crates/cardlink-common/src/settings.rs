//! Persisted client settings.
//!
//! Settings are stored as JSON. Every field has a default so partial files (or a missing
//! file) load cleanly.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tunables for the render and tracking pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Display refresh rate assumed by the tracking cadence and reported at init.
    pub refresh_rate_hz: f32,
    /// Height of the pinned head position above the floor, in metres.
    pub floor_height_m: f32,
    /// Pose lookahead used for lobby rendering, in milliseconds.
    pub lobby_lookahead_ms: u64,
    /// Tracking samples sent per display refresh.
    pub tracking_oversample: u32,
    /// Upper bound on how long stopping the tracking task may block, in milliseconds.
    pub tracking_stop_timeout_ms: u64,
    pub passthrough: PassthroughSettings,
}

/// Camera passthrough and tap-gesture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassthroughSettings {
    /// Toggle passthrough with a double tap on the headset.
    pub tap_toggle: bool,
    /// Accelerometer window inspected by the tap detector, in milliseconds.
    pub tap_window_ms: u64,
    pub tap_lower_bound: f32,
    pub tap_upper_bound: f32,
    /// Half-extent of the passthrough plane in normalized device coordinates.
    pub plane_fraction: f32,
    /// Ask the camera for its recording profile; raises preview fps on most devices.
    pub recording_hint: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 60.0,
            floor_height_m: 1.5,
            lobby_lookahead_ms: 50,
            tracking_oversample: 3,
            tracking_stop_timeout_ms: 500,
            passthrough: PassthroughSettings::default(),
        }
    }
}

impl Default for PassthroughSettings {
    fn default() -> Self {
        Self {
            tap_toggle: true,
            tap_window_ms: 600,
            tap_lower_bound: 0.8,
            tap_upper_bound: 4.0,
            plane_fraction: 0.5,
            recording_hint: true,
        }
    }
}

impl ClientSettings {
    /// Load settings from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "settings file missing, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings to `path` as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.refresh_rate_hz > 0.0) {
            return Err(Error::config(format!(
                "refresh_rate_hz must be positive, got {}",
                self.refresh_rate_hz
            )));
        }
        if self.tracking_oversample == 0 {
            return Err(Error::config("tracking_oversample must be at least 1"));
        }
        let pt = &self.passthrough;
        if !(pt.plane_fraction > 0.0) {
            return Err(Error::config(format!(
                "passthrough.plane_fraction must be positive, got {}",
                pt.plane_fraction
            )));
        }
        if pt.tap_lower_bound >= pt.tap_upper_bound {
            return Err(Error::config(format!(
                "passthrough tap bounds inverted: lower {} >= upper {}",
                pt.tap_lower_bound, pt.tap_upper_bound
            )));
        }
        Ok(())
    }

    /// Period between tracking samples: one refresh interval divided by the oversample factor.
    pub fn tracking_period(&self) -> Duration {
        let hz = f64::from(self.refresh_rate_hz) * f64::from(self.tracking_oversample.max(1));
        Duration::from_secs_f64(1.0 / hz)
    }

    pub fn lobby_lookahead(&self) -> Duration {
        Duration::from_millis(self.lobby_lookahead_ms)
    }

    pub fn tracking_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.tracking_stop_timeout_ms)
    }
}
