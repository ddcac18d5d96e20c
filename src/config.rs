//! Session configuration
//!
//! Loaded from a camelCase JSON file; every field has a default so an empty
//! object is a valid configuration.

use crate::recorder::registry::PairingPolicy;
use crate::recorder::snapshot::SnapshotConfig;
use crate::render::surface::SurfaceOptions;
use crate::session::channel::DEFAULT_RECONNECT_DELAY;
use crate::utils::error::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings of one capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Fixed pause before each reconnect attempt
    pub reconnect_delay_ms: u64,

    /// Relation between the halves of a combined capture
    pub pairing: PairingPolicy,

    pub snapshot: SnapshotConfig,

    /// Preview slot geometry
    pub surface: SurfaceOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            pairing: PairingPolicy::default(),
            snapshot: SnapshotConfig::default(),
            surface: SurfaceOptions::default(),
        }
    }
}

impl SessionConfig {
    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::debug!("Loaded session config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.reconnect_delay_ms == 0 {
            return Err(CaptureError::InvalidConfig(
                "reconnectDelayMs must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.snapshot.quality) {
            return Err(CaptureError::InvalidConfig(format!(
                "snapshot quality {} is outside 0-1",
                self.snapshot.quality
            )));
        }
        if self.surface.width == 0 || self.surface.height == 0 {
            return Err(CaptureError::InvalidConfig(
                "surface dimensions must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
