pub mod capture;
pub mod control;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;
pub mod viewport;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capture::SimulatedSettings;
use crate::control::CameraConfig;
use crate::error::ConfigError;

/// Prefix of environment overrides, e.g. `CAMVIEW__BRIDGE__POOL_SIZE=4`
const ENV_PREFIX: &str = "CAMVIEW";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraSettings,
    pub bridge: BridgeConfig,
    pub viewport: ViewportConfig,
    pub display: DisplayConfig,
    /// Per-camera settings applied at open time
    pub preconfigured: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    Simulated,
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Id used for the preconfiguration lookup
    pub id: String,
    pub source: CameraSource,
    /// V4L2 device node; empty means auto-detect
    pub device: String,
    pub simulated: SimulatedSettings,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            id: "sim-0".into(),
            source: CameraSource::Simulated,
            device: String::new(),
            simulated: SimulatedSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Display buffers shared between acquisition and rendering (at least 2)
    pub pool_size: usize,
    /// Pin the acquisition thread to this core
    pub acquisition_core: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            acquisition_core: None,
        }
    }
}

/// How far the image may be panned past the viewport edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overscroll {
    /// Keep at least a sliver of the image on screen
    #[default]
    Partial,
    /// Image edges never enter the viewport; small images are centred
    Contain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Zoom factor per wheel notch
    pub zoom_step: f64,
    pub overscroll: Overscroll,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            min_zoom: 0.01,
            max_zoom: 64.0,
            zoom_step: 1.25,
            overscroll: Overscroll::Partial,
        }
    }
}

impl ViewportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = self.min_zoom.is_finite() && self.max_zoom.is_finite() && self.zoom_step.is_finite();
        if !finite || self.min_zoom <= 0.0 || self.max_zoom < self.min_zoom || self.zoom_step <= 1.0 {
            return Err(ConfigError::ZoomLimits {
                min: self.min_zoom,
                max: self.max_zoom,
                step: self.zoom_step,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `CAMVIEW__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document over the defaults, ignoring the environment
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.pool_size < 2 {
            return Err(ConfigError::PoolSize(self.bridge.pool_size));
        }
        self.viewport.validate()?;
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::DisplaySize {
                width: self.display.width,
                height: self.display.height,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.bridge.pool_size, 3);
        assert_eq!(config.viewport.zoom_step, 1.25);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [bridge]
            pool_size = 4

            [viewport]
            overscroll = "contain"
            "#,
        )
        .unwrap();
        assert_eq!(config.bridge.pool_size, 4);
        assert_eq!(config.viewport.overscroll, Overscroll::Contain);
        assert_eq!(config.display.width, 800);
        assert_eq!(config.camera.source, CameraSource::Simulated);
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_toml_str("[bridge]\npool_size = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::PoolSize(1)));

        let err = Config::from_toml_str("[viewport]\nmin_zoom = 2.0\nmax_zoom = 1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ZoomLimits { .. }));
    }
}
