//! Per-camera settings applied at open time, keyed by camera id

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capture::FeatureSetting;

/// Ordered feature settings for one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    #[serde(default)]
    pub features: Vec<FeatureSetting>,
}

impl CameraConfig {
    pub fn new(id: impl Into<String>, features: Vec<FeatureSetting>) -> Self {
        Self {
            id: id.into(),
            features,
        }
    }
}

/// Immutable table of known cameras
#[derive(Debug, Clone, Default)]
pub struct Preconfiguration {
    configs: HashMap<String, CameraConfig>,
}

impl Preconfiguration {
    /// Build the table; a repeated id replaces the earlier entry
    pub fn new(configs: impl IntoIterator<Item = CameraConfig>) -> Self {
        let mut table = HashMap::new();
        for config in configs {
            if table.contains_key(&config.id) {
                warn!(camera_id = %config.id, "Duplicate preconfiguration, keeping the last entry");
            }
            table.insert(config.id.clone(), config);
        }
        Self { configs: table }
    }

    pub fn lookup(&self, camera_id: &str) -> Option<&CameraConfig> {
        self.configs.get(camera_id)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

impl FromIterator<CameraConfig> for Preconfiguration {
    fn from_iter<I: IntoIterator<Item = CameraConfig>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id() {
        let table = Preconfiguration::new([CameraConfig::new(
            "cam-7",
            vec![FeatureSetting::new("ExposureTime", 5000i64)],
        )]);
        let config = table.lookup("cam-7").unwrap();
        assert_eq!(config.features[0].name, "ExposureTime");
        assert!(table.lookup("cam-8").is_none());
    }

    #[test]
    fn last_duplicate_wins() {
        let table: Preconfiguration = [
            CameraConfig::new("a", vec![FeatureSetting::new("Gain", 1i64)]),
            CameraConfig::new("a", vec![FeatureSetting::new("Gain", 2i64)]),
        ]
        .into_iter()
        .collect();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("a").unwrap().features[0].value, 2i64.into());
    }
}
