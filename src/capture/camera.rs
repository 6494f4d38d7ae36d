//! Camera capability shared by the simulated source and hardware drivers

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::frame::RawFrame;
use crate::error::CameraError;

/// A frame source the acquisition loop can drive.
///
/// Implementations must be usable from the acquisition thread, so the
/// trait requires `Send`. `poll_frame` returns `Ok(None)` when no frame
/// arrived within `timeout` and must never block longer than that.
pub trait Camera: Send {
    /// Open the device and apply `settings` in order.
    ///
    /// Either every setting applies or the call fails; a failed open leaves
    /// the camera closed.
    fn open(&mut self, settings: &[FeatureSetting]) -> Result<(), CameraError>;

    /// Apply edits to an already open camera.
    fn configure(&mut self, settings: &[FeatureSetting]) -> Result<(), CameraError>;

    /// Editable features of the open camera
    fn features(&self) -> Vec<FeatureDescriptor>;

    fn start_acquisition(&mut self) -> Result<(), CameraError>;

    fn stop_acquisition(&mut self) -> Result<(), CameraError>;

    fn poll_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CameraError>;

    fn close(&mut self);
}

/// One named camera parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSetting {
    pub name: String,
    pub value: FeatureValue,
}

impl FeatureSetting {
    pub fn new(name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse `name=value`, inferring the value type
    pub fn parse(s: &str) -> Option<Self> {
        let (name, value) = s.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, FeatureValue::infer(value.trim())))
    }
}

/// Value of a camera feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FeatureValue {
    /// Best-effort typing of a textual value
    pub fn infer(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            Self::Bool(b)
        } else if let Ok(i) = raw.parse::<i64>() {
            Self::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            Self::Float(f)
        } else {
            Self::Text(raw.to_string())
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(i) => Some(i),
            Self::Float(f) if f.fract() == 0.0 => Some(f as i64),
            Self::Bool(b) => Some(b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Int(i) => Some(i as f64),
            Self::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            Self::Int(i) => Some(i != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A feature as shown to a property editor
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDescriptor {
    pub name: String,
    pub value: FeatureValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FeatureDescriptor {
    pub fn new(name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            min: None,
            max: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_settings() {
        let s = FeatureSetting::parse("ExposureTime=5000").unwrap();
        assert_eq!(s, FeatureSetting::new("ExposureTime", 5000i64));

        let s = FeatureSetting::parse(" AcquisitionFrameRate = 12.5 ").unwrap();
        assert_eq!(s.value, FeatureValue::Float(12.5));

        let s = FeatureSetting::parse("PixelFormat=RGB8").unwrap();
        assert_eq!(s.value.as_str(), Some("RGB8"));

        assert!(FeatureSetting::parse("=3").is_none());
        assert!(FeatureSetting::parse("novalue").is_none());
    }

    #[test]
    fn integral_floats_coerce_to_int() {
        assert_eq!(FeatureValue::Float(640.0).as_i64(), Some(640));
        assert_eq!(FeatureValue::Float(0.5).as_i64(), None);
        assert_eq!(FeatureValue::Text("x".into()).as_f64(), None);
    }
}
