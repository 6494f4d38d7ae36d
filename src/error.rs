//! Error types shared across the crate

use std::io;

use thiserror::Error;

use crate::capture::PixelFormat;
use crate::control::AcquisitionState;

/// Failures reported by a camera capability
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("unknown feature `{0}`")]
    UnknownFeature(String),

    #[error("invalid value for feature `{name}`: {reason}")]
    InvalidFeature { name: String, reason: String },

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("camera is not open")]
    NotOpen,

    #[error("camera disconnected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by acquisition control
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("failed to open camera `{camera_id}`: {source}")]
    CameraOpen {
        camera_id: String,
        #[source]
        source: CameraError,
    },

    #[error("acquisition failed: {0}")]
    Acquisition(#[source] CameraError),

    #[error("cannot start while {0:?}")]
    InvalidState(AcquisitionState),

    #[error("no camera attached")]
    NoCamera,

    #[error("frame bridge failed to start: {0}")]
    Bridge(#[source] BridgeError),
}

/// The bridge could not start pulling
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("frame bridge is already running")]
    AlreadyRunning,

    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("acquisition thread exited before receiving the camera")]
    Handoff,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Rejected viewport input; state is left unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ViewportError {
    #[error("invalid viewport input: {0}")]
    InvalidInput(&'static str),
}

/// A raw frame that could not be converted for display
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("frame has zero size")]
    ZeroSize,

    #[error("{format:?} frame truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("JPEG decode failed: {0}")]
    Jpeg(String),

    #[error("decoded JPEG is {actual_width}x{actual_height}, frame says {width}x{height}")]
    JpegSize {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// Invalid or unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("pool size must be at least 2, got {0}")]
    PoolSize(usize),

    #[error("invalid zoom limits: min {min}, max {max}, step {step}")]
    ZoomLimits { min: f64, max: f64, step: f64 },

    #[error("invalid display size {width}x{height}")]
    DisplaySize { width: u32, height: u32 },
}
