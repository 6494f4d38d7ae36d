use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Raw frame as delivered by a camera, not yet converted for display
#[derive(Clone)]
pub struct RawFrame {
    /// Immutable frame data - can be handed across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Host capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row; 0 means tightly packed
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl RawFrame {
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta,
            timestamp: Instant::now(),
        }
    }

    /// Row pitch in bytes, falling back to the packed width
    pub fn row_stride(&self) -> usize {
        match self.meta.stride {
            0 => self.meta.width as usize * self.meta.format.bytes_per_pixel(),
            s => s as usize,
        }
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    /// 12 significant bits in a little-endian 16-bit container
    Mono12,
    Mono16,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    BayerRg8,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel of the packed layout (0 for compressed formats)
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Mono8 | Self::BayerRg8 => 1,
            Self::Mono12 | Self::Mono16 | Self::Yuyv => 2,
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Mjpeg => 0,
        }
    }

    /// GenICam-style name, used for feature values and the status line
    pub fn name(self) -> &'static str {
        match self {
            Self::Mono8 => "Mono8",
            Self::Mono12 => "Mono12",
            Self::Mono16 => "Mono16",
            Self::Rgb8 => "RGB8",
            Self::Bgr8 => "BGR8",
            Self::Rgba8 => "RGBa8",
            Self::Bgra8 => "BGRa8",
            Self::BayerRg8 => "BayerRG8",
            Self::Yuyv => "YUV422_YUYV",
            Self::Mjpeg => "MJPEG",
        }
    }

    /// Parse a GenICam-style name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        const ALL: [PixelFormat; 10] = [
            PixelFormat::Mono8,
            PixelFormat::Mono12,
            PixelFormat::Mono16,
            PixelFormat::Rgb8,
            PixelFormat::Bgr8,
            PixelFormat::Rgba8,
            PixelFormat::Bgra8,
            PixelFormat::BayerRg8,
            PixelFormat::Yuyv,
            PixelFormat::Mjpeg,
        ];
        ALL.into_iter().find(|f| f.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
