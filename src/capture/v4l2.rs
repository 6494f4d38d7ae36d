//! V4L2 hardware camera with memory-mapped streaming

use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Description, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::camera::{Camera, FeatureDescriptor, FeatureSetting, FeatureValue};
use super::frame::{FrameMetadata, PixelFormat, RawFrame};
use crate::error::CameraError;

/// Buffers queued with the driver while streaming
const STREAM_BUFFERS: u32 = 4;

/// errno reported by the driver once the device has been unplugged
const ENODEV: i32 = 19;

/// GenICam feature names that map onto differently named V4L2 controls
const CONTROL_ALIASES: [(&str, &str); 2] = [
    ("exposuretime", "exposuretimeabsolute"),
    ("gain", "analoguegain"),
];

pub fn fourcc_to_format(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"MJPG" => Some(PixelFormat::Mjpeg),
        b"YUYV" => Some(PixelFormat::Yuyv),
        b"RGB3" => Some(PixelFormat::Rgb8),
        b"BGR3" => Some(PixelFormat::Bgr8),
        b"GREY" => Some(PixelFormat::Mono8),
        b"Y16 " => Some(PixelFormat::Mono16),
        b"RGGB" => Some(PixelFormat::BayerRg8),
        _ => None,
    }
}

pub fn format_to_fourcc(format: PixelFormat) -> Option<FourCC> {
    let code = match format {
        PixelFormat::Mjpeg => b"MJPG",
        PixelFormat::Yuyv => b"YUYV",
        PixelFormat::Rgb8 => b"RGB3",
        PixelFormat::Bgr8 => b"BGR3",
        PixelFormat::Mono8 => b"GREY",
        PixelFormat::Mono16 => b"Y16 ",
        PixelFormat::BayerRg8 => b"RGGB",
        _ => return None,
    };
    Some(FourCC::new(code))
}

/// Lowercase and strip everything but letters and digits
fn normalize(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A frame dimension: a positive integer that fits the driver's `u32`
fn dimension(value: &FeatureValue) -> Option<u32> {
    value.as_i64().and_then(|i| u32::try_from(i).ok()).filter(|d| *d > 0)
}

/// Put the preferred format ahead of the caller's settings unless they pick one
fn with_preferred_format(preferred: Option<PixelFormat>, settings: &[FeatureSetting]) -> Vec<FeatureSetting> {
    let mut merged = Vec::with_capacity(settings.len() + 1);
    if let Some(format) = preferred {
        if !settings.iter().any(|s| normalize(&s.name) == "pixelformat") {
            merged.push(FeatureSetting::new("PixelFormat", format.name()));
        }
    }
    merged.extend_from_slice(settings);
    merged
}

struct Opened {
    device: Device,
    controls: Vec<Description>,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

/// V4L2 capture device implementing [`Camera`]
pub struct V4l2Camera {
    path: String,
    preferred_format: Option<PixelFormat>,
    opened: Option<Opened>,
    stream: Option<MmapStream<'static>>,
}

impl V4l2Camera {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            preferred_format: None,
            opened: None,
            stream: None,
        }
    }

    /// Format requested on every open unless the settings name their own.
    /// The driver's current format may be one frames can't be decoded from.
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.preferred_format = Some(format);
        self
    }

    fn opened(&self) -> Result<&Opened, CameraError> {
        self.opened.as_ref().ok_or(CameraError::NotOpen)
    }

    fn apply(opened: &mut Opened, settings: &[FeatureSetting]) -> Result<(), CameraError> {
        let mut fmt = opened.device.format()?;
        let mut format_changed = false;

        for setting in settings {
            let invalid = |reason: &str| CameraError::InvalidFeature {
                name: setting.name.clone(),
                reason: reason.to_string(),
            };
            match normalize(&setting.name).as_str() {
                "width" => {
                    fmt.width = dimension(&setting.value).ok_or_else(|| invalid("expected a positive integer"))?;
                    format_changed = true;
                }
                "height" => {
                    fmt.height = dimension(&setting.value).ok_or_else(|| invalid("expected a positive integer"))?;
                    format_changed = true;
                }
                "pixelformat" => {
                    fmt.fourcc = setting
                        .value
                        .as_str()
                        .and_then(PixelFormat::from_name)
                        .and_then(format_to_fourcc)
                        .ok_or_else(|| invalid("format not available over V4L2"))?;
                    format_changed = true;
                }
                "acquisitionframerate" => {
                    let fps = setting
                        .value
                        .as_f64()
                        .filter(|f| *f >= 1.0)
                        .ok_or_else(|| invalid("expected a rate >= 1"))?;
                    opened.device.set_params(&Parameters::with_fps(fps.round() as u32))?;
                }
                // Frame rate is always enforced when set
                "acquisitionframerateenable" | "acquisitionmode" => {}
                key => {
                    let key = CONTROL_ALIASES
                        .iter()
                        .find(|(alias, _)| *alias == key)
                        .map_or(key, |(_, control)| *control);
                    let desc = opened
                        .controls
                        .iter()
                        .find(|d| normalize(&d.name) == key)
                        .ok_or_else(|| CameraError::UnknownFeature(setting.name.clone()))?;
                    let value = match &setting.value {
                        FeatureValue::Bool(b) => Value::Boolean(*b),
                        other => Value::Integer(other.as_i64().ok_or_else(|| invalid("expected integer"))?),
                    };
                    opened.device.set_control(Control { id: desc.id, value })?;
                }
            }
        }

        if format_changed {
            let actual = opened.device.set_format(&fmt)?;
            if actual.width != fmt.width || actual.height != fmt.height || actual.fourcc != fmt.fourcc {
                warn!("Driver adjusted format to {}", actual);
            }
            fmt = actual;
        }

        opened.format = fourcc_to_format(fmt.fourcc)
            .ok_or_else(|| CameraError::UnsupportedFormat(fmt.fourcc.to_string()))?;
        opened.width = fmt.width;
        opened.height = fmt.height;
        opened.stride = fmt.stride;
        Ok(())
    }
}

impl Camera for V4l2Camera {
    #[instrument(skip(self), fields(path = %self.path))]
    fn open(&mut self, settings: &[FeatureSetting]) -> Result<(), CameraError> {
        info!("Opening V4L2 camera");

        let device = Device::with_path(&self.path)
            .map_err(|e| CameraError::Unavailable(format!("{}: {e}", self.path)))?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::Unavailable("device doesn't support video capture".into()));
        }

        let controls = device.query_controls().unwrap_or_default();
        let mut opened = Opened {
            device,
            controls,
            width: 0,
            height: 0,
            stride: 0,
            format: PixelFormat::Mjpeg,
        };
        Self::apply(&mut opened, &with_preferred_format(self.preferred_format, settings))?;

        info!(
            "Opened {}x{} {} ({} controls)",
            opened.width,
            opened.height,
            opened.format,
            opened.controls.len()
        );
        self.opened = Some(opened);
        Ok(())
    }

    fn configure(&mut self, settings: &[FeatureSetting]) -> Result<(), CameraError> {
        if self.stream.is_some() {
            return Err(CameraError::InvalidFeature {
                name: "*".into(),
                reason: "cannot reconfigure while streaming".into(),
            });
        }
        let opened = self.opened.as_mut().ok_or(CameraError::NotOpen)?;
        Self::apply(opened, settings)
    }

    fn features(&self) -> Vec<FeatureDescriptor> {
        let Ok(opened) = self.opened() else {
            return Vec::new();
        };
        let mut features = vec![
            FeatureDescriptor::new("Width", opened.width as i64),
            FeatureDescriptor::new("Height", opened.height as i64),
            FeatureDescriptor::new("PixelFormat", opened.format.name()),
        ];
        for desc in &opened.controls {
            let value = match opened.device.control(desc.id) {
                Ok(Control { value: Value::Integer(i), .. }) => FeatureValue::Int(i),
                Ok(Control { value: Value::Boolean(b), .. }) => FeatureValue::Bool(b),
                _ => continue,
            };
            features.push(
                FeatureDescriptor::new(desc.name.clone(), value)
                    .with_range(desc.minimum as f64, desc.maximum as f64),
            );
        }
        features
    }

    fn start_acquisition(&mut self) -> Result<(), CameraError> {
        let opened = self.opened()?;
        let mut stream = MmapStream::with_buffers(&opened.device, Type::VideoCapture, STREAM_BUFFERS)?;
        stream.set_timeout(Duration::from_millis(100));
        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", STREAM_BUFFERS);
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), CameraError> {
        // Dropping the stream turns streaming off and unmaps the buffers
        self.stream = None;
        Ok(())
    }

    fn poll_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CameraError> {
        let (width, height, stride, format) = {
            let o = self.opened()?;
            (o.width, o.height, o.stride, o.format)
        };
        let stream = self.stream.as_mut().ok_or(CameraError::NotOpen)?;
        stream.set_timeout(timeout);

        let timestamp = Instant::now();
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(ENODEV) => {
                return Err(CameraError::Disconnected)
            }
            Err(e) => return Err(e.into()),
        };

        let used = (meta.bytesused as usize).min(buf.len());
        let data = Bytes::copy_from_slice(&buf[..used]);

        Ok(Some(RawFrame {
            data,
            meta: FrameMetadata {
                sequence: meta.sequence as u64,
                width,
                height,
                stride: if format == PixelFormat::Mjpeg { 0 } else { stride },
                format,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            },
            timestamp,
        }))
    }

    fn close(&mut self) {
        self.stream = None;
        if self.opened.take().is_some() {
            info!(path = %self.path, "V4L2 camera closed");
        }
    }
}
