use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::{FeatureSetting, PixelFormat};

/// Device nodes probed by [`auto_detect_device`]
const MAX_VIDEO_NODES: u32 = 10;

/// Capture device picked by auto-detection
#[derive(Debug, Clone, PartialEq)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

/// Find the first V4L2 capture node offering a format we can decode.
///
/// Compressed MJPEG is preferred over raw formats on the same node since it
/// keeps USB bandwidth low at high resolutions.
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    for i in 0..MAX_VIDEO_NODES {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            debug!(path, "Cannot open device node");
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        let fourccs: Vec<FourCC> = formats.iter().map(|fmt| fmt.fourcc).collect();
        let best = [
            (FourCC::new(b"MJPG"), PixelFormat::Mjpeg),
            (FourCC::new(b"YUYV"), PixelFormat::Yuyv),
        ]
        .into_iter()
        .find(|(fourcc, _)| fourccs.contains(fourcc));

        if let Some((_, format)) = best {
            info!("Found {format} device: {path} - {}", caps.card);
            return Ok(FoundDevice { path, format });
        }
    }

    Err(eyre!("No suitable capture device found"))
}

/// Parse repeated `name=value` arguments into feature settings
pub fn parse_settings<'a>(args: impl IntoIterator<Item = &'a str>) -> Result<Vec<FeatureSetting>> {
    args.into_iter()
        .map(|arg| FeatureSetting::parse(arg).ok_or_else(|| eyre!("expected name=value, got `{arg}`")))
        .collect()
}
