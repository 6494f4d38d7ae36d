//! Simulated camera producing a moving test pattern at a fixed rate

use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::camera::{Camera, FeatureDescriptor, FeatureSetting, FeatureValue};
use super::frame::{FrameMetadata, PixelFormat, RawFrame};
use crate::error::CameraError;

/// Exposure at which the pattern is shown at full brightness (µs)
const NOMINAL_EXPOSURE_US: f64 = 10_000.0;

/// Settings of the simulated sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedSettings {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: f64,
    pub exposure_us: f64,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            format: PixelFormat::Rgb8,
            fps: 10.0,
            exposure_us: NOMINAL_EXPOSURE_US,
        }
    }
}

impl SimulatedSettings {
    /// Apply one setting, validating it
    fn apply(&mut self, setting: &FeatureSetting) -> Result<(), CameraError> {
        let invalid = |reason: &str| CameraError::InvalidFeature {
            name: setting.name.clone(),
            reason: reason.to_string(),
        };
        let v = &setting.value;
        match setting.name.as_str() {
            "Width" => self.width = positive_u32(v).ok_or_else(|| invalid("expected a positive integer"))?,
            "Height" => self.height = positive_u32(v).ok_or_else(|| invalid("expected a positive integer"))?,
            "PixelFormat" => {
                let format = v
                    .as_str()
                    .and_then(PixelFormat::from_name)
                    .ok_or_else(|| invalid("unknown pixel format"))?;
                if format == PixelFormat::Mjpeg {
                    return Err(invalid("compressed formats are not simulated"));
                }
                self.format = format;
            }
            "AcquisitionFrameRate" => {
                self.fps = v
                    .as_f64()
                    .filter(|f| *f > 0.0 && *f <= 1000.0)
                    .ok_or_else(|| invalid("expected a rate in (0, 1000]"))?;
            }
            "ExposureTime" => {
                self.exposure_us = v
                    .as_f64()
                    .filter(|e| *e > 0.0)
                    .ok_or_else(|| invalid("expected a positive duration"))?;
            }
            // Accepted for compatibility with hardware presets
            "AcquisitionMode" => {
                if v.as_str() != Some("Continuous") {
                    return Err(invalid("only Continuous is supported"));
                }
            }
            "AcquisitionFrameRateEnable" => {
                v.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
            }
            other => return Err(CameraError::UnknownFeature(other.to_string())),
        }
        Ok(())
    }

    fn descriptors(&self) -> Vec<FeatureDescriptor> {
        vec![
            FeatureDescriptor::new("Width", self.width as i64).with_range(1.0, 8192.0),
            FeatureDescriptor::new("Height", self.height as i64).with_range(1.0, 8192.0),
            FeatureDescriptor::new("PixelFormat", self.format.name()),
            FeatureDescriptor::new("AcquisitionFrameRate", self.fps).with_range(0.1, 1000.0),
            FeatureDescriptor::new("ExposureTime", self.exposure_us).with_range(1.0, 1_000_000.0),
        ]
    }
}

fn positive_u32(v: &FeatureValue) -> Option<u32> {
    v.as_i64()
        .filter(|i| *i > 0 && *i <= 8192)
        .map(|i| i as u32)
}

/// Test-pattern source implementing [`Camera`]
pub struct SimulatedCamera {
    settings: SimulatedSettings,
    open: bool,
    acquiring: bool,
    sequence: u64,
    next_due: Instant,
    fail_after: Option<u64>,
}

impl SimulatedCamera {
    pub fn new(settings: SimulatedSettings) -> Self {
        Self {
            settings,
            open: false,
            acquiring: false,
            sequence: 0,
            next_due: Instant::now(),
            fail_after: None,
        }
    }

    /// Report a disconnect after `frames` frames have been delivered
    pub fn with_failure_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn settings(&self) -> &SimulatedSettings {
        &self.settings
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.settings.fps)
    }

    fn render(&self) -> RawFrame {
        let s = &self.settings;
        let (w, h) = (s.width as usize, s.height as usize);
        let gain = (s.exposure_us / NOMINAL_EXPOSURE_US).min(1.0);
        let n = self.sequence as usize;
        let bpp = s.format.bytes_per_pixel();
        let mut buf = BytesMut::with_capacity(w * h * bpp);

        for y in 0..h {
            for x in 0..w {
                let scale = |v: usize| ((v & 0xff) as f64 * gain) as u8;
                let r = scale(x * 255 / w.max(1) + n * 3);
                let g = scale(y * 255 / h.max(1));
                let b = scale(n * 5);
                match s.format {
                    PixelFormat::Mono8 => buf.put_u8(r),
                    PixelFormat::Mono12 => buf.put_u16_le((r as u16) << 4),
                    PixelFormat::Mono16 => buf.put_u16_le((r as u16) << 8),
                    PixelFormat::Rgb8 => buf.put_slice(&[r, g, b]),
                    PixelFormat::Bgr8 => buf.put_slice(&[b, g, r]),
                    PixelFormat::Rgba8 => buf.put_slice(&[r, g, b, 255]),
                    PixelFormat::Bgra8 => buf.put_slice(&[b, g, r, 255]),
                    PixelFormat::BayerRg8 => buf.put_u8(match (x % 2, y % 2) {
                        (0, 0) => r,
                        (1, 1) => b,
                        _ => g,
                    }),
                    // Chroma neutral, luma from the red ramp
                    PixelFormat::Yuyv => buf.put_slice(&[r, 128]),
                    PixelFormat::Mjpeg => {}
                }
            }
        }

        RawFrame::new(
            buf.freeze(),
            FrameMetadata {
                sequence: self.sequence,
                width: s.width,
                height: s.height,
                stride: 0,
                format: s.format,
                device_timestamp: None,
            },
        )
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new(SimulatedSettings::default())
    }
}

impl Camera for SimulatedCamera {
    #[instrument(skip(self))]
    fn open(&mut self, settings: &[FeatureSetting]) -> Result<(), CameraError> {
        // Validate everything before committing anything
        let mut next = self.settings.clone();
        for setting in settings {
            next.apply(setting)?;
        }
        self.settings = next;
        self.open = true;
        info!(
            width = self.settings.width,
            height = self.settings.height,
            format = %self.settings.format,
            fps = self.settings.fps,
            "Simulated camera opened"
        );
        Ok(())
    }

    fn configure(&mut self, settings: &[FeatureSetting]) -> Result<(), CameraError> {
        if !self.open {
            return Err(CameraError::NotOpen);
        }
        let mut next = self.settings.clone();
        for setting in settings {
            next.apply(setting)?;
        }
        self.settings = next;
        Ok(())
    }

    fn features(&self) -> Vec<FeatureDescriptor> {
        self.settings.descriptors()
    }

    fn start_acquisition(&mut self) -> Result<(), CameraError> {
        if !self.open {
            return Err(CameraError::NotOpen);
        }
        self.acquiring = true;
        self.next_due = Instant::now();
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), CameraError> {
        self.acquiring = false;
        Ok(())
    }

    fn poll_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CameraError> {
        if !self.open {
            return Err(CameraError::NotOpen);
        }
        if !self.acquiring {
            thread::sleep(timeout);
            return Ok(None);
        }
        if self.fail_after.is_some_and(|n| self.sequence >= n) {
            return Err(CameraError::Disconnected);
        }

        let now = Instant::now();
        if now < self.next_due {
            let wait = self.next_due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }

        self.sequence += 1;
        let frame = self.render();
        // Skip missed slots instead of bursting to catch up
        self.next_due = (self.next_due + self.period()).max(Instant::now());
        debug!(sequence = self.sequence, "Simulated frame");
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.acquiring = false;
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> SimulatedCamera {
        SimulatedCamera::new(SimulatedSettings {
            width: 8,
            height: 4,
            fps: 1000.0,
            ..Default::default()
        })
    }

    #[test]
    fn open_applies_all_or_nothing() {
        let mut cam = fast();
        let err = cam
            .open(&[
                FeatureSetting::new("Width", 32i64),
                FeatureSetting::new("Gamma", 1.0),
            ])
            .unwrap_err();
        assert!(matches!(err, CameraError::UnknownFeature(ref n) if n == "Gamma"));
        assert_eq!(cam.settings().width, 8);

        cam.open(&[FeatureSetting::new("Width", 32i64)]).unwrap();
        assert_eq!(cam.settings().width, 32);
    }

    #[test]
    fn frames_follow_settings_and_count_up() {
        let mut cam = fast();
        cam.open(&[FeatureSetting::new("PixelFormat", "Mono16")]).unwrap();
        cam.start_acquisition().unwrap();

        let mut last = 0;
        for _ in 0..3 {
            let frame = loop {
                if let Some(f) = cam.poll_frame(Duration::from_millis(50)).unwrap() {
                    break f;
                }
            };
            assert_eq!(frame.meta.format, PixelFormat::Mono16);
            assert_eq!(frame.data.len(), 8 * 4 * 2);
            assert!(frame.meta.sequence > last);
            last = frame.meta.sequence;
        }
    }

    #[test]
    fn injected_failure_surfaces_as_error() {
        let mut cam = fast().with_failure_after(1);
        cam.open(&[]).unwrap();
        cam.start_acquisition().unwrap();
        let mut delivered = 0;
        let err = loop {
            match cam.poll_frame(Duration::from_millis(50)) {
                Ok(Some(_)) => delivered += 1,
                Ok(None) => {}
                Err(e) => break e,
            }
        };
        assert_eq!(delivered, 1);
        assert!(matches!(err, CameraError::Disconnected));
    }

    #[test]
    fn closed_camera_refuses_to_poll() {
        let mut cam = fast();
        assert!(matches!(
            cam.poll_frame(Duration::from_millis(1)),
            Err(CameraError::NotOpen)
        ));
    }
}
