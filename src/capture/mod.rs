pub mod camera;
pub mod decoder;
pub mod frame;
pub mod simulated;
pub mod v4l2;

pub use camera::{Camera, FeatureDescriptor, FeatureSetting, FeatureValue};
pub use frame::{FrameMetadata, PixelFormat, RawFrame};
pub use simulated::{SimulatedCamera, SimulatedSettings};
pub use v4l2::V4l2Camera;
