pub mod acquisition;
pub mod preconfig;

pub use acquisition::{AcquisitionControl, AcquisitionEvent, AcquisitionState, PropertyEditor};
pub use preconfig::{CameraConfig, Preconfiguration};
