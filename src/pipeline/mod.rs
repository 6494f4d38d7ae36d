pub mod bridge;
pub mod pool;
pub mod stats;

pub use bridge::{FailureHandler, FrameBridge, FrameHandle, PublishedFrame, POLL_TIMEOUT};
pub use pool::{DisplayBuffer, DisplayPool};
pub use stats::BridgeStats;
