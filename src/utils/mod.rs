//! Utility modules

pub mod signal;
pub mod throttle;

pub use signal::shutdown_signal;
pub use throttle::LogThrottler;
