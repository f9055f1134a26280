//! camstream - camera capture to MJPEG-over-HTTP broadcaster
//!
//! A single capture loop reads frames from a camera, encodes them as JPEG
//! and fans them out to any number of HTTP viewers. Every viewer has a
//! bounded queue; one that falls behind is disconnected instead of slowing
//! the others down.

pub mod config;
pub mod error;
pub mod logging;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

pub use error::{AppError, Result};
