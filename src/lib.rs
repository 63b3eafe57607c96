//! netgauge -- client-side internet speed measurement over plain HTTP.
//!
//! The [`speedtest::TestController`] runs latency, download and upload
//! stages in order and exposes phase, progress and results to whatever
//! front end drives it.

pub mod config;
pub mod error;
pub mod speedtest;

pub use config::MeasurementConfig;
pub use error::{Result, SpeedTestError};
pub use speedtest::{Phase, TestController};
