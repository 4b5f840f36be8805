//! Infrastructure - clock, configuration, and metrics
//!
//! This module contains infrastructure concerns:
//! - `clock` - Time source and the cooperative stop flag
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection

pub mod clock;
pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, StopSignal, SystemClock};
pub use config::Config;
pub use metrics::Metrics;
