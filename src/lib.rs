pub mod adapters;
pub mod api;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{AppConfig, MonitorFileConfig};

pub use core::{ContinuousMonitor, MonitorControl, MonitorSettings};
pub use utils::error::{MonitorError, Result};
