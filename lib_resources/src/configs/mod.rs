//! # Configuration Modules
//!
//! This module aggregates the manager's configuration: the in-memory
//! [`ManagerConfig`] consumed by the resource core, and (behind the `configs`
//! feature) [`ManagerSettings`], its serializable form loaded from JSON5 files
//! and environment variables.

/// Cleanup delays, fixed or computed per request.
pub mod config_manager;

/// File and environment backed settings.
#[cfg(feature = "configs")]
pub mod config_settings;

pub use config_manager::{CleanupDelay, ManagerConfig};
#[cfg(feature = "configs")]
pub use config_settings::{ConfigError, ManagerSettings};
