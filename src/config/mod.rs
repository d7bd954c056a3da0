//! Configuration module for voice-stream.
//!
//! Provides `AppConfig` (top-level settings), per-backend sub-configs,
//! `AppPaths` for cross-platform config directories, and TOML persistence
//! via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, CloudConfig, DeviceConfig, ServerConfig, SourceKind};
