//! Storage infrastructure: settings file persistence.
//!
//! The `config` sub-module reads and writes the driver's TOML settings from
//! the platform-appropriate directory and falls back to defaults when the
//! file does not exist yet.

pub mod config;
