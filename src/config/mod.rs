//! System Configuration Module
//!
//! Provides deployment configuration loaded from TOML files. Every tunable
//! that was previously a magic number lives here: tick rates, fusion weights,
//! decay rates, routing penalties, mission timeouts.
//!
//! ## Loading Order
//!
//! 1. `AGOS_CONFIG` environment variable (path to TOML file)
//! 2. `agos_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Unknown keys and invalid values in an explicitly-given file are fatal at
//! startup (exit code 1); the system never runs on a half-understood config.
//!
//! The loaded [`SystemConfig`] is injected into each collaborator through its
//! constructor — there is no global config singleton.

mod system_config;
pub mod defaults;

pub use system_config::*;
