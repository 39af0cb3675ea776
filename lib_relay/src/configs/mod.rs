//! # Configuration Modules
//!
//! Process settings for the relay binaries: `.env` loading and the validated
//! command line / environment configuration.

/// Relay settings parsed from flags and environment variables.
pub mod config_relay;

pub use config_relay::{ConfigError, ReconnectSettings, RelayArgs, RelaySettings, ServerSettings};

/// Loads `.env`, then the platform specific `.env.linux` / `.env.windows`.
/// Missing files are ignored and variables already set are never overwritten.
pub fn load_dotenv() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };

    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}
