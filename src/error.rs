//! Unified error types for ezwarden

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ezwarden operations
#[derive(Error, Debug)]
pub enum Error {
    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Unknown instance '{0}'")]
    UnknownInstance(String),

    // Remote errors
    #[error("Couldn't connect to instance [{target}]:\n{message}")]
    Connectivity { target: String, message: String },

    #[error("Command '{command}' failed: {message}")]
    RemoteCommand { command: String, message: String },

    // ezjail-admin errors
    #[error("{0}")]
    AdminCommand(String),

    #[error("{0}")]
    Parse(String),

    // Jail lifecycle errors
    #[error("{0}")]
    StateMachine(String),

    #[error("No IP address set for instance '{0}'")]
    NoAddress(String),

    #[error("Instance '{0}' is configured not to be terminated.")]
    TerminationRefused(String),

    #[error("Jail '{jail}' did not stop within {seconds} seconds")]
    Timeout { jail: String, seconds: u64 },

    #[error("Failed to read startup script '{path}': {source}")]
    StartupScript { path: PathBuf, source: io::Error },

    // ZFS errors
    #[error("ZFS operation failed: {0}")]
    Zfs(String),
}

/// Result type alias for ezwarden operations
pub type Result<T> = std::result::Result<T, Error>;
