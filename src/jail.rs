//! Jail management module
//!
//! This module provides:
//! - ezjail-admin request building and list parsing
//! - State derivation and the lifecycle state machine
//! - Per-instance operations (status, start, stop, terminate)

pub mod admin;
pub mod instance;
pub mod listing;
pub mod state;
pub mod types;

// Re-exports
pub use admin::AdminClient;
pub use instance::{Jail, StartOverrides};
pub use state::JailState;
pub use types::JailIp;
