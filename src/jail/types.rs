//! Jail list entry types

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Address column of a jail list entry
///
/// Jails with a second address are listed on a continuation line, which
/// turns the value into a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JailIp {
    Single(String),
    Pair(String, String),
}

impl JailIp {
    /// Whether the observed address matches the configured `ip` option
    pub fn matches(&self, configured: &str) -> bool {
        match self {
            JailIp::Single(ip) => ip == configured,
            JailIp::Pair(first, second) => format!("{},{}", first, second) == configured,
        }
    }
}

impl fmt::Display for JailIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JailIp::Single(ip) => f.pad(ip),
            JailIp::Pair(first, second) => f.pad(&format!("[{}, {}]", first, second)),
        }
    }
}

/// One jail as reported by `ezjail-admin list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JailEntry {
    /// Two character status code (e.g. `ZR`, `ZS`)
    pub status: String,
    /// Jail id, `N/A` when not running
    pub jid: String,
    /// Address(es)
    pub ip: JailIp,
    /// Root directory on the host
    pub root: String,
}

/// Jail list keyed by jail name
pub type JailList = BTreeMap<String, JailEntry>;
