//! Commands run inside a jail through `ezjail-admin console -e`
//!
//! Used to read the ssh host key fingerprints of a running jail.

use crate::error::{Error, Result};
use crate::jail::admin::AdminClient;
use serde::Serialize;
use tracing::debug;

/// Directory holding the jail's ssh host keys
const SSH_DIR: &str = "/etc/ssh";

/// Fingerprint of one ssh host key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostKey {
    pub fingerprint: String,
    pub keylen: u32,
    pub keytype: String,
}

/// Whether a file name matches `ssh_host*_key.pub`
pub fn is_host_key(name: &str) -> bool {
    name.len() >= "ssh_host_key.pub".len()
        && name.starts_with("ssh_host")
        && name.ends_with("_key.pub")
}

/// Parse `ssh-keygen -l` output: `<bits> <fingerprint> <comment...> (<TYPE>)`
pub fn parse_ssh_keygen(output: &str) -> Result<Vec<HostKey>> {
    let mut keys = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let invalid = || Error::Parse(format!("Unexpected ssh-keygen output: '{}'", line));
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(invalid());
        }
        let keylen = fields[0].parse::<u32>().map_err(|_| invalid())?;
        let keytype = fields[fields.len() - 1]
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .filter(|t| !t.is_empty())
            .ok_or_else(invalid)?;
        keys.push(HostKey {
            fingerprint: fields[1].to_string(),
            keylen,
            keytype: keytype.to_string(),
        });
    }
    Ok(keys)
}

/// Fingerprints of every ssh host key in a running jail.
///
/// Keys whose `ssh-keygen` call fails are skipped; a failing directory
/// listing yields no keys.
pub fn host_key_fingerprints(admin: &AdminClient, jail_name: &str) -> Result<Vec<HostKey>> {
    let listing = admin.console(jail_name, &format!("ls {}/", SSH_DIR))?;
    if !listing.success() {
        debug!("Listing {} in '{}' failed: {}", SSH_DIR, jail_name, listing.combined());
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    for name in listing.stdout_lossy().lines().map(str::trim) {
        if !is_host_key(name) {
            continue;
        }
        let output = admin.console(jail_name, &format!("ssh-keygen -lf {}/{}", SSH_DIR, name))?;
        if !output.success() {
            debug!("Skipping host key {}: {}", name, output.combined());
            continue;
        }
        keys.extend(parse_ssh_keygen(&output.stdout_lossy())?);
    }
    Ok(keys)
}
