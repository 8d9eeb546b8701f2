//! One-shot startup script injection
//!
//! A freshly created jail gets the rendered startup payload at
//! `/etc/startup_script` and an rc.d service that runs it on first boot,
//! removes itself and makes the script non-executable.

use crate::error::{Error, Result};
use crate::remote::Remote;
use std::fs;
use std::path::Path;
use tracing::error;

/// rc.d service name registered inside the jail
pub const STARTUP_SERVICE: &str = "ezwarden_startup";

/// Location of the payload inside the jail
pub const STARTUP_SCRIPT: &str = "/etc/startup_script";

/// rc.d wrapper that runs the startup script once
pub fn rc_wrapper(service: &str) -> String {
    format!(
        r#"#!/bin/sh
# BEFORE: DAEMON
# PROVIDE: {service}
. /etc/rc.subr
name={service}
start_cmd=startup
startup() {{
  rm -f "/etc/rc.d/{service}"
  test -e /etc/startup_script && /etc/startup_script || true
  test -e /etc/startup_script && chmod 0600 /etc/startup_script
}}
run_rc_command "$1"
"#
    )
}

/// Read the startup payload; no script configured yields an empty payload
pub fn render_payload(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        None => Ok(Vec::new()),
        Some(path) => fs::read(path).map_err(|e| Error::StartupScript {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes the startup payload and its rc.d wrapper into a jail root
pub struct StartupInjector<'a> {
    remote: &'a Remote,
    service: &'a str,
}

impl<'a> StartupInjector<'a> {
    pub fn new(remote: &'a Remote) -> Self {
        Self {
            remote,
            service: STARTUP_SERVICE,
        }
    }

    /// Install payload and wrapper below `root`, both with mode 0700
    pub fn inject(&self, root: &str, payload: &[u8]) -> Result<()> {
        let root = root.trim_end_matches('/');

        let script = format!("{}{}", root, STARTUP_SCRIPT);
        self.install(&script, payload)
            .inspect_err(|e| error!("Startup script creation failed: {}", e))?;

        let wrapper = format!("{}/etc/rc.d/{}", root, self.service);
        self.install(&wrapper, rc_wrapper(self.service).as_bytes())
            .inspect_err(|e| error!("Startup rc script creation failed: {}", e))?;

        Ok(())
    }

    fn install(&self, path: &str, content: &[u8]) -> Result<()> {
        self.remote.write_file(path, content)?;
        self.remote.chmod("0700", path)
    }
}
