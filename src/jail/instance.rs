//! Per-instance jail operations
//!
//! Every operation fetches a fresh jail list before deciding what to do,
//! so state is never carried over between calls.

use crate::bridge::Bridge;
use crate::console::{self, HostKey};
use crate::error::{Error, Result};
use crate::jail::state::{JailState, Lifecycle, derive_state};
use crate::jail::types::{JailEntry, JailList};
use crate::manifest::InstanceConfig;
use crate::provision::MountProvisioner;
use crate::startup::{self, StartupInjector};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Directory holding ezjail's per-jail rc configuration
const EZJAIL_CONFIG_DIR: &str = "/usr/local/etc/ezjail";

/// Tag every jail provides in its rc configuration
const PROVIDE_DEFAULT: &str = "standard_ezjail";

/// Per-call overrides for `start`
#[derive(Debug, Clone, Default)]
pub struct StartOverrides {
    /// Startup script to use instead of the configured one
    pub startup_script: Option<PathBuf>,
}

/// A configured jail instance on the remote host
pub struct Jail<'a> {
    bridge: &'a Bridge,
    config: &'a InstanceConfig,
}

impl<'a> Jail<'a> {
    pub fn new(bridge: &'a Bridge, config: &'a InstanceConfig) -> Self {
        Self { bridge, config }
    }

    /// Instance id from the configuration
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Jail name on the host
    pub fn name(&self) -> &str {
        self.config.jail_name()
    }

    fn list(&self) -> Result<JailList> {
        self.bridge.admin().list()
    }

    /// Current logical state, from a fresh listing
    pub fn state(&self) -> Result<JailState> {
        derive_state(&self.list()?, self.name())
    }

    /// Log the state of the jail
    pub fn status(&self) -> Result<JailState> {
        let jails = self
            .list()
            .inspect_err(|e| error!("Can't get status of jails: {}", e))?;
        let state = derive_state(&jails, self.name())?;

        match state {
            JailState::Unavailable => info!("Instance '{}' unavailable", self.id()),
            JailState::Stopped => info!("Instance state: {}", state),
            JailState::Running => {
                let entry = self.entry(&jails)?;
                info!("Instance running.");
                info!("Instances jail id: {}", entry.jid);
                if self.name() != self.id() {
                    info!("Instances jail name: {}", self.name());
                }
                info!("Instances jail ip: {}", entry.ip);
            }
        }
        Ok(state)
    }

    /// Create the jail if needed, then configure and start it
    pub fn start(&self, overrides: &StartOverrides) -> Result<()> {
        let admin = self.bridge.admin();
        let mut jails = self.list()?;
        let mut state = derive_state(&jails, self.name())?;
        let mut with_script = false;

        if state == JailState::Unavailable {
            let ip = self.config.ip.as_deref().ok_or_else(|| {
                error!("No IP address set for instance '{}'", self.id());
                Error::NoAddress(self.id().to_string())
            })?;
            let script = overrides
                .startup_script
                .as_deref()
                .or(self.config.startup_script.as_deref());
            let payload = startup::render_payload(script)?;
            with_script = !payload.is_empty();

            info!("Creating instance '{}'", self.id());
            Lifecycle::observed(self.name(), state)?.create()?;
            log_admin_error(admin.create(self.name(), ip, self.config.flavour.as_deref()))?;

            jails = self.list()?;
            let root = self.entry(&jails)?.root.clone();
            StartupInjector::new(self.bridge.remote()).inject(&root, &payload)?;
            state = derive_state(&jails, self.name())?;
        }

        if state != JailState::Stopped {
            info!("Instance state: {}", state);
            info!("Instance already started");
            return Ok(());
        }
        let mut lifecycle = Lifecycle::observed(self.name(), state)?;

        for (key, value) in self.rc_settings() {
            self.patch_rc(key, &value)?;
        }

        let provisioner = MountProvisioner::new(self.bridge.remote(), self.bridge.zfs());
        let mounts = provisioner.resolve(self.name(), &self.config.mounts()?)?;
        if !mounts.is_empty() {
            let root = &self.entry(&jails)?.root;
            provisioner.write_fstab(self.name(), root, &mounts)?;
        }

        if with_script {
            info!(
                "Starting instance '{}' with startup script, this can take a while.",
                self.id()
            );
        } else {
            info!("Starting instance '{}'", self.id());
        }
        lifecycle.start()?;
        log_admin_error(admin.start(self.name()))
    }

    /// Stop the jail if it is running
    pub fn stop(&self) -> Result<()> {
        let state = self.state()?;
        match state {
            JailState::Unavailable => {
                info!("Instance '{}' unavailable", self.id());
                return Ok(());
            }
            JailState::Stopped => {
                info!("Instance state: {}", state);
                info!("Instance not running");
                return Ok(());
            }
            JailState::Running => {}
        }

        info!("Stopping instance '{}'", self.id());
        Lifecycle::observed(self.name(), state)?.stop()?;
        log_admin_error(self.bridge.admin().stop(self.name()))?;
        info!("Instance stopped");
        Ok(())
    }

    /// Stop and delete the jail, including its data
    pub fn terminate(&self) -> Result<()> {
        if self.config.no_terminate {
            error!("Instance '{}' is configured not to be terminated.", self.id());
            return Err(Error::TerminationRefused(self.id().to_string()));
        }

        let admin = self.bridge.admin();
        let state = self.state()?;
        if state == JailState::Unavailable {
            info!("Instance '{}' unavailable", self.id());
            return Ok(());
        }

        let mut lifecycle = Lifecycle::observed(self.name(), state)?;
        if state == JailState::Running {
            info!("Stopping instance '{}'", self.id());
            lifecycle.stop()?;
            log_admin_error(admin.stop(self.name()))?;

            info!("Waiting for jail to stop");
            if self.wait_until_stopped()? == JailState::Unavailable {
                info!("Instance '{}' unavailable", self.id());
                return Ok(());
            }
        }

        info!("Terminating instance '{}'", self.id());
        lifecycle.delete()?;
        log_admin_error(admin.delete(self.name()))?;
        info!("Instance terminated");
        Ok(())
    }

    /// Fingerprints of the jail's ssh host keys; the jail must be running
    pub fn fingerprints(&self) -> Result<Vec<HostKey>> {
        match self.state()? {
            JailState::Running => console::host_key_fingerprints(self.bridge.admin(), self.name()),
            JailState::Unavailable => {
                info!("Instance '{}' unavailable", self.id());
                Err(Error::StateMachine(format!(
                    "Instance '{}' is unavailable",
                    self.id()
                )))
            }
            state => {
                info!("Instance state: {}", state);
                Err(Error::StateMachine(format!(
                    "Instance '{}' is not running",
                    self.id()
                )))
            }
        }
    }

    /// Poll the jail list until the jail is no longer running
    fn wait_until_stopped(&self) -> Result<JailState> {
        let timeout = Duration::from_secs(self.bridge.manifest().master.terminate_timeout);
        let started = Instant::now();
        loop {
            let state = self.state()?;
            if state != JailState::Running {
                return Ok(state);
            }
            if started.elapsed() >= timeout {
                return Err(Error::Timeout {
                    jail: self.id().to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            thread::sleep(self.bridge.poll_interval());
        }
    }

    fn entry<'j>(&self, jails: &'j JailList) -> Result<&'j JailEntry> {
        jails.get(self.name()).ok_or_else(|| {
            Error::Parse(format!("Jail '{}' missing from ezjail-admin list", self.name()))
        })
    }

    /// rc keys to patch; PROVIDE always carries the default tag and jail name
    fn rc_settings(&self) -> Vec<(&'static str, String)> {
        let overrides = self.config.rc_overrides();
        let configured = |key: &str| {
            overrides
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| *value)
        };

        let mut settings = Vec::new();
        if let Some(before) = configured("BEFORE") {
            settings.push(("BEFORE", before.to_string()));
        }
        let mut provide = format!("{} {}", PROVIDE_DEFAULT, self.name());
        if let Some(extra) = configured("PROVIDE") {
            provide.push(' ');
            provide.push_str(extra);
        }
        settings.push(("PROVIDE", provide));
        if let Some(require) = configured("REQUIRE") {
            settings.push(("REQUIRE", require.to_string()));
        }
        settings
    }

    fn patch_rc(&self, key: &str, value: &str) -> Result<()> {
        let expression = format!(r"s/\# {key}:.*$/\# {key}: {value}/");
        let path = format!("{}/{}", EZJAIL_CONFIG_DIR, self.name());
        self.bridge
            .remote()
            .check(&["sed", "-i", "", "-e", expression.as_str(), path.as_str()])
            .map(|_| ())
    }
}

/// Log each line of an admin command failure before passing it on
fn log_admin_error(result: Result<()>) -> Result<()> {
    if let Err(Error::AdminCommand(message)) = &result {
        for line in message.lines() {
            error!("{}", line);
        }
    }
    result
}
