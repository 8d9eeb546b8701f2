//! Bridge between the configuration and the jail host
//!
//! Handles:
//! - Owning the remote executor, admin client and zfs resolver
//! - Building per-instance jail handles
//! - Fleet status: configured instances against the live jail list

use crate::error::{Error, Result};
use crate::jail::state::derive_state;
use crate::jail::{AdminClient, Jail, JailIp, JailState};
use crate::manifest::{Manifest, validate_id};
use crate::remote::{Executor, Remote, SshExecutor};
use crate::template;
use crate::zfs::ZfsResolver;
use serde::Serialize;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Status of one configured instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub id: String,
    pub jail: String,
    pub state: Option<String>,
    pub configured_ip: String,
    pub observed_ip: Option<JailIp>,
    pub error: Option<String>,
}

/// A jail on the host that no instance is configured for
#[derive(Debug, Clone, Serialize)]
pub struct UnknownJail {
    pub name: String,
    pub ip: JailIp,
}

/// Result of a fleet status scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetReport {
    pub instances: Vec<InstanceReport>,
    pub unknown: Vec<UnknownJail>,
}

/// Bridge for managing jails on one host
pub struct Bridge {
    /// Loaded configuration
    manifest: Manifest,

    /// Helper commands on the host
    remote: Remote,

    /// ezjail-admin client (owns the cached list layout)
    admin: AdminClient,

    /// zfs mountpoint resolver (owns the mountpoint cache)
    zfs: ZfsResolver,

    /// Delay between polls while waiting for a jail to stop
    poll_interval: Duration,
}

impl Bridge {
    /// Create a bridge that talks to the host over ssh
    pub fn new(manifest: Manifest) -> Self {
        let executor = Rc::new(SshExecutor::from_config(&manifest.master));
        Self::with_executor(manifest, executor)
    }

    /// Create a bridge on top of any executor
    pub fn with_executor(manifest: Manifest, executor: Rc<dyn Executor>) -> Self {
        let remote = Remote::new(executor);
        let admin = AdminClient::new(remote.clone(), manifest.master.ezjail_admin.clone());
        let zfs = ZfsResolver::new(remote.clone(), manifest.zfs.clone());
        Self {
            manifest,
            remote,
            admin,
            zfs,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub(crate) fn remote(&self) -> &Remote {
        &self.remote
    }

    pub(crate) fn admin(&self) -> &AdminClient {
        &self.admin
    }

    pub(crate) fn zfs(&self) -> &ZfsResolver {
        &self.zfs
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Handle for a configured instance; the id is checked before any remote call
    pub fn jail(&self, id: &str) -> Result<Jail<'_>> {
        validate_id(id)?;
        let config = self
            .manifest
            .instance(id)
            .ok_or_else(|| Error::UnknownInstance(id.to_string()))?;
        Ok(Jail::new(self, config))
    }

    /// Log the state of every configured instance and every unknown jail.
    ///
    /// The jail list is fetched once. A failing instance is logged and the
    /// scan continues with the next one.
    pub fn ps(&self) -> Result<FleetReport> {
        let jails = self
            .admin
            .list()
            .inspect_err(|e| error!("Can't get status of jails: {}", e))?;
        let mut unknown: BTreeSet<&str> = jails.keys().map(String::as_str).collect();
        let mut report = FleetReport::default();

        for (id, instance) in &self.manifest.instances {
            let name = instance.jail_name();
            unknown.remove(name);

            let configured = instance.ip.clone().unwrap_or_default();
            let observed = jails.get(name).map(|entry| entry.ip.clone());
            let mut entry = InstanceReport {
                id: id.clone(),
                jail: name.to_string(),
                state: None,
                configured_ip: configured.clone(),
                observed_ip: observed.clone(),
                error: None,
            };

            match derive_state(&jails, name) {
                Ok(state) => {
                    let mut shown = configured;
                    if let (JailState::Running, Some(ip)) = (state, &observed) {
                        if !ip.matches(&shown) {
                            shown = format!("{} != configured {}", ip, shown);
                        }
                    }
                    info!("{:<20} {:<15} {:>15}", id, state, shown);
                    entry.state = Some(state.to_string());
                }
                Err(e) => {
                    error!("Can't get status of instance '{}': {}", id, e);
                    entry.error = Some(e.to_string());
                }
            }
            report.instances.push(entry);
        }

        for name in unknown {
            let ip = jails[name].ip.clone();
            warn!("Unknown jail found: {:<20} {:>15}", name, ip);
            report.unknown.push(UnknownJail {
                name: name.to_string(),
                ip,
            });
        }

        Ok(report)
    }

    /// Print a summary of the configuration
    pub fn check(&self) -> Result<()> {
        // Configuration was already validated on load
        println!("Configuration is valid.");

        let master = &self.manifest.master;
        let target = match &master.user {
            Some(user) => format!("{}@{}", user, master.host),
            None => master.host.clone(),
        };
        println!("\nMaster '{}': {}", master.name, target);
        println!("  ezjail-admin: {}", master.ezjail_admin);
        println!("  sudo: {}", if master.sudo { "yes" } else { "no" });

        if !self.manifest.zfs.is_empty() {
            println!("\nZFS datasets:");
            for (name, dataset) in &self.manifest.zfs {
                self.check_references(&dataset.path)?;
                let create = if dataset.create { " (create)" } else { "" };
                println!("  {}: {}{}", name, dataset.path, create);
            }
        }

        println!("\nInstances:");
        for (id, instance) in &self.manifest.instances {
            let mounts = instance.mounts()?;
            for mount in &mounts {
                self.check_references(&mount.src)?;
            }
            println!(
                "  {}: jail {}, ip {}, host {}, {} mount(s){}",
                id,
                instance.jail_name(),
                instance.ip.as_deref().unwrap_or("-"),
                instance.host().unwrap_or("-"),
                mounts.len(),
                if instance.no_terminate { ", no-terminate" } else { "" }
            );
        }

        Ok(())
    }

    /// Every `{zfs[...]}` in `template` must name a configured dataset
    fn check_references(&self, value: &str) -> Result<()> {
        for key in template::zfs_references(value)? {
            if !self.manifest.zfs.contains_key(&key) {
                return Err(Error::Validation(format!(
                    "'{}' references unknown zfs dataset '{}'",
                    value, key
                )));
            }
        }
        Ok(())
    }
}
