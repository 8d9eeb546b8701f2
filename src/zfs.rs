//! ZFS dataset resolution on the jail host
//!
//! Datasets configured as `[zfs.<name>]` are looked up by name:
//! - the mountpoint is queried with `zfs get`
//! - a missing dataset is created when `create` is set, with every
//!   `set-*` option passed as a property
//! - resolved mountpoints are cached for the lifetime of the resolver

use crate::error::{Error, Result};
use crate::manifest::ZfsDatasetConfig;
use crate::remote::Remote;
use crate::template;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Resolves configured dataset names to mountpoints
pub struct ZfsResolver {
    remote: Remote,
    datasets: BTreeMap<String, ZfsDatasetConfig>,
    /// Resolved mountpoints by dataset name
    cache: RefCell<HashMap<String, String>>,
    /// Names currently being resolved, to catch self-referencing paths
    resolving: RefCell<HashSet<String>>,
}

impl ZfsResolver {
    pub fn new(remote: Remote, datasets: BTreeMap<String, ZfsDatasetConfig>) -> Self {
        Self {
            remote,
            datasets,
            cache: RefCell::new(HashMap::new()),
            resolving: RefCell::new(HashSet::new()),
        }
    }

    /// Mountpoint of the dataset configured under `name`
    pub fn mountpoint(&self, name: &str) -> Result<String> {
        if let Some(mountpoint) = self.cache.borrow().get(name) {
            return Ok(mountpoint.clone());
        }

        let config = self
            .datasets
            .get(name)
            .ok_or_else(|| Error::Zfs(format!("No zfs dataset '{}' configured", name)))?;

        if !self.resolving.borrow_mut().insert(name.to_string()) {
            return Err(Error::Zfs(format!(
                "zfs dataset '{}' references itself",
                name
            )));
        }
        let result = self.resolve(name, config);
        self.resolving.borrow_mut().remove(name);

        let mountpoint = result?;
        self.cache
            .borrow_mut()
            .insert(name.to_string(), mountpoint.clone());
        Ok(mountpoint)
    }

    fn resolve(&self, name: &str, config: &ZfsDatasetConfig) -> Result<String> {
        let path = template::render(&config.path, None, |key| self.mountpoint(key))?;

        if let Some(mountpoint) = self.query(&path)? {
            debug!("zfs dataset '{}' mounted at {}", name, mountpoint);
            return Ok(mountpoint);
        }

        if !config.create {
            return Err(Error::Zfs(format!(
                "Trying to use non existing zfs filesystem '{}' at '{}'.",
                name, path
            )));
        }

        info!("Creating zfs filesystem '{}' at '{}'", name, path);
        let mut argv = vec!["zfs".to_string(), "create".to_string()];
        for (key, value) in config.properties() {
            argv.push("-o".to_string());
            argv.push(format!("{}={}", key, value));
        }
        argv.push(path.clone());

        let output = self.remote.exec(&argv)?;
        if !output.success() {
            return Err(Error::Zfs(format!(
                "Couldn't create zfs filesystem '{}' at '{}':\n{}",
                name,
                path,
                output.combined()
            )));
        }

        self.query(&path)?.ok_or_else(|| {
            Error::Zfs(format!(
                "Couldn't create zfs filesystem '{}' at '{}'.",
                name, path
            ))
        })
    }

    /// Mountpoint of `path`, or `None` when the dataset does not exist
    fn query(&self, path: &str) -> Result<Option<String>> {
        let output = self
            .remote
            .exec(&["zfs", "get", "-Hp", "-o", "property,value", "mountpoint", path])?;
        if !output.success() {
            return Ok(None);
        }
        parse_mountpoint(&output.stdout_lossy()).map(Some)
    }
}

/// Parse `mountpoint<TAB>value` as printed by `zfs get -Hp -o property,value`
fn parse_mountpoint(output: &str) -> Result<String> {
    let line = output.trim();
    match line.split_once('\t') {
        Some(("mountpoint", value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(Error::Parse(format!(
            "Unexpected zfs get output: '{}'",
            line
        ))),
    }
}
