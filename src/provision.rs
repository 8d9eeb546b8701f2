//! Mount provisioning for jails
//!
//! Mount specs from the instance configuration are resolved into nullfs
//! entries and written to the jail's fstab on the host. The first line of
//! the existing fstab (the one ezjail generates for the jail root) is kept,
//! everything after it is replaced.

use crate::error::{Error, Result};
use crate::manifest::MountSpec;
use crate::remote::Remote;
use crate::template;
use crate::zfs::ZfsResolver;
use tracing::info;

/// Marker comment placed before the generated mount lines
pub const FSTAB_MARKER: &str = "# mount points";

/// A resolved nullfs mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Source path on the host
    pub src: String,
    /// Destination path relative to the jail root
    pub dst: String,
    pub ro: bool,
}

impl MountEntry {
    /// fstab line for a jail rooted at `root`
    pub fn fstab_line(&self, root: &str) -> String {
        let mode = if self.ro { "ro" } else { "rw" };
        format!("{} {}{} nullfs {} 0 0", self.src, root, self.dst, mode)
    }
}

/// Path of the fstab ezjail uses for a jail
pub fn fstab_path(jail_name: &str) -> String {
    format!("/etc/fstab.{}", jail_name)
}

/// Complete fstab content: header, marker, mount lines, trailing newline
pub fn render_fstab(header: Option<&str>, root: &str, mounts: &[MountEntry]) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(mounts.len() + 3);
    if let Some(header) = header {
        lines.push(header.to_string());
    }
    lines.push(FSTAB_MARKER.to_string());
    lines.extend(mounts.iter().map(|mount| mount.fstab_line(root)));
    lines.push(String::new());
    lines.join("\n")
}

/// Resolves mount specs and rewrites jail fstabs
pub struct MountProvisioner<'a> {
    remote: &'a Remote,
    zfs: &'a ZfsResolver,
}

impl<'a> MountProvisioner<'a> {
    pub fn new(remote: &'a Remote, zfs: &'a ZfsResolver) -> Self {
        Self { remote, zfs }
    }

    /// Resolve templates and create source directories where requested.
    ///
    /// The specs are left untouched; `create` is only acted upon here.
    pub fn resolve(&self, jail_name: &str, specs: &[MountSpec]) -> Result<Vec<MountEntry>> {
        let mut mounts = Vec::with_capacity(specs.len());
        for spec in specs {
            let src_template = spec.src.as_str();
            let dst_template = spec.dst.as_str();

            let src = template::render(src_template, Some(jail_name), |key| {
                self.zfs.mountpoint(key)
            })?;
            let dst = template::render(dst_template, Some(jail_name), |key| {
                Err(Error::Validation(format!(
                    "Mount destination '{}' can't reference zfs dataset '{}'.",
                    dst_template, key
                )))
            })?;

            if spec.create {
                self.remote.mkdir_p(&src).map_err(|e| match e {
                    Error::RemoteCommand { command, message } => Error::RemoteCommand {
                        command,
                        message: format!(
                            "Couldn't create source directory '{}' for mountpoint '{}': {}",
                            src, src_template, message
                        ),
                    },
                    other => other,
                })?;
            }

            mounts.push(MountEntry {
                src,
                dst,
                ro: spec.ro,
            });
        }
        Ok(mounts)
    }

    /// Replace the mount section of the jail's fstab
    pub fn write_fstab(&self, jail_name: &str, root: &str, mounts: &[MountEntry]) -> Result<()> {
        let fstab = fstab_path(jail_name);
        let root = root.trim_end_matches('/');
        info!("Setting up mount points");

        let existing = self.remote.exec(&["head", "-n", "1", fstab.as_str()])?;
        let existing = if existing.success() {
            existing.stdout_lossy()
        } else {
            String::new()
        };
        let header = existing.lines().next();

        for mount in mounts {
            self.remote.mkdir_p(&format!("{}{}", root, mount.dst))?;
        }

        let content = render_fstab(header, root, mounts);
        self.remote.write_file(&fstab, content.as_bytes())
    }
}
