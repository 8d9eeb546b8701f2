//! Configuration file parsing for ezwarden
//!
//! Parses `ezwarden.toml` configuration files using serde

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Load configuration from a file
pub fn load(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let manifest = from_str(&content, &base_dir)?;
    Ok(manifest)
}

/// Parse configuration text; relative paths resolve against `base_dir`
pub fn from_str(content: &str, base_dir: &Path) -> Result<Manifest> {
    let mut manifest: Manifest = toml::from_str(content)?;

    for (id, instance) in manifest.instances.iter_mut() {
        instance.id = id.clone();
        if let Some(script) = &instance.startup_script {
            instance.startup_script = Some(base_dir.join(script));
        }
    }

    manifest.validate()?;
    Ok(manifest)
}

/// Root configuration structure
#[derive(Debug, Deserialize)]
pub struct Manifest {
    /// Jail host settings
    pub master: MasterConfig,

    /// Named ZFS datasets referenced from templates as `{zfs[name]}`
    #[serde(default)]
    pub zfs: BTreeMap<String, ZfsDatasetConfig>,

    /// Jail instances keyed by instance id
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceConfig>,
}

impl Manifest {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.master.host.trim().is_empty() {
            return Err(Error::Validation("Master host must not be empty".into()));
        }

        let mut jail_names: HashMap<&str, &str> = HashMap::new();
        for (id, instance) in &self.instances {
            validate_id(id)?;
            if let Some(name) = &instance.ezjail_name {
                validate_id(name)?;
            }
            if let Some(previous) = jail_names.insert(instance.jail_name(), id) {
                return Err(Error::Validation(format!(
                    "Instances '{}' and '{}' use the same jail name '{}'",
                    previous,
                    id,
                    instance.jail_name()
                )));
            }
            instance.mounts()?;
            for (key, value) in instance.rc_overrides() {
                if value.contains(RC_FORBIDDEN) {
                    return Err(Error::Validation(format!(
                        "Value '{}' of 'rc_{}' for instance '{}' contains '/', '\\', '&' or a newline",
                        value,
                        key.to_lowercase(),
                        id
                    )));
                }
            }
        }

        for (name, dataset) in &self.zfs {
            dataset.validate(name)?;
        }

        Ok(())
    }

    /// Get an instance definition by id
    pub fn instance(&self, id: &str) -> Option<&InstanceConfig> {
        self.instances.get(id)
    }
}

/// Characters that would break the sed replacement used to patch rc files
const RC_FORBIDDEN: [char; 4] = ['/', '\\', '&', '\n'];

fn default_master_name() -> String {
    "master".into()
}

fn default_ssh_program() -> String {
    "ssh".into()
}

fn default_admin_binary() -> String {
    "/usr/local/bin/ezjail-admin".into()
}

fn default_terminate_timeout() -> u64 {
    300
}

/// Jail host (master) configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MasterConfig {
    /// Name of the master used in messages
    #[serde(default = "default_master_name")]
    pub name: String,

    /// Host the jails live on
    pub host: String,

    /// ssh login user
    pub user: Option<String>,

    /// ssh port
    pub port: Option<u16>,

    /// ssh client program
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,

    /// Extra ssh client options
    #[serde(default)]
    pub ssh_options: Vec<String>,

    /// Run remote commands through sudo
    #[serde(default)]
    pub sudo: bool,

    /// Log every remote command with its output
    #[serde(default)]
    pub debug_commands: bool,

    /// Path of ezjail-admin on the host
    #[serde(default = "default_admin_binary")]
    pub ezjail_admin: String,

    /// Seconds to wait for a jail to stop before terminate gives up
    #[serde(default = "default_terminate_timeout")]
    pub terminate_timeout: u64,
}

/// ZFS dataset definition
#[derive(Debug, Clone, Deserialize)]
pub struct ZfsDatasetConfig {
    /// Dataset path template (may reference other datasets)
    pub path: String,

    /// Create the dataset if it does not exist
    #[serde(default)]
    pub create: bool,

    /// `set-*` properties applied on creation
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl ZfsDatasetConfig {
    fn validate(&self, name: &str) -> Result<()> {
        for (key, value) in &self.extra {
            if !key.starts_with("set-") || key.len() == 4 {
                return Err(Error::Validation(format!(
                    "Unknown option '{}' for zfs dataset '{}'",
                    key, name
                )));
            }
            if matches!(value, toml::Value::Array(_) | toml::Value::Table(_)) {
                return Err(Error::Validation(format!(
                    "Option '{}' for zfs dataset '{}' must be a scalar",
                    key, name
                )));
            }
        }
        Ok(())
    }

    /// `(property, value)` pairs from the `set-*` options
    pub fn properties(&self) -> Vec<(String, String)> {
        self.extra
            .iter()
            .filter_map(|(key, value)| {
                let property = key.strip_prefix("set-")?;
                let value = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((property.to_string(), value))
            })
            .collect()
    }
}

/// `mounts` as either a list of lines or one multi-line string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MountLines {
    Text(String),
    Lines(Vec<String>),
}

impl Default for MountLines {
    fn default() -> Self {
        MountLines::Lines(Vec::new())
    }
}

impl MountLines {
    fn lines(&self) -> Vec<&str> {
        match self {
            MountLines::Text(text) => text.lines().collect(),
            MountLines::Lines(lines) => lines.iter().flat_map(|l| l.lines()).collect(),
        }
    }
}

/// Jail instance definition
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceConfig {
    /// Instance id (the table key)
    #[serde(skip)]
    pub id: String,

    /// Addresses: `iface|addr` pairs separated by commas, or a bare address
    pub ip: Option<String>,

    /// Host override for connecting to the jail
    pub host: Option<String>,

    /// ezjail flavour applied on creation
    pub flavour: Option<String>,

    /// Mount lines of `key=value` tokens
    #[serde(default)]
    pub mounts: MountLines,

    /// Refuse to terminate this instance
    #[serde(default)]
    pub no_terminate: bool,

    #[serde(rename = "rc_before")]
    pub rc_before: Option<String>,

    #[serde(rename = "rc_provide")]
    pub rc_provide: Option<String>,

    #[serde(rename = "rc_require")]
    pub rc_require: Option<String>,

    /// Script run once on first boot
    pub startup_script: Option<PathBuf>,

    /// Jail name on the host, defaults to the instance id
    pub ezjail_name: Option<String>,
}

impl InstanceConfig {
    /// Name of the jail on the host
    pub fn jail_name(&self) -> &str {
        self.ezjail_name.as_deref().unwrap_or(&self.id)
    }

    /// First configured address, without its interface
    pub fn first_ip(&self) -> Option<&str> {
        let ip = self.ip.as_deref()?;
        let first = ip.split(',').next().unwrap_or(ip);
        Some(match first.split_once('|') {
            Some((_, addr)) => addr,
            None => first,
        })
    }

    /// Host to connect to: the override or the first address
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().or_else(|| self.first_ip())
    }

    /// Parsed mount specifications, in configuration order
    pub fn mounts(&self) -> Result<Vec<MountSpec>> {
        parse_mount_lines(&self.mounts.lines())
    }

    /// Configured rc dependency overrides as `(KEY, value)`
    pub fn rc_overrides(&self) -> Vec<(&'static str, &str)> {
        [
            ("BEFORE", &self.rc_before),
            ("PROVIDE", &self.rc_provide),
            ("REQUIRE", &self.rc_require),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect()
    }
}

/// Check that an instance or jail name only uses `[A-Za-z0-9_]`
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Validation(format!(
            "Invalid instance name '{}'. An ezjail instance name may only contain letters, numbers and underscores.",
            id
        )));
    }
    Ok(())
}

/// A mount as configured, before templates are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Source path template (host side)
    pub src: String,
    /// Destination template inside the jail
    pub dst: String,
    /// Create the source directory before mounting
    pub create: bool,
    /// Mount read-only
    pub ro: bool,
}

/// Interpret a boolean option value
pub fn value_as_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a single mount line; blank lines yield `None`
pub fn parse_mount_line(line: &str) -> Result<Option<MountSpec>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut src = None;
    let mut dst = None;
    let mut create = false;
    let mut ro = false;
    for token in tokens {
        let (key, value) = token.split_once('=').ok_or_else(|| {
            Error::Validation(format!("Mount option '{}' contains no equal sign.", token))
        })?;
        let (key, value) = (key.trim(), value.trim());
        match key {
            "src" => src = Some(value.to_string()),
            "dst" => dst = Some(value.to_string()),
            "create" | "ro" => {
                let flag = value_as_bool(value).ok_or_else(|| {
                    Error::Validation(format!(
                        "Unknown value '{}' for mount option '{}'.",
                        value, key
                    ))
                })?;
                if key == "create" {
                    create = flag;
                } else {
                    ro = flag;
                }
            }
            _ => {
                return Err(Error::Validation(format!(
                    "Unknown mount option '{}'.",
                    key
                )));
            }
        }
    }

    let missing = |key: &str| {
        Error::Validation(format!("Mount '{}' has no '{}'.", line.trim(), key))
    };
    Ok(Some(MountSpec {
        src: src.ok_or_else(|| missing("src"))?,
        dst: dst.ok_or_else(|| missing("dst"))?,
        create,
        ro,
    }))
}

/// Parse mount lines, skipping blank ones
pub fn parse_mount_lines(lines: &[&str]) -> Result<Vec<MountSpec>> {
    let mut mounts = Vec::new();
    for line in lines {
        if let Some(spec) = parse_mount_line(line)? {
            mounts.push(spec);
        }
    }
    Ok(mounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Manifest> {
        from_str(content, Path::new("/etc/ezwarden"))
    }

    #[test]
    fn test_parse_minimal_config() {
        let manifest = parse(
            r#"
[master]
host = "jailhost"

[instances.foo]
ip = "10.0.0.1"
"#,
        )
        .unwrap();

        assert_eq!(manifest.master.ezjail_admin, "/usr/local/bin/ezjail-admin");
        assert_eq!(manifest.master.terminate_timeout, 300);
        assert!(!manifest.master.sudo);
        let foo = manifest.instance("foo").unwrap();
        assert_eq!(foo.id, "foo");
        assert_eq!(foo.jail_name(), "foo");
        assert!(foo.mounts().unwrap().is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let manifest = parse(
            r#"
[master]
name = "warden"
host = "jailhost"
user = "root"
port = 2222
sudo = true
debug-commands = true
ezjail-admin = "/opt/bin/ezjail-admin"
terminate-timeout = 60

[zfs.data]
path = "tank/data"
create = true
set-compression = "lz4"
set-quota = 10

[instances.foo]
ip = "lo1|10.0.0.1"
flavour = "base"
ezjail-name = "foo_jail"
no-terminate = true
rc_require = "database"
startup-script = "scripts/foo.sh"
mounts = [
    "src={zfs[data]}/{name} dst=/data create=yes",
    "src=/usr/ports dst=/usr/ports ro=true",
]
"#,
        )
        .unwrap();

        assert_eq!(manifest.master.port, Some(2222));
        assert!(manifest.master.debug_commands);
        assert_eq!(manifest.master.terminate_timeout, 60);

        let data = &manifest.zfs["data"];
        assert!(data.create);
        assert_eq!(
            data.properties(),
            vec![
                ("compression".to_string(), "lz4".to_string()),
                ("quota".to_string(), "10".to_string()),
            ]
        );

        let foo = manifest.instance("foo").unwrap();
        assert_eq!(foo.jail_name(), "foo_jail");
        assert!(foo.no_terminate);
        assert_eq!(foo.rc_overrides(), vec![("REQUIRE", "database")]);
        assert_eq!(
            foo.startup_script.as_deref(),
            Some(Path::new("/etc/ezwarden/scripts/foo.sh"))
        );
        let mounts = foo.mounts().unwrap();
        assert_eq!(mounts.len(), 2);
        assert!(mounts[0].create);
        assert!(mounts[1].ro);
    }

    #[test]
    fn test_mounts_as_text() {
        let manifest = parse(
            r#"
[master]
host = "jailhost"

[instances.foo]
mounts = """
src=/a dst=/a

src=/b dst=/b ro=on
"""
"#,
        )
        .unwrap();
        let mounts = manifest.instance("foo").unwrap().mounts().unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].src, "/b");
        assert!(mounts[1].ro);
    }

    #[test]
    fn test_mount_line() {
        let spec = parse_mount_line("src=foo dst=/foo create=no ro=yes").unwrap().unwrap();
        assert_eq!(
            spec,
            MountSpec {
                src: "foo".to_string(),
                dst: "/foo".to_string(),
                create: false,
                ro: true,
            }
        );
        assert!(parse_mount_line("   ").unwrap().is_none());
    }

    #[test]
    fn test_mount_option_without_equal_sign() {
        match parse_mount_line("1") {
            Err(Error::Validation(msg)) => {
                assert_eq!(msg, "Mount option '1' contains no equal sign.")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_mount_requires_src_and_dst() {
        match parse_mount_line("src=/srv") {
            Err(Error::Validation(msg)) => assert_eq!(msg, "Mount 'src=/srv' has no 'dst'."),
            other => panic!("unexpected result: {:?}", other),
        }
        match parse_mount_line("dst=/srv ro=yes") {
            Err(Error::Validation(msg)) => assert!(msg.ends_with("has no 'src'.")),
            other => panic!("unexpected result: {:?}", other),
        }

        let result = parse(
            r#"
[master]
host = "jailhost"

[instances.foo]
ip = "10.0.0.1"
mounts = ["src=/srv"]
"#,
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_mount_invalid_bool() {
        assert!(matches!(
            parse_mount_line("src=/a dst=/a ro=maybe"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_instance_id() {
        let result = parse(
            r#"
[master]
host = "jailhost"

[instances."foo-bar"]
ip = "10.0.0.1"
"#,
        );
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(validate_id("foo_1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("foo.bar").is_err());
    }

    #[test]
    fn test_duplicate_jail_name() {
        let result = parse(
            r#"
[master]
host = "jailhost"

[instances.foo]
ezjail-name = "shared"

[instances.bar]
ezjail-name = "shared"
"#,
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_unknown_zfs_option() {
        let result = parse(
            r#"
[master]
host = "jailhost"

[zfs.data]
path = "tank/data"
compression = "lz4"
"#,
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_rc_value_rejects_sed_metacharacters() {
        for value in ["a/b", "a&b", r"a\\b"] {
            let content = format!(
                "[master]\nhost = \"jailhost\"\n\n[instances.foo]\nrc_provide = '{}'\n",
                value
            );
            match parse(&content) {
                Err(Error::Validation(msg)) => assert!(msg.contains("rc_provide"), "{}", msg),
                other => panic!("value {:?} accepted: {:?}", value, other),
            }
        }
        let content = "[master]\nhost = \"jailhost\"\n\n[instances.foo]\nrc_provide = 'web db'\n";
        assert!(parse(content).is_ok());
    }

    #[test]
    fn test_get_host() {
        let instance = |ip: &str| InstanceConfig {
            id: "foo".to_string(),
            ip: Some(ip.to_string()),
            ..Default::default()
        };

        assert_eq!(instance("10.0.0.1").host(), Some("10.0.0.1"));
        assert_eq!(instance("lo1|10.0.0.2").host(), Some("10.0.0.2"));
        assert_eq!(
            instance("lo1|10.0.0.3,vtnet0|2a03:b0c0:3:d0::3a4d:c002").host(),
            Some("10.0.0.3")
        );
        assert_eq!(
            instance("vtnet0|2a03:b0c0:3:d0::3a4d:c002").host(),
            Some("2a03:b0c0:3:d0::3a4d:c002")
        );

        let mut with_host = instance("10.0.0.1");
        with_host.host = Some("foo.example.com".to_string());
        assert_eq!(with_host.host(), Some("foo.example.com"));
    }
}
