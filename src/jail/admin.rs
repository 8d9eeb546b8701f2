//! ezjail-admin invocations
//!
//! Every subcommand is a variant of `AdminRequest`, validated on its own
//! before it is turned into an argv for the remote executor.

use crate::error::{Error, Result};
use crate::jail::listing::ListParser;
use crate::jail::types::JailList;
use crate::remote::{CommandOutput, Remote};
use std::rc::Rc;

/// One ezjail-admin subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminRequest {
    List,
    Create {
        name: String,
        ip: String,
        flavour: Option<String>,
    },
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    Delete {
        name: String,
    },
    /// Run `cmd` inside the jail; the command payload may contain spaces
    Console {
        name: String,
        cmd: String,
    },
}

impl AdminRequest {
    /// Subcommand name
    pub fn verb(&self) -> &'static str {
        match self {
            AdminRequest::List => "list",
            AdminRequest::Create { .. } => "create",
            AdminRequest::Start { .. } => "start",
            AdminRequest::Stop { .. } => "stop",
            AdminRequest::Delete { .. } => "delete",
            AdminRequest::Console { .. } => "console",
        }
    }

    /// Reject keyword values that are empty or contain whitespace
    pub fn validate(&self) -> Result<()> {
        match self {
            AdminRequest::List => Ok(()),
            AdminRequest::Create { name, ip, flavour } => {
                single_word("name", name)?;
                single_word("ip", ip)?;
                if let Some(flavour) = flavour {
                    single_word("flavour", flavour)?;
                }
                Ok(())
            }
            AdminRequest::Start { name }
            | AdminRequest::Stop { name }
            | AdminRequest::Delete { name }
            | AdminRequest::Console { name, .. } => single_word("name", name),
        }
    }

    /// Full argv, starting with the admin binary
    pub fn argv(&self, binary: &str) -> Result<Vec<String>> {
        self.validate()?;

        let mut argv = vec![binary.to_string(), self.verb().to_string()];
        match self {
            AdminRequest::List => {}
            AdminRequest::Create { name, ip, flavour } => {
                argv.extend(["-c".to_string(), "zfs".to_string()]);
                if let Some(flavour) = flavour {
                    argv.extend(["-f".to_string(), flavour.clone()]);
                }
                argv.extend([name.clone(), ip.clone()]);
            }
            AdminRequest::Start { name } | AdminRequest::Stop { name } => {
                argv.push(name.clone());
            }
            AdminRequest::Delete { name } => {
                argv.extend(["-fw".to_string(), name.clone()]);
            }
            AdminRequest::Console { name, cmd } => {
                argv.extend(["-e".to_string(), cmd.clone(), name.clone()]);
            }
        }
        Ok(argv)
    }
}

fn single_word(key: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("The value of '{}' is empty", key)));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "The value '{}' of '{}' contains whitespace",
            value, key
        )));
    }
    Ok(())
}

/// Client for the remote ezjail-admin binary
#[derive(Clone)]
pub struct AdminClient {
    remote: Remote,
    binary: String,
    parser: Rc<ListParser>,
}

impl AdminClient {
    pub fn new(remote: Remote, binary: impl Into<String>) -> Self {
        Self {
            remote,
            binary: binary.into(),
            parser: Rc::new(ListParser::new()),
        }
    }

    /// Issue a request and return its raw output
    pub fn call(&self, request: &AdminRequest) -> Result<CommandOutput> {
        let argv = request.argv(&self.binary)?;
        self.remote.exec(&argv)
    }

    /// Issue a request and fail with the combined output on a non-zero exit
    fn checked(&self, request: &AdminRequest) -> Result<CommandOutput> {
        let output = self.call(request)?;
        if !output.success() {
            return Err(Error::AdminCommand(output.combined()));
        }
        Ok(output)
    }

    /// Fetch and parse the current jail list
    pub fn list(&self) -> Result<JailList> {
        let output = self.checked(&AdminRequest::List)?;
        self.parser.parse(&output.stdout_lossy())
    }

    pub fn create(&self, name: &str, ip: &str, flavour: Option<&str>) -> Result<()> {
        self.checked(&AdminRequest::Create {
            name: name.to_string(),
            ip: ip.to_string(),
            flavour: flavour.map(str::to_string),
        })
        .map(|_| ())
    }

    pub fn start(&self, name: &str) -> Result<()> {
        self.checked(&AdminRequest::Start {
            name: name.to_string(),
        })
        .map(|_| ())
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        self.checked(&AdminRequest::Stop {
            name: name.to_string(),
        })
        .map(|_| ())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.checked(&AdminRequest::Delete {
            name: name.to_string(),
        })
        .map(|_| ())
    }

    /// Run a command inside a jail; the exit code is left to the caller
    pub fn console(&self, name: &str, cmd: &str) -> Result<CommandOutput> {
        self.call(&AdminRequest::Console {
            name: name.to_string(),
            cmd: cmd.to_string(),
        })
    }
}
