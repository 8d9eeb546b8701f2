//! Remote command execution
//!
//! Provides:
//! - The `Executor` seam every remote call goes through
//! - An ssh-backed executor for the jail host
//! - Helper commands (file writes, chmod, mkdir) built on top of it
//!
//! Each call spawns its own `ssh` process, so the command channel is
//! acquired and released within a single operation.

use crate::error::{Error, Result};
use crate::manifest::MasterConfig;
use std::io::Write;
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::thread;
use tracing::{debug, info};

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECT_FAILURE: i32 = 255;

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code of the remote command
    pub code: i32,
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn new(code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Trimmed stdout and stderr joined by a newline
    pub fn combined(&self) -> String {
        format!(
            "{}\n{}",
            self.stdout_lossy().trim(),
            self.stderr_lossy().trim()
        )
        .trim()
        .to_string()
    }
}

/// Runs one command against the remote host
pub trait Executor {
    /// Execute `argv`, optionally feeding `input` to its standard input.
    ///
    /// A non-zero exit code is returned as data. Only transport failures
    /// produce `Error::Connectivity`.
    fn execute(&self, argv: &[String], input: Option<&[u8]>) -> Result<CommandOutput>;
}

/// Executor that runs commands through the `ssh` client
#[derive(Debug, Clone)]
pub struct SshExecutor {
    /// Local ssh client program
    program: String,
    /// Host to connect to
    target: String,
    /// Login user
    user: Option<String>,
    /// Port override
    port: Option<u16>,
    /// Extra options passed to ssh before the target
    options: Vec<String>,
    /// Prefix every remote command with sudo
    sudo: bool,
    /// Log command lines and output at info level
    debug: bool,
}

impl SshExecutor {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            program: "ssh".to_string(),
            target: target.into(),
            user: None,
            port: None,
            options: Vec::new(),
            sudo: false,
            debug: false,
        }
    }

    pub fn from_config(config: &MasterConfig) -> Self {
        Self {
            program: config.ssh_program.clone(),
            user: config.user.clone(),
            port: config.port,
            options: config.ssh_options.clone(),
            debug: config.debug_commands,
            ..Self::new(config.host.clone())
        }
        .sudo(config.sudo)
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// The remote command line, quoted for the remote shell
    pub fn remote_command(&self, argv: &[String]) -> String {
        let mut words: Vec<&str> = Vec::with_capacity(argv.len() + 1);
        if self.sudo {
            words.push("sudo");
        }
        words.extend(argv.iter().map(String::as_str));
        shell_words::join(words)
    }

    /// Arguments for the local ssh client
    pub fn ssh_args(&self, argv: &[String]) -> Vec<String> {
        let mut args = self.options.clone();
        if let Some(user) = &self.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(self.target.clone());
        args.push("--".to_string());
        args.push(self.remote_command(argv));
        args
    }

    fn connectivity(&self, message: impl Into<String>) -> Error {
        Error::Connectivity {
            target: self.target.clone(),
            message: message.into(),
        }
    }

    fn trace(&self, message: &str) {
        if self.debug {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
    }
}

impl Executor for SshExecutor {
    fn execute(&self, argv: &[String], input: Option<&[u8]>) -> Result<CommandOutput> {
        let command_line = self.remote_command(argv);
        self.trace(&format!("[{}] {}", self.target, command_line));

        let mut child = Command::new(&self.program)
            .args(self.ssh_args(argv))
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                self.connectivity(format!("Failed to spawn {}: {}", self.program, e))
            })?;

        // Feed stdin from a scoped thread while output is drained, then close
        // it so the remote side sees end-of-input.
        let stdin = child.stdin.take();
        let output = thread::scope(|scope| {
            let writer = match (stdin, input) {
                (Some(mut stdin), Some(payload)) => Some(scope.spawn(move || {
                    let result = stdin.write_all(payload);
                    drop(stdin);
                    result
                })),
                _ => None,
            };
            let output = child.wait_with_output();
            if let Some(writer) = writer {
                match writer.join() {
                    Ok(Err(e)) => {
                        return Err(self.connectivity(format!("Failed to send input: {}", e)));
                    }
                    Err(_) => return Err(self.connectivity("Input writer panicked")),
                    Ok(Ok(())) => {}
                }
            }
            output.map_err(|e| self.connectivity(format!("Failed to wait for ssh: {}", e)))
        })?;

        let code = output
            .status
            .code()
            .ok_or_else(|| self.connectivity("ssh terminated by signal"))?;
        let result = CommandOutput::new(code, output.stdout, output.stderr);

        self.trace(&format!("[{}] exit {}", self.target, code));
        if !result.stdout.is_empty() {
            self.trace(result.stdout_lossy().trim_end());
        }
        if !result.stderr.is_empty() {
            self.trace(result.stderr_lossy().trim_end());
        }

        if code == SSH_CONNECT_FAILURE {
            return Err(self.connectivity(result.stderr_lossy().trim().to_string()));
        }

        Ok(result)
    }
}

/// Shared handle for issuing helper commands on the remote host
#[derive(Clone)]
pub struct Remote {
    executor: Rc<dyn Executor>,
}

impl Remote {
    pub fn new(executor: Rc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Run a command and return its output regardless of exit code
    pub fn exec<S: AsRef<str>>(&self, argv: &[S]) -> Result<CommandOutput> {
        self.executor.execute(&to_argv(argv), None)
    }

    /// Run a command with an input payload
    pub fn exec_with_input<S: AsRef<str>>(
        &self,
        argv: &[S],
        input: &[u8],
    ) -> Result<CommandOutput> {
        self.executor.execute(&to_argv(argv), Some(input))
    }

    /// Run a command and fail on a non-zero exit code
    pub fn check<S: AsRef<str>>(&self, argv: &[S]) -> Result<CommandOutput> {
        let output = self.exec(argv)?;
        ensure_success(argv, output)
    }

    /// Replace a remote file with `content` in a single write
    pub fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let script = format!("cat - > \"{}\"", path);
        let argv = ["sh", "-c", script.as_str()];
        let output = self.exec_with_input(&argv, content)?;
        ensure_success(&argv, output).map(|_| ())
    }

    pub fn chmod(&self, mode: &str, path: &str) -> Result<()> {
        self.check(&["chmod", mode, path]).map(|_| ())
    }

    /// Create a directory and its parents; succeeds if it already exists
    pub fn mkdir_p(&self, path: &str) -> Result<()> {
        self.check(&["mkdir", "-p", path]).map(|_| ())
    }
}

fn to_argv<S: AsRef<str>>(argv: &[S]) -> Vec<String> {
    argv.iter().map(|s| s.as_ref().to_string()).collect()
}

fn ensure_success<S: AsRef<str>>(argv: &[S], output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        Ok(output)
    } else {
        Err(Error::RemoteCommand {
            command: shell_words::join(argv.iter().map(|s| s.as_ref())),
            message: output.stderr_lossy().trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedExecutor, capture_logs};

    /// Executor whose client is a local `sh -c <script>`; the ssh
    /// arguments that follow become positional parameters
    fn local(script: &str, debug: bool) -> SshExecutor {
        SshExecutor {
            program: "sh".to_string(),
            options: vec!["-c".to_string(), script.to_string()],
            debug,
            ..SshExecutor::new("jailhost")
        }
    }

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput::new(1, "  out\n", "err  \n");
        assert_eq!(output.combined(), "out\nerr");

        let output = CommandOutput::new(1, "", "only err\n");
        assert_eq!(output.combined(), "only err");
    }

    #[test]
    fn test_ssh_args() {
        let executor = SshExecutor {
            program: "ssh".to_string(),
            target: "jailhost".to_string(),
            user: Some("admin".to_string()),
            port: Some(2222),
            options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            sudo: true,
            debug: false,
        };
        let argv = vec!["sh".to_string(), "-c".to_string(), "cat - > \"/x\"".to_string()];
        assert_eq!(
            executor.ssh_args(&argv),
            vec![
                "-o",
                "BatchMode=yes",
                "-l",
                "admin",
                "-p",
                "2222",
                "jailhost",
                "--",
                "sudo sh -c 'cat - > \"/x\"'",
            ]
        );
    }

    #[test]
    fn test_remote_command_without_sudo() {
        let executor = SshExecutor::new("jailhost");
        let argv = vec!["console".to_string(), "-e".to_string(), "ls /etc/ssh/".to_string()];
        assert_eq!(executor.remote_command(&argv), "console -e 'ls /etc/ssh/'");
        assert_eq!(
            executor.sudo(true).remote_command(&argv),
            "sudo console -e 'ls /etc/ssh/'"
        );
    }

    #[test]
    fn test_write_file_sends_payload() {
        let script = ScriptedExecutor::new();
        script.ok(r#"sh -c 'cat - > "/usr/jails/foo/etc/startup_script"'"#, "");
        let remote = Remote::new(script.clone());

        remote
            .write_file("/usr/jails/foo/etc/startup_script", b"#!/bin/sh\n")
            .unwrap();

        assert_eq!(script.remaining(), 0);
        assert_eq!(script.inputs()[0].1, "#!/bin/sh\n");
    }

    #[test]
    fn test_check_reports_failure() {
        let script = ScriptedExecutor::new();
        script.expect("chmod 0700 /missing", 1, "", "chmod: /missing: No such file or directory\n");
        let remote = Remote::new(script.clone());

        match remote.chmod("0700", "/missing") {
            Err(Error::RemoteCommand { command, message }) => {
                assert_eq!(command, "chmod 0700 /missing");
                assert_eq!(message, "chmod: /missing: No such file or directory");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_exit_255_is_connectivity_failure() {
        let executor = local("echo 'Connection refused' >&2; exit 255", false);
        match executor.execute(&argv(&["ezjail-admin", "list"]), None) {
            Err(Error::Connectivity { target, message }) => {
                assert_eq!(target, "jailhost");
                assert_eq!(message, "Connection refused");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_nonzero_exit_is_returned() {
        let executor = local("echo out; echo err >&2; exit 3", false);
        let output = executor.execute(&argv(&["false"]), None).unwrap();
        assert_eq!(output.code, 3);
        assert_eq!(output.stdout_lossy(), "out\n");
        assert_eq!(output.stderr_lossy(), "err\n");
    }

    #[test]
    fn test_input_round_trip() {
        let executor = local("cat", false);
        let output = executor
            .execute(&argv(&["sh", "-c", "cat - > /x"]), Some(b"#!/bin/sh\necho hi\n"))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "#!/bin/sh\necho hi\n");

        let output = executor.execute(&argv(&["true"]), None).unwrap();
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn test_large_input_does_not_block() {
        let payload = vec![b'x'; 1 << 20];
        let output = local("cat", false)
            .execute(&argv(&["true"]), Some(&payload))
            .unwrap();
        assert_eq!(output.stdout.len(), payload.len());
    }

    #[test]
    fn test_spawn_failure_is_connectivity_failure() {
        let executor = SshExecutor {
            program: "/nonexistent/ezwarden-ssh".to_string(),
            ..SshExecutor::new("jailhost")
        };
        assert!(matches!(
            executor.execute(&argv(&["true"]), None),
            Err(Error::Connectivity { .. })
        ));
    }

    #[test]
    fn test_debug_commands_log_at_info() {
        let command = argv(&["uname", "-a"]);
        let (result, lines) = capture_logs(|| local("echo hello", true).execute(&command, None));
        result.unwrap();
        assert_eq!(lines, vec!["[jailhost] uname -a", "[jailhost] exit 0", "hello"]);

        let (result, lines) = capture_logs(|| local("echo hello", false).execute(&command, None));
        result.unwrap();
        assert!(lines.is_empty());
    }
}
