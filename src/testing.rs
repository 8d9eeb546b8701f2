//! Test doubles shared by the unit tests
//!
//! - `ScriptedExecutor`: replays expected remote commands in order
//! - `capture_logs`: collects formatted log lines emitted by a closure
//! - `ezjail_list`: renders `ezjail-admin list` output

use crate::error::{Error, Result};
use crate::remote::{CommandOutput, Executor};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

enum Reply {
    Output(CommandOutput),
    Unreachable(String),
}

struct Expectation {
    argv: Vec<String>,
    reply: Reply,
}

/// Executor fake that asserts each command against a script
#[derive(Default)]
pub struct ScriptedExecutor {
    expected: RefCell<VecDeque<Expectation>>,
    inputs: RefCell<Vec<(String, String)>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Expect `command` (shell syntax) and reply with the given output
    pub fn expect(&self, command: &str, code: i32, stdout: &str, stderr: &str) {
        self.push(command, Reply::Output(CommandOutput::new(code, stdout, stderr)));
    }

    /// Expect `command` and reply with exit code 0
    pub fn ok(&self, command: &str, stdout: &str) {
        self.expect(command, 0, stdout, "");
    }

    /// Expect `command` and fail as if the host could not be reached
    pub fn unreachable(&self, command: &str, message: &str) {
        self.push(command, Reply::Unreachable(message.to_string()));
    }

    fn push(&self, command: &str, reply: Reply) {
        let argv = shell_words::split(command).expect("expected command must be valid shell");
        self.expected.borrow_mut().push_back(Expectation { argv, reply });
    }

    /// Number of expected commands not yet issued
    pub fn remaining(&self) -> usize {
        self.expected.borrow().len()
    }

    /// (command, input) pairs for every command that received input
    pub fn inputs(&self) -> Vec<(String, String)> {
        self.inputs.borrow().clone()
    }

    /// Every command issued so far, shell-joined
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, argv: &[String], input: Option<&[u8]>) -> Result<CommandOutput> {
        let command = shell_words::join(argv);
        self.calls.borrow_mut().push(command.clone());
        let expectation = self
            .expected
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected command: {}", command));
        assert_eq!(argv, expectation.argv.as_slice(), "command mismatch");
        if let Some(input) = input {
            self.inputs
                .borrow_mut()
                .push((command, String::from_utf8_lossy(input).into_owned()));
        }
        match expectation.reply {
            Reply::Output(output) => Ok(output),
            Reply::Unreachable(message) => Err(Error::Connectivity {
                target: "jailhost".to_string(),
                message,
            }),
        }
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a subscriber that records info-and-above messages
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_max_level(tracing::Level::INFO)
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().unwrap().clone();
    let lines = String::from_utf8_lossy(&bytes)
        .lines()
        .map(|line| line.trim_end().to_string())
        .collect();
    (result, lines)
}

/// A row of fake `ezjail-admin list` output
pub struct ListRow<'a> {
    pub name: &'a str,
    pub status: &'a str,
    pub jid: &'a str,
    pub ip: &'a str,
}

impl<'a> ListRow<'a> {
    pub fn new(name: &'a str, status: &'a str, ip: &'a str) -> Self {
        let jid = if status.ends_with('R') { "3" } else { "N/A" };
        Self { name, status, jid, ip }
    }
}

/// Render list output in the column layout ezjail-admin uses
pub fn ezjail_list(rows: &[ListRow]) -> String {
    let mut lines = vec![
        "STA JID  IP              Hostname                       Root Directory".to_string(),
        "--- ---- --------------- ------------------------------ ------------------------".to_string(),
    ];
    for row in rows {
        lines.push(format!(
            "{:<3} {:<4} {:<15} {:<30} /usr/jails/{}",
            row.status, row.jid, row.ip, row.name, row.name
        ));
    }
    lines.join("\n")
}
