//! Jail state machine
//!
//! The logical state of a jail is derived from the status code in the jail
//! list. A dynamic state machine seeded from that observation guards the
//! mutating admin calls issued by the instance operations.

use crate::error::Error;
use crate::jail::types::JailList;
use std::fmt;

use state_machines::state_machine;

state_machine! {
    name: EzjailMachine,
    dynamic: true,
    initial: Unavailable,
    states: [Unavailable, Stopped, Running],
    events {
        create {
            transition: { from: Unavailable, to: Stopped }
        }
        start {
            transition: { from: Stopped, to: Running }
        }
        stop {
            transition: { from: Running, to: Stopped }
        }
        delete {
            transition: { from: Stopped, to: Unavailable }
        }
    }
}

/// Logical state of a jail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JailState {
    Unavailable,
    Stopped,
    Running,
}

impl JailState {
    fn from_machine(s: &str) -> crate::error::Result<Self> {
        match s {
            "Unavailable" => Ok(JailState::Unavailable),
            "Stopped" => Ok(JailState::Stopped),
            "Running" => Ok(JailState::Running),
            other => Err(Error::StateMachine(format!("Unknown machine state '{}'", other))),
        }
    }
}

impl fmt::Display for JailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JailState::Unavailable => "unavailable",
            JailState::Stopped => "stopped",
            JailState::Running => "running",
        };
        f.pad(s)
    }
}

/// Map a two character status code to a logical state.
///
/// The first character is the jail type (`D`, `I`, `E`, `B`, `Z`), the second
/// is `R` (running), `S` (stopped) or `A` (attached/mounted). Mounted but not
/// running jails are refused.
pub fn state_from_code(code: &str, jail: &str) -> crate::error::Result<JailState> {
    let chars: Vec<char> = code.chars().collect();
    let invalid = || Error::StateMachine(format!("Invalid jail status '{}' for '{}'", code, jail));

    if chars.len() != 2 || !"DIEBZ".contains(chars[0]) {
        return Err(invalid());
    }

    match chars[1] {
        'R' => Ok(JailState::Running),
        'S' => Ok(JailState::Stopped),
        'A' => Err(Error::StateMachine(format!(
            "Don't know how to handle mounted but not running jail '{}'",
            jail
        ))),
        _ => Err(invalid()),
    }
}

/// Logical state of `jail` within a freshly fetched list
pub fn derive_state(jails: &JailList, jail: &str) -> crate::error::Result<JailState> {
    match jails.get(jail) {
        None => Ok(JailState::Unavailable),
        Some(entry) => state_from_code(&entry.status, jail),
    }
}

/// Lifecycle of one jail, replayed from an observed state
pub struct Lifecycle {
    jail: String,
    machine: DynamicEzjailMachine<()>,
}

impl Lifecycle {
    /// Build a machine positioned at `state`
    pub fn observed(jail: &str, state: JailState) -> crate::error::Result<Self> {
        let mut lifecycle = Self {
            jail: jail.to_string(),
            machine: EzjailMachine::new(()).into_dynamic(),
        };
        if state != JailState::Unavailable {
            lifecycle.create()?;
        }
        if state == JailState::Running {
            lifecycle.start()?;
        }
        if lifecycle.state()? != state {
            return Err(Error::StateMachine(format!(
                "Couldn't replay state {} for jail '{}'",
                state, jail
            )));
        }
        Ok(lifecycle)
    }

    pub fn state(&self) -> crate::error::Result<JailState> {
        JailState::from_machine(self.machine.current_state())
    }

    pub fn create(&mut self) -> crate::error::Result<()> {
        self.fire(EzjailMachineEvent::Create, "create")
    }

    pub fn start(&mut self) -> crate::error::Result<()> {
        self.fire(EzjailMachineEvent::Start, "start")
    }

    pub fn stop(&mut self) -> crate::error::Result<()> {
        self.fire(EzjailMachineEvent::Stop, "stop")
    }

    pub fn delete(&mut self) -> crate::error::Result<()> {
        self.fire(EzjailMachineEvent::Delete, "delete")
    }

    fn fire(&mut self, event: EzjailMachineEvent, name: &str) -> crate::error::Result<()> {
        let from = self.machine.current_state().to_string();
        self.machine.handle(event).map_err(|e| {
            Error::StateMachine(format!(
                "Can't {} jail '{}' in state {}: {:?}",
                name, self.jail, from, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jail::listing::ListParser;
    use crate::testing::{ListRow, ezjail_list};

    #[test]
    fn test_state_codes() {
        for kind in ['D', 'I', 'E', 'B', 'Z'] {
            let running = format!("{}R", kind);
            let stopped = format!("{}S", kind);
            let attached = format!("{}A", kind);
            assert_eq!(state_from_code(&running, "foo").unwrap(), JailState::Running);
            assert_eq!(state_from_code(&stopped, "foo").unwrap(), JailState::Stopped);
            assert!(matches!(
                state_from_code(&attached, "foo"),
                Err(Error::StateMachine(_))
            ));
        }
    }

    #[test]
    fn test_invalid_state_codes() {
        for code in ["", "Z", "ZRS", "XR", "ZX", "zr", "RZ"] {
            assert!(
                matches!(state_from_code(code, "foo"), Err(Error::StateMachine(_))),
                "code {:?} should be rejected",
                code
            );
        }
    }

    #[test]
    fn test_mounted_message() {
        match state_from_code("ZA", "foo") {
            Err(Error::StateMachine(msg)) => assert!(msg.contains("mounted but not running")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_derive_state() {
        let output = ezjail_list(&[
            ListRow::new("foo", "ZR", "10.0.0.1"),
            ListRow::new("bar", "ZS", "10.0.0.2"),
        ]);
        let jails = ListParser::new().parse(&output).unwrap();
        assert_eq!(derive_state(&jails, "foo").unwrap(), JailState::Running);
        assert_eq!(derive_state(&jails, "bar").unwrap(), JailState::Stopped);
        assert_eq!(derive_state(&jails, "ham").unwrap(), JailState::Unavailable);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(JailState::Unavailable.to_string(), "unavailable");
        assert_eq!(format!("{:<8}|", JailState::Running), "running |");
    }

    #[test]
    fn test_full_lifecycle() {
        let mut lifecycle = Lifecycle::observed("foo", JailState::Unavailable).unwrap();
        lifecycle.create().unwrap();
        assert_eq!(lifecycle.state().unwrap(), JailState::Stopped);
        lifecycle.start().unwrap();
        assert_eq!(lifecycle.state().unwrap(), JailState::Running);
        lifecycle.stop().unwrap();
        lifecycle.delete().unwrap();
        assert_eq!(lifecycle.state().unwrap(), JailState::Unavailable);
    }

    #[test]
    fn test_observed_running() {
        let mut lifecycle = Lifecycle::observed("foo", JailState::Running).unwrap();
        assert_eq!(lifecycle.state().unwrap(), JailState::Running);
        assert!(matches!(lifecycle.delete(), Err(Error::StateMachine(_))));
        assert!(matches!(lifecycle.start(), Err(Error::StateMachine(_))));
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let mut lifecycle = Lifecycle::observed("foo", JailState::Stopped).unwrap();
        assert!(lifecycle.stop().is_err());
        assert_eq!(lifecycle.state().unwrap(), JailState::Stopped);
    }
}
