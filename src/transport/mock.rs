//! Scripted transport for exercising the driver and sweeps without hardware.
//!
//! Every command written or queried is appended to a shared [`CallLog`], so a
//! test can hand the transport to a driver and still inspect the traffic.
//!
//! # Example
//!
//! ```
//! use microheater_iv::transport::{MockTransport, ScpiTransport};
//!
//! let mut mock = MockTransport::new().with_response("READ?", "+1.0E+00,+2.0E-03");
//! let log = mock.call_log();
//! assert_eq!(mock.query("READ?").unwrap(), "+1.0E+00,+2.0E-03");
//! assert_eq!(log.count("READ?"), 1);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::ScpiTransport;
use crate::error::{Error, Result};

pub const MOCK_IDN: &str = "KEITHLEY INSTRUMENTS INC.,MODEL 2400,MOCK,C30";
pub const NO_ERROR: &str = "0,\"No error\"";

/// Shared record of every command sent through a [`MockTransport`].
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, command: &str) {
        self.lock().push(command.to_string());
    }

    /// Copy of all commands in issue order
    pub fn calls(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Number of times `command` was sent
    pub fn count(&self, command: &str) -> usize {
        self.lock().iter().filter(|c| c.as_str() == command).count()
    }

    /// Position of the first occurrence of `command`
    pub fn position(&self, command: &str) -> Option<usize> {
        self.lock().iter().position(|c| c.as_str() == command)
    }

    /// Position of the last occurrence of `command`
    pub fn last_position(&self, command: &str) -> Option<usize> {
        self.lock().iter().rposition(|c| c.as_str() == command)
    }
}

/// Answers `SYSTem:ERRor?` from a simulated error queue that `*CLS` empties.
#[derive(Default)]
pub struct MockTransport {
    responses: HashMap<String, VecDeque<String>>,
    failing: HashSet<String>,
    errors: VecDeque<String>,
    errors_on: HashMap<String, String>,
    log: CallLog,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for `command`; responses are consumed in order.
    pub fn with_response(mut self, command: &str, response: &str) -> Self {
        self.responses
            .entry(command.to_string())
            .or_default()
            .push_back(response.to_string());
        self
    }

    /// Queue several responses for `command`.
    pub fn with_responses<'a>(
        mut self,
        command: &str,
        responses: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        for response in responses {
            self = self.with_response(command, response);
        }
        self
    }

    /// Leave `entry` in the error queue before the session starts.
    pub fn with_queued_error(mut self, entry: &str) -> Self {
        self.errors.push_back(entry.to_string());
        self
    }

    /// Queue `entry` each time `command` is received.
    pub fn with_error_on(mut self, command: &str, entry: &str) -> Self {
        self.errors_on.insert(command.to_string(), entry.to_string());
        self
    }

    /// Make every write or query of `command` fail with an I/O timeout.
    pub fn failing_on(mut self, command: &str) -> Self {
        self.failing.insert(command.to_string());
        self
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    fn receive(&mut self, command: &str) -> Result<()> {
        self.log.push(command);
        self.check_failure(command)?;
        if command == "*CLS" {
            self.errors.clear();
        }
        if let Some(entry) = self.errors_on.get(command) {
            self.errors.push_back(entry.clone());
        }
        Ok(())
    }

    fn check_failure(&self, command: &str) -> Result<()> {
        if self.failing.contains(command) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("mock timeout on '{}'", command),
            )));
        }
        Ok(())
    }
}

impl ScpiTransport for MockTransport {
    fn write(&mut self, command: &str) -> Result<()> {
        self.receive(command)
    }

    fn query(&mut self, command: &str) -> Result<String> {
        self.receive(command)?;
        if command == "SYSTem:ERRor?" {
            return Ok(self.errors.pop_front().unwrap_or_else(|| NO_ERROR.to_string()));
        }

        if let Some(response) = self
            .responses
            .get_mut(command)
            .and_then(|queue| queue.pop_front())
        {
            return Ok(response);
        }
        match command {
            "*IDN?" => Ok(MOCK_IDN.to_string()),
            _ => Err(Error::Instrument(format!(
                "no scripted response for '{}'",
                command
            ))),
        }
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
