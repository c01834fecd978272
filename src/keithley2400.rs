//! Keithley 2400/2401 source-measure unit.
//!
//! Configuration as voltmeter only, as voltage source with current sensing
//! and as current source with voltage sensing. Every command returns a
//! `Result`, and each configuration sequence finishes by draining the
//! instrument error queue so a rejected setting surfaces immediately.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::ScpiTransport;

/// One `READ?` result in the default `:FORM:ELEM` order
/// (`volt,curr,res,time,status`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub voltage: f64,
    pub current: f64,
    pub resistance: Option<f64>,
    pub time: Option<f64>,
    pub status: Option<f64>,
}

impl Reading {
    /// Parse e.g. `+2.000812E+00,+9.910000E+37,+9.910000E+37,+7.408841E+03,+1.946000E+04`
    pub fn parse(response: &str) -> Result<Self> {
        let values = parse_values(response)?;
        if values.len() < 2 {
            return Err(Error::parse(
                response,
                format!("expected at least 2 values, got {}", values.len()),
            ));
        }
        Ok(Reading {
            voltage: values[0],
            current: values[1],
            resistance: values.get(2).copied(),
            time: values.get(3).copied(),
            status: values.get(4).copied(),
        })
    }
}

/// Split a comma separated ASCII response into floats.
pub fn parse_values(response: &str) -> Result<Vec<f64>> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(Error::parse(response, "empty response"));
    }
    trimmed
        .split(',')
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|e| Error::parse(response, format!("'{}': {}", field.trim(), e)))
        })
        .collect()
}

/// Source range and compliance for voltage sourcing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageSourceLimits {
    pub volt_source_range: f64,
    pub volt_limit: f64,
    pub curr_sense_range: f64,
    pub curr_limit: f64,
}

/// Source range and compliance for current sourcing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentSourceLimits {
    pub cur_source_range: f64,
    pub volt_sense_prot: f64,
    pub volt_sense_range: f64,
}

pub fn voltmeter_commands(volt_range: f64, nplc: f64, trigger_count: u32) -> Vec<String> {
    vec![
        "*RST".to_string(),
        ":SOUR:FUNC CURR".to_string(),
        ":SOUR:CURR:MODE FIX".to_string(),
        ":SOUR:CURR:RANGE:AUTO ON".to_string(),
        ":SOUR:CURR:LEV 0".to_string(),
        ":SENS:FUNC \"VOLT\"".to_string(),
        format!(":SENS:VOLT:PROT {}", volt_range),
        format!(":SENS:VOLT:RANG {}", volt_range),
        format!(":SENS:VOLT:NPLC {}", nplc),
        format!(":TRIG:COUN {}", trigger_count),
    ]
}

pub fn voltage_source_commands(limits: &VoltageSourceLimits, trigger_count: u32) -> Vec<String> {
    vec![
        "*RST".to_string(),
        ":SOUR:FUNC VOLT".to_string(),
        ":SOUR:VOLT:MODE FIX".to_string(),
        format!(":SENS:VOLT:PROT {}", limits.volt_limit),
        format!(":SOUR:VOLT:RANG {}", limits.volt_source_range),
        ":SOUR:VOLT:LEV 0".to_string(),
        ":SENS:FUNC \"CURR\"".to_string(),
        format!(":SENS:CURR:PROT {}", limits.curr_limit),
        format!(":SENS:CURR:RANG {}", limits.curr_sense_range),
        format!(":TRIG:COUN {}", trigger_count),
    ]
}

pub fn current_source_commands(limits: &CurrentSourceLimits, trigger_count: u32) -> Vec<String> {
    vec![
        "*RST".to_string(),
        ":SOUR:FUNC CURR".to_string(),
        ":SOUR:CURR:MODE FIX".to_string(),
        format!(":SOUR:CURR:RANG {}", limits.cur_source_range),
        ":SOUR:CURR:LEV 0".to_string(),
        ":SENS:FUNC \"VOLT\"".to_string(),
        format!(":SENS:VOLT:PROT {}", limits.volt_sense_prot),
        format!(":SENS:VOLT:RANG {}", limits.volt_sense_range),
        format!(":TRIG:COUN {}", trigger_count),
    ]
}

// Depth of the 2400 error queue
const MAX_QUEUED_ERRORS: usize = 10;

pub struct Keithley2400<T: ScpiTransport> {
    transport: T,
    name: String,
    trigger_count: u32,
    nplc: f64,
    local_settle: Duration,
    output_enabled: bool,
    closed: bool,
}

impl<T: ScpiTransport> Keithley2400<T> {
    /// Take ownership of `transport`, clear the status and error queue, and
    /// verify the connection with `*IDN?`.
    pub fn open(transport: T) -> Result<Self> {
        let mut smu = Keithley2400 {
            name: transport.describe(),
            transport,
            trigger_count: 1,
            nplc: 1.0,
            local_settle: Duration::from_secs(1),
            output_enabled: false,
            closed: false,
        };
        // Errors left over from an earlier session would fail the next check
        smu.send_cmd("*CLS")?;
        let idn = smu.send_query("*IDN?")?;
        info!("{}: {}", smu.name, idn.trim());
        Ok(smu)
    }

    /// Delay after returning to local before the session is released.
    pub fn with_local_settle(mut self, settle: Duration) -> Self {
        self.local_settle = settle;
        self
    }

    pub fn with_nplc(mut self, nplc: f64) -> Self {
        self.nplc = nplc;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_output_enabled(&self) -> bool {
        self.output_enabled
    }

    pub fn send_cmd(&mut self, command: &str) -> Result<()> {
        self.transport.write(command)
    }

    pub fn send_query(&mut self, command: &str) -> Result<String> {
        self.transport.query(command)
    }

    /// Drain the error queue; the first non-zero entry becomes `Error::Instrument`.
    pub fn check_errors(&mut self) -> Result<()> {
        let mut first = None;
        for _ in 0..MAX_QUEUED_ERRORS {
            let response = self.send_query("SYSTem:ERRor?")?;
            let code = response
                .split(',')
                .next()
                .and_then(|c| c.trim().parse::<i32>().ok())
                .ok_or_else(|| Error::parse(&response, "expected '<code>,\"<message>\"'"))?;
            if code == 0 {
                break;
            }
            warn!("{}: {}", self.name, response.trim());
            first.get_or_insert(response);
        }
        match first {
            Some(response) => Err(Error::Instrument(format!("{}: {}", self.name, response.trim()))),
            None => Ok(()),
        }
    }

    fn run_sequence(&mut self, commands: Vec<String>) -> Result<()> {
        for command in &commands {
            self.send_cmd(command)?;
        }
        // *RST turns the output off
        self.output_enabled = false;
        self.check_errors()
    }

    pub fn config_voltmeter(&mut self, volt_range: f64) -> Result<()> {
        debug!("{}: voltmeter, range {} V", self.name, volt_range);
        self.run_sequence(voltmeter_commands(volt_range, self.nplc, self.trigger_count))
    }

    pub fn config_voltage_source(&mut self, limits: &VoltageSourceLimits) -> Result<()> {
        debug!("{}: voltage source {:?}", self.name, limits);
        self.run_sequence(voltage_source_commands(limits, self.trigger_count))
    }

    pub fn config_current_source(&mut self, limits: &CurrentSourceLimits) -> Result<()> {
        debug!("{}: current source {:?}", self.name, limits);
        self.run_sequence(current_source_commands(limits, self.trigger_count))
    }

    /// 4-wire sensing
    pub fn remote_sensing(&mut self, on: bool) -> Result<()> {
        self.send_cmd(if on { ":SYST:RSEN ON" } else { ":SYST:RSEN OFF" })
    }

    pub fn set_voltage(&mut self, voltage: f64) -> Result<()> {
        self.send_cmd(&format!(":SOUR:VOLT:LEV {}", voltage))
    }

    pub fn set_current(&mut self, current: f64) -> Result<()> {
        self.send_cmd(&format!(":SOUR:CURR:LEV {}", current))
    }

    pub fn output(&mut self, on: bool) -> Result<()> {
        self.send_cmd(if on { ":OUTP ON" } else { ":OUTP OFF" })?;
        self.output_enabled = on;
        info!("{}: source {}", self.name, if on { "ON" } else { "OFF" });
        Ok(())
    }

    pub fn measure(&mut self) -> Result<Reading> {
        let response = self.send_query("READ?")?;
        Reading::parse(&response)
    }

    /// `(current, voltage)` from one reading
    pub fn measure_iv(&mut self) -> Result<(f64, f64)> {
        let reading = self.measure()?;
        Ok((reading.current, reading.voltage))
    }

    pub fn measure_v(&mut self) -> Result<f64> {
        Ok(self.measure()?.voltage)
    }

    fn release(&mut self) -> Result<()> {
        self.closed = true;
        let output = if self.output_enabled {
            self.output(false)
        } else {
            Ok(())
        };
        // Back to front panel control even if the output command failed
        let local = self.send_cmd("SYST:LOC");
        thread::sleep(self.local_settle);
        output.and(local)
    }

    /// Disable the output if needed, return to local and release the session.
    pub fn close(mut self) -> Result<()> {
        let result = self.release();
        info!("{}: closed", self.name);
        result
    }
}

impl<T: ScpiTransport> Drop for Keithley2400<T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.release() {
            warn!("{}: shutdown on drop failed: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, MOCK_IDN};

    const READING: &str = "+2.000812E+00,+4.000000E-03,+9.910000E+37,+7.408841E+03,+1.946000E+04";

    fn smu(mock: MockTransport) -> Keithley2400<MockTransport> {
        Keithley2400::open(mock)
            .unwrap()
            .with_local_settle(Duration::ZERO)
    }

    #[test]
    fn parses_full_reading() {
        let r = Reading::parse(READING).unwrap();
        assert_eq!(r.voltage, 2.000812);
        assert_eq!(r.current, 4.0e-3);
        assert_eq!(r.resistance, Some(9.91e37));
        assert_eq!(r.time, Some(7408.841));
        assert_eq!(r.status, Some(19460.0));
    }

    #[test]
    fn short_or_garbled_reading_is_an_error() {
        assert!(matches!(Reading::parse("+1.0E+00"), Err(Error::Parse { .. })));
        assert!(matches!(Reading::parse(""), Err(Error::Parse { .. })));
        assert!(matches!(Reading::parse("+1.0E+00,abc"), Err(Error::Parse { .. })));
    }

    #[test]
    fn open_queries_identity() {
        let mock = MockTransport::new();
        let log = mock.call_log();
        let smu = smu(mock);
        assert_eq!(log.calls(), vec!["*CLS", "*IDN?"]);
        assert_eq!(smu.name(), "mock");
        assert!(MOCK_IDN.contains("2400"));
    }

    #[test]
    fn voltage_source_sequence() {
        let limits = VoltageSourceLimits {
            volt_source_range: 0.2,
            volt_limit: 0.2,
            curr_sense_range: 0.01,
            curr_limit: 0.01,
        };
        assert_eq!(
            voltage_source_commands(&limits, 1),
            vec![
                "*RST",
                ":SOUR:FUNC VOLT",
                ":SOUR:VOLT:MODE FIX",
                ":SENS:VOLT:PROT 0.2",
                ":SOUR:VOLT:RANG 0.2",
                ":SOUR:VOLT:LEV 0",
                ":SENS:FUNC \"CURR\"",
                ":SENS:CURR:PROT 0.01",
                ":SENS:CURR:RANG 0.01",
                ":TRIG:COUN 1",
            ]
        );
    }

    #[test]
    fn current_source_sequence_ends_with_error_check() {
        let mock = MockTransport::new();
        let log = mock.call_log();
        let mut smu = smu(mock);
        smu.config_current_source(&CurrentSourceLimits {
            cur_source_range: 0.11,
            volt_sense_prot: 3.0,
            volt_sense_range: 3.0,
        })
        .unwrap();

        let calls = log.calls();
        assert_eq!(calls[2], "*RST");
        assert!(calls.contains(&":SOUR:CURR:RANG 0.11".to_string()));
        assert!(calls.contains(&":SENS:VOLT:PROT 3".to_string()));
        assert_eq!(calls.last().unwrap(), "SYSTem:ERRor?");
    }

    #[test]
    fn voltmeter_sequence_uses_range_and_nplc() {
        let cmds = voltmeter_commands(5.0, 1.0, 1);
        assert!(cmds.contains(&":SENS:VOLT:PROT 5".to_string()));
        assert!(cmds.contains(&":SENS:VOLT:RANG 5".to_string()));
        assert!(cmds.contains(&":SENS:VOLT:NPLC 1".to_string()));
        assert!(cmds.contains(&":SOUR:CURR:RANGE:AUTO ON".to_string()));
    }

    #[test]
    fn instrument_error_is_reported() {
        let mock = MockTransport::new()
            .with_error_on(":SENS:VOLT:RANG 500", "-222,\"Data out of range\"");
        let mut smu = smu(mock);
        let err = smu.config_voltmeter(500.0).unwrap_err();
        assert!(matches!(err, Error::Instrument(ref m) if m.contains("-222")));
    }

    #[test]
    fn stale_error_from_earlier_session_is_cleared_on_open() {
        let mock = MockTransport::new().with_queued_error("-113,\"Undefined header\"");
        let log = mock.call_log();
        let mut smu = smu(mock);
        smu.config_voltage_source(&VoltageSourceLimits {
            volt_source_range: 0.2,
            volt_limit: 0.2,
            curr_sense_range: 0.01,
            curr_limit: 0.01,
        })
        .unwrap();
        assert_eq!(log.position("*CLS"), Some(0));
        assert_eq!(log.position("*IDN?"), Some(1));
    }

    #[test]
    fn error_queue_is_drained_and_first_entry_reported() {
        let mock = MockTransport::new()
            .with_error_on(":SENS:VOLT:PROT 500", "-222,\"Data out of range\"")
            .with_error_on(":SENS:VOLT:RANG 500", "-221,\"Settings conflict\"");
        let log = mock.call_log();
        let mut smu = smu(mock);

        let err = smu.config_voltmeter(500.0).unwrap_err();
        assert!(matches!(err, Error::Instrument(ref m) if m.contains("-222")));
        assert_eq!(log.count("SYSTem:ERRor?"), 3);

        // nothing carries over into the next configuration
        smu.config_voltmeter(5.0).unwrap();
    }

    #[test]
    fn measure_iv_swaps_columns() {
        let mut smu = smu(MockTransport::new().with_response("READ?", READING));
        let (i, v) = smu.measure_iv().unwrap();
        assert_eq!(i, 4.0e-3);
        assert_eq!(v, 2.000812);
    }

    #[test]
    fn read_failure_propagates() {
        let mut smu = smu(MockTransport::new().failing_on("READ?"));
        assert!(matches!(smu.measure(), Err(Error::Io(_))));
    }

    #[test]
    fn close_disables_output_then_goes_local() {
        let mock = MockTransport::new();
        let log = mock.call_log();
        let mut smu = smu(mock);
        smu.set_voltage(1.5).unwrap();
        smu.output(true).unwrap();
        assert!(smu.is_output_enabled());
        smu.close().unwrap();

        assert_eq!(
            log.calls(),
            vec!["*CLS", "*IDN?", ":SOUR:VOLT:LEV 1.5", ":OUTP ON", ":OUTP OFF", "SYST:LOC"]
        );
    }

    #[test]
    fn close_still_goes_local_when_output_off_fails() {
        let mock = MockTransport::new().failing_on(":OUTP OFF");
        let log = mock.call_log();
        let mut smu = smu(mock);
        smu.output(true).unwrap();
        assert!(smu.close().is_err());
        assert_eq!(log.count("SYST:LOC"), 1);
    }

    #[test]
    fn drop_releases_unclosed_session() {
        let mock = MockTransport::new();
        let log = mock.call_log();
        {
            let mut smu = smu(mock);
            smu.output(true).unwrap();
        }
        assert_eq!(log.count(":OUTP OFF"), 1);
        assert_eq!(log.count("SYST:LOC"), 1);
    }

    #[test]
    fn closed_session_is_not_released_twice() {
        let mock = MockTransport::new();
        let log = mock.call_log();
        smu(mock).close().unwrap();
        assert_eq!(log.count("SYST:LOC"), 1);
        assert_eq!(log.count(":OUTP OFF"), 0);
    }
}
