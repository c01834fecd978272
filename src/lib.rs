//! Electrical and optical characterization of microheater devices with a
//! Keithley 2400/2401 source-measure unit.
//!
//! The pattern is the same for every run: open a session, configure the
//! SMU, warm up at a low setpoint and take a baseline reading, sweep the
//! setpoints appending one CSV row per step, then disable the output and
//! close the session.
//!
//! ```no_run
//! use microheater_iv::config::IvConfig;
//! use microheater_iv::datalog::{Layout, MeasurementLog};
//! use microheater_iv::experiment::IvSweep;
//! use microheater_iv::keithley2400::Keithley2400;
//! use microheater_iv::transport;
//! use std::time::Duration;
//!
//! # fn main() -> microheater_iv::Result<()> {
//! let config = IvConfig::default();
//! let link = transport::open("TCPIP0::10.0.0.7::5025::SOCKET", Duration::from_secs(2))?;
//! let smu = Keithley2400::open(link)?;
//! let mut log = MeasurementLog::append_to(&config.output, Layout::VoltageSweep)?;
//! let summary = IvSweep::new(smu, config).run(&mut log)?;
//! println!("{} rows", summary.rows);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod datalog;
pub mod error;
pub mod experiment;
pub mod keithley2400;
pub mod measurement;
pub mod sweep;
pub mod thermal;
pub mod transport;

pub use error::{Error, Result};
