//! Run configuration.
//!
//! Loaded from an optional TOML file; any table or field left out keeps the
//! bench default below. See `config/microheater.toml` for a full example.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::experiment::Interlock;
use crate::keithley2400::{CurrentSourceLimits, VoltageSourceLimits};
use crate::sweep::Sweep;
use crate::thermal::ThermalModel;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub instrument: InstrumentConfig,
    pub iv: IvConfig,
    pub heater: HeaterConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Electrical SMU
    pub resource: String,
    /// Second SMU reading the optical detector, if any
    pub optical_resource: Option<String>,
    pub timeout_ms: u64,
    /// Integration time in power line cycles for voltmeter mode
    pub nplc: f64,
    /// Delay after returning the instrument to local
    pub local_settle_ms: u64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        InstrumentConfig {
            resource: "GPIB0::25::INSTR".to_string(),
            optical_resource: None,
            timeout_ms: 2000,
            nplc: 1.0,
            local_settle_ms: 1000,
        }
    }
}

impl InstrumentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn local_settle(&self) -> Duration {
        Duration::from_millis(self.local_settle_ms)
    }
}

/// Voltage-sourced IV sweep with open-circuit interlock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvConfig {
    pub output: PathBuf,
    /// Setpoint for the warmup reading, in V
    pub baseline_voltage: f64,
    pub baseline_limits: VoltageSourceLimits,
    pub sweep_limits: VoltageSourceLimits,
    /// Setpoints in V
    pub sweep: Sweep,
    /// 4-wire sensing for the baseline and, set again after the sweep-range reset, the sweep
    pub remote_sense: bool,
    pub warmup_ms: u64,
    pub settle_ms: u64,
    pub interlock: Interlock,
}

impl Default for IvConfig {
    fn default() -> Self {
        IvConfig {
            output: PathBuf::from("iv_sweep.csv"),
            baseline_voltage: 0.05,
            baseline_limits: VoltageSourceLimits {
                volt_source_range: 0.2,
                volt_limit: 0.2,
                curr_sense_range: 0.01,
                curr_limit: 0.01,
            },
            sweep_limits: VoltageSourceLimits {
                volt_source_range: 10.0,
                volt_limit: 10.0,
                curr_sense_range: 1.0,
                curr_limit: 1.0,
            },
            sweep: Sweep::new(2.8, 10.0, 0.05),
            remote_sense: true,
            warmup_ms: 1000,
            settle_ms: 500,
            interlock: Interlock::open_circuit(1e-4),
        }
    }
}

impl IvConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Current-sourced heater sweep, optionally with emission readout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaterConfig {
    pub output: PathBuf,
    /// Warmup current in mA
    pub ambient_ma: f64,
    /// Setpoints in mA
    pub sweep: Sweep,
    /// Voltage compliance and sense range in V
    pub voltage_limit: f64,
    pub remote_sense: bool,
    pub settle_ms: u64,
    /// Voltmeter range of the optical SMU in V
    pub optical_range: f64,
    pub thermal: ThermalModel,
    pub interlock: Interlock,
}

impl Default for HeaterConfig {
    fn default() -> Self {
        HeaterConfig {
            output: PathBuf::from("heater_iv.csv"),
            ambient_ma: 3.0,
            sweep: Sweep::new(3.0, 110.0, 1.0),
            voltage_limit: 3.0,
            remote_sense: true,
            settle_ms: 500,
            optical_range: 5.0,
            thermal: ThermalModel::default(),
            interlock: Interlock::disabled(),
        }
    }
}

impl HeaterConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Source range covering the whole sweep, in A
    pub fn source_limits(&self) -> CurrentSourceLimits {
        CurrentSourceLimits {
            cur_source_range: self.sweep.stop * 1e-3,
            volt_sense_prot: self.voltage_limit,
            volt_sense_range: self.voltage_limit,
        }
    }
}
