//! Sweep controllers.
//!
//! Every run goes through the same two phases: WARMUP applies a low setpoint,
//! enables the output and takes one baseline reading, then SWEEP steps
//! through the setpoints, logging one row per step. Whatever happens in
//! between, the output is disabled and every session closed before `run`
//! returns.

use std::fmt;
use std::io::Write;
use std::thread;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{HeaterConfig, IvConfig};
use crate::datalog::{Layout, MeasurementLog, Record};
use crate::error::{Error, Result};
use crate::keithley2400::Keithley2400;
use crate::measurement::Sample;
use crate::transport::ScpiTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    Sweep,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Warmup => write!(f, "warmup"),
            Phase::Sweep => write!(f, "sweep"),
        }
    }
}

/// Open-circuit policy: a current below `floor_a` aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Interlock {
    pub floor_a: Option<f64>,
}

impl Interlock {
    pub fn disabled() -> Self {
        Interlock { floor_a: None }
    }

    pub fn open_circuit(floor_a: f64) -> Self {
        Interlock {
            floor_a: Some(floor_a),
        }
    }

    pub fn check(&self, sample: &Sample, phase: Phase) -> Result<()> {
        match self.floor_a {
            Some(floor) if sample.current < floor => Err(Error::OpenCircuit {
                current: sample.current,
                floor,
                phase,
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Rows appended, baseline included
    pub rows: usize,
    pub ambient: Sample,
    /// Optical reading at ambient, subtracted from every emission value
    pub optical_baseline: Option<f64>,
}

/// Keep the run's own error; shutdown failures are logged and only reported
/// when the run itself succeeded.
fn finish<R>(result: Result<R>, shutdown: Vec<Result<()>>) -> Result<R> {
    let mut first = None;
    for outcome in shutdown {
        if let Err(e) = outcome {
            warn!("Shutdown failed: {}", e);
            first.get_or_insert(e);
        }
    }
    match (result, first) {
        (Err(e), _) => Err(e),
        (Ok(_), Some(e)) => Err(e),
        (Ok(value), None) => Ok(value),
    }
}

/// Voltage-sourced IV sweep.
///
/// The baseline reading is taken on the low ranges with `baseline_voltage`
/// applied; the instrument is then reconfigured for the sweep ranges.
pub struct IvSweep<T: ScpiTransport> {
    smu: Keithley2400<T>,
    config: IvConfig,
}

impl<T: ScpiTransport> IvSweep<T> {
    pub fn new(smu: Keithley2400<T>, config: IvConfig) -> Self {
        IvSweep { smu, config }
    }

    pub fn run<W: Write>(mut self, log: &mut MeasurementLog<W>) -> Result<RunSummary> {
        let result = self.execute(log);
        let IvSweep { smu, .. } = self;
        finish(result, vec![smu.close()])
    }

    fn execute<W: Write>(&mut self, log: &mut MeasurementLog<W>) -> Result<RunSummary> {
        if log.layout() != Layout::VoltageSweep {
            return Err(Error::LayoutMismatch {
                record: Layout::VoltageSweep.name(),
                log: log.layout().name(),
            });
        }
        let setpoints = self.config.sweep.setpoints()?;
        let cfg = &self.config;
        let smu = &mut self.smu;
        let start_rows = log.rows();

        info!("Phase: {}", Phase::Warmup);
        smu.config_voltage_source(&cfg.baseline_limits)?;
        smu.remote_sensing(cfg.remote_sense)?;
        smu.set_voltage(cfg.baseline_voltage)?;
        smu.output(true)?;
        thread::sleep(cfg.warmup());
        let ambient = capture_iv(smu, cfg, log, Phase::Warmup)?;

        info!("Phase: {} ({} setpoints)", Phase::Sweep, setpoints.len());
        // *RST inside the sequence also clears remote sensing
        smu.config_voltage_source(&cfg.sweep_limits)?;
        smu.remote_sensing(cfg.remote_sense)?;
        for voltage in setpoints {
            info!("Setting voltage = {}", voltage);
            smu.set_voltage(voltage)?;
            if !smu.is_output_enabled() {
                smu.output(true)?;
            }
            thread::sleep(cfg.settle());
            capture_iv(smu, cfg, log, Phase::Sweep)?;
        }

        Ok(RunSummary {
            rows: log.rows() - start_rows,
            ambient,
            optical_baseline: None,
        })
    }
}

fn capture_iv<T: ScpiTransport, W: Write>(
    smu: &mut Keithley2400<T>,
    cfg: &IvConfig,
    log: &mut MeasurementLog<W>,
    phase: Phase,
) -> Result<Sample> {
    let (current, voltage) = smu.measure_iv()?;
    let sample = Sample::new(voltage, current);
    cfg.interlock.check(&sample, phase)?;
    log.append(&Record::VoltageSweep(sample))?;
    info!(
        "V = {} V, I = {} A, R = {} Ohm, P = {} W",
        sample.voltage,
        sample.current,
        sample.resistance(),
        sample.power()
    );
    Ok(sample)
}

/// Current-sourced heater sweep with temperature from the configured thermal
/// model. With an optical SMU attached, each row also carries the detector
/// voltage relative to its reading at ambient current.
pub struct HeaterSweep<T: ScpiTransport> {
    electrical: Keithley2400<T>,
    optical: Option<Keithley2400<T>>,
    config: HeaterConfig,
}

impl<T: ScpiTransport> HeaterSweep<T> {
    pub fn new(electrical: Keithley2400<T>, config: HeaterConfig) -> Self {
        HeaterSweep {
            electrical,
            optical: None,
            config,
        }
    }

    pub fn with_optical(mut self, optical: Keithley2400<T>) -> Self {
        self.optical = Some(optical);
        self
    }

    /// Log layout this run writes
    pub fn layout(&self) -> Layout {
        if self.optical.is_some() {
            Layout::HeaterEmission
        } else {
            Layout::HeaterIv
        }
    }

    pub fn run<W: Write>(mut self, log: &mut MeasurementLog<W>) -> Result<RunSummary> {
        let result = self.execute(log);
        let HeaterSweep {
            electrical,
            optical,
            ..
        } = self;
        let mut shutdown = vec![electrical.close()];
        if let Some(optical) = optical {
            shutdown.push(optical.close());
        }
        finish(result, shutdown)
    }

    fn execute<W: Write>(&mut self, log: &mut MeasurementLog<W>) -> Result<RunSummary> {
        let layout = self.layout();
        if log.layout() != layout {
            return Err(Error::LayoutMismatch {
                record: layout.name(),
                log: log.layout().name(),
            });
        }
        let setpoints = self.config.sweep.setpoints()?;
        let cfg = &self.config;
        let smu = &mut self.electrical;
        let start_rows = log.rows();

        smu.config_current_source(&cfg.source_limits())?;
        smu.remote_sensing(cfg.remote_sense)?;
        if let Some(optical) = self.optical.as_mut() {
            optical.config_voltmeter(cfg.optical_range)?;
        }

        info!("Phase: {}", Phase::Warmup);
        smu.set_current(cfg.ambient_ma * 1e-3)?;
        smu.output(true)?;
        if let Some(optical) = self.optical.as_mut() {
            optical.output(true)?;
        }
        thread::sleep(cfg.settle());

        let (i_amb, v_amb) = smu.measure_iv()?;
        let ambient = Sample::new(v_amb, i_amb);
        cfg.interlock.check(&ambient, Phase::Warmup)?;
        let optical_baseline = match self.optical.as_mut() {
            Some(optical) => Some(optical.measure_v()?),
            None => None,
        };
        info!(
            "Ambient: I = {} A, V = {} V, R = {} Ohm",
            ambient.current,
            ambient.voltage,
            ambient.resistance()
        );

        info!("Phase: {} ({} setpoints)", Phase::Sweep, setpoints.len());
        for set_ma in setpoints {
            smu.set_current(set_ma * 1e-3)?;
            info!("Current = {:.1} mA", set_ma);
            thread::sleep(cfg.settle());

            let (current, voltage) = smu.measure_iv()?;
            let sample = Sample::new(voltage, current);
            cfg.interlock.check(&sample, Phase::Sweep)?;
            let temperature = cfg.thermal.temperature(&ambient, &sample);
            if temperature.is_nan() {
                warn!("R = {} Ohm is outside the thermal model", sample.resistance());
            }

            let record = match (self.optical.as_mut(), optical_baseline) {
                (Some(optical), Some(baseline)) => Record::HeaterEmission {
                    sample,
                    temperature,
                    emission: optical.measure_v()? - baseline,
                },
                _ => Record::HeaterIv {
                    sample,
                    temperature,
                },
            };
            log.append(&record)?;
        }

        Ok(RunSummary {
            rows: log.rows() - start_rows,
            ambient,
            optical_baseline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interlock_trips_below_floor() {
        let lock = Interlock::open_circuit(1e-4);
        assert!(lock.check(&Sample::new(0.05, 5e-3), Phase::Warmup).is_ok());
        let err = lock.check(&Sample::new(0.05, 2e-5), Phase::Sweep).unwrap_err();
        assert!(matches!(
            err,
            Error::OpenCircuit { phase: Phase::Sweep, floor, .. } if floor == 1e-4
        ));
        assert!(err.is_open_circuit());
    }

    #[test]
    fn disabled_interlock_never_trips() {
        let lock = Interlock::disabled();
        assert!(lock.check(&Sample::new(1.0, 0.0), Phase::Sweep).is_ok());
    }

    #[test]
    fn run_error_wins_over_shutdown_error() {
        let run: Result<()> = Err(Error::InvalidSweep("run".into()));
        let shutdown = vec![Err(Error::Instrument("close".into()))];
        assert!(matches!(finish(run, shutdown), Err(Error::InvalidSweep(_))));

        let shutdown = vec![Ok(()), Err(Error::Instrument("close".into()))];
        assert!(matches!(finish(Ok(1), shutdown), Err(Error::Instrument(_))));
        assert_eq!(finish(Ok(1), vec![Ok(())]).unwrap(), 1);
    }
}
