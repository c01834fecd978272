//! CLI entry point.
//!
//! ```bash
//! microheater-iv --config config/microheater.toml iv --output chip1.csv
//! microheater-iv heater --optical GPIB0::26::INSTR --output chip83.csv
//! microheater-iv --resource GPIB0::25::INSTR idn
//! ```

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use microheater_iv::config::{Config, InstrumentConfig};
use microheater_iv::datalog::{Layout, MeasurementLog};
use microheater_iv::experiment::{HeaterSweep, Interlock, IvSweep};
use microheater_iv::keithley2400::Keithley2400;
use microheater_iv::transport::{self, ScpiTransport};

type Smu = Keithley2400<Box<dyn ScpiTransport>>;

#[derive(Parser)]
#[command(name = "microheater-iv")]
#[command(about = "Keithley 2400 IV and temperature sweeps for microheaters", long_about = None)]
struct Cli {
    /// TOML run configuration; bench defaults are used without it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Electrical SMU resource, e.g. GPIB0::25::INSTR
    #[arg(long, global = true)]
    resource: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Voltage-sourced IV sweep with open-circuit interlock
    Iv {
        /// CSV log, appended to
        #[arg(long)]
        output: Option<PathBuf>,

        /// Open-circuit current floor in A
        #[arg(long)]
        floor: Option<f64>,
    },

    /// Current-sourced heater sweep with temperature and optional emission
    Heater {
        /// CSV log, appended to
        #[arg(long)]
        output: Option<PathBuf>,

        /// Second SMU reading the optical detector
        #[arg(long)]
        optical: Option<String>,
    },

    /// Print the instrument identity and return it to local
    Idn,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(resource) = cli.resource {
        config.instrument.resource = resource;
    }

    let result = match cli.command {
        Commands::Iv { output, floor } => {
            if let Some(output) = output {
                config.iv.output = output;
            }
            if let Some(floor) = floor {
                config.iv.interlock = Interlock::open_circuit(floor);
            }
            run_iv(&config)
        }
        Commands::Heater { output, optical } => {
            if let Some(output) = output {
                config.heater.output = output;
            }
            if optical.is_some() {
                config.instrument.optical_resource = optical;
            }
            run_heater(&config)
        }
        Commands::Idn => idn(&config.instrument),
    };

    if let Err(e) = &result {
        if e
            .downcast_ref::<microheater_iv::Error>()
            .is_some_and(|e| e.is_open_circuit())
        {
            alert();
        }
    }
    result
}

fn open_smu(resource: &str, instrument: &InstrumentConfig) -> Result<Smu> {
    let link = transport::open(resource, instrument.timeout())
        .with_context(|| format!("Failed to open {}", resource))?;
    let smu = Keithley2400::open(link)
        .with_context(|| format!("No response from {}", resource))?;
    Ok(smu
        .with_local_settle(instrument.local_settle())
        .with_nplc(instrument.nplc))
}

fn run_iv(config: &Config) -> Result<()> {
    let smu = open_smu(&config.instrument.resource, &config.instrument)?;
    let mut log = MeasurementLog::append_to(&config.iv.output, Layout::VoltageSweep)?;

    let summary = IvSweep::new(smu, config.iv.clone())
        .run(&mut log)
        .context("IV sweep aborted")?;
    info!(
        "IV sweep complete: {} rows in {}",
        summary.rows,
        config.iv.output.display()
    );
    Ok(())
}

fn run_heater(config: &Config) -> Result<()> {
    let electrical = open_smu(&config.instrument.resource, &config.instrument)?;
    let mut sweep = HeaterSweep::new(electrical, config.heater.clone());
    if let Some(resource) = &config.instrument.optical_resource {
        sweep = sweep.with_optical(open_smu(resource, &config.instrument)?);
    }
    let mut log = MeasurementLog::append_to(&config.heater.output, sweep.layout())?;

    let summary = sweep.run(&mut log).context("Heater sweep aborted")?;
    info!(
        "Heater sweep complete: {} rows in {}, ambient R = {} Ohm",
        summary.rows,
        config.heater.output.display(),
        summary.ambient.resistance()
    );
    Ok(())
}

fn idn(instrument: &InstrumentConfig) -> Result<()> {
    let mut smu = open_smu(&instrument.resource, instrument)?;
    let identity = smu.send_query("*IDN?")?;
    println!("{}", identity.trim());
    smu.close()?;
    Ok(())
}

/// Terminal bell
fn alert() {
    let mut stderr = std::io::stderr();
    let _ = stderr.write_all(b"\x07");
    let _ = stderr.flush();
}
