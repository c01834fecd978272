//! Append-only CSV measurement log.
//!
//! One header line, then one row per sample, written and flushed as soon as
//! the sample is taken. The first column is always the local timestamp.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Local};
use log::info;

use crate::error::{Error, Result};
use crate::measurement::Sample;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    VoltageSweep,
    HeaterIv,
    HeaterEmission,
}

impl Layout {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            Layout::VoltageSweep => &["Timestamp", "V[V]", "I[A]", "R[Ohms]", "W[W]"],
            Layout::HeaterIv => &[
                "Timestamp",
                "Current[A]",
                "Voltage[V]",
                "Resistance[Ohms]",
                "Power[W]",
                "Temperature[°C]",
            ],
            Layout::HeaterEmission => &[
                "Timestamp",
                "Current[A]",
                "Voltage[V]",
                "Resistance[Ohms]",
                "Power[W]",
                "Temperature[°C]",
                "Emission[V]",
            ],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Layout::VoltageSweep => "voltage-sweep",
            Layout::HeaterIv => "heater-iv",
            Layout::HeaterEmission => "heater-emission",
        }
    }
}

/// One row of the log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Record {
    VoltageSweep(Sample),
    HeaterIv {
        sample: Sample,
        temperature: f64,
    },
    HeaterEmission {
        sample: Sample,
        temperature: f64,
        emission: f64,
    },
}

impl Record {
    pub fn layout(&self) -> Layout {
        match self {
            Record::VoltageSweep(_) => Layout::VoltageSweep,
            Record::HeaterIv { .. } => Layout::HeaterIv,
            Record::HeaterEmission { .. } => Layout::HeaterEmission,
        }
    }

    /// Fields in header order
    pub fn fields(&self) -> Vec<String> {
        match *self {
            Record::VoltageSweep(s) => vec![
                timestamp(&s.timestamp),
                s.voltage.to_string(),
                s.current.to_string(),
                s.resistance().to_string(),
                s.power().to_string(),
            ],
            Record::HeaterIv {
                sample: s,
                temperature,
            } => {
                let mut fields = heater_fields(&s);
                fields.push(temperature.to_string());
                fields
            }
            Record::HeaterEmission {
                sample: s,
                temperature,
                emission,
            } => {
                let mut fields = heater_fields(&s);
                fields.push(temperature.to_string());
                fields.push(emission.to_string());
                fields
            }
        }
    }
}

fn timestamp(t: &DateTime<Local>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

fn heater_fields(s: &Sample) -> Vec<String> {
    vec![
        timestamp(&s.timestamp),
        s.current.to_string(),
        s.voltage.to_string(),
        s.resistance().to_string(),
        s.power().to_string(),
    ]
}

pub struct MeasurementLog<W: Write> {
    writer: csv::Writer<W>,
    layout: Layout,
    rows: usize,
}

impl MeasurementLog<std::fs::File> {
    /// Open `path` for appending; the header is written only to an empty file.
    pub fn append_to<P: AsRef<Path>>(path: P, layout: Layout) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let fresh = file.metadata()?.len() == 0;

        let mut log = Self::from_writer(file, layout);
        if fresh {
            log.write_header()?;
        }
        info!("Logging {} rows to '{}'", layout.name(), path.display());
        Ok(log)
    }
}

impl<W: Write> MeasurementLog<W> {
    /// Wrap `writer` without writing anything yet.
    pub fn from_writer(writer: W, layout: Layout) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(writer);
        MeasurementLog {
            writer,
            layout,
            rows: 0,
        }
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.writer.write_record(self.layout.header())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn append(&mut self, record: &Record) -> Result<()> {
        if record.layout() != self.layout {
            return Err(Error::LayoutMismatch {
                record: record.layout().name(),
                log: self.layout.name(),
            });
        }
        self.writer.write_record(record.fields())?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Rows appended through this handle
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
    }
}
