//! Error type shared by the driver, the data log and the sweep controller.

use thiserror::Error;

use crate::experiment::Phase;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "visa")]
    #[error("VISA error: {0}")]
    Visa(#[from] visa_rs::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Failed to parse instrument response '{response}': {reason}")]
    Parse { response: String, reason: String },

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Invalid sweep: {0}")]
    InvalidSweep(String),

    #[error("Invalid resource string '{0}'")]
    InvalidResource(String),

    #[error("Open circuit during {phase}: measured {current:e} A below floor {floor:e} A")]
    OpenCircuit { current: f64, floor: f64, phase: Phase },

    #[error("Record layout {record} does not match log layout {log}")]
    LayoutMismatch { record: &'static str, log: &'static str },

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl Error {
    pub(crate) fn parse(response: &str, reason: impl Into<String>) -> Self {
        Error::Parse {
            response: response.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the open-circuit interlock, which the CLI answers with an alert.
    pub fn is_open_circuit(&self) -> bool {
        matches!(self, Error::OpenCircuit { .. })
    }
}
