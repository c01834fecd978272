use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use log::debug;
use visa_rs::prelude::*;

use super::ScpiTransport;
use crate::error::{Error, Result};

pub fn io_to_vs_err(err: std::io::Error) -> visa_rs::Error {
    visa_rs::io_to_vs_err(err)
}

/// Session on a VISA resource such as `GPIB0::25::INSTR`.
///
/// Field order matters: the instrument session is closed before the
/// resource manager that opened it.
pub struct VisaTransport {
    instr: Instrument,
    _rm: DefaultRM,
    address: String,
}

impl VisaTransport {
    pub fn open(address: &str, timeout: Duration) -> Result<Self> {
        // Initialize the VISA resource manager
        let rm = DefaultRM::new()?;

        let resource_string =
            CString::new(address).map_err(|_| Error::InvalidResource(address.to_string()))?;

        // Open a session to the resource
        let instr = rm.open(&resource_string.into(), AccessMode::NO_LOCK, timeout)?;

        Ok(VisaTransport {
            instr,
            _rm: rm,
            address: address.to_string(),
        })
    }
}

impl ScpiTransport for VisaTransport {
    fn write(&mut self, command: &str) -> Result<()> {
        debug!("{} <- {}", self.address, command);
        self.instr
            .write_all(format!("{}\n", command).as_bytes())
            .map_err(io_to_vs_err)?;
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;

        let mut response = String::new();
        {
            // Scope the reader so it is dropped before the session is used again
            let mut reader = BufReader::new(&self.instr);
            reader.read_line(&mut response).map_err(io_to_vs_err)?;
        }
        let response = response.trim_end_matches(['\r', '\n']).to_string();
        debug!("{} -> {}", self.address, response);
        Ok(response)
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}
