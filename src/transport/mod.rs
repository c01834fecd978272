//! Line-oriented SCPI transports.
//!
//! A transport only moves command strings to the instrument and response
//! lines back. Everything Keithley specific lives in [`crate::keithley2400`].
//!
//! Supported resource strings:
//! - `GPIB0::25::INSTR` and other VISA addresses (needs the `visa` feature)
//! - `TCPIP0::192.168.1.50::5025::SOCKET` (raw socket)

use std::time::Duration;

use crate::error::{Error, Result};

pub mod mock;
pub mod tcp;
#[cfg(feature = "visa")]
pub mod visa;

pub use mock::MockTransport;
pub use tcp::TcpTransport;
#[cfg(feature = "visa")]
pub use visa::VisaTransport;

/// Blocking SCPI command/response channel.
pub trait ScpiTransport {
    /// Send a command without expecting a response.
    fn write(&mut self, command: &str) -> Result<()>;

    /// Send a query and return one response line without its terminator.
    fn query(&mut self, command: &str) -> Result<String>;

    /// Human readable address, used in log lines.
    fn describe(&self) -> String;
}

impl<T: ScpiTransport + ?Sized> ScpiTransport for Box<T> {
    fn write(&mut self, command: &str) -> Result<()> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String> {
        (**self).query(command)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Parsed form of a resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Socket { host: String, port: u16 },
    Visa(String),
}

impl Resource {
    pub fn parse(resource: &str) -> Result<Self> {
        let trimmed = resource.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidResource(resource.to_string()));
        }

        let parts: Vec<&str> = trimmed.split("::").collect();
        let is_socket = parts.len() == 4
            && parts[0].to_ascii_uppercase().starts_with("TCPIP")
            && parts[3].eq_ignore_ascii_case("SOCKET");
        if !is_socket {
            return Ok(Resource::Visa(trimmed.to_string()));
        }

        let port = parts[2]
            .parse::<u16>()
            .map_err(|_| Error::InvalidResource(resource.to_string()))?;
        if parts[1].is_empty() {
            return Err(Error::InvalidResource(resource.to_string()));
        }
        Ok(Resource::Socket {
            host: parts[1].to_string(),
            port,
        })
    }
}

/// Open the transport matching `resource`.
pub fn open(resource: &str, timeout: Duration) -> Result<Box<dyn ScpiTransport>> {
    match Resource::parse(resource)? {
        Resource::Socket { host, port } => {
            Ok(Box::new(TcpTransport::connect((host.as_str(), port), timeout)?))
        }
        #[cfg(feature = "visa")]
        Resource::Visa(address) => Ok(Box::new(VisaTransport::open(&address, timeout)?)),
        #[cfg(not(feature = "visa"))]
        Resource::Visa(_) => Err(Error::FeatureNotEnabled("visa".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpib_address_is_visa() {
        assert_eq!(
            Resource::parse("GPIB0::25::INSTR").unwrap(),
            Resource::Visa("GPIB0::25::INSTR".to_string())
        );
    }

    #[test]
    fn socket_address_is_tcp() {
        assert_eq!(
            Resource::parse("TCPIP0::192.168.1.50::5025::SOCKET").unwrap(),
            Resource::Socket {
                host: "192.168.1.50".to_string(),
                port: 5025
            }
        );
    }

    #[test]
    fn vxi11_address_stays_visa() {
        assert!(matches!(
            Resource::parse("TCPIP0::192.168.0.10::inst0::INSTR").unwrap(),
            Resource::Visa(_)
        ));
    }

    #[test]
    fn bad_socket_port_is_rejected() {
        assert!(matches!(
            Resource::parse("TCPIP0::host::notaport::SOCKET"),
            Err(Error::InvalidResource(_))
        ));
        assert!(Resource::parse("  ").is_err());
    }

    #[cfg(not(feature = "visa"))]
    #[test]
    fn visa_address_without_feature() {
        let err = open("GPIB0::25::INSTR", Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, Error::FeatureNotEnabled(ref f) if f == "visa"));
    }
}
