use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;

use super::ScpiTransport;
use crate::error::{Error, Result};

/// Raw-socket SCPI, for LAN-GPIB bridges and bench simulators.
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    stream: TcpStream,
    peer: String,
}

impl TcpTransport {
    /// Connect and apply `timeout` to reads and writes
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;

        // Set read timeout to prevent hanging on a silent instrument
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let reader = BufReader::new(stream.try_clone()?);

        Ok(TcpTransport {
            reader,
            stream,
            peer,
        })
    }
}

impl ScpiTransport for TcpTransport {
    fn write(&mut self, command: &str) -> Result<()> {
        debug!("{} <- {}", self.peer, command);
        self.stream.write_all(format!("{}\n", command).as_bytes())?;
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;

        let mut response = String::new();
        let n = self.reader.read_line(&mut response)?;
        if n == 0 {
            return Err(Error::Instrument(format!(
                "connection to {} closed while waiting for '{}'",
                self.peer, command
            )));
        }
        let response = response.trim_end_matches(['\r', '\n']).to_string();
        debug!("{} -> {}", self.peer, response);
        Ok(response)
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn query_round_trip_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let mut received = Vec::new();
            while !received.ends_with(b"*IDN?\n") {
                let n = sock.read(&mut buf).unwrap();
                received.extend_from_slice(&buf[..n]);
            }
            sock.write_all(b"KEITHLEY INSTRUMENTS INC.,MODEL 2400\r\n")
                .unwrap();
            String::from_utf8(received).unwrap()
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(2)).unwrap();
        transport.write(":OUTP OFF").unwrap();
        let idn = transport.query("*IDN?").unwrap();
        assert_eq!(idn, "KEITHLEY INSTRUMENTS INC.,MODEL 2400");

        let received = server.join().unwrap();
        assert_eq!(received, ":OUTP OFF\n*IDN?\n");
    }
}
