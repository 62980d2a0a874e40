/**
 * Signal generator transport
 *
 * The dispatcher worker is the only owner of a `Session`. A session speaks
 * newline-terminated SCPI: `write` sends one line, `query` sends one line and
 * reads one line back. Both are synchronous and bounded by the per-operation
 * timeout the session was opened with.
 */

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{ConnectionError, TransportError};

pub trait Session: Send {
    fn write(&mut self, command: &str) -> Result<(), TransportError>;

    fn query(&mut self, command: &str) -> Result<String, TransportError>;
}

pub trait Transport: Send + Sync {
    fn open(&self, address: &str) -> Result<Box<dyn Session>, ConnectionError>;
}

/// Raw SCPI over a TCP socket (port 5025 on most LAN instruments).
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Transport for TcpTransport {
    fn open(&self, address: &str) -> Result<Box<dyn Session>, ConnectionError> {
        Ok(Box::new(ScpiSocket::open(address, self.timeout)?))
    }
}

pub struct ScpiSocket {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    line: String,
}

impl ScpiSocket {
    pub fn open(address: &str, timeout: Duration) -> Result<Self, ConnectionError> {
        let addr = address
            .to_socket_addrs()
            .map_err(|_| ConnectionError::Resolve(address.to_string()))?
            .next()
            .ok_or_else(|| ConnectionError::Resolve(address.to_string()))?;

        let io_err = |source| ConnectionError::Io {
            address: address.to_string(),
            source,
        };

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(io_err)?;
        stream.set_read_timeout(Some(timeout)).map_err(io_err)?;
        stream.set_write_timeout(Some(timeout)).map_err(io_err)?;
        stream.set_nodelay(true).map_err(io_err)?;
        let reader = BufReader::new(stream.try_clone().map_err(io_err)?);

        info!(%addr, ?timeout, "SCPI socket open");
        Ok(Self {
            reader,
            writer: stream,
            line: String::with_capacity(128),
        })
    }
}

impl Session for ScpiSocket {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let framed = format!("{}\n", command);
        self.writer
            .write_all(framed.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(TransportError::from_io)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write(command)?;
        self.line.clear();
        let n = self
            .reader
            .read_line(&mut self.line)
            .map_err(TransportError::from_io)?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        let response = self.line.trim_end_matches(['\r', '\n']).to_string();
        debug!(query = command, %response, "query");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    // one-connection echo instrument: answers every query with "ACK <query>"
    fn spawn_instrument() -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut out = stream.try_clone().unwrap();
            let mut seen = Vec::new();
            for line in BufReader::new(stream).lines() {
                let line = line.unwrap();
                if line.ends_with('?') {
                    writeln!(out, "ACK {}", line).unwrap();
                }
                seen.push(line);
            }
            seen
        });
        (addr, handle)
    }

    #[test]
    fn test_write_and_query_over_tcp() {
        let (addr, server) = spawn_instrument();
        {
            let mut socket = ScpiSocket::open(&addr, Duration::from_secs(2)).unwrap();
            socket.write(":FREQ 915 MHz").unwrap();
            assert_eq!(socket.query(":FREQ?").unwrap(), "ACK :FREQ?");
        }
        let seen = server.join().unwrap();
        assert_eq!(seen, vec![":FREQ 915 MHz".to_string(), ":FREQ?".to_string()]);
    }

    #[test]
    fn test_query_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // accept but never answer
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });
        let mut socket = ScpiSocket::open(&addr, Duration::from_millis(100)).unwrap();
        assert!(matches!(socket.query("*OPC?"), Err(TransportError::Timeout)));
        server.join().unwrap();
    }

    #[test]
    fn test_unresolvable_address() {
        let err = ScpiSocket::open("not an address", Duration::from_millis(100)).err().unwrap();
        assert!(matches!(err, ConnectionError::Resolve(_)));
    }

    #[test]
    fn test_refused_connection() {
        // bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let err = TcpTransport::new(Duration::from_millis(200))
            .open(&format!("127.0.0.1:{}", port))
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Io { .. }));
    }
}
