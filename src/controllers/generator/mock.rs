use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::drivers::generator::transport::{Session, Transport};
use crate::error::{ConnectionError, TransportError};
use crate::protocol::{FrequencyUnit, Header, Response, OPERATION_COMPLETE};

pub const MOCK_IDENTITY: &str = "Mock Instruments,SG-6000,MOCK0001,1.0.0";

/// In-memory SCPI signal generator. Sessions opened from it share one
/// instrument state, so the handle kept by a test sees everything the
/// dispatcher did.
#[derive(Clone, Default)]
pub struct MockSignalGenerator {
    inner: Arc<Mutex<MockInstrument>>,
}

#[derive(Default)]
struct MockInstrument {
    values: HashMap<Header, String>,
    traffic: Vec<String>,
    power_override: Option<f64>,
    garbled: Vec<Header>,
    failing_queries: usize,
    refuse: bool,
    latency: Duration,
    opened: usize,
}

impl MockSignalGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line sent by any session, writes and queries, in order.
    pub fn traffic(&self) -> Vec<String> {
        self.inner.lock().traffic.clone()
    }

    /// Only the setting writes (no queries).
    pub fn writes(&self) -> Vec<String> {
        self.inner
            .lock()
            .traffic
            .iter()
            .filter(|line| !line.ends_with('?'))
            .cloned()
            .collect()
    }

    pub fn clear_traffic(&self) {
        self.inner.lock().traffic.clear();
    }

    /// Makes `:POW?` report this value regardless of what was written,
    /// like an instrument sitting at a level limit.
    pub fn override_power(&self, dbm: Option<f64>) {
        self.inner.lock().power_override = dbm;
    }

    pub fn garble(&self, header: Header) {
        self.inner.lock().garbled.push(header);
    }

    pub fn fail_next_queries(&self, count: usize) {
        self.inner.lock().failing_queries = count;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.lock().refuse = refuse;
    }

    /// Delay applied to every write and query.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    pub fn sessions_opened(&self) -> usize {
        self.inner.lock().opened
    }

    pub fn rf_on(&self) -> bool {
        self.value(Header::RfOutput).as_deref() == Some("1")
    }

    /// Raw stored state for a header, as the instrument would report it.
    pub fn value(&self, header: Header) -> Option<String> {
        self.inner.lock().values.get(&header).cloned()
    }

    fn pause(&self) {
        let latency = self.inner.lock().latency;
        if !latency.is_zero() {
            thread::sleep(latency);
        }
    }
}

impl Transport for MockSignalGenerator {
    fn open(&self, address: &str) -> Result<Box<dyn Session>, ConnectionError> {
        let mut inner = self.inner.lock();
        if inner.refuse {
            return Err(ConnectionError::Io {
                address: address.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        inner.opened += 1;
        Ok(Box::new(MockSession { instrument: self.clone() }))
    }
}

struct MockSession {
    instrument: MockSignalGenerator,
}

impl Session for MockSession {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.instrument.pause();
        let mut inner = self.instrument.inner.lock();
        inner.traffic.push(command.to_string());
        inner.apply(command);
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.instrument.pause();
        let mut inner = self.instrument.inner.lock();
        inner.traffic.push(command.to_string());
        if inner.failing_queries > 0 {
            inner.failing_queries -= 1;
            return Err(TransportError::Timeout);
        }
        Ok(inner.answer(command))
    }
}

impl MockInstrument {
    fn apply(&mut self, line: &str) {
        let mut parts = line.split_whitespace();
        let Some(header) = parts.next().and_then(Header::from_wire) else {
            return;
        };
        let args: Vec<&str> = parts.collect();
        let stored = match (header.response(), args.as_slice()) {
            (Response::Switch, [arg, ..]) => match arg.to_ascii_uppercase().as_str() {
                "ON" | "1" => "1".to_string(),
                _ => "0".to_string(),
            },
            (Response::Number, [value, rest @ ..]) => {
                let Ok(mut v) = value.parse::<f64>() else { return };
                if let Some(unit) = rest.first().and_then(|u| u.parse::<FrequencyUnit>().ok()) {
                    v = unit.to_hz(v);
                }
                format!("{:+E}", v)
            }
            (Response::Choice { .. }, [token, ..]) => token.to_ascii_uppercase(),
            _ => return,
        };
        self.values.insert(header, stored);
    }

    fn answer(&self, query: &str) -> String {
        if query == OPERATION_COMPLETE {
            return "1".to_string();
        }
        let Some(header) = query.strip_suffix('?').and_then(Header::from_wire) else {
            return String::new();
        };
        if self.garbled.contains(&header) {
            return "garbage".to_string();
        }
        if header == Header::Identity {
            return MOCK_IDENTITY.to_string();
        }
        if let (Header::Power, Some(dbm)) = (header, self.power_override) {
            return format!("{:+E}", dbm);
        }
        if let Some(value) = self.values.get(&header) {
            return value.clone();
        }
        match header.response() {
            Response::Switch => "0".to_string(),
            Response::Number => format!("{:+E}", 0.0),
            Response::Choice { yes, .. } => yes.wire().to_string(),
            Response::None | Response::Text => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_query_reports_hz() {
        let mock = MockSignalGenerator::new();
        let mut session = mock.open("mock").unwrap();
        session.write(":FREQ 2.4 GHz").unwrap();
        let text = session.query(":FREQ?").unwrap();
        assert_eq!(text.parse::<f64>().unwrap(), 2.4e9);
    }

    #[test]
    fn test_switch_and_token_state() {
        let mock = MockSignalGenerator::new();
        let mut session = mock.open("mock").unwrap();
        assert_eq!(session.query(":OUTP:STAT?").unwrap(), "0");
        session.write(":OUTP:STAT ON").unwrap();
        session.write(":FM:SOUR EXT").unwrap();
        assert!(mock.rf_on());
        assert_eq!(session.query(":FM:SOUR?").unwrap(), "EXT");
    }

    #[test]
    fn test_failure_injection() {
        let mock = MockSignalGenerator::new();
        let mut session = mock.open("mock").unwrap();
        mock.fail_next_queries(1);
        assert!(matches!(session.query("*OPC?"), Err(TransportError::Timeout)));
        assert_eq!(session.query("*OPC?").unwrap(), "1");

        mock.refuse_connections(true);
        assert!(mock.open("mock").is_err());
        assert_eq!(mock.sessions_opened(), 1);
    }
}
