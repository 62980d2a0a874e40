/******************** Utilities Module ********************/

// address helpers and opening the instrument session

use std::net::SocketAddr;

use tracing::{error, info};

use crate::drivers::generator::{Dispatcher, Transport};
use crate::error::Result;
use crate::events::EventBus;

/// `host:port`, unless `address` already carries a port.
pub fn instrument_address(address: &str, port: u16) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if let Some((host, p)) = address.rsplit_once(':') {
        if !host.contains(':') && p.parse::<u16>().is_ok() {
            return address.to_string();
        }
    }
    if address.contains(':') && !address.starts_with('[') {
        // bare IPv6 literal
        return format!("[{}]:{}", address, port);
    }
    format!("{}:{}", address, port)
}

/// The host part of `host:port` (or of a bare host).
pub fn host_of(address: &str) -> &str {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        let text = match addr {
            SocketAddr::V4(_) => address.rsplit_once(':').map(|(h, _)| h),
            SocketAddr::V6(_) => address
                .strip_prefix('[')
                .and_then(|rest| rest.split_once(']'))
                .map(|(h, _)| h),
        };
        return text.unwrap_or(address);
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => address,
    }
}

// opens the session and starts its worker
pub fn open_instrument(transport: &dyn Transport, address: &str, events: EventBus) -> Result<Dispatcher> {
    match Dispatcher::start(transport, address, events) {
        Ok(dispatcher) => {
            info!(address, "connected to signal generator");
            Ok(dispatcher)
        }
        Err(e) => {
            error!(address, "connect failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::MockSignalGenerator;

    #[test]
    fn test_instrument_address() {
        assert_eq!(instrument_address("192.168.100.79", 5025), "192.168.100.79:5025");
        assert_eq!(instrument_address("10.0.0.2:6000", 5025), "10.0.0.2:6000");
        assert_eq!(instrument_address("siggen.lab", 5025), "siggen.lab:5025");
        assert_eq!(instrument_address("fe80::1", 5025), "[fe80::1]:5025");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("192.168.100.79:5025"), "192.168.100.79");
        assert_eq!(host_of("siggen.lab:5025"), "siggen.lab");
        assert_eq!(host_of("[::1]:5025"), "::1");
        assert_eq!(host_of("siggen.lab"), "siggen.lab");
    }

    #[test]
    fn test_open_instrument_reports_refusal() {
        let mock = MockSignalGenerator::new();
        mock.refuse_connections(true);
        assert!(open_instrument(&mock, "mock", EventBus::default()).is_err());

        mock.refuse_connections(false);
        let dispatcher = open_instrument(&mock, "mock", EventBus::default()).unwrap();
        assert!(dispatcher.is_running());
        dispatcher.stop();
    }
}
