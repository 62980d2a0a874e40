pub mod poller;

pub use poller::{Pinger, PollerOptions, ReachabilityPoller, ReachabilityState, TcpPinger};
