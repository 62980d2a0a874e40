pub mod task;
pub mod transport;

pub use task::{readback_event, Dispatcher};
pub use transport::{ScpiSocket, Session, TcpTransport, Transport};
