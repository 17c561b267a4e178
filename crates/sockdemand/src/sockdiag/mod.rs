//! Socket record model shared by the text and netlink decoders.

pub mod record;
pub mod types;

pub use record::{DiagExtras, Endpoint, SocketRecord, SocketTable, TcpExtras, TransportExtras};
pub use types::{AddressFamily, InetExtension, TcpState, TimerKind, Transport};
