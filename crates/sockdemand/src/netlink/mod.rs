//! Netlink plumbing: framing, attributes, the async socket and the two
//! dumps the collector issues.
//!
//! # Example
//!
//! ```ignore
//! use sockdemand::netlink::sockdiag::{DumpRequest, dump_sockets};
//! use sockdemand::sockdiag::types::{AddressFamily, Transport};
//!
//! let request = DumpRequest::new(AddressFamily::Inet, Transport::Tcp);
//! let table = dump_sockets(request, 16, 8192).await?;
//! println!("{} sockets", table.len());
//! ```

pub mod addr;
pub mod attr;
pub mod error;
pub mod message;
pub mod parse;
pub mod sockdiag;
pub mod socket;

pub use error::{Error, Result};
pub use socket::{DatagramSource, NetlinkSocket, Protocol};
