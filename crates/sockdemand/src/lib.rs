//! Service demand topology for Linux hosts.
//!
//! A snapshot joins the kernel's TCP/UDP socket tables to the processes
//! holding each socket, then sorts connections into two views:
//!
//! - **Listen**: every process name owning a listening socket, with its
//!   addresses, the clients connecting to it and the upstreams it calls.
//! - **Estab**: every other process with established connections, with a
//!   connection count per remote endpoint.
//!
//! Socket records come either from `/proc/net/{tcp,tcp6,udp,udp6}` or from
//! INET_DIAG dumps over `NETLINK_SOCK_DIAG`.
//!
//! # Example
//!
//! ```ignore
//! use sockdemand::{Collector, CycleConfig, Source};
//!
//! #[tokio::main]
//! async fn main() -> sockdemand::Result<()> {
//!     let config = CycleConfig::new().source(Source::Netlink);
//!     let demand = Collector::new(config).snapshot().await?;
//!
//!     for (name, service) in demand.listen() {
//!         println!("{} <- {:?}", name, service.clients);
//!     }
//!     println!("{}", demand.to_json()?);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod correlate;
pub mod cycle;
pub mod netlink;
pub mod procfs;
pub mod sockdiag;
pub mod topology;
pub mod util;

pub use config::{CpuPrecision, CycleConfig, Source};
pub use cycle::{Collector, Cycle};
pub use netlink::{Error, Result};
pub use topology::Demand;
