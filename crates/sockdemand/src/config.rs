//! Cycle configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::netlink::error::{Error, Result};
use crate::netlink::sockdiag::DumpRequest;
use crate::sockdiag::types::{AddressFamily, InetExtension, TcpState, Transport};

/// Where socket records come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// `/proc/net/{tcp,tcp6,udp,udp6}` text tables.
    #[default]
    Text,
    /// INET_DIAG dumps over NETLINK_SOCK_DIAG.
    Netlink,
}

/// Most decimals an f64 CPU share can carry; larger precisions are clamped.
pub const MAX_CPU_DECIMALS: u32 = 15;

/// Decimal places kept in CPU shares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuPrecision {
    /// Four decimals for services, five for other processes.
    #[default]
    Legacy,
    /// The same number of decimals everywhere.
    Uniform(u32),
}

impl CpuPrecision {
    /// Decimals for Listen entries.
    pub fn listen_decimals(&self) -> u32 {
        match self {
            Self::Legacy => 4,
            Self::Uniform(n) => (*n).min(MAX_CPU_DECIMALS),
        }
    }

    /// Decimals for Estab entries.
    pub fn estab_decimals(&self) -> u32 {
        match self {
            Self::Legacy => 5,
            Self::Uniform(n) => (*n).min(MAX_CPU_DECIMALS),
        }
    }
}

/// Settings for one snapshot cycle.
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes.
///
/// # Example
///
/// ```ignore
/// let config = CycleConfig::new()
///     .source(Source::Netlink)
///     .transports(&[Transport::Tcp])
///     .pool_depth(32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub source: Source,
    pub proc_root: PathBuf,
    pub families: Vec<AddressFamily>,
    pub transports: Vec<Transport>,
    /// States requested from netlink; text tables are always read whole.
    pub states: Vec<TcpState>,
    pub extensions: Vec<InetExtension>,
    /// Records circulating between the dump producer and the collector.
    pub pool_depth: usize,
    /// Initial peek buffer size in bytes.
    pub recv_buffer: usize,
    pub cpu_precision: CpuPrecision,
    /// Addresses treated as local in addition to interface addresses.
    pub extra_local_addrs: Vec<IpAddr>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            source: Source::Text,
            proc_root: PathBuf::from("/proc"),
            families: vec![AddressFamily::Inet, AddressFamily::Inet6],
            transports: vec![Transport::Tcp],
            states: vec![TcpState::Established, TcpState::Listen],
            extensions: InetExtension::ALL.to_vec(),
            pool_depth: 16,
            recv_buffer: 8192,
            cpu_precision: CpuPrecision::Legacy,
            extra_local_addrs: vec![IpAddr::V4(Ipv4Addr::new(127, 0, 1, 1))],
        }
    }
}

impl CycleConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::source_open(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Set the record source.
    pub fn source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    /// Set the proc filesystem root.
    pub fn proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Set the address families.
    pub fn families(mut self, families: &[AddressFamily]) -> Self {
        self.families = families.to_vec();
        self
    }

    /// Set the transports.
    pub fn transports(mut self, transports: &[Transport]) -> Self {
        self.transports = transports.to_vec();
        self
    }

    /// Set the netlink state filter.
    pub fn states(mut self, states: &[TcpState]) -> Self {
        self.states = states.to_vec();
        self
    }

    /// Set the netlink extensions.
    pub fn extensions(mut self, extensions: &[InetExtension]) -> Self {
        self.extensions = extensions.to_vec();
        self
    }

    /// Set the record pool depth.
    pub fn pool_depth(mut self, depth: usize) -> Self {
        self.pool_depth = depth;
        self
    }

    /// Set the initial receive buffer size.
    pub fn recv_buffer(mut self, size: usize) -> Self {
        self.recv_buffer = size;
        self
    }

    /// Set the CPU share precision.
    pub fn cpu_precision(mut self, precision: CpuPrecision) -> Self {
        self.cpu_precision = precision;
        self
    }

    /// Add an address to treat as local.
    pub fn extra_local_addr(mut self, addr: IpAddr) -> Self {
        self.extra_local_addrs.push(addr);
        self
    }

    /// Every (family, transport) pair to collect, in configuration order.
    pub fn tables(&self) -> impl Iterator<Item = (AddressFamily, Transport)> + '_ {
        self.families
            .iter()
            .flat_map(|&f| self.transports.iter().map(move |&t| (f, t)))
    }

    /// One dump request per (family, transport) pair.
    pub fn dump_requests(&self) -> Vec<DumpRequest> {
        let states = TcpState::combine(&self.states);
        let extensions = InetExtension::combine(&self.extensions);
        self.tables()
            .map(|(f, t)| DumpRequest::new(f, t).states(states).extensions(extensions))
            .collect()
    }
}
