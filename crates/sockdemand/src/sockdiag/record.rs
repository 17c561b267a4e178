//! Normalized socket record shared by the text and netlink sources.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Serialize, Serializer};

use super::types::{AddressFamily, MemInfo, TcpInfo, TcpState, TimerKind, Transport, VegasInfo};
use crate::util::addr::format_host;

/// One side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    /// Host address.
    pub addr: IpAddr,
    /// Port number.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    /// Host part in display form.
    pub fn host(&self) -> String {
        format_host(&self.addr)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host(), self.port)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// TCP-only columns of a /proc/net/tcp row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TcpExtras {
    /// Retransmit timeout (clock ticks).
    pub rto: i64,
    /// Delayed-ack tick estimate.
    pub ato: i64,
    /// `(ack.quick << 1) | ack.pingpong`.
    pub quick_ack: i64,
    /// Sending congestion window.
    pub cwnd: i64,
    /// Slow-start threshold, -1 when it is at least 0xFFFF.
    pub ssthresh: i64,
}

impl TcpExtras {
    /// Values used when the row has no inode and the kernel omits the columns.
    pub const WITHOUT_INODE: TcpExtras = TcpExtras {
        rto: 0,
        ato: 0,
        quick_ack: 0,
        cwnd: 2,
        ssthresh: -1,
    };
}

/// Transport-specific fields. TCP and UDP fields never coexist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportExtras {
    /// No transport-specific data (netlink records).
    #[default]
    None,
    /// TCP timers and window.
    Tcp(TcpExtras),
    /// UDP drop counter.
    Udp {
        /// Datagrams dropped.
        drops: u64,
    },
}

/// Fields only available from an INET_DIAG dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagExtras {
    /// INET_DIAG_MEMINFO.
    pub meminfo: Option<MemInfo>,
    /// INET_DIAG_INFO (TCP only).
    pub tcp_info: Option<TcpInfo>,
    /// INET_DIAG_VEGASINFO.
    pub vegas: Option<VegasInfo>,
    /// INET_DIAG_CONG, the congestion control algorithm.
    pub congestion: Option<String>,
    /// INET_DIAG_TOS.
    pub tos: Option<u8>,
    /// INET_DIAG_TCLASS.
    pub tclass: Option<u8>,
    /// INET_DIAG_SKMEMINFO words (SK_MEMINFO_* order).
    pub skmem: Vec<u32>,
    /// INET_DIAG_SHUTDOWN.
    pub shutdown: Option<u8>,
}

impl DiagExtras {
    fn clear(&mut self) {
        self.meminfo = None;
        self.tcp_info = None;
        self.vegas = None;
        self.congestion = None;
        self.tos = None;
        self.tclass = None;
        self.skmem.clear();
        self.shutdown = None;
    }
}

/// One kernel socket observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SocketRecord {
    /// Address family.
    pub family: AddressFamily,
    /// Transport protocol.
    pub transport: Transport,
    /// Local endpoint.
    pub local: Endpoint,
    /// Remote endpoint.
    pub remote: Endpoint,
    /// Connection state.
    pub state: TcpState,
    /// Transmit queue depth.
    pub tx_queue: u32,
    /// Receive queue depth.
    pub rx_queue: u32,
    /// Pending timer.
    pub timer: TimerKind,
    /// Timer deadline (jiffies from /proc, milliseconds from netlink).
    pub timer_deadline: u64,
    /// Retransmit count.
    pub retransmits: u32,
    /// Owning UID.
    pub uid: u32,
    /// Unanswered zero-window probes.
    pub probes: u32,
    /// Socket inode.
    pub inode: u64,
    /// Socket reference count.
    pub ref_count: u32,
    /// Kernel socket address (text) or socket cookie (netlink).
    pub sock_ptr: u64,
    /// Bound interface index (netlink only).
    pub interface: u32,
    /// Transport-specific fields.
    pub extras: TransportExtras,
    /// Extended diagnostics (netlink only).
    pub diag: Option<DiagExtras>,
    /// Name of the owning process, set during correlation.
    pub owner: Option<String>,
}

impl SocketRecord {
    /// Create an empty record for the given table.
    pub fn new(family: AddressFamily, transport: Transport) -> Self {
        Self {
            family,
            transport,
            ..Default::default()
        }
    }

    /// Return the record to its empty state, keeping its diagnostic buffers.
    pub fn reset(&mut self, family: AddressFamily, transport: Transport) {
        let diag = self.diag.take();
        *self = Self::new(family, transport);
        if let Some(mut diag) = diag {
            diag.clear();
            self.diag = Some(diag);
        }
    }

    /// Whether the socket is listening.
    pub fn is_listen(&self) -> bool {
        self.state == TcpState::Listen
    }

    /// Whether the connection is established.
    pub fn is_established(&self) -> bool {
        self.state == TcpState::Established
    }

    /// Resolved owner name, if correlation found one.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

/// Inode-keyed records decoded from one (family, transport) source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketTable {
    /// Address family of every record.
    pub family: AddressFamily,
    /// Transport of every record.
    pub transport: Transport,
    records: BTreeMap<u64, SocketRecord>,
}

impl SocketTable {
    /// Create an empty table.
    pub fn new(family: AddressFamily, transport: Transport) -> Self {
        Self {
            family,
            transport,
            records: BTreeMap::new(),
        }
    }

    /// Insert a record under its inode, returning any record it replaced.
    pub fn insert(&mut self, record: SocketRecord) -> Option<SocketRecord> {
        self.records.insert(record.inode, record)
    }

    /// Look up a record by inode.
    pub fn get(&self, inode: u64) -> Option<&SocketRecord> {
        self.records.get(&inode)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in inode order.
    pub fn records(&self) -> impl Iterator<Item = &SocketRecord> {
        self.records.values()
    }

    /// Mutable records in inode order.
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut SocketRecord> {
        self.records.values_mut()
    }
}
