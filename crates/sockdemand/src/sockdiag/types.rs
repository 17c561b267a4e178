//! Core types for socket records.
//!
//! Strongly-typed representations of address families, transports, TCP
//! states, timers and the optional diagnostic structures the kernel attaches
//! to INET_DIAG responses.

use serde::{Deserialize, Serialize};

/// Socket address family.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum AddressFamily {
    /// IPv4.
    #[default]
    Inet = libc::AF_INET as u8,
    /// IPv6.
    Inet6 = libc::AF_INET6 as u8,
}

impl AddressFamily {
    /// Parse from a raw u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value as i32 {
            libc::AF_INET => Some(Self::Inet),
            libc::AF_INET6 => Some(Self::Inet6),
            _ => None,
        }
    }

    /// Suffix used by the /proc/net table names ("" or "6").
    pub fn table_suffix(&self) -> &'static str {
        match self {
            Self::Inet => "",
            Self::Inet6 => "6",
        }
    }
}

/// Transport protocol.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Transport {
    /// TCP.
    #[default]
    Tcp,
    /// UDP.
    Udp,
}

impl Transport {
    /// Get the protocol number.
    pub fn number(&self) -> u8 {
        match self {
            Self::Tcp => libc::IPPROTO_TCP as u8,
            Self::Udp => libc::IPPROTO_UDP as u8,
        }
    }

    /// Get the protocol name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// TCP socket states, numbered as the kernel numbers them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TcpState {
    /// Unknown state.
    #[default]
    Unknown = 0,
    /// Connection established.
    Established = 1,
    /// SYN sent, waiting for matching SYN.
    SynSent = 2,
    /// SYN received, waiting for ACK.
    SynRecv = 3,
    /// FIN sent, waiting for FIN or FIN-ACK.
    FinWait1 = 4,
    /// FIN received, waiting for FIN.
    FinWait2 = 5,
    /// In TIME-WAIT state.
    TimeWait = 6,
    /// Socket is closed.
    Close = 7,
    /// FIN received, close pending.
    CloseWait = 8,
    /// Close wait acknowledged, waiting for FIN.
    LastAck = 9,
    /// Socket is listening.
    Listen = 10,
    /// Both sides sent FIN simultaneously.
    Closing = 11,
}

impl TcpState {
    /// Parse from a raw u8 value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Established,
            2 => Self::SynSent,
            3 => Self::SynRecv,
            4 => Self::FinWait1,
            5 => Self::FinWait2,
            6 => Self::TimeWait,
            7 => Self::Close,
            8 => Self::CloseWait,
            9 => Self::LastAck,
            10 => Self::Listen,
            11 => Self::Closing,
            _ => Self::Unknown,
        }
    }

    /// Create a bitmask for this state.
    pub fn mask(&self) -> u32 {
        1 << (*self as u32)
    }

    /// Combine states into an `idiag_states` bitmask.
    pub fn combine(states: &[TcpState]) -> u32 {
        states.iter().fold(0, |acc, s| acc | s.mask())
    }
}

/// Kind of timer pending on a socket.
///
/// Kernel values above 4 are folded into `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// No timer active.
    #[default]
    Off,
    /// Retransmit timer.
    On,
    /// Keepalive timer.
    Keepalive,
    /// TIME-WAIT timer.
    TimeWait,
    /// Zero window probe timer.
    Persist,
    /// Anything the kernel reports beyond the known kinds.
    Unknown,
}

impl TimerKind {
    /// Parse from the raw timer number.
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::Off,
            1 => Self::On,
            2 => Self::Keepalive,
            3 => Self::TimeWait,
            4 => Self::Persist,
            _ => Self::Unknown,
        }
    }
}

/// Extensions to request in an inet_diag query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InetExtension {
    /// Memory info (idiag_rmem, idiag_wmem, etc.).
    MemInfo = 1,
    /// TCP info structure.
    Info = 2,
    /// Vegas congestion info.
    VegasInfo = 3,
    /// Congestion algorithm name.
    Cong = 4,
    /// Type of service.
    Tos = 5,
    /// Traffic class (IPv6).
    TClass = 6,
    /// Socket memory info array.
    SkMemInfo = 7,
    /// Shutdown state.
    Shutdown = 8,
}

impl InetExtension {
    /// Every extension a request can ask for.
    pub const ALL: [InetExtension; 8] = [
        Self::MemInfo,
        Self::Info,
        Self::VegasInfo,
        Self::Cong,
        Self::Tos,
        Self::TClass,
        Self::SkMemInfo,
        Self::Shutdown,
    ];

    /// Get the `idiag_ext` bit for this extension.
    ///
    /// The kernel tests `ext & (1 << (type - 1))`.
    pub fn mask(&self) -> u8 {
        1 << (*self as u8 - 1)
    }

    /// Combine extensions into an `idiag_ext` bitmask.
    pub fn combine(exts: &[InetExtension]) -> u8 {
        exts.iter().fold(0, |acc, e| acc | e.mask())
    }

    /// Attribute type the kernel uses for this extension's payload.
    pub fn attr_type(&self) -> u16 {
        *self as u16
    }
}

/// Socket memory summary (struct inet_diag_meminfo).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemInfo {
    /// Receive memory allocated.
    pub rmem: u32,
    /// Write memory allocated.
    pub wmem: u32,
    /// Forward alloc.
    pub fmem: u32,
    /// Write memory queued.
    pub tmem: u32,
}

/// TCP Vegas RTT statistics (struct tcpvegas_info).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VegasInfo {
    /// Non-zero when Vegas is active.
    pub enabled: u32,
    /// RTTs counted in the last period.
    pub rtt_count: u32,
    /// Average RTT (usec).
    pub rtt: u32,
    /// Minimum RTT (usec).
    pub min_rtt: u32,
}

/// Subset of struct tcp_info carried in INET_DIAG_INFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpInfo {
    /// State.
    pub state: u8,
    /// CA state.
    pub ca_state: u8,
    /// Retransmits.
    pub retransmits: u8,
    /// Probes.
    pub probes: u8,
    /// Backoff.
    pub backoff: u8,

    /// Retransmit timeout (usec).
    pub rto: u32,
    /// Delayed ACK timeout (usec).
    pub ato: u32,
    /// Send MSS.
    pub snd_mss: u32,
    /// Receive MSS.
    pub rcv_mss: u32,

    /// Unacked packets.
    pub unacked: u32,
    /// Lost packets.
    pub lost: u32,
    /// Retransmitted packets.
    pub retrans: u32,

    /// Path MTU.
    pub pmtu: u32,
    /// Estimated RTT (usec).
    pub rtt: u32,
    /// RTT variance (usec).
    pub rttvar: u32,
    /// Send SSTHRESH.
    pub snd_ssthresh: u32,
    /// Send CWND.
    pub snd_cwnd: u32,

    /// Total retransmits.
    pub total_retrans: u32,
}

impl TcpInfo {
    /// Minimum payload length holding every field above.
    pub const MIN_LEN: usize = 104;
}
