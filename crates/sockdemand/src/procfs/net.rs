//! Decoder for the `/proc/net/{tcp,tcp6,udp,udp6}` text tables.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::netlink::error::{Error, Result};
use crate::sockdiag::record::{Endpoint, SocketRecord, SocketTable, TcpExtras, TransportExtras};
use crate::sockdiag::types::{AddressFamily, TcpState, TimerKind, Transport};
use crate::util::addr::parse_hex_endpoint;

/// Path of the table for one (family, transport) pair under `proc_root`.
pub fn table_path(proc_root: &Path, family: AddressFamily, transport: Transport) -> PathBuf {
    proc_root
        .join("net")
        .join(format!("{}{}", transport.name(), family.table_suffix()))
}

fn field<'a>(fields: &[&'a str], idx: usize, name: &str) -> Result<&'a str> {
    fields
        .get(idx)
        .copied()
        .ok_or_else(|| Error::Parse(format!("missing {} column", name)))
}

fn hex_u32(s: &str, name: &str) -> Result<u32> {
    u32::from_str_radix(s, 16).map_err(|_| Error::Parse(format!("bad {}: {:?}", name, s)))
}

fn hex_u64(s: &str, name: &str) -> Result<u64> {
    u64::from_str_radix(s, 16).map_err(|_| Error::Parse(format!("bad {}: {:?}", name, s)))
}

fn dec<T: std::str::FromStr>(s: &str, name: &str) -> Result<T> {
    s.parse()
        .map_err(|_| Error::Parse(format!("bad {}: {:?}", name, s)))
}

fn hex_pair(s: &str, name: &str) -> Result<(u32, u64)> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| Error::Parse(format!("bad {}: {:?}", name, s)))?;
    Ok((hex_u32(a, name)?, hex_u64(b, name)?))
}

/// Decode one data row of a socket table.
pub fn parse_line(line: &str, family: AddressFamily, transport: Transport) -> Result<SocketRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    let endpoint = |idx: usize, name: &str| -> Result<Endpoint> {
        let (addr, port) = parse_hex_endpoint(field(&fields, idx, name)?, family)
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Endpoint::new(addr, port))
    };

    let mut rec = SocketRecord::new(family, transport);
    rec.local = endpoint(1, "local_address")?;
    rec.remote = endpoint(2, "rem_address")?;

    let state = hex_u32(field(&fields, 3, "st")?, "st")?;
    rec.state = TcpState::from_u8(u8::try_from(state).unwrap_or(0));

    let (tx, rx) = hex_pair(field(&fields, 4, "tx_queue:rx_queue")?, "queues")?;
    rec.tx_queue = tx;
    rec.rx_queue = u32::try_from(rx).map_err(|_| Error::Parse(format!("bad rx_queue: {}", rx)))?;

    let (timer, deadline) = hex_pair(field(&fields, 5, "tr:tm->when")?, "timer")?;
    rec.timer = TimerKind::from_raw(timer);
    rec.timer_deadline = deadline;

    rec.retransmits = hex_u32(field(&fields, 6, "retrnsmt")?, "retrnsmt")?;
    rec.uid = dec(field(&fields, 7, "uid")?, "uid")?;
    rec.probes = dec(field(&fields, 8, "timeout")?, "timeout")?;
    rec.inode = dec(field(&fields, 9, "inode")?, "inode")?;
    rec.ref_count = dec(field(&fields, 10, "ref")?, "ref")?;
    rec.sock_ptr = hex_u64(field(&fields, 11, "pointer")?, "pointer")?;

    rec.extras = match transport {
        Transport::Tcp if rec.inode == 0 => TransportExtras::Tcp(TcpExtras::WITHOUT_INODE),
        Transport::Tcp => TransportExtras::Tcp(TcpExtras {
            rto: dec(field(&fields, 12, "rto")?, "rto")?,
            ato: dec(field(&fields, 13, "ato")?, "ato")?,
            quick_ack: dec(field(&fields, 14, "qack")?, "qack")?,
            cwnd: dec(field(&fields, 15, "cwnd")?, "cwnd")?,
            ssthresh: dec(field(&fields, 16, "ssthresh")?, "ssthresh")?,
        }),
        Transport::Udp => TransportExtras::Udp {
            drops: dec(field(&fields, 12, "drops")?, "drops")?,
        },
    };

    Ok(rec)
}

/// Decode a whole table from a reader.
///
/// The `sl` header is skipped. A row that fails to decode is logged and
/// dropped; rows with the same inode overwrite each other.
pub fn parse_table<R: BufRead>(
    reader: R,
    family: AddressFamily,
    transport: Transport,
) -> Result<SocketTable> {
    let mut table = SocketTable::new(family, transport);

    let name = format!("{}{}", transport.name(), family.table_suffix());

    for (lineno, raw) in reader.split(b'\n').enumerate() {
        let raw = raw?;
        let line = match std::str::from_utf8(&raw) {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(line = lineno + 1, table = %name, error = %e, "skipping non-text socket row");
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("sl") {
            continue;
        }
        match parse_line(trimmed, family, transport) {
            Ok(rec) => {
                table.insert(rec);
            }
            Err(e) => {
                tracing::debug!(
                    line = lineno + 1,
                    table = %name,
                    error = %e,
                    "skipping malformed socket row"
                );
            }
        }
    }

    Ok(table)
}

/// Read and decode the table for one (family, transport) pair.
pub fn read_table(proc_root: &Path, family: AddressFamily, transport: Transport) -> Result<SocketTable> {
    let path = table_path(proc_root, family, transport);
    let file = File::open(&path).map_err(|e| Error::source_open(&path, e))?;
    parse_table(BufReader::new(file), family, transport)
}
