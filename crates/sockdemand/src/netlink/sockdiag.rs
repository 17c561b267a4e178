//! INET_DIAG dump reader.
//!
//! One request selects a (family, transport, state mask) slice of the
//! kernel's socket tables. The response stream is decoded by a producer task
//! that fills records drawn from a pool channel and publishes them on a
//! bounded output channel:
//!
//! ```text
//!  pool (depth N) ──► producer ──► out (capacity 1) ──► collect_dump
//!        ▲                                                  │
//!        └──────────── spare / replaced records ◄───────────┘
//! ```
//!
//! The producer sends `None` once the kernel reports `NLMSG_DONE`; that
//! sentinel is the only normal completion signal.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use zerocopy::{Immutable, IntoBytes, KnownLayout};

use super::attr::{AttrIter, get};
use super::error::{Error, Result};
use super::message::{Frame, Frames, dump_request};
use super::parse::{
    FromNetlink, PResult, parse_addr16, parse_u8, parse_u16_be, parse_u32_ne, parse_u64_ne,
    u32_at,
};
use super::socket::{DatagramSource, NetlinkSocket, Protocol, read_datagram};
use crate::sockdiag::record::{DiagExtras, Endpoint, SocketRecord, SocketTable};
use crate::sockdiag::types::{
    AddressFamily, InetExtension, MemInfo, TcpInfo, TcpState, TimerKind, Transport, VegasInfo,
};

/// Size of struct inet_diag_msg.
pub const INET_DIAG_MSG_LEN: usize = 72;

/// sock_diag request and reply type.
pub const SOCK_DIAG_BY_FAMILY: u16 = 20;
/// Reply type used by kernels that answer through the old tcpdiag path.
pub const TCPDIAG_GETSOCK: u16 = 18;

/// Socket identity (struct inet_diag_sockid). All zeros match every socket.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, IntoBytes, Immutable, KnownLayout)]
pub struct InetDiagSockId {
    /// Source port, network order.
    pub sport: u16,
    /// Destination port, network order.
    pub dport: u16,
    /// Source address.
    pub src: [u8; 16],
    /// Destination address.
    pub dst: [u8; 16],
    /// Interface index.
    pub interface: u32,
    /// Socket cookie.
    pub cookie: [u32; 2],
}

/// Dump request body (struct inet_diag_req_v2).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, IntoBytes, Immutable, KnownLayout)]
pub struct InetDiagReqV2 {
    /// Address family.
    pub family: u8,
    /// IP protocol number.
    pub protocol: u8,
    /// Requested extensions bitmask.
    pub ext: u8,
    /// Padding.
    pub pad: u8,
    /// TCP state bitmask.
    pub states: u32,
    /// Match-all socket id.
    pub id: InetDiagSockId,
}

/// One dump selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpRequest {
    /// Address family.
    pub family: AddressFamily,
    /// Transport protocol.
    pub transport: Transport,
    /// `idiag_ext` bitmask.
    pub extensions: u8,
    /// `idiag_states` bitmask.
    pub states: u32,
}

impl DumpRequest {
    /// Select every established and listening socket of one table, with
    /// every extension.
    pub fn new(family: AddressFamily, transport: Transport) -> Self {
        Self {
            family,
            transport,
            extensions: InetExtension::combine(&InetExtension::ALL),
            states: TcpState::combine(&[TcpState::Established, TcpState::Listen]),
        }
    }

    /// Set the state bitmask.
    pub fn states(mut self, states: u32) -> Self {
        self.states = states;
        self
    }

    /// Set the extension bitmask.
    pub fn extensions(mut self, extensions: u8) -> Self {
        self.extensions = extensions;
        self
    }
}

/// Build the `SOCK_DIAG_BY_FAMILY` dump message for `request`.
pub fn build_inet_diag_request(seq: u32, pid: u32, request: &DumpRequest) -> Vec<u8> {
    let body = InetDiagReqV2 {
        family: request.family as u8,
        protocol: request.transport.number(),
        ext: request.extensions,
        pad: 0,
        states: request.states,
        id: InetDiagSockId::default(),
    };

    dump_request(SOCK_DIAG_BY_FAMILY, seq, pid, body.as_bytes())
}

/// Fixed header of each dump response (struct inet_diag_msg).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InetDiagMsg {
    family: u8,
    state: u8,
    timer: u8,
    retrans: u8,
    sport: u16,
    dport: u16,
    src: [u8; 16],
    dst: [u8; 16],
    interface: u32,
    cookie: u64,
    expires: u32,
    rqueue: u32,
    wqueue: u32,
    uid: u32,
    inode: u32,
}

impl FromNetlink for InetDiagMsg {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        Ok(Self {
            family: parse_u8(input)?,
            state: parse_u8(input)?,
            timer: parse_u8(input)?,
            retrans: parse_u8(input)?,
            sport: parse_u16_be(input)?,
            dport: parse_u16_be(input)?,
            src: parse_addr16(input)?,
            dst: parse_addr16(input)?,
            interface: parse_u32_ne(input)?,
            cookie: parse_u64_ne(input)?,
            expires: parse_u32_ne(input)?,
            rqueue: parse_u32_ne(input)?,
            wqueue: parse_u32_ne(input)?,
            uid: parse_u32_ne(input)?,
            inode: parse_u32_ne(input)?,
        })
    }
}

fn ip_from(family: AddressFamily, raw: &[u8; 16]) -> IpAddr {
    match family {
        AddressFamily::Inet => IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])),
        AddressFamily::Inet6 => IpAddr::V6(Ipv6Addr::from(*raw)),
    }
}

fn parse_meminfo(data: &[u8]) -> Option<MemInfo> {
    Some(MemInfo {
        rmem: u32_at(data, 0)?,
        wmem: u32_at(data, 4)?,
        fmem: u32_at(data, 8)?,
        tmem: u32_at(data, 12)?,
    })
}

fn parse_vegas(data: &[u8]) -> Option<VegasInfo> {
    Some(VegasInfo {
        enabled: u32_at(data, 0)?,
        rtt_count: u32_at(data, 4)?,
        rtt: u32_at(data, 8)?,
        min_rtt: u32_at(data, 12)?,
    })
}

fn parse_tcp_info(data: &[u8]) -> Option<TcpInfo> {
    if data.len() < TcpInfo::MIN_LEN {
        return None;
    }

    Some(TcpInfo {
        state: data[0],
        ca_state: data[1],
        retransmits: data[2],
        probes: data[3],
        backoff: data[4],
        rto: u32_at(data, 8)?,
        ato: u32_at(data, 12)?,
        snd_mss: u32_at(data, 16)?,
        rcv_mss: u32_at(data, 20)?,
        unacked: u32_at(data, 24)?,
        lost: u32_at(data, 32)?,
        retrans: u32_at(data, 36)?,
        pmtu: u32_at(data, 60)?,
        rtt: u32_at(data, 68)?,
        rttvar: u32_at(data, 72)?,
        snd_ssthresh: u32_at(data, 76)?,
        snd_cwnd: u32_at(data, 80)?,
        total_retrans: u32_at(data, 100)?,
    })
}

/// Decode one `inet_diag_msg` payload and its attributes into `rec`.
///
/// `rec` must already be reset; its diagnostic buffers are reused.
pub fn fill_record(rec: &mut SocketRecord, payload: &[u8]) -> Result<()> {
    let (msg, attrs) = InetDiagMsg::from_prefix(payload)?;
    let family = AddressFamily::from_u8(msg.family).ok_or_else(|| {
        Error::InvalidMessage(format!("unexpected address family {}", msg.family))
    })?;

    rec.family = family;
    rec.state = TcpState::from_u8(msg.state);
    rec.timer = TimerKind::from_raw(u32::from(msg.timer));
    rec.timer_deadline = u64::from(msg.expires);
    rec.retransmits = u32::from(msg.retrans);
    rec.local = Endpoint::new(ip_from(family, &msg.src), msg.sport);
    rec.remote = Endpoint::new(ip_from(family, &msg.dst), msg.dport);
    rec.interface = msg.interface;
    rec.sock_ptr = msg.cookie;
    rec.rx_queue = msg.rqueue;
    rec.tx_queue = msg.wqueue;
    rec.uid = msg.uid;
    rec.inode = u64::from(msg.inode);

    let is_tcp = rec.transport == Transport::Tcp;
    let diag = rec.diag.get_or_insert_with(DiagExtras::default);

    for attr in AttrIter::new(attrs) {
        let (kind, data) = attr?;
        match kind {
            k if k == InetExtension::MemInfo.attr_type() => diag.meminfo = parse_meminfo(data),
            k if k == InetExtension::Info.attr_type() && is_tcp => {
                diag.tcp_info = parse_tcp_info(data)
            }
            k if k == InetExtension::VegasInfo.attr_type() => diag.vegas = parse_vegas(data),
            k if k == InetExtension::Cong.attr_type() => {
                diag.congestion = Some(get::string(data)?.to_string())
            }
            k if k == InetExtension::Tos.attr_type() => diag.tos = Some(get::u8(data)?),
            k if k == InetExtension::TClass.attr_type() => diag.tclass = Some(get::u8(data)?),
            k if k == InetExtension::SkMemInfo.attr_type() => {
                diag.skmem.clear();
                diag.skmem.extend(get::u32_array(data));
            }
            k if k == InetExtension::Shutdown.attr_type() => diag.shutdown = Some(get::u8(data)?),
            _ => {}
        }
    }

    Ok(())
}

/// Decode the dump stream from `src` into pooled records.
///
/// Each decoded record is published as `Some(record)`; `NLMSG_DONE` is
/// published as `None`. Any receive failure or kernel error ends the task
/// without a sentinel.
pub async fn produce_records<S: DatagramSource>(
    src: &mut S,
    request: DumpRequest,
    mut pool: mpsc::Receiver<SocketRecord>,
    out: mpsc::Sender<Option<SocketRecord>>,
    recv_buffer: usize,
) -> Result<()> {
    let mut buf = BytesMut::zeroed(recv_buffer);
    let mut spare: Option<SocketRecord> = None;

    loop {
        let n = read_datagram(src, &mut buf)
            .await
            .map_err(|e| Error::DumpAborted(e.to_string()))?;

        for frame in Frames::new(&buf[..n]) {
            match frame? {
                Frame::Done => {
                    out.send(None)
                        .await
                        .map_err(|_| Error::DumpAborted("consumer went away".into()))?;
                    return Ok(());
                }
                Frame::Data {
                    kind: SOCK_DIAG_BY_FAMILY | TCPDIAG_GETSOCK,
                    payload,
                } => {
                    let mut rec = match spare.take() {
                        Some(rec) => rec,
                        None => pool
                            .recv()
                            .await
                            .ok_or_else(|| Error::DumpAborted("record pool closed".into()))?,
                    };
                    rec.reset(request.family, request.transport);

                    if let Err(e) = fill_record(&mut rec, payload) {
                        tracing::debug!(error = %e, "skipping malformed diag message");
                        spare = Some(rec);
                        continue;
                    }

                    out.send(Some(rec))
                        .await
                        .map_err(|_| Error::DumpAborted("consumer went away".into()))?;
                }
                _ => {}
            }
        }
    }
}

/// Drive one dump over an already-requested source and collect its records.
///
/// `pool_depth` records circulate between the producer and this consumer;
/// each record kept in the table is replaced in the pool by the record it
/// displaced or, failing that, a fresh one.
pub async fn collect_dump<S>(
    mut src: S,
    request: DumpRequest,
    pool_depth: usize,
    recv_buffer: usize,
) -> Result<SocketTable>
where
    S: DatagramSource + Send + 'static,
{
    let depth = pool_depth.max(1);
    let (pool_tx, pool_rx) = mpsc::channel(depth);
    for _ in 0..depth {
        pool_tx
            .send(SocketRecord::new(request.family, request.transport))
            .await
            .map_err(|_| Error::DumpAborted("record pool closed".into()))?;
    }
    let (out_tx, out_rx) = mpsc::channel(1);

    let producer = tokio::spawn(async move {
        produce_records(&mut src, request, pool_rx, out_tx, recv_buffer).await
    });

    let mut stream = ReceiverStream::new(out_rx);
    let mut table = SocketTable::new(request.family, request.transport);
    let mut completed = false;

    while let Some(item) = stream.next().await {
        let Some(rec) = item else {
            completed = true;
            break;
        };
        let spare = table
            .insert(rec)
            .unwrap_or_else(|| SocketRecord::new(request.family, request.transport));
        // Fails only once the producer has exited.
        let _ = pool_tx.try_send(spare);
    }
    drop(stream);

    match producer.await {
        Ok(Ok(())) if completed => {
            tracing::trace!(
                family = ?request.family,
                transport = request.transport.name(),
                records = table.len(),
                "diag dump complete"
            );
            Ok(table)
        }
        Ok(Ok(())) => Err(Error::DumpAborted("dump ended without completion".into())),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(Error::DumpAborted(e.to_string())),
    }
}

/// Open a sock_diag socket, request one dump and collect it.
///
/// Failing to open the socket is a bootstrap failure; everything after that
/// aborts only this dump.
pub async fn dump_sockets(
    request: DumpRequest,
    pool_depth: usize,
    recv_buffer: usize,
) -> Result<SocketTable> {
    let socket = NetlinkSocket::new(Protocol::SockDiag)
        .map_err(|e| Error::Bootstrap(format!("cannot open sock_diag socket: {}", e)))?;
    let msg = build_inet_diag_request(socket.next_seq(), socket.pid(), &request);
    socket
        .send(&msg)
        .await
        .map_err(|e| Error::DumpAborted(e.to_string()))?;
    collect_dump(socket, request, pool_depth, recv_buffer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{NlAttr, nla_align};
    use crate::netlink::message::tests::{done, framed};
    use crate::netlink::message::{NLM_F_DUMP, NLM_F_REQUEST, NLMSG_ERROR, NLMSG_HDRLEN, NlMsgHdr};
    use crate::netlink::socket::tests::FakeSource;

    struct Msg<'a> {
        state: TcpState,
        src: [u8; 4],
        sport: u16,
        dst: [u8; 4],
        dport: u16,
        inode: u32,
        attrs: &'a [(u16, &'a [u8])],
    }

    fn diag_payload(m: &Msg) -> Vec<u8> {
        let mut p = vec![libc::AF_INET as u8, m.state as u8, 2, 1];
        p.extend_from_slice(&m.sport.to_be_bytes());
        p.extend_from_slice(&m.dport.to_be_bytes());
        let mut src = [0u8; 16];
        src[..4].copy_from_slice(&m.src);
        let mut dst = [0u8; 16];
        dst[..4].copy_from_slice(&m.dst);
        p.extend_from_slice(&src);
        p.extend_from_slice(&dst);
        p.extend_from_slice(&3u32.to_ne_bytes()); // if
        p.extend_from_slice(&0xdeadu64.to_ne_bytes()); // cookie
        p.extend_from_slice(&1500u32.to_ne_bytes()); // expires
        p.extend_from_slice(&5u32.to_ne_bytes()); // rqueue
        p.extend_from_slice(&6u32.to_ne_bytes()); // wqueue
        p.extend_from_slice(&1000u32.to_ne_bytes()); // uid
        p.extend_from_slice(&m.inode.to_ne_bytes());
        assert_eq!(p.len(), INET_DIAG_MSG_LEN);
        for (kind, data) in m.attrs {
            p.extend_from_slice(NlAttr::new(*kind, data.len()).as_bytes());
            p.extend_from_slice(data);
            p.resize(nla_align(p.len()), 0);
        }
        p
    }

    fn estab(inode: u32, sport: u16) -> Vec<u8> {
        framed(
            SOCK_DIAG_BY_FAMILY,
            &diag_payload(&Msg {
                state: TcpState::Established,
                src: [127, 0, 0, 1],
                sport,
                dst: [10, 0, 0, 9],
                dport: 443,
                inode,
                attrs: &[],
            }),
        )
    }

    fn request() -> DumpRequest {
        DumpRequest::new(AddressFamily::Inet, Transport::Tcp)
    }

    #[test]
    fn test_request_layout() {
        assert_eq!(std::mem::size_of::<InetDiagSockId>(), 48);
        assert_eq!(std::mem::size_of::<InetDiagReqV2>(), 56);

        let req = build_inet_diag_request(9, 42, &request());
        assert_eq!(req.len(), NLMSG_HDRLEN + 56);
        let hdr = NlMsgHdr::from_bytes(&req).unwrap();
        assert_eq!(hdr.nlmsg_type, SOCK_DIAG_BY_FAMILY);
        assert_eq!(hdr.nlmsg_flags, NLM_F_REQUEST | NLM_F_DUMP);
        assert_eq!(hdr.nlmsg_len as usize, req.len());

        let body = &req[NLMSG_HDRLEN..];
        assert_eq!(body[0], libc::AF_INET as u8);
        assert_eq!(body[1], libc::IPPROTO_TCP as u8);
        assert_eq!(body[2], 0xff);
        assert_eq!(
            u32::from_ne_bytes([body[4], body[5], body[6], body[7]]),
            (1 << 1) | (1 << 10)
        );
        assert!(body[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fill_record_header_and_attrs() {
        let mut skmem = Vec::new();
        for w in 1u32..=9 {
            skmem.extend_from_slice(&w.to_ne_bytes());
        }
        let mut meminfo = Vec::new();
        for w in [10u32, 20, 30, 40] {
            meminfo.extend_from_slice(&w.to_ne_bytes());
        }
        let payload = diag_payload(&Msg {
            state: TcpState::Listen,
            src: [0, 0, 0, 0],
            sport: 8080,
            dst: [0, 0, 0, 0],
            dport: 0,
            inode: 4711,
            attrs: &[
                (InetExtension::MemInfo.attr_type(), &meminfo),
                (InetExtension::Cong.attr_type(), b"cubic\0"),
                (99, &[1, 2, 3]),
                (InetExtension::Tos.attr_type(), &[0x10]),
                (InetExtension::SkMemInfo.attr_type(), &skmem),
                (InetExtension::Shutdown.attr_type(), &[3]),
            ],
        });

        let mut rec = SocketRecord::new(AddressFamily::Inet, Transport::Tcp);
        fill_record(&mut rec, &payload).unwrap();

        assert_eq!(rec.state, TcpState::Listen);
        assert_eq!(rec.local.to_string(), "0.0.0.0:8080");
        assert_eq!(rec.inode, 4711);
        assert_eq!(rec.timer, TimerKind::Keepalive);
        assert_eq!(rec.timer_deadline, 1500);
        assert_eq!(rec.retransmits, 1);
        assert_eq!(rec.interface, 3);
        assert_eq!(rec.sock_ptr, 0xdead);
        assert_eq!((rec.rx_queue, rec.tx_queue, rec.uid), (5, 6, 1000));

        let diag = rec.diag.as_ref().unwrap();
        assert_eq!(diag.meminfo.map(|m| m.tmem), Some(40));
        assert_eq!(diag.congestion.as_deref(), Some("cubic"));
        assert_eq!(diag.tos, Some(0x10));
        assert_eq!(diag.skmem, (1..=9).collect::<Vec<u32>>());
        assert_eq!(diag.shutdown, Some(3));
        assert!(diag.tcp_info.is_none());
    }

    #[test]
    fn test_tcp_info_offsets() {
        let mut info = vec![0u8; TcpInfo::MIN_LEN];
        info[0] = TcpState::Established as u8;
        info[8..12].copy_from_slice(&204000u32.to_ne_bytes());
        info[68..72].copy_from_slice(&1234u32.to_ne_bytes());
        info[80..84].copy_from_slice(&10u32.to_ne_bytes());
        info[100..104].copy_from_slice(&7u32.to_ne_bytes());

        let parsed = parse_tcp_info(&info).unwrap();
        assert_eq!(parsed.rto, 204000);
        assert_eq!(parsed.rtt, 1234);
        assert_eq!(parsed.snd_cwnd, 10);
        assert_eq!(parsed.total_retrans, 7);
        assert!(parse_tcp_info(&info[..50]).is_none());
    }

    #[test]
    fn test_short_header_is_rejected() {
        let mut rec = SocketRecord::new(AddressFamily::Inet, Transport::Tcp);
        assert!(fill_record(&mut rec, &[0u8; 40]).is_err());
    }

    #[tokio::test]
    async fn test_producer_ends_with_sentinel() {
        let mut datagram = estab(1, 40000);
        datagram.extend(estab(2, 40001));
        let mut src = FakeSource::new(vec![datagram, done()]);

        let (pool_tx, pool_rx) = mpsc::channel(4);
        for _ in 0..4 {
            pool_tx.send(SocketRecord::default()).await.unwrap();
        }
        let (out_tx, mut out_rx) = mpsc::channel(4);

        produce_records(&mut src, request(), pool_rx, out_tx, 4096)
            .await
            .unwrap();

        assert_eq!(out_rx.recv().await.unwrap().map(|r| r.inode), Some(1));
        assert_eq!(out_rx.recv().await.unwrap().map(|r| r.inode), Some(2));
        assert!(out_rx.recv().await.unwrap().is_none());
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_recycles_a_small_pool() {
        let mut first = estab(1, 40000);
        first.extend(estab(2, 40001));
        first.extend(estab(1, 40002));
        let second = estab(3, 40003);
        let src = FakeSource::new(vec![first, second, done()]);

        let table = collect_dump(src, request(), 1, 4096).await.unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1).unwrap().local.port, 40002);
        assert_eq!(table.get(3).unwrap().remote.to_string(), "10.0.0.9:443");
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let mut datagram = framed(SOCK_DIAG_BY_FAMILY, &[0u8; 20]);
        datagram.extend(estab(5, 40000));
        let src = FakeSource::new(vec![datagram, done()]);

        let table = collect_dump(src, request(), 2, 4096).await.unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get(5).is_some());
    }

    #[tokio::test]
    async fn test_kernel_error_aborts_dump() {
        let err = framed(NLMSG_ERROR, &(-13i32).to_ne_bytes());
        let src = FakeSource::new(vec![estab(1, 40000), err]);

        let result = collect_dump(src, request(), 2, 4096).await;
        assert!(result.unwrap_err().is_permission_denied());
    }

    #[tokio::test]
    async fn test_stream_without_done_aborts() {
        let src = FakeSource::new(vec![estab(1, 40000)]);

        let result = collect_dump(src, request(), 2, 4096).await;
        assert!(matches!(result, Err(Error::DumpAborted(_))));
    }
}
