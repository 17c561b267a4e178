//! Interface address dump over NETLINK_ROUTE.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::BytesMut;

use super::attr::AttrIter;
use super::error::{Error, Result};
use super::message::{Frame, Frames, dump_request};
use super::socket::{DatagramSource, NetlinkSocket, Protocol, read_datagram};

/// RTM_GETADDR message type.
const RTM_GETADDR: u16 = 22;
/// RTM_NEWADDR message type (dump responses).
const RTM_NEWADDR: u16 = 20;

/// Size of struct ifaddrmsg.
const IFADDRMSG_LEN: usize = 8;

const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;

/// Build an RTM_GETADDR dump request for all families.
fn build_request(seq: u32, pid: u32) -> Vec<u8> {
    // ifaddrmsg: family AF_UNSPEC, prefixlen, flags, scope, index
    dump_request(RTM_GETADDR, seq, pid, &[0u8; IFADDRMSG_LEN])
}

/// Decode the address carried by one RTM_NEWADDR payload.
///
/// IFA_LOCAL is the interface's own address; IFA_ADDRESS is the peer on
/// point-to-point links and the same as IFA_LOCAL elsewhere.
fn parse_newaddr(payload: &[u8]) -> Result<Option<IpAddr>> {
    let Some(&family) = payload.first() else {
        return Err(Error::Truncated {
            expected: IFADDRMSG_LEN,
            actual: 0,
        });
    };
    let Some(attrs) = payload.get(IFADDRMSG_LEN..) else {
        return Err(Error::Truncated {
            expected: IFADDRMSG_LEN,
            actual: payload.len(),
        });
    };

    let mut local = None;
    let mut address = None;
    for attr in AttrIter::new(attrs) {
        let (kind, data) = attr?;
        let ip = match (family as i32, data.len()) {
            (libc::AF_INET, 4) => IpAddr::V4(Ipv4Addr::new(data[0], data[1], data[2], data[3])),
            (libc::AF_INET6, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(data);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => continue,
        };
        match kind {
            IFA_LOCAL => local = Some(ip),
            IFA_ADDRESS => address = Some(ip),
            _ => {}
        }
    }

    Ok(local.or(address))
}

/// Collect addresses from a dump stream until NLMSG_DONE.
async fn collect_addresses<S: DatagramSource>(src: &mut S, buf_size: usize) -> Result<Vec<IpAddr>> {
    let mut buf = BytesMut::zeroed(buf_size);
    let mut addrs = Vec::new();

    loop {
        let n = read_datagram(src, &mut buf).await?;
        for frame in Frames::new(&buf[..n]) {
            match frame? {
                Frame::Done => return Ok(addrs),
                Frame::Data {
                    kind: RTM_NEWADDR,
                    payload,
                } => {
                    if let Some(ip) = parse_newaddr(payload)? {
                        addrs.push(ip);
                    }
                }
                Frame::Data { .. } => {}
            }
        }
    }
}

/// Dump every address configured on the host's interfaces.
pub async fn interface_addresses() -> Result<Vec<IpAddr>> {
    let mut socket = NetlinkSocket::new(Protocol::Route)?;
    let request = build_request(socket.next_seq(), socket.pid());
    socket.send(&request).await?;
    let addrs = collect_addresses(&mut socket, 8192).await?;
    tracing::debug!(count = addrs.len(), "enumerated interface addresses");
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{NlAttr, nla_align};
    use crate::netlink::message::tests::{done, framed};
    use crate::netlink::message::{NLM_F_DUMP, NLM_F_REQUEST, NLMSG_ERROR, NLMSG_HDRLEN, NlMsgHdr};
    use crate::netlink::socket::tests::FakeSource;

    fn newaddr(family: u8, attrs: &[(u16, &[u8])]) -> Vec<u8> {
        let mut payload = vec![family, 24, 0, 0, 1, 0, 0, 0];
        for (kind, data) in attrs {
            payload.extend_from_slice(NlAttr::new(*kind, data.len()).as_bytes());
            payload.extend_from_slice(data);
            payload.resize(nla_align(payload.len()), 0);
        }
        framed(RTM_NEWADDR, &payload)
    }

    #[test]
    fn test_request_layout() {
        let req = build_request(7, 99);
        assert_eq!(req.len(), 24);
        let hdr = NlMsgHdr::from_bytes(&req).unwrap();
        assert_eq!(hdr.nlmsg_type, RTM_GETADDR);
        assert_eq!(hdr.nlmsg_flags, NLM_F_REQUEST | NLM_F_DUMP);
        assert_eq!(hdr.nlmsg_seq, 7);
    }

    #[test]
    fn test_prefers_ifa_local() {
        let msg = newaddr(
            libc::AF_INET as u8,
            &[(IFA_ADDRESS, &[10, 0, 0, 2]), (IFA_LOCAL, &[10, 0, 0, 1])],
        );
        let ip = parse_newaddr(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(ip, Some("10.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_collects_until_done() {
        let mut datagram = newaddr(libc::AF_INET as u8, &[(IFA_ADDRESS, &[127, 0, 0, 1])]);
        let mut v6 = [0u8; 16];
        v6[15] = 1;
        datagram.extend(newaddr(libc::AF_INET6 as u8, &[(IFA_ADDRESS, &v6)]));
        let mut src = FakeSource::new(vec![datagram, done()]);
        let addrs = collect_addresses(&mut src, 4096).await.unwrap();
        assert_eq!(
            addrs,
            vec![
                "127.0.0.1".parse::<IpAddr>().unwrap(),
                "::1".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn test_kernel_error_aborts() {
        let err = framed(NLMSG_ERROR, &(-1i32).to_ne_bytes());
        let mut src = FakeSource::new(vec![err]);
        let result = collect_addresses(&mut src, 4096).await;
        assert!(result.unwrap_err().is_permission_denied());
    }
}
