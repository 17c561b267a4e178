//! Async netlink socket and the peek-then-read receive loop.

use std::future::Future;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::error::Result;

/// A source of netlink datagrams that can be peeked before being consumed.
pub trait DatagramSource {
    /// Copy the next datagram into `buf` and return the number of bytes copied.
    ///
    /// With `peek` set the datagram stays queued. A datagram larger than `buf`
    /// is truncated, so a return value equal to `buf.len()` means "maybe more".
    fn recv_datagram(
        &mut self,
        buf: &mut [u8],
        peek: bool,
    ) -> impl Future<Output = Result<usize>> + Send;
}

/// Receive one whole datagram into `buf`, growing it as needed.
///
/// The datagram is peeked first; while the peek fills the buffer completely
/// the buffer is doubled and peeked again. Only then is the datagram read for
/// real. Returns the datagram length; `buf[..len]` holds the bytes.
pub async fn read_datagram<S: DatagramSource>(src: &mut S, buf: &mut BytesMut) -> Result<usize> {
    if buf.is_empty() {
        buf.resize(super::message::NLMSG_HDRLEN, 0);
    }

    loop {
        let n = src.recv_datagram(&mut buf[..], true).await?;
        if n < buf.len() {
            break;
        }
        let grown = buf.len() * 2;
        tracing::trace!(from = buf.len(), to = grown, "growing netlink receive buffer");
        buf.resize(grown, 0);
    }

    let n = src.recv_datagram(&mut buf[..], false).await?;
    tracing::trace!(len = n, "received netlink datagram");
    Ok(n)
}

/// Netlink protocol families used by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Socket diagnostics (INET_DIAG dumps).
    SockDiag,
    /// Routing (interface address dumps).
    Route,
}

impl Protocol {
    fn as_isize(self) -> isize {
        match self {
            Protocol::SockDiag => protocols::NETLINK_SOCK_DIAG,
            Protocol::Route => protocols::NETLINK_ROUTE,
        }
    }
}

/// Async netlink socket.
pub struct NetlinkSocket {
    /// The underlying async file descriptor.
    fd: AsyncFd<Socket>,
    /// Sequence number counter.
    seq: AtomicU32,
    /// Local port ID (assigned by kernel).
    pid: u32,
}

impl NetlinkSocket {
    /// Create a new netlink socket for the given protocol.
    pub fn new(protocol: Protocol) -> Result<Self> {
        let mut socket = Socket::new(protocol.as_isize())?;
        socket.set_non_blocking(true)?;

        // Bind to get a port ID
        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        let pid = addr.port_number();

        let fd = AsyncFd::new(socket)?;

        Ok(Self {
            fd,
            seq: AtomicU32::new(1),
            pid,
        })
    }

    /// Get the next sequence number.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Get the local port ID.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Send a message.
    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;

            match guard.try_io(|inner| inner.get_ref().send(msg, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive into `buf`, optionally leaving the datagram queued.
    pub async fn recv_into(&self, buf: &mut [u8], peek: bool) -> Result<usize> {
        let flags = if peek { libc::MSG_PEEK } else { 0 };

        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;

            match guard.try_io(|inner| {
                let mut window: &mut [u8] = &mut buf[..];
                inner.get_ref().recv(&mut window, flags)
            }) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
    }
}

impl DatagramSource for NetlinkSocket {
    async fn recv_datagram(&mut self, buf: &mut [u8], peek: bool) -> Result<usize> {
        self.recv_into(buf, peek).await
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}
