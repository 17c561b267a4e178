//! Netlink framing for dump requests and their multipart replies.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::error::{Error, Result};

/// Netlink message alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Align a length to NLMSG_ALIGNTO boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Error or acknowledgement.
pub const NLMSG_ERROR: u16 = 2;
/// End of a multipart reply.
pub const NLMSG_DONE: u16 = 3;

pub const NLM_F_REQUEST: u16 = 0x01;
/// NLM_F_ROOT | NLM_F_MATCH.
pub const NLM_F_DUMP: u16 = 0x300;

/// struct nlmsghdr.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    pub nlmsg_len: u32,
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
    pub nlmsg_seq: u32,
    /// Sending port ID.
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    /// Header for a message carrying `body_len` bytes after the header.
    pub fn new(msg_type: u16, flags: u16, body_len: usize) -> Self {
        Self {
            nlmsg_len: (NLMSG_HDRLEN + body_len) as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse a header from the front of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Build a `REQUEST | DUMP` message of `msg_type` followed by `body`.
pub fn dump_request(msg_type: u16, seq: u32, pid: u32, body: &[u8]) -> Vec<u8> {
    let mut hdr = NlMsgHdr::new(msg_type, NLM_F_REQUEST | NLM_F_DUMP, body.len());
    hdr.nlmsg_seq = seq;
    hdr.nlmsg_pid = pid;

    let mut buf = Vec::with_capacity(hdr.nlmsg_len as usize);
    buf.extend_from_slice(hdr.as_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Errno carried by an NLMSG_ERROR payload, 0 for an acknowledgement.
///
/// Only the leading errno is required; some kernels truncate the echoed header.
pub fn ack_errno(payload: &[u8]) -> Result<i32> {
    match payload.get(..4) {
        Some(b) => Ok(i32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(Error::Truncated {
            expected: 4,
            actual: payload.len(),
        }),
    }
}

/// One message of a dump reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// NLMSG_DONE: the dump is complete.
    Done,
    /// Any other message type.
    Data { kind: u16, payload: &'a [u8] },
}

/// Walks the messages of one received datagram.
///
/// Acknowledgements are skipped and a kernel error becomes `Err`. A message
/// whose length runs past the datagram ends the walk with an error.
pub struct Frames<'a> {
    data: &'a [u8],
}

impl<'a> Frames<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<Frame<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let header = NlMsgHdr::from_bytes(self.data).ok()?;
            let len = header.nlmsg_len as usize;
            if len < NLMSG_HDRLEN || len > self.data.len() {
                self.data = &[];
                return Some(Err(Error::InvalidMessage(format!(
                    "invalid message length: {}",
                    len
                ))));
            }

            let payload = &self.data[NLMSG_HDRLEN..len];
            self.data = self.data.get(nlmsg_align(len)..).unwrap_or_default();

            return match header.nlmsg_type {
                NLMSG_DONE => Some(Ok(Frame::Done)),
                NLMSG_ERROR => match ack_errno(payload) {
                    Ok(0) => continue,
                    Ok(errno) => Some(Err(Error::from_errno(errno))),
                    Err(e) => Some(Err(e)),
                },
                kind => Some(Ok(Frame::Data { kind, payload })),
            };
        }
    }
}
