//! Netlink attribute (nlattr) handling.

use super::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to NLA_ALIGNTO boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4; // nla_align(size_of::<NlAttr>())

/// Netlink attribute header (mirrors struct nlattr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Length including header.
    pub nla_len: u16,
    /// Attribute type.
    pub nla_type: u16,
}

/// Clears the nested and byte-order flag bits of `nla_type`.
const NLA_TYPE_MASK: u16 = 0x3fff;

impl NlAttr {
    /// Create a new attribute header.
    pub fn new(attr_type: u16, data_len: usize) -> Self {
        Self {
            nla_len: (NLA_HDRLEN + data_len) as u16,
            nla_type: attr_type,
        }
    }

    /// Get the attribute type without flags.
    pub fn kind(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Iterator over a TLV attribute chain.
///
/// The cursor advances by each attribute's declared length, then over the zero
/// padding that brings it back to 4-byte alignment. A header whose declared
/// length overruns the buffer yields one error and ends the walk.
pub struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> AttrIter<'a> {
    /// Create a new attribute iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    /// Returns (attribute type, payload data).
    type Item = Result<(u16, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLA_HDRLEN {
            self.data = &[];
            return None;
        }

        let attr = match NlAttr::from_bytes(self.data) {
            Ok(a) => a,
            Err(e) => return Some(Err(e)),
        };

        let len = attr.nla_len as usize;
        if len < NLA_HDRLEN || len > self.data.len() {
            self.data = &[];
            return Some(Err(Error::InvalidAttribute(format!(
                "attribute {} declares length {}",
                attr.kind(),
                len
            ))));
        }

        let payload = &self.data[NLA_HDRLEN..len];
        let kind = attr.kind();
        self.data = &self.data[len..];

        let pad = (nla_align(len) - len).min(self.data.len());
        if self.data[..pad].iter().all(|&b| b == 0) {
            self.data = &self.data[pad..];
        }

        Some(Ok((kind, payload)))
    }
}

/// Helper functions for extracting typed values from attribute payloads.
pub mod get {
    use super::*;

    /// Extract a u8 value.
    pub fn u8(data: &[u8]) -> Result<u8> {
        data.first()
            .copied()
            .ok_or_else(|| Error::InvalidAttribute("empty u8 attribute".into()))
    }

    /// Extract every whole native-endian u32 in the payload.
    pub fn u32_array(data: &[u8]) -> Vec<u32> {
        data.chunks_exact(4)
            .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Extract a null-terminated string.
    pub fn string(data: &[u8]) -> Result<&str> {
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        std::str::from_utf8(&data[..len])
            .map_err(|e| Error::InvalidAttribute(format!("invalid UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(kind: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = NlAttr::new(kind, payload.len()).as_bytes().to_vec();
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_skips_padding_between_attributes() {
        let mut buf = attr(4, b"cubic\0");
        buf.resize(nla_align(buf.len()), 0);
        buf.extend(attr(5, &[0x10]));

        let attrs: Vec<_> = AttrIter::new(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(get::string(attrs[0].1).unwrap(), "cubic");
        assert_eq!(attrs[1], (5, &[0x10][..]));
    }

    #[test]
    fn test_overrun_is_an_error() {
        let mut buf = attr(7, &[0; 8]);
        buf[0..2].copy_from_slice(&64u16.to_ne_bytes());

        let mut iter = AttrIter::new(&buf);
        assert!(matches!(iter.next(), Some(Err(Error::InvalidAttribute(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_unpadded_final_attribute() {
        let buf = attr(8, &[3]);
        let attrs: Vec<_> = AttrIter::new(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(attrs, vec![(8, &[3][..])]);
    }

    #[test]
    fn test_length_with_zero_low_byte_is_not_padding() {
        let payload = vec![0xabu8; 252];
        let mut buf = attr(7, &payload);
        buf.extend(attr(8, &[1]));

        let attrs: Vec<_> = AttrIter::new(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].1.len(), 252);
    }

    #[test]
    fn test_u32_array_ignores_partial_word() {
        let mut data = Vec::new();
        data.extend_from_slice(&7u32.to_ne_bytes());
        data.extend_from_slice(&9u32.to_ne_bytes());
        data.push(1);
        assert_eq!(get::u32_array(&data), vec![7, 9]);
    }
}
