//! Parser combinators for fixed-layout kernel structures.
//!
//! Every decoder reads declared offsets with a stated byte order and fails
//! on short input instead of reinterpreting memory.

use winnow::binary::le_u8;
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::take;

use super::error::{Error, Result};

/// Result type for winnow parsers.
pub type PResult<T> = core::result::Result<T, winnow::error::ErrMode<ContextError>>;

/// Trait for types that can be parsed from netlink wire format.
pub trait FromNetlink: Sized {
    /// Parse from a mutable byte slice reference.
    /// The slice is advanced past the consumed bytes.
    fn parse(input: &mut &[u8]) -> PResult<Self>;

    /// Parse from the front of a byte slice, ignoring any trailing bytes.
    fn from_prefix(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut input = data;
        let value = Self::parse(&mut input).map_err(|e| Error::Parse(format!("{:?}", e)))?;
        Ok((value, input))
    }
}

/// Parse a u8.
pub fn parse_u8(input: &mut &[u8]) -> PResult<u8> {
    le_u8.parse_next(input)
}

/// Parse a u16 in network byte order.
pub fn parse_u16_be(input: &mut &[u8]) -> PResult<u16> {
    let b: &[u8] = take(2usize).parse_next(input)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

/// Parse a u32 in native endian.
pub fn parse_u32_ne(input: &mut &[u8]) -> PResult<u32> {
    let b: &[u8] = take(4usize).parse_next(input)?;
    Ok(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
}

/// Parse a u64 in native endian.
pub fn parse_u64_ne(input: &mut &[u8]) -> PResult<u64> {
    let b: &[u8] = take(8usize).parse_next(input)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(b);
    Ok(u64::from_ne_bytes(word))
}

/// Parse a 16-byte address array (network order, IPv4 uses the first 4 bytes).
pub fn parse_addr16(input: &mut &[u8]) -> PResult<[u8; 16]> {
    let b: &[u8] = take(16usize).parse_next(input)?;
    let mut addr = [0u8; 16];
    addr.copy_from_slice(b);
    Ok(addr)
}

/// Read a native-endian u32 at a fixed offset of a kernel struct.
pub fn u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let b = data.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_is_network_order() {
        let mut input: &[u8] = &[0x1f, 0x90, 0xff];
        assert_eq!(parse_u16_be(&mut input).unwrap(), 8080);
        assert_eq!(input, &[0xff]);
    }

    #[test]
    fn test_short_input_fails() {
        let mut input: &[u8] = &[1, 2, 3];
        assert!(parse_u32_ne(&mut input).is_err());
        assert!(parse_addr16(&mut input).is_err());
    }

    #[test]
    fn test_offset_readers_bounds() {
        let data = 42u32.to_ne_bytes();
        assert_eq!(u32_at(&data, 0), Some(42));
        assert_eq!(u32_at(&data, 1), None);
    }
}
