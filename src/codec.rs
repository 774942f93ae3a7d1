//! Fixed-width value encoding for the ordered-log index.
//!
//! Each value is 16 bytes:
//!
//! ```text
//! [offset: zigzag varint, zero-padded to 8 bytes]
//! [length: zigzag varint, zero-padded to 8 bytes]
//! ```
//!
//! The varint is the little-endian base-128 encoding of the zigzag-mapped
//! signed value, byte-compatible with Go's `binary.PutVarint`. A varint that
//! needs more than 8 bytes cannot be stored, which caps offsets and lengths
//! at `2^55 - 1`.

use crate::entry::Span;
use crate::error::{BlobError, Result};

/// Width of one encoded half.
pub const SLOT_SIZE: usize = 8;

/// Width of an encoded value.
pub const VALUE_SIZE: usize = 2 * SLOT_SIZE;

/// Largest value that still fits into one slot.
pub const MAX_SLOT_VALUE: u64 = (1 << 55) - 1;

const DATA_BITS_MASK: u8 = 0x7F;
const CONTINUATION_BIT_MASK: u8 = 0x80;

/// Longest varint a 64-bit value can produce.
const MAX_VARINT_LEN: usize = 10;

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append the signed varint encoding of `value` to `buf`, returning the
/// number of bytes written.
pub fn put_varint(value: i64, buf: &mut Vec<u8>) -> usize {
    let mut val = zigzag(value);
    let start = buf.len();
    while val >= CONTINUATION_BIT_MASK as u64 {
        buf.push((val as u8) | CONTINUATION_BIT_MASK);
        val >>= 7;
    }
    buf.push(val as u8);
    buf.len() - start
}

/// Decode a signed varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// buffer ends mid-varint or the varint overflows 64 bits.
pub fn read_varint(buf: &[u8]) -> Option<(i64, usize)> {
    let mut result: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        let bits = (byte & DATA_BITS_MASK) as u64;
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return None;
        }
        result |= bits << (7 * i);
        if byte & CONTINUATION_BIT_MASK == 0 {
            return Some((unzigzag(result), i + 1));
        }
    }
    None
}

fn encode_slot(value: u64, slot: &mut [u8]) -> Result<()> {
    if value > MAX_SLOT_VALUE {
        return Err(BlobError::ValueOverflow(value));
    }
    let mut buf = Vec::with_capacity(SLOT_SIZE);
    put_varint(value as i64, &mut buf);
    slot[..buf.len()].copy_from_slice(&buf);
    Ok(())
}

fn decode_slot(slot: &[u8], what: &str) -> Result<u64> {
    let (value, _) = read_varint(slot)
        .ok_or_else(|| BlobError::CorruptValue(format!("unterminated {what} varint")))?;
    u64::try_from(value).map_err(|_| BlobError::CorruptValue(format!("negative {what}: {value}")))
}

/// Encode an offset and length into the 16-byte index value.
pub fn encode_span(offset: u64, length: u64) -> Result<[u8; VALUE_SIZE]> {
    let mut value = [0u8; VALUE_SIZE];
    encode_slot(offset, &mut value[..SLOT_SIZE])?;
    encode_slot(length, &mut value[SLOT_SIZE..])?;
    Ok(value)
}

/// Decode a 16-byte index value. Each half is decoded independently.
pub fn decode_span(value: &[u8]) -> Result<Span> {
    if value.len() < VALUE_SIZE {
        return Err(BlobError::CorruptValue(format!(
            "expected {VALUE_SIZE} bytes, got {}",
            value.len()
        )));
    }
    let offset = decode_slot(&value[..SLOT_SIZE], "offset")?;
    let length = decode_slot(&value[SLOT_SIZE..VALUE_SIZE], "length")?;
    Ok(Span::new(offset, length))
}
