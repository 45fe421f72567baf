//! Unsigned LEB128-style varints: seven payload bits per byte, least significant
//! group first, high bit set on every byte but the last.

use crate::{Error, Result};
use bytes::BufMut;
use num_traits::{PrimInt, Unsigned};

/// Longest encoding of a u64.
pub const MAX_LEN: usize = 10;

pub fn encoded_len(mut n: u64) -> usize {
    let mut len = 1;
    while n >= 0x80 {
        n >>= 7;
        len += 1;
    }
    len
}

pub fn put<B: BufMut>(buf: &mut B, mut n: u64) {
    while n >= 0x80 {
        buf.put_u8(n as u8 | 0x80);
        n >>= 7;
    }
    buf.put_u8(n as u8);
}

pub fn encode(n: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(n));
    put(&mut buf, n);
    buf
}

/// Decodes a u64 from the start of `buf`, returning the value and the number of
/// bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(u64, usize)> {
    decode_with_width(buf, u64::BITS)
}

/// Decodes into the integer type `T`; values wider than `T` are rejected.
pub fn decode_as<T: PrimInt + Unsigned>(buf: &[u8]) -> Result<(T, usize)> {
    let width = T::zero().count_zeros().min(u64::BITS);
    let (n, len) = decode_with_width(buf, width)?;
    let n = num_traits::cast::<u64, T>(n)
        .ok_or(Error::MalformedVarint("value overflows target width"))?;
    Ok((n, len))
}

/// Decodes a value that must fit into `bits` bits (at most 64).
pub fn decode_with_width(buf: &[u8], bits: u32) -> Result<(u64, usize)> {
    let mut value: u64 = 0;

    for (i, &byte) in buf.iter().enumerate() {
        let shift = 7 * i as u32;
        let payload = u64::from(byte & 0x7f);

        if shift >= u64::BITS || payload > u64::MAX >> shift {
            return Err(Error::MalformedVarint("value overflows target width"));
        }
        value |= payload << shift;

        if byte & 0x80 == 0 {
            // A trailing zero group adds nothing, so the encoding is not minimal.
            if i > 0 && byte == 0 {
                return Err(Error::MalformedVarint("non-minimal encoding"));
            }
            if bits < u64::BITS && value >> bits != 0 {
                return Err(Error::MalformedVarint("value overflows target width"));
            }
            return Ok((value, i + 1));
        }
    }

    Err(Error::MalformedVarint("buffer ends before the terminating byte"))
}

/// Reads a varint off the front of `buf` and advances it.
pub(crate) fn take(buf: &mut &[u8]) -> Result<u64> {
    let (n, len) = decode(buf)?;
    *buf = &buf[len..];
    Ok(n)
}
