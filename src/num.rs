//! Payload encoding for the numeric types. Integers travel as big-endian
//! bytes with the redundant leading bytes removed: zeros for unsigned and
//! non-negative values, `0xFF` for negative values (keeping one byte ahead of
//! a sign flip). Floats travel as their IEEE-754 bit pattern in little-endian
//! byte order with the trailing zero bytes removed. In both cases the empty
//! payload stands for zero, which is what lets a default-valued field shrink
//! to nothing.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Minimal big-endian bytes of `v`. Zero encodes as the empty slice.
pub(crate) fn unsigned_bytes(v: u64, buf: &mut [u8; 8]) -> &[u8] {
  BigEndian::write_u64(buf, v);
  let skip = buf.iter().position(|&b| b != 0).unwrap_or(8);
  &buf[skip..]
}

/// Minimal two's-complement big-endian bytes of `v`. Stripping stops one byte
/// short of changing the sign of the remaining leading byte.
pub(crate) fn signed_bytes(v: i64, buf: &mut [u8; 8]) -> &[u8] {
  if v == 0 {
    return &[];
  }
  BigEndian::write_i64(buf, v);
  let mut skip = 0;
  if v > 0 {
    while skip < 7 && buf[skip] == 0x00 && buf[skip + 1] < 0x80 {
      skip += 1;
    }
  } else {
    while skip < 7 && buf[skip] == 0xFF && buf[skip + 1] >= 0x80 {
      skip += 1;
    }
  }
  &buf[skip..]
}

/// Right-aligns `payload` in a zero-filled 64 bit value. An oversized payload
/// keeps its trailing eight bytes, matching the destination-width semantics.
pub(crate) fn decode_unsigned(payload: &[u8]) -> u64 {
  if payload.is_empty() {
    return 0;
  }
  let p = if payload.len() > 8 { &payload[payload.len() - 8..] } else { payload };
  BigEndian::read_uint(p, p.len())
}

/// Like [`decode_unsigned`], but sign-extends from the high bit of the first
/// payload byte.
pub(crate) fn decode_signed(payload: &[u8]) -> i64 {
  if payload.is_empty() {
    return 0;
  }
  let p = if payload.len() > 8 { &payload[payload.len() - 8..] } else { payload };
  BigEndian::read_int(p, p.len())
}

/// Little-endian bits of `v` with trailing zero bytes removed, so `0.0` is
/// the empty payload. Note that `-0.0` keeps its sign byte.
pub(crate) fn f64_bytes(v: f64, buf: &mut [u8; 8]) -> &[u8] {
  LittleEndian::write_f64(buf, v);
  let keep = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
  &buf[..keep]
}

pub(crate) fn f32_bytes(v: f32, buf: &mut [u8; 4]) -> &[u8] {
  LittleEndian::write_f32(buf, v);
  let keep = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
  &buf[..keep]
}

/// Zero-fills the missing trailing bytes and reinterprets the bits.
pub(crate) fn decode_f64(payload: &[u8]) -> f64 {
  let mut buf = [0; 8];
  let n = payload.len().min(8);
  buf[..n].copy_from_slice(&payload[..n]);
  LittleEndian::read_f64(&buf)
}

pub(crate) fn decode_f32(payload: &[u8]) -> f32 {
  let mut buf = [0; 4];
  let n = payload.len().min(4);
  buf[..n].copy_from_slice(&payload[..n]);
  LittleEndian::read_f32(&buf)
}
