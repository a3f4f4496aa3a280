//! Stop-bit encoded primitives.
//!
//! Integers are written 7 bits per byte, most significant group first. The top bit of a byte is
//! the stop bit: set on the last byte of the integer, clear on every byte before it. Signed
//! integers are two's complement, so bit 6 of the first byte is the sign.
//!
//! Optional fields use nullable forms, where `0` means NULL and non-negative values are shifted
//! up by one to make room for it.
//!
//! Byte strings are a stop-bit length followed by the raw bytes.

use byteorder::ReadBytesExt;

use crate::error::{Error, Result};
use crate::stream::StreamBuffer;

const STOP: u8 = 0x80;
const PAYLOAD: u8 = 0x7F;

/// Stop-bit width limit for 32-bit values, lengths, and template ids.
pub const MAX_BYTES_32: usize = 5;
/// Stop-bit width limit for 64-bit values.
pub const MAX_BYTES_64: usize = 10;

/// The integer shapes a field can carry on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntKind {
    I32,
    U32,
    I64,
    U64,
    /// A decimal's exponent: signed, at most 5 bytes, within -63..=63.
    Exponent,
}

impl IntKind {
    pub fn signed(self) -> bool {
        matches!(self, IntKind::I32 | IntKind::I64 | IntKind::Exponent)
    }

    pub fn max_bytes(self) -> usize {
        match self {
            IntKind::I64 | IntKind::U64 => MAX_BYTES_64,
            _ => MAX_BYTES_32,
        }
    }

    pub fn min(self) -> i128 {
        match self {
            IntKind::I32 => i32::MIN as i128,
            IntKind::I64 => i64::MIN as i128,
            IntKind::U32 | IntKind::U64 => 0,
            IntKind::Exponent => -63,
        }
    }

    pub fn max(self) -> i128 {
        match self {
            IntKind::I32 => i32::MAX as i128,
            IntKind::U32 => u32::MAX as i128,
            IntKind::I64 => i64::MAX as i128,
            IntKind::U64 => u64::MAX as i128,
            IntKind::Exponent => 63,
        }
    }

    pub fn contains(self, v: i128) -> bool {
        (self.min()..=self.max()).contains(&v)
    }

    /// Fail with an encoding error if `v` doesn't fit this kind.
    pub fn check(self, v: i128) -> Result<i128> {
        if self.contains(v) {
            Ok(v)
        } else {
            Err(Error::encoding(format!(
                "value {} out of range for {:?}",
                v, self
            )))
        }
    }
}

/// Write an unsigned stop-bit integer.
pub fn write_uint(buf: &mut StreamBuffer, v: u128) {
    let mut groups = 1;
    while groups < 19 && (v >> (7 * groups)) != 0 {
        groups += 1;
    }
    write_groups(buf, v, groups);
}

/// Write a signed stop-bit integer.
pub fn write_int(buf: &mut StreamBuffer, v: i128) {
    let mut groups = 1;
    // Shortest width whose sign bit (bit 6 of the first byte) matches the sign of `v`.
    while groups < 19 {
        let shift = 7 * groups - 1;
        if (v >> shift) == 0 || (v >> shift) == -1 {
            break;
        }
        groups += 1;
    }
    write_groups(buf, v as u128, groups);
}

fn write_groups(buf: &mut StreamBuffer, v: u128, groups: usize) {
    buf.reserve(groups);
    for i in (0..groups).rev() {
        let byte = ((v >> (7 * i)) as u8) & PAYLOAD;
        buf.push(if i == 0 { byte | STOP } else { byte });
    }
}

fn read_groups(buf: &mut &[u8], max_bytes: usize, signed: bool) -> Result<i128> {
    let mut acc: i128 = 0;
    for i in 0..max_bytes {
        let byte = buf
            .read_u8()
            .map_err(|_| Error::truncated("decode stop-bit integer", 1))?;
        if i == 0 && signed && (byte & 0x40) != 0 {
            acc = -1;
        }
        acc = (acc << 7) | (byte & PAYLOAD) as i128;
        if byte & STOP != 0 {
            return Ok(acc);
        }
    }
    Err(Error::encoding(format!(
        "stop-bit integer longer than {} bytes",
        max_bytes
    )))
}

/// Read an unsigned stop-bit integer of at most `max_bytes` bytes.
pub fn read_uint(buf: &mut &[u8], max_bytes: usize) -> Result<u128> {
    read_groups(buf, max_bytes, false).map(|v| v as u128)
}

/// Read a signed stop-bit integer of at most `max_bytes` bytes.
pub fn read_int(buf: &mut &[u8], max_bytes: usize) -> Result<i128> {
    read_groups(buf, max_bytes, true)
}

/// Write a value of the given kind, in nullable form if `nullable`. `None` writes NULL, and is
/// only meaningful when `nullable` is set.
pub fn write_value(buf: &mut StreamBuffer, kind: IntKind, nullable: bool, v: Option<i128>) {
    match (v, nullable) {
        (None, _) => buf.push(STOP),
        (Some(v), true) if v >= 0 => write_wide(buf, kind, v + 1),
        (Some(v), _) => write_wide(buf, kind, v),
    }
}

fn write_wide(buf: &mut StreamBuffer, kind: IntKind, v: i128) {
    if kind.signed() {
        write_int(buf, v);
    } else {
        write_uint(buf, v as u128);
    }
}

/// Read a value of the given kind, checking its width and range. In nullable form `Ok(None)`
/// means NULL; otherwise the result is always `Some`.
pub fn read_value(buf: &mut &[u8], kind: IntKind, nullable: bool) -> Result<Option<i128>> {
    let raw = read_groups(buf, kind.max_bytes(), kind.signed())?;
    let v = match (nullable, raw) {
        (true, 0) => return Ok(None),
        (true, r) if r > 0 => r - 1,
        (_, r) => r,
    };
    kind.check(v).map(Some)
}

/// Write a length-prefixed byte string. `None` writes a NULL length and needs `nullable`.
pub fn write_bytes(buf: &mut StreamBuffer, nullable: bool, data: Option<&[u8]>) {
    match data {
        Some(data) => {
            write_value(buf, IntKind::U32, nullable, Some(data.len() as i128));
            buf.extend_from_slice(data);
        }
        None => write_value(buf, IntKind::U32, nullable, None),
    }
}

/// Read a length-prefixed byte string without copying it.
pub fn read_bytes<'a>(buf: &mut &'a [u8], nullable: bool) -> Result<Option<&'a [u8]>> {
    let len = match read_value(buf, IntKind::U32, nullable)? {
        Some(len) => len as usize,
        None => return Ok(None),
    };
    if buf.len() < len {
        return Err(Error::truncated("decode byte string", len - buf.len()));
    }
    let (data, rest) = buf.split_at(len);
    *buf = rest;
    Ok(Some(data))
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;

    fn encoded(f: impl FnOnce(&mut StreamBuffer)) -> Vec<u8> {
        let mut buf = StreamBuffer::new();
        f(&mut buf);
        buf.take()
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encoded(|b| write_uint(b, 0)), vec![0x80]);
        assert_eq!(encoded(|b| write_uint(b, 127)), vec![0xFF]);
        assert_eq!(encoded(|b| write_uint(b, 128)), vec![0x01, 0x80]);
        assert_eq!(encoded(|b| write_int(b, 63)), vec![0xBF]);
        assert_eq!(encoded(|b| write_int(b, 64)), vec![0x00, 0xC0]);
        assert_eq!(encoded(|b| write_int(b, -1)), vec![0xFF]);
        assert_eq!(encoded(|b| write_int(b, -64)), vec![0xC0]);
        assert_eq!(encoded(|b| write_int(b, -65)), vec![0x7F, 0xBF]);
        assert_eq!(encoded(|b| write_int(b, -3)), vec![0xFD]);
    }

    #[test]
    fn nullable_forms() {
        assert_eq!(encoded(|b| write_value(b, IntKind::U32, true, None)), vec![0x80]);
        assert_eq!(encoded(|b| write_value(b, IntKind::U32, true, Some(0))), vec![0x81]);
        assert_eq!(encoded(|b| write_value(b, IntKind::I32, true, Some(-1))), vec![0xFF]);
        assert_eq!(encoded(|b| write_value(b, IntKind::I32, true, Some(0))), vec![0x81]);

        let mut data: &[u8] = &[0x80, 0x81, 0xFF];
        assert_eq!(read_value(&mut data, IntKind::I32, true).unwrap(), None);
        assert_eq!(read_value(&mut data, IntKind::I32, true).unwrap(), Some(0));
        assert_eq!(read_value(&mut data, IntKind::I32, true).unwrap(), Some(-1));
        assert!(data.is_empty());
    }

    #[test]
    fn extremes_round_trip() {
        let cases = [
            (IntKind::U32, 0i128),
            (IntKind::U32, u32::MAX as i128),
            (IntKind::I32, i32::MIN as i128),
            (IntKind::I32, i32::MAX as i128),
            (IntKind::U64, u64::MAX as i128),
            (IntKind::I64, i64::MIN as i128),
            (IntKind::I64, i64::MAX as i128),
        ];
        for (kind, v) in cases {
            for nullable in [false, true] {
                let bytes = encoded(|b| write_value(b, kind, nullable, Some(v)));
                assert!(bytes.len() <= kind.max_bytes(), "{:?} {} too wide", kind, v);
                let mut data = &bytes[..];
                assert_eq!(read_value(&mut data, kind, nullable).unwrap(), Some(v));
            }
        }
    }

    #[test]
    fn random_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let v: i64 = rng.gen();
            let bytes = encoded(|b| write_int(b, v as i128));
            let mut data = &bytes[..];
            assert_eq!(read_int(&mut data, MAX_BYTES_64).unwrap(), v as i128);
            let u: u64 = rng.gen();
            let bytes = encoded(|b| write_uint(b, u as u128));
            let mut data = &bytes[..];
            assert_eq!(read_uint(&mut data, MAX_BYTES_64).unwrap(), u as u128);
        }
    }

    #[test]
    fn truncated_and_over_wide() {
        let mut data: &[u8] = &[0x01, 0x02];
        assert!(matches!(
            read_uint(&mut data, MAX_BYTES_32),
            Err(Error::TruncatedInput { .. })
        ));
        let mut data: &[u8] = &[0x01, 0x01, 0x01, 0x01, 0x01, 0x81];
        assert!(matches!(
            read_uint(&mut data, MAX_BYTES_32),
            Err(Error::InvalidEncoding { .. })
        ));
        // Five bytes, but the value doesn't fit in 32 bits.
        let mut data: &[u8] = &[0x7F, 0x7F, 0x7F, 0x7F, 0xFF];
        assert!(matches!(
            read_value(&mut data, IntKind::U32, false),
            Err(Error::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn byte_strings() {
        let bytes = encoded(|b| {
            write_bytes(b, false, Some(b"abc"));
            write_bytes(b, true, None);
            write_bytes(b, true, Some(b""));
        });
        assert_eq!(bytes, vec![0x83, b'a', b'b', b'c', 0x80, 0x81]);
        let mut data = &bytes[..];
        assert_eq!(read_bytes(&mut data, false).unwrap(), Some(&b"abc"[..]));
        assert_eq!(read_bytes(&mut data, true).unwrap(), None);
        assert_eq!(read_bytes(&mut data, true).unwrap(), Some(&b""[..]));

        let mut short: &[u8] = &[0x85, b'a'];
        match read_bytes(&mut short, false) {
            Err(Error::TruncatedInput { needed, .. }) => assert_eq!(needed, 4),
            other => panic!("expected truncation, got {:?}", other),
        }
    }
}
