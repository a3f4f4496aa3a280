//! Presence maps.
//!
//! A presence map is a run of bits, one for each presence-significant field of a segment, in
//! declaration order. On the wire it is packed 7 bits per byte, most significant bit first, with
//! the stop bit set on the last byte. Trailing bytes that would carry only zero bits are dropped,
//! and a reader treats bits past the end of the map as zero.

use byteorder::ReadBytesExt;

use crate::error::{Error, Result};

const STOP: u8 = 0x80;

/// Collects presence bits while a segment is encoded.
#[derive(Clone, Debug, Default)]
pub struct PmapWriter {
    bits: Vec<bool>,
}

impl PmapWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Pack the bits into their wire form. Always at least one byte.
    ///
    /// Trailing bytes whose bits are all clear are dropped, so eight bits with the last one clear
    /// fit in a single byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self
            .bits
            .chunks(7)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, &bit)| acc | ((bit as u8) << (6 - i)))
            })
            .collect();
        while bytes.len() > 1 && bytes.last() == Some(&0) {
            bytes.pop();
        }
        match bytes.last_mut() {
            Some(last) => *last |= STOP,
            None => bytes.push(STOP),
        }
        bytes
    }
}

/// Hands out the bits of a decoded presence map in order.
#[derive(Clone, Debug, Default)]
pub struct PmapReader {
    bytes: Vec<u8>,
    pos: usize,
}

impl PmapReader {
    /// A map with no bits, for segments that don't carry one.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read a presence map off the front of `buf`.
    pub fn read(buf: &mut &[u8]) -> Result<Self> {
        let mut bytes = Vec::new();
        loop {
            let byte = buf
                .read_u8()
                .map_err(|_| Error::truncated("decode presence map", 1))?;
            bytes.push(byte & !STOP);
            if byte & STOP != 0 {
                break;
            }
        }
        Ok(Self { bytes, pos: 0 })
    }

    /// The next bit, or `false` once the map is used up.
    pub fn next_bit(&mut self) -> bool {
        let byte = self.bytes.get(self.pos / 7).copied().unwrap_or(0);
        let bit = (byte >> (6 - self.pos % 7)) & 1 == 1;
        self.pos += 1;
        bit
    }

    /// Check that no set bit was left unread. A set bit nobody consumed means the map doesn't
    /// match the template it was decoded against.
    pub fn finish(&self) -> Result<()> {
        let total = self.bytes.len() * 7;
        let unread = (self.pos..total).any(|p| (self.bytes[p / 7] >> (6 - p % 7)) & 1 == 1);
        if unread {
            Err(Error::encoding("presence map has more bits set than fields use"))
        } else {
            Ok(())
        }
    }
}
