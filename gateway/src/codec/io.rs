//! IO element decoder (C4, §4.4).
//!
//! Widths (ids, counts, and the top-level event/total-count fields) are
//! 8-bit for Codec 8 and 16-bit for Codec 8 Extended; values within each
//! group are always big-endian unsigned integers of the group's width.

use crate::error::FrameError;
use crate::model::{Codec, IoGroups};

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take_u8(&mut self) -> Result<u8, FrameError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(FrameError::Malformed("io: truncated u8"))?;
        self.pos += 1;
        Ok(b)
    }

    fn take_u16(&mut self) -> Result<u16, FrameError> {
        let b = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or(FrameError::Malformed("io: truncated u16"))?;
        self.pos += 2;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, FrameError> {
        let b = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or(FrameError::Malformed("io: truncated u32"))?;
        self.pos += 4;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_u64(&mut self) -> Result<u64, FrameError> {
        let b = self
            .data
            .get(self.pos..self.pos + 8)
            .ok_or(FrameError::Malformed("io: truncated u64"))?;
        self.pos += 8;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_be_bytes(a))
    }

    /// Reads an id or a count: 1 byte for Codec 8, 2 bytes for Codec 8 Extended.
    fn take_width(&mut self, codec: Codec) -> Result<u16, FrameError> {
        match codec {
            Codec::C8 => self.take_u8().map(|v| v as u16),
            Codec::C8Ext => self.take_u16(),
        }
    }
}

/// Decoded record header + IO payload, plus how many bytes of `data` it consumed.
pub struct DecodedIo {
    pub event_io_id: u32,
    pub groups: IoGroups,
    pub consumed: usize,
}

/// Decodes `eventIoId`, `totalCount`, and the four width groups starting at
/// the front of `data`. Returns `Malformed` if the declared total doesn't
/// match the sum of decoded group entries (§4.4 edge case).
pub fn decode(data: &[u8], codec: Codec) -> Result<DecodedIo, FrameError> {
    let mut c = Cursor::new(data);

    let event_io_id = c.take_width(codec)? as u32;
    let total_count = c.take_width(codec)?;

    let mut groups = IoGroups::default();

    let n1 = c.take_width(codec)?;
    for _ in 0..n1 {
        let id = c.take_width(codec)?;
        let v = c.take_u8()?;
        groups.one_byte.push((id, v));
    }

    let n2 = c.take_width(codec)?;
    for _ in 0..n2 {
        let id = c.take_width(codec)?;
        let v = c.take_u16()?;
        groups.two_byte.push((id, v));
    }

    let n4 = c.take_width(codec)?;
    for _ in 0..n4 {
        let id = c.take_width(codec)?;
        let v = c.take_u32()?;
        groups.four_byte.push((id, v));
    }

    let n8 = c.take_width(codec)?;
    for _ in 0..n8 {
        let id = c.take_width(codec)?;
        let v = c.take_u64()?;
        groups.eight_byte.push((id, v));
    }

    if groups.total() as u16 != total_count {
        return Err(FrameError::Malformed("io: total count mismatch"));
    }

    Ok(DecodedIo {
        event_io_id,
        groups,
        consumed: c.pos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_single_one_byte_element_codec8() {
        // eventIoId=0x01 total=1 | 1B: count=1 {id=0x01 val=0xF0} | 2B:0 | 4B:0 | 8B:0
        let data = hex::decode("01010101F0000000").unwrap();
        let d = decode(&data, Codec::C8).unwrap();
        assert_eq!(d.event_io_id, 1);
        assert_eq!(d.groups.one_byte, vec![(1, 0xF0)]);
        assert_eq!(d.consumed, data.len());
    }

    #[test]
    fn mismatched_total_is_malformed() {
        // total declared as 2 but only one 1B entry follows
        let data = hex::decode("01020101F0000000").unwrap();
        assert!(decode(&data, Codec::C8).is_err());
    }

    #[test]
    fn codec8ext_uses_16_bit_widths() {
        // eventIoId=0x0001 total=0x0001 | 1B: count=1 {id=0x0011 val=0x1D} | 2B..8B: 0
        let data = hex::decode("00010001000100111D000000000000").unwrap();
        let d = decode(&data, Codec::C8Ext).unwrap();
        assert_eq!(d.event_io_id, 1);
        assert_eq!(d.groups.one_byte, vec![(0x0011, 0x1D)]);
    }
}
