//! MSB-first bit-field access over byte slices.
//!
//! Records are packed with field boundaries that ignore byte alignment: the
//! RA of a common-layout record occupies bits 12..32 of the record, the
//! proper-motion codes sit at bits 88..112 and so on. [`BitReader`] reads
//! such fields with bounds checks; [`BitWriter`] is its inverse, used to
//! build synthetic zone files.

use crate::error::BitsOutOfRange;

#[derive(Debug, Clone, Copy)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8
    }

    /// Read `width` bits (at most 32) starting `bit` bits into the slice.
    pub fn read(&self, bit: usize, width: u32) -> Result<u32, BitsOutOfRange> {
        let end = bit + width as usize;
        if width > 32 || end > self.bit_len() {
            return Err(BitsOutOfRange {
                bit,
                width,
                available: self.bit_len(),
            });
        }
        if width == 0 {
            return Ok(0);
        }

        let first = bit / 8;
        let last = end.div_ceil(8);
        let mut acc: u64 = 0;
        for &byte in &self.bytes[first..last] {
            acc = (acc << 8) | byte as u64;
        }
        acc >>= last * 8 - end;
        Ok((acc & ((1u64 << width) - 1)) as u32)
    }

    /// Read a single flag bit.
    pub fn flag(&self, bit: usize) -> Result<bool, BitsOutOfRange> {
        Ok(self.read(bit, 1)? != 0)
    }
}

/// Zero-initialized buffer that bit fields are OR-ed into.
#[derive(Debug, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
}

impl BitWriter {
    pub fn with_len(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    /// Store the low `width` bits of `value` at `bit`.
    pub fn write(&mut self, bit: usize, width: u32, value: u32) -> Result<(), BitsOutOfRange> {
        let available = self.bytes.len() * 8;
        if width > 32 || bit + width as usize > available {
            return Err(BitsOutOfRange {
                bit,
                width,
                available,
            });
        }
        for i in 0..width as usize {
            let set = (value >> (width as usize - 1 - i)) & 1 == 1;
            if set {
                let pos = bit + i;
                self.bytes[pos / 8] |= 0x80 >> (pos % 8);
            }
        }
        Ok(())
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_unaligned_fields() {
        // 1010_1011 1100_1101 1110_1111
        let bytes = [0xab, 0xcd, 0xef];
        let reader = BitReader::new(&bytes);
        assert_eq!(reader.read(0, 8).unwrap(), 0xab);
        assert_eq!(reader.read(8, 4).unwrap(), 0xc);
        assert_eq!(reader.read(4, 8).unwrap(), 0xbc);
        assert_eq!(reader.read(12, 12).unwrap(), 0xdef);
        assert_eq!(reader.read(3, 5).unwrap(), 0b01011);
        assert!(reader.flag(0).unwrap());
        assert!(!reader.flag(1).unwrap());
    }

    #[test]
    fn test_read_full_width_across_five_bytes() {
        let bytes = [0x0f, 0xff, 0xff, 0xff, 0xf0];
        let reader = BitReader::new(&bytes);
        assert_eq!(reader.read(4, 32).unwrap(), u32::MAX);
    }

    #[test]
    fn test_read_past_end_is_error() {
        let bytes = [0u8; 2];
        let reader = BitReader::new(&bytes);
        let err = reader.read(10, 7).unwrap_err();
        assert_eq!(err.available, 16);
        assert!(reader.read(10, 6).is_ok());
        assert_eq!(reader.read(16, 0).unwrap(), 0);
    }

    #[test]
    fn test_writer_matches_reader() {
        let mut writer = BitWriter::with_len(17);
        writer.write(0, 8, 0x1f).unwrap();
        writer.write(8, 4, 9).unwrap();
        writer.write(12, 20, 0xabcde).unwrap();
        writer.write(71, 9, 300).unwrap();
        writer.write(126, 10, 1023).unwrap();

        let bytes = writer.into_bytes();
        let reader = BitReader::new(&bytes);
        assert_eq!(reader.read(0, 8).unwrap(), 0x1f);
        assert_eq!(reader.read(8, 4).unwrap(), 9);
        assert_eq!(reader.read(12, 20).unwrap(), 0xabcde);
        assert_eq!(reader.read(71, 9).unwrap(), 300);
        assert_eq!(reader.read(126, 10).unwrap(), 1023);
    }

    #[test]
    fn test_writer_rejects_overflow() {
        let mut writer = BitWriter::with_len(1);
        assert!(writer.write(4, 5, 1).is_err());
    }
}
