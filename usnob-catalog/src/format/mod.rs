//! On-disk layout of the zone-partitioned catalog.
//!
//! The sky is cut into 1800 declination zones of 0.1° each, numbered from
//! the south pole. Every zone is one file made of three sections:
//!
//! 1. **Header line**: ASCII, newline-terminated, padded to 4 bytes. See [`header`].
//! 2. **Chunk table**: 125 big-endian `(offset, first_id)` pairs.
//! 3. **Chunks**: one per RA band of 2^20 × 10 mas (~2.9°), each with its own
//!    preface, overflow tables, sparse index and bit-packed record stream.
//!    See [`chunk`].
//!
//! All multi-byte integers are stored big-endian and are decoded with
//! [`byteorder::BigEndian`], so no host byte-order detection is needed.

pub mod bits;
pub mod chunk;
pub mod header;

use std::path::{Path, PathBuf};

pub use bits::{BitReader, BitWriter};
pub use chunk::{ChunkMeta, IndexEntry};
pub use header::{ChunkTable, ExtrasSpec, ZoneHeader};

/// Number of declination zones.
pub const ZONE_COUNT: u16 = 1800;
/// Angular height of one zone, in mas (0.1°).
pub const ZONE_STEP_MAS: i32 = 360_000;
/// Slots in the per-file chunk table, including the end-of-file entry.
pub const CHUNK_SLOTS: usize = 125;
/// RA bits addressed inside one chunk of the common layout.
pub const CHUNK_RA_BITS: u32 = 20;
/// Angular width of one chunk, in mas.
pub const CHUNK_STEP_MAS: i64 = (1 << CHUNK_RA_BITS) * 10;
/// Records between consecutive entries of a chunk's sparse index.
pub const INDEX_STRIDE: u32 = 500;

pub const MAS_PER_DEGREE: i32 = 3_600_000;
pub const FULL_CIRCLE_MAS: i32 = 360 * MAS_PER_DEGREE;
pub const HALF_CIRCLE_MAS: i32 = 180 * MAS_PER_DEGREE;
/// Quarter circle; south polar distance of the equator.
pub const QUARTER_CIRCLE_MAS: i32 = 90 * MAS_PER_DEGREE;

/// Magnitude value marking an absent photometry entry, in centimag.
pub const NULL_MAGNITUDE: i32 = 9999;

/// Status bit: record comes from Tycho-2.
pub const STATUS_TYCHO: u8 = 0x80;
/// Status bit: native photometry entries use the 7-byte encoding.
pub const STATUS_LONG_PHOTOMETRY: u8 = 0x40;
/// Presence bit of photometry entry 0 (B1); entries 1..4 follow at lower bits.
pub const STATUS_FIRST_BAND: u8 = 0x10;

/// Bytes of photometry following the fixed record prefix, by status byte.
#[rustfmt::skip]
pub const PHOTOMETRY_LEN: [u8; 256] = [
     0,  6,  6, 12,  6, 12, 12, 18,  6, 12, 12, 18, 12, 18, 18, 24, // 0x00
     6, 12, 12, 18, 12, 18, 18, 24, 12, 18, 18, 24, 18, 24, 24, 30, // 0x10
     0,  6,  6, 12,  6, 12, 12, 18,  6, 12, 12, 18, 12, 18, 18, 24, // 0x20
     6, 12, 12, 18, 12, 18, 18, 24, 12, 18, 18, 24, 18, 24, 24, 30, // 0x30
     0,  7,  7, 14,  7, 14, 14, 21,  7, 14, 14, 21, 14, 21, 21, 28, // 0x40
     7, 14, 14, 21, 14, 21, 21, 28, 14, 21, 21, 28, 21, 28, 28, 35, // 0x50
     0,  7,  7, 14,  7, 14, 14, 21,  7, 14, 14, 21, 14, 21, 21, 28, // 0x60
     7, 14, 14, 21, 14, 21, 21, 28, 14, 21, 21, 28, 21, 28, 28, 35, // 0x70
     0,  2,  2,  4,  2,  4,  4,  6,  2,  4,  4,  6,  4,  6,  6,  8, // 0x80
     2,  4,  4,  6,  4,  6,  6,  8,  4,  6,  6,  8,  6,  8,  8, 10, // 0x90
     0,  2,  2,  4,  2,  4,  4,  6,  2,  4,  4,  6,  4,  6,  6,  8, // 0xa0
     2,  4,  4,  6,  4,  6,  6,  8,  4,  6,  6,  8,  6,  8,  8, 10, // 0xb0
     0,  2,  2,  4,  2,  4,  4,  6,  2,  4,  4,  6,  4,  6,  6,  8, // 0xc0
     2,  4,  4,  6,  4,  6,  6,  8,  4,  6,  6,  8,  6,  8,  8, 10, // 0xd0
     0,  2,  2,  4,  2,  4,  4,  6,  2,  4,  4,  6,  4,  6,  6,  8, // 0xe0
     2,  4,  4,  6,  4,  6,  6,  8,  4,  6,  6,  8,  6,  8,  8, 10, // 0xf0
];

/// The two record layouts found in zone files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecordLayout {
    /// 17-byte prefix with a 20-bit in-chunk RA, one chunk per RA band.
    Standard,
    /// 18-byte prefix with a 28-bit RA; the whole zone is a single chunk.
    Polar,
}

impl RecordLayout {
    pub fn from_record_len(len: u32) -> Option<Self> {
        match len {
            17 => Some(Self::Standard),
            18 => Some(Self::Polar),
            _ => None,
        }
    }

    pub fn fixed_len(self) -> usize {
        match self {
            Self::Standard => 17,
            Self::Polar => 18,
        }
    }

    pub fn ra_bits(self) -> u32 {
        match self {
            Self::Standard => CHUNK_RA_BITS,
            Self::Polar => CHUNK_RA_BITS + 8,
        }
    }

    /// Full byte length of a record given its status byte.
    pub fn record_len(self, status: u8) -> usize {
        self.fixed_len() + PHOTOMETRY_LEN[status as usize] as usize
    }
}

/// Path of the file holding `zone`: `root/ddd/Uzzzz.bin`.
pub fn zone_path(root: &Path, zone: u16) -> PathBuf {
    root.join(format!("{:03}", zone / 10))
        .join(format!("U{:04}.bin", zone))
}

/// Zone containing a south polar distance. The south pole belongs to zone 0
/// and the north pole to zone 1799.
pub fn zone_of_spd(spd_mas: i32) -> Option<u16> {
    if !(0..=HALF_CIRCLE_MAS).contains(&spd_mas) {
        return None;
    }
    let zone = (spd_mas / ZONE_STEP_MAS).min(ZONE_COUNT as i32 - 1);
    Some(zone as u16)
}

/// RA band of a position, in chunk-table numbering.
pub fn chunk_of_ra(ra_mas: i32) -> usize {
    ((ra_mas / 10) >> CHUNK_RA_BITS) as usize
}

pub(crate) fn round_up4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_path_layout() {
        let path = zone_path(Path::new("/USNOB"), 900);
        assert_eq!(path, PathBuf::from("/USNOB/090/U0900.bin"));
        let path = zone_path(Path::new("cat"), 7);
        assert_eq!(path, PathBuf::from("cat/000/U0007.bin"));
    }

    #[test]
    fn test_zone_of_spd_poles() {
        assert_eq!(zone_of_spd(0), Some(0));
        assert_eq!(zone_of_spd(QUARTER_CIRCLE_MAS), Some(900));
        assert_eq!(zone_of_spd(QUARTER_CIRCLE_MAS - 1), Some(899));
        assert_eq!(zone_of_spd(HALF_CIRCLE_MAS), Some(1799));
        assert_eq!(zone_of_spd(-1), None);
        assert_eq!(zone_of_spd(HALF_CIRCLE_MAS + 1), None);
    }

    #[test]
    fn test_photometry_len_matches_presence_bits() {
        for status in 0..=255u8 {
            let present = (status & 0x1f).count_ones() as u8;
            let per_entry = if status & STATUS_TYCHO != 0 {
                2
            } else if status & STATUS_LONG_PHOTOMETRY != 0 {
                7
            } else {
                6
            };
            assert_eq!(PHOTOMETRY_LEN[status as usize], present * per_entry, "status {status:#04x}");
        }
    }

    #[test]
    fn test_record_len() {
        assert_eq!(RecordLayout::Standard.record_len(0x00), 17);
        assert_eq!(RecordLayout::Standard.record_len(0x1f), 17 + 30);
        assert_eq!(RecordLayout::Polar.record_len(0x5f), 18 + 35);
        assert_eq!(RecordLayout::Standard.record_len(0x9f), 17 + 10);
        assert_eq!(RecordLayout::from_record_len(19), None);
    }

    #[test]
    fn test_last_chunk_of_circle() {
        assert_eq!(chunk_of_ra(0), 0);
        assert_eq!(chunk_of_ra(FULL_CIRCLE_MAS - 10), 123);
        assert_eq!(chunk_of_ra(CHUNK_STEP_MAS as i32), 1);
    }
}
