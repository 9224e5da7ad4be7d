//! Zone file header line and chunk table.
//!
//! A zone file starts with a line such as
//!
//! ```text
//! USNO-B1.0(17) 090/U0900.bin fld=0(0) pm=-500(1001) mag=700(1801) xi=-750(1501)
//! ```
//!
//! giving the fixed record length, the zone number and, for each of the four
//! overflow-coded quantities, the zero offset `O` and the largest code `N`
//! stored directly. Codes above `N` index the chunk's extras table. The line
//! is padded so that the chunk table that follows starts on a 4-byte boundary.

use std::fmt;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};

use super::{round_up4, RecordLayout, CHUNK_SLOTS, ZONE_COUNT};
use crate::error::{CatalogError, Result};

const MAGIC: &[u8] = b"USNO-B1.0(";
/// Byte of the magic that the alternate header variant replaces.
const MARKER_POS: usize = 7;
/// Longest header line accepted, newline included.
pub const MAX_HEADER_LEN: usize = 128;

/// Zero offset and direct-code range of one overflow-coded quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtrasSpec {
    pub offset: i32,
    pub direct_max: i32,
}

/// The four overflow-coded quantities, in header and extras-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extras {
    Field = 0,
    ProperMotion = 1,
    Magnitude = 2,
    Centroid = 3,
}

pub const DEFAULT_EXTRAS: [ExtrasSpec; 4] = [
    ExtrasSpec {
        offset: 0,
        direct_max: 0,
    },
    ExtrasSpec {
        offset: -500,
        direct_max: 1001,
    },
    ExtrasSpec {
        offset: 700,
        direct_max: 1801,
    },
    ExtrasSpec {
        offset: -750,
        direct_max: 1501,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZoneHeader {
    pub layout: RecordLayout,
    pub zone: u16,
    /// Set by the alternate magic: the star/galaxy classification of the
    /// whole catalog may be unreliable, flagged with this byte.
    pub stargal_marker: Option<u8>,
    pub extras: [ExtrasSpec; 4],
    /// Header line without its newline and padding.
    pub text: String,
    /// Byte offset of the chunk table.
    pub table_offset: usize,
}

impl ZoneHeader {
    /// Parse the header from the first bytes of a zone file.
    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Self> {
        let window = &bytes[..bytes.len().min(MAX_HEADER_LEN)];
        let Some(newline) = window.iter().position(|&c| c == b'\n') else {
            return Err(CatalogError::TruncatedHeader {
                path: path.to_path_buf(),
                message: format!("no newline in the first {} bytes", window.len()),
            });
        };
        let line = &window[..newline];
        let malformed = |message: &str| CatalogError::MalformedHeader {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        let stargal_marker = if line.starts_with(MAGIC) {
            None
        } else if line.len() >= MAGIC.len()
            && line[..MARKER_POS] == MAGIC[..MARKER_POS]
            && line[MARKER_POS + 1..MAGIC.len()] == MAGIC[MARKER_POS + 1..]
        {
            Some(line[MARKER_POS])
        } else {
            let shown = &line[..line.len().min(MAGIC.len())];
            return Err(CatalogError::BadMagic {
                path: path.to_path_buf(),
                found: String::from_utf8_lossy(shown).into_owned(),
            });
        };

        let (record_len, mut pos) =
            parse_int(line, MAGIC.len()).ok_or_else(|| malformed("missing record length"))?;
        let layout = u32::try_from(record_len)
            .ok()
            .and_then(RecordLayout::from_record_len)
            .ok_or_else(|| malformed(&format!("unsupported record length {record_len}")))?;

        let zone_start = line[pos..]
            .iter()
            .position(|&c| c == b'U')
            .map(|i| pos + i + 1)
            .ok_or_else(|| malformed("missing zone file name"))?;
        let (zone, next) = parse_int(line, zone_start).ok_or_else(|| malformed("missing zone number"))?;
        if !(0..ZONE_COUNT as i32).contains(&zone) {
            return Err(malformed(&format!("zone {zone} outside 0..{ZONE_COUNT}")));
        }
        pos = next;

        let mut extras = DEFAULT_EXTRAS;
        for spec in extras.iter_mut() {
            let Some(eq) = line[pos..].iter().position(|&c| c == b'=') else {
                break;
            };
            let (offset, next) =
                parse_int(line, pos + eq + 1).ok_or_else(|| malformed("bad overflow offset"))?;
            if line.get(next) != Some(&b'(') {
                return Err(malformed("overflow offset without code count"));
            }
            let (direct_max, next) =
                parse_int(line, next + 1).ok_or_else(|| malformed("bad overflow code count"))?;
            *spec = ExtrasSpec { offset, direct_max };
            pos = next;
        }

        Ok(Self {
            layout,
            zone: zone as u16,
            stargal_marker,
            extras,
            text: String::from_utf8_lossy(line).trim_end().to_string(),
            table_offset: round_up4(newline + 1),
        })
    }

    pub fn extras(&self, which: Extras) -> ExtrasSpec {
        self.extras[which as usize]
    }
}

impl fmt::Display for ZoneHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Zone: {}", self.zone)?;
        writeln!(f, "Record layout: {:?} ({} bytes)", self.layout, self.layout.fixed_len())?;
        if let Some(marker) = self.stargal_marker {
            writeln!(f, "Classification marker: {:?}", marker as char)?;
        }
        let names = ["fld", "pm", "mag", "xi"];
        for (name, spec) in names.iter().zip(self.extras.iter()) {
            writeln!(f, "{name}: offset {} direct codes 0..={}", spec.offset, spec.direct_max)?;
        }
        write!(f, "Chunk table at byte {}", self.table_offset)
    }
}

/// Parse an optionally negative decimal at `start`, returning the value and
/// the index just past its last digit.
fn parse_int(line: &[u8], start: usize) -> Option<(i32, usize)> {
    let mut pos = start;
    let negative = line.get(pos) == Some(&b'-');
    if negative {
        pos += 1;
    }
    let digits = line.get(pos..)?.iter().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let text = std::str::from_utf8(&line[pos..pos + digits]).ok()?;
    let value: i32 = text.parse().ok()?;
    Some((if negative { -value } else { value }, pos + digits))
}

/// The `(file offset, first identifier)` table that follows the header.
///
/// Entry `i` locates chunk `i`; the entry after the last chunk holds the end
/// of file and the identifier following the zone's last record. Unused slots
/// are zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTable {
    entries: Vec<(u32, u32)>,
    count: usize,
}

impl ChunkTable {
    pub const BYTE_LEN: usize = CHUNK_SLOTS * 8;

    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::BYTE_LEN {
            return Err(CatalogError::TruncatedHeader {
                path: path.to_path_buf(),
                message: format!(
                    "chunk table needs {} bytes, found {}",
                    Self::BYTE_LEN,
                    bytes.len()
                ),
            });
        }
        let entries: Vec<(u32, u32)> = bytes[..Self::BYTE_LEN]
            .chunks_exact(8)
            .map(|pair| (BigEndian::read_u32(&pair[0..4]), BigEndian::read_u32(&pair[4..8])))
            .collect();

        let mut end = 1;
        while end < CHUNK_SLOTS && entries[end].0 != 0 {
            end += 1;
        }
        let count = end - 1;
        if count == 0 {
            return Err(CatalogError::MalformedHeader {
                path: path.to_path_buf(),
                message: "chunk table lists no chunks".into(),
            });
        }
        Ok(Self { entries, count })
    }

    /// Number of populated chunks.
    pub fn count(&self) -> usize {
        self.count
    }

    /// File offset and declared byte length of a chunk. The length is signed
    /// so that a corrupt, non-increasing table can be reported.
    pub fn span(&self, chunk: usize) -> Option<(u64, i64)> {
        if chunk >= self.count {
            return None;
        }
        let start = self.entries[chunk].0;
        let end = self.entries[chunk + 1].0;
        Some((start as u64, end as i64 - start as i64))
    }

    pub fn first_id(&self, chunk: usize) -> Option<u32> {
        (chunk <= self.count).then(|| self.entries[chunk].1)
    }

    /// Identifier following the last record of the zone.
    pub fn end_id(&self) -> u32 {
        self.entries[self.count].1
    }

    /// Chunk whose identifier range holds `id`.
    pub fn locate_id(&self, id: u32) -> Option<usize> {
        let populated = &self.entries[..=self.count];
        let after = populated.partition_point(|&(_, first)| first <= id);
        match after {
            0 => None,
            n if n - 1 < self.count => Some(n - 1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str =
        "USNO-B1.0(17) 090/U0900.bin fld=0(0) pm=-500(1001) mag=700(1801) xi=-750(1501)";

    fn padded(line: &str) -> Vec<u8> {
        let mut bytes = line.as_bytes().to_vec();
        while (bytes.len() + 1) % 4 != 0 {
            bytes.push(b' ');
        }
        bytes.push(b'\n');
        bytes
    }

    fn table_bytes(pairs: &[(u32, u32)]) -> Vec<u8> {
        let mut bytes = vec![0u8; ChunkTable::BYTE_LEN];
        for (i, &(offset, id)) in pairs.iter().enumerate() {
            BigEndian::write_u32(&mut bytes[i * 8..], offset);
            BigEndian::write_u32(&mut bytes[i * 8 + 4..], id);
        }
        bytes
    }

    #[test]
    fn test_parse_standard_header() {
        let bytes = padded(LINE);
        let header = ZoneHeader::parse(Path::new("U0900.bin"), &bytes).unwrap();
        assert_eq!(header.layout, RecordLayout::Standard);
        assert_eq!(header.zone, 900);
        assert_eq!(header.stargal_marker, None);
        assert_eq!(header.extras, DEFAULT_EXTRAS);
        assert_eq!(header.table_offset % 4, 0);
        assert_eq!(header.table_offset, bytes.len());
        assert_eq!(header.text, LINE);
    }

    #[test]
    fn test_parse_polar_header_with_custom_extras() {
        let line = "USNO-B1.0(18) 179/U1795.bin fld=3(12) pm=-600(1200) mag=650(1900) xi=-800(1600)";
        let header = ZoneHeader::parse(Path::new("x"), &padded(line)).unwrap();
        assert_eq!(header.layout, RecordLayout::Polar);
        assert_eq!(header.zone, 1795);
        assert_eq!(
            header.extras(Extras::Field),
            ExtrasSpec {
                offset: 3,
                direct_max: 12
            }
        );
        assert_eq!(header.extras(Extras::ProperMotion).offset, -600);
        assert_eq!(header.extras(Extras::Magnitude).direct_max, 1900);
        assert_eq!(header.extras(Extras::Centroid).offset, -800);
    }

    #[test]
    fn test_alternate_magic_sets_marker() {
        let line = LINE.replacen("B1.0", "B1*0", 1);
        let header = ZoneHeader::parse(Path::new("x"), &padded(&line)).unwrap();
        assert_eq!(header.stargal_marker, Some(b'*'));
        assert_eq!(header.zone, 900);
    }

    #[test]
    fn test_missing_pairs_fall_back_to_defaults() {
        let header =
            ZoneHeader::parse(Path::new("x"), &padded("USNO-B1.0(17) 000/U0003.bin")).unwrap();
        assert_eq!(header.zone, 3);
        assert_eq!(header.extras, DEFAULT_EXTRAS);
    }

    #[test]
    fn test_bad_magic() {
        let err = ZoneHeader::parse(Path::new("x"), &padded("GAIA-DR3(17) nothing")).unwrap_err();
        assert!(matches!(err, CatalogError::BadMagic { .. }), "unexpected error: {err}");
    }

    #[test]
    fn test_truncated_header() {
        let err = ZoneHeader::parse(Path::new("x"), LINE.as_bytes()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("no newline"), "unexpected error: {msg}");
    }

    #[test]
    fn test_unsupported_record_length() {
        let line = LINE.replacen("(17)", "(19)", 1);
        let err = ZoneHeader::parse(Path::new("x"), &padded(&line)).unwrap_err();
        assert!(err.to_string().contains("record length 19"));
    }

    #[test]
    fn test_chunk_table_count_and_spans() {
        let bytes = table_bytes(&[(1100, 1), (1500, 40), (2100, 95), (2600, 130)]);
        let table = ChunkTable::parse(Path::new("x"), &bytes).unwrap();
        assert_eq!(table.count(), 3);
        assert_eq!(table.span(0), Some((1100, 400)));
        assert_eq!(table.span(2), Some((2100, 500)));
        assert_eq!(table.span(3), None);
        assert_eq!(table.first_id(1), Some(40));
        assert_eq!(table.end_id(), 130);
    }

    #[test]
    fn test_chunk_table_locate_id() {
        let bytes = table_bytes(&[(1100, 1), (1500, 40), (2100, 95), (2600, 130)]);
        let table = ChunkTable::parse(Path::new("x"), &bytes).unwrap();
        assert_eq!(table.locate_id(0), None);
        assert_eq!(table.locate_id(1), Some(0));
        assert_eq!(table.locate_id(39), Some(0));
        assert_eq!(table.locate_id(40), Some(1));
        assert_eq!(table.locate_id(129), Some(2));
        assert_eq!(table.locate_id(130), None);
    }

    #[test]
    fn test_chunk_table_requires_a_chunk() {
        let bytes = table_bytes(&[(1100, 1)]);
        assert!(ChunkTable::parse(Path::new("x"), &bytes).is_err());
        assert!(ChunkTable::parse(Path::new("x"), &bytes[..100]).is_err());
    }
}
