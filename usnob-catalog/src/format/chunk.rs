//! Chunk preface, sparse index and record decoding.
//!
//! A chunk is laid out as
//!
//! | Bytes | Content |
//! |-------|---------|
//! | 0..28 | preface: length, id/RA/SPD minimum, id/RA/SPD maximum (i32 each) |
//! | 28..36 | sizes of the four extras tables (i16 each) |
//! | 36.. | the extras tables (i16 values), padded to 4 bytes |
//! | preface length.. | `(offset, id, ra)` i32 triples, zero-offset sentinel last |
//! | first offset.. | bit-packed records |
//!
//! Positions in the preface and index are in units of 10 mas. Record RA is
//! stored relative to the chunk's band and SPD relative to the zone's lower
//! edge.

use byteorder::{BigEndian, ByteOrder};

use super::header::{Extras, ZoneHeader};
use super::{
    BitReader, RecordLayout, CHUNK_RA_BITS, STATUS_FIRST_BAND, STATUS_LONG_PHOTOMETRY, STATUS_TYCHO,
    ZONE_STEP_MAS,
};
use crate::error::{CatalogError, Result};
use crate::record::{
    Astrometry, CatalogRecord, Photometry, RecordSource, TychoId, FLAG_TYCHO,
    FLAG_TYCHO_SUPPLEMENT_1, FLAG_TYCHO_SUPPLEMENT_2,
};

pub(crate) const COUNTS_AT: usize = 28;
pub(crate) const EXTRAS_AT: usize = 36;
pub(crate) const INDEX_ENTRY_LEN: usize = 12;
/// Trailing bytes a chunk may carry from 4-byte rounding.
pub const ROUNDING_SLACK: usize = 3;
/// Epoch origin of native records, in tenths of a year.
pub const EPOCH_ORIGIN: i32 = 19500;

/// One entry of a chunk's sparse `(offset, id, ra)` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of the record within the chunk.
    pub offset: u32,
    pub id: u32,
    /// Absolute RA of the record, in 10 mas.
    pub ra: i32,
}

/// Parsed metadata of the resident chunk. The record bytes stay in the
/// session's reusable buffer.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub zone: u16,
    pub number: usize,
    /// Bytes read from the file.
    pub byte_len: usize,
    /// Bytes that may hold records: the byte length less the rounding slack.
    pub data_len: usize,
    pub id_min: u32,
    pub id_max: u32,
    /// Stored RA and SPD bounds, in 10 mas.
    pub ra_bounds: (i32, i32),
    pub spd_bounds: (i32, i32),
    /// RA band covered by the chunk, in 10 mas, upper bound exclusive.
    pub ra_base: i32,
    pub ra_limit: i32,
    /// Lower SPD edge of the zone, in 10 mas.
    pub spd_base: i32,
    pub extras: [Vec<i16>; 4],
    pub index: Vec<IndexEntry>,
}

impl ChunkMeta {
    pub fn parse(zone: u16, number: usize, layout: RecordLayout, buf: &[u8]) -> Result<Self> {
        let corrupt = |message: String| CatalogError::corrupt_chunk(zone, number, message);
        if buf.len() < EXTRAS_AT + INDEX_ENTRY_LEN {
            return Err(corrupt(format!("{} bytes is too short for a preface", buf.len())));
        }

        let word = |i: usize| BigEndian::read_i32(&buf[i * 4..]);
        let preface_len = usize::try_from(word(0))
            .map_err(|_| corrupt(format!("negative preface length {}", word(0))))?;

        let mut sizes = [0usize; 4];
        for (k, size) in sizes.iter_mut().enumerate() {
            let raw = BigEndian::read_i16(&buf[COUNTS_AT + 2 * k..]);
            *size = usize::try_from(raw)
                .map_err(|_| corrupt(format!("negative extras table size {raw}")))?;
        }
        let extras_end = EXTRAS_AT + 2 * sizes.iter().sum::<usize>();
        if extras_end > preface_len || preface_len + INDEX_ENTRY_LEN > buf.len() {
            return Err(corrupt(format!(
                "preface length {preface_len} inconsistent with extras end {extras_end} and chunk length {}",
                buf.len()
            )));
        }

        let mut extras: [Vec<i16>; 4] = Default::default();
        let mut at = EXTRAS_AT;
        for (table, size) in extras.iter_mut().zip(sizes) {
            *table = buf[at..at + 2 * size]
                .chunks_exact(2)
                .map(BigEndian::read_i16)
                .collect();
            at += 2 * size;
        }

        let stream_start = BigEndian::read_u32(&buf[preface_len..]) as usize;
        if stream_start < preface_len + INDEX_ENTRY_LEN
            || stream_start > buf.len()
            || (stream_start - preface_len) % INDEX_ENTRY_LEN != 0
        {
            return Err(corrupt(format!(
                "record stream offset {stream_start} does not follow the index table at {preface_len}"
            )));
        }
        let index: Vec<IndexEntry> = buf[preface_len..stream_start]
            .chunks_exact(INDEX_ENTRY_LEN)
            .map(|triple| IndexEntry {
                offset: BigEndian::read_u32(&triple[0..4]),
                id: BigEndian::read_u32(&triple[4..8]),
                ra: BigEndian::read_i32(&triple[8..12]),
            })
            .filter(|entry| entry.offset != 0)
            .collect();
        if let Some(bad) = index.iter().find(|e| e.offset as usize > buf.len()) {
            return Err(corrupt(format!("index offset {} past end of chunk", bad.offset)));
        }

        let (ra_base, ra_limit) = match layout {
            RecordLayout::Standard => {
                let base = (number as i32) << CHUNK_RA_BITS;
                (base, base + (1 << CHUNK_RA_BITS))
            }
            RecordLayout::Polar => (0, 1 << layout.ra_bits()),
        };

        Ok(Self {
            zone,
            number,
            byte_len: buf.len(),
            data_len: buf.len().saturating_sub(ROUNDING_SLACK),
            id_min: word(1) as u32,
            id_max: word(4) as u32,
            ra_bounds: (word(2), word(5)),
            spd_bounds: (word(3), word(6)),
            ra_base,
            ra_limit,
            spd_base: zone as i32 * (ZONE_STEP_MAS / 10),
            extras,
            index,
        })
    }

    /// Byte offset where the record stream starts.
    pub fn stream_start(&self) -> usize {
        self.index.first().map_or(self.data_len, |e| e.offset as usize)
    }

    /// Index entry to start a forward scan for RA `ra` (10 mas): the last
    /// one strictly below it, so that equal-RA runs are not skipped.
    pub fn index_for_ra(&self, ra: i32) -> Option<IndexEntry> {
        let after = self.index.partition_point(|e| e.ra < ra);
        self.index.get(after.saturating_sub(1)).copied()
    }

    /// Index entry to start a forward scan for identifier `id`.
    pub fn index_for_id(&self, id: u32) -> Option<IndexEntry> {
        let after = self.index.partition_point(|e| e.id <= id);
        self.index.get(after.saturating_sub(1)).copied()
    }

    /// RA code stored in the record at `position`, relative to `ra_base`.
    pub fn ra_code_at(&self, layout: RecordLayout, buf: &[u8], position: usize) -> Result<u32> {
        let end = (position + 5).min(buf.len());
        let head = buf.get(position..end).unwrap_or(&[]);
        Ok(BitReader::new(head).read(12, layout.ra_bits())?)
    }

    fn extra(&self, header: &ZoneHeader, which: Extras, code: u32) -> Result<i32> {
        let spec = header.extras(which);
        let code = code as i32;
        let raw = if code <= spec.direct_max {
            code
        } else {
            let slot = (code - spec.direct_max - 1) as usize;
            let table = &self.extras[which as usize];
            *table.get(slot).ok_or_else(|| {
                CatalogError::corrupt_chunk(
                    self.zone,
                    self.number,
                    format!("{which:?} code {code} beyond extras table of {}", table.len()),
                )
            })? as i32
        };
        Ok(raw + spec.offset)
    }

    /// Decode the record at `position` of `buf`, which must be this chunk's
    /// bytes.
    pub fn decode(
        &self,
        header: &ZoneHeader,
        buf: &[u8],
        position: usize,
        id: u32,
    ) -> Result<CatalogRecord> {
        let layout = header.layout;
        let overrun = |length: usize| CatalogError::CursorOverrun {
            zone: self.zone,
            chunk: self.number,
            position,
            length,
        };
        let status = *buf.get(position).ok_or_else(|| overrun(buf.len()))?;
        let len = layout.record_len(status);
        let bytes = buf.get(position..position + len).ok_or_else(|| overrun(buf.len()))?;
        let bits = BitReader::new(bytes);

        // Field offsets past RA shift with the RA width.
        let b = 12 + layout.ra_bits() as usize;
        let ra_code = bits.read(12, layout.ra_bits())? as i64;
        let spd_code = bits.read(b, 16)? as i32;
        let ra = i32::try_from((self.ra_base as i64 + ra_code) * 10).map_err(|_| {
            CatalogError::corrupt_chunk(self.zone, self.number, format!("RA code {ra_code} out of range"))
        })?;
        let spd = (self.spd_base + spd_code) * 10;

        let tycho = status & STATUS_TYCHO != 0;
        let mut record = if tycho {
            let negative = bits.flag(b + 80)?;
            let magnitude = bits.read(b + 86, 18)? as i32;
            let id_fields = TychoId {
                tyc1: bits.read(b + 16, 16)? as u16,
                tyc2: bits.read(b + 32, 16)? as u16,
                tyc3: bits.read(b + 48, 8)? as u8,
                file_number: bits.read(b + 81, 5)? as u8,
                record_number: if negative { -magnitude } else { magnitude },
            };
            let mut record = CatalogRecord::tycho(header.zone, id, ra, spd, id_fields);
            record.flags = FLAG_TYCHO
                | match id_fields.file_number {
                    21 => FLAG_TYCHO_SUPPLEMENT_1,
                    22 => FLAG_TYCHO_SUPPLEMENT_2,
                    _ => 0,
                };
            record
        } else {
            let astrometry = Astrometry {
                e_ra: bits.read(b + 16, 10)? as u16,
                e_spd: bits.read(b + 26, 10)? as u16,
                epoch: EPOCH_ORIGIN + bits.read(b + 39, 9)? as i32,
                fit_ra: bits.read(b + 48, 4)? as u8,
                fit_spd: bits.read(b + 52, 4)? as u8,
                pm_probability: bits.read(b + 80, 4)? as u8,
                e_pm_ra: bits.read(b + 84, 10)? as u16,
                e_pm_spd: bits.read(b + 94, 10)? as u16,
            };
            let mut record = CatalogRecord::native(header.zone, id, ra, spd);
            record.source = RecordSource::Native {
                astrometry,
                photometry: [None; 5],
            };
            record.flags = (bits.read(b + 36, 3)? as u8) << 1;
            record
        };
        record.detections = bits.read(8, 4)? as u8;
        record.pm_ra = 2 * self.extra(header, Extras::ProperMotion, bits.read(b + 56, 12)?)?;
        record.pm_spd = 2 * self.extra(header, Extras::ProperMotion, bits.read(b + 68, 12)?)?;
        record.classification_marker = header.stargal_marker;

        let long = status & STATUS_LONG_PHOTOMETRY != 0;
        let mut at = layout.fixed_len();
        for band in 0..5 {
            if status & (STATUS_FIRST_BAND >> band) == 0 {
                continue;
            }
            if tycho {
                record.magnitudes[band] = BigEndian::read_u16(&bytes[at..at + 2]) as i32;
                at += 2;
                continue;
            }
            let width = if long { 7 } else { 6 };
            let (magnitude, entry) = self.decode_photometry(header, &bytes[at..at + width], long)?;
            record.magnitudes[band] = magnitude;
            if let RecordSource::Native { photometry, .. } = &mut record.source {
                photometry[band] = Some(entry);
            }
            at += width;
        }
        Ok(record)
    }

    fn decode_photometry(
        &self,
        header: &ZoneHeader,
        bytes: &[u8],
        long: bool,
    ) -> Result<(i32, Photometry)> {
        let bits = BitReader::new(bytes);
        // field, magnitude, xi and eta widths follow the 11-bit survey word
        let (field_bits, value_bits) = if long { (6, 13) } else { (4, 11) };
        let word = bits.read(0, 11)?;
        let field_code = bits.read(11, field_bits)?;
        let at = 11 + field_bits as usize;
        let mag_code = bits.read(at, value_bits)?;
        let xi_code = bits.read(at + value_bits as usize, value_bits)?;
        let eta_code = bits.read(at + 2 * value_bits as usize, value_bits)?;

        let entry = Photometry {
            stargal: (word / 100) as u8,
            calibration: ((word / 10) % 10) as u8,
            survey: (word % 10) as u8,
            field: self.extra(header, Extras::Field, field_code)?,
            xi: self.extra(header, Extras::Centroid, xi_code)?,
            eta: self.extra(header, Extras::Centroid, eta_code)?,
        };
        Ok((self.extra(header, Extras::Magnitude, mag_code)?, entry))
    }
}
