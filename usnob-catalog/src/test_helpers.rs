//! Synthetic zone files for tests.
//!
//! [`ZoneFileBuilder`] encodes a handful of records into a complete zone
//! file: header line, chunk table, and per-chunk preface, extras tables,
//! sparse index and bit-packed records. It exists so that the decoder and
//! the query engine can be exercised without the real catalog and is not a
//! general catalog writer.

use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};

use crate::error::{CatalogError, Result};
use crate::format::chunk::{COUNTS_AT, EPOCH_ORIGIN, EXTRAS_AT, INDEX_ENTRY_LEN};
use crate::format::header::{Extras, DEFAULT_EXTRAS};
use crate::format::{
    chunk_of_ra, round_up4, zone_path, BitWriter, ChunkTable, ExtrasSpec, RecordLayout,
    FULL_CIRCLE_MAS, NULL_MAGNITUDE, STATUS_FIRST_BAND, STATUS_LONG_PHOTOMETRY, STATUS_TYCHO, ZONE_COUNT,
    ZONE_STEP_MAS,
};
use crate::record::{Band, CatalogRecord, Photometry, RecordSource};

/// Builds the bytes of one zone file from records.
///
/// Records are stored in RA order and numbered from 1 in that order,
/// whatever identifiers they carry. Positions are truncated to 10 mas and
/// proper motions to even mas/yr, as the file format stores them.
#[derive(Debug, Clone)]
pub struct ZoneFileBuilder {
    zone: u16,
    layout: RecordLayout,
    marker: Option<u8>,
    extras: [ExtrasSpec; 4],
    index_stride: usize,
    records: Vec<CatalogRecord>,
}

impl ZoneFileBuilder {
    /// A zone using the common layout: one chunk per RA band.
    pub fn new(zone: u16) -> Self {
        Self {
            zone,
            layout: RecordLayout::Standard,
            marker: None,
            extras: DEFAULT_EXTRAS,
            index_stride: 1000,
            records: Vec::new(),
        }
    }

    /// A zone using the polar layout: a single chunk with 28-bit RA.
    pub fn polar(zone: u16) -> Self {
        Self {
            layout: RecordLayout::Polar,
            ..Self::new(zone)
        }
    }

    /// Write the alternate header magic carrying `marker`.
    pub fn with_marker(mut self, marker: u8) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Records between sparse index entries.
    pub fn with_index_stride(mut self, stride: usize) -> Self {
        self.index_stride = stride.max(1);
        self
    }

    pub fn with_extras(mut self, extras: [ExtrasSpec; 4]) -> Self {
        self.extras = extras;
        self
    }

    pub fn push(mut self, record: CatalogRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn extend(mut self, records: impl IntoIterator<Item = CatalogRecord>) -> Self {
        self.records.extend(records);
        self
    }

    /// The records as a reader will see them: sorted by RA, in this zone,
    /// numbered from 1, with positions and motions at stored precision.
    pub fn stored_records(&self) -> Vec<CatalogRecord> {
        let mut records = self.records.clone();
        for record in records.iter_mut() {
            record.ra -= record.ra.rem_euclid(10);
            record.spd -= record.spd.rem_euclid(10);
            record.pm_ra -= record.pm_ra.rem_euclid(2);
            record.pm_spd -= record.pm_spd.rem_euclid(2);
            record.classification_marker = self.marker;
        }
        records.sort_by_key(|r| r.ra);
        for (i, record) in records.iter_mut().enumerate() {
            record.zone = self.zone;
            record.id = i as u32 + 1;
        }
        records
    }

    fn chunk_count(&self) -> usize {
        match self.layout {
            RecordLayout::Standard => chunk_of_ra(FULL_CIRCLE_MAS - 10) + 1,
            RecordLayout::Polar => 1,
        }
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        if self.zone >= ZONE_COUNT {
            return Err(CatalogError::out_of_range("zone", format!("{}", self.zone)));
        }
        let records = self.stored_records();
        let count = self.chunk_count();

        let mut bodies = Vec::with_capacity(count);
        let mut first_ids = Vec::with_capacity(count + 1);
        let mut next = 0;
        for number in 0..count {
            let end = match self.layout {
                RecordLayout::Standard => {
                    next + records[next..]
                        .iter()
                        .take_while(|r| chunk_of_ra(r.ra) == number)
                        .count()
                }
                RecordLayout::Polar => records.len(),
            };
            first_ids.push(next as u32 + 1);
            bodies.push(self.encode_chunk(number, next as u32 + 1, &records[next..end])?);
            next = end;
        }
        if next < records.len() {
            return Err(CatalogError::out_of_range(
                "right ascension",
                format!("{} mas is past the last chunk", records[next].ra),
            ));
        }
        first_ids.push(records.len() as u32 + 1);

        let mut file = self.header_line();
        let mut offset = file.len() + ChunkTable::BYTE_LEN;
        let mut table = vec![0u8; ChunkTable::BYTE_LEN];
        for (i, first_id) in first_ids.iter().enumerate() {
            BigEndian::write_u32(&mut table[i * 8..], offset as u32);
            BigEndian::write_u32(&mut table[i * 8 + 4..], *first_id);
            offset += bodies.get(i).map_or(0, Vec::len);
        }
        file.extend_from_slice(&table);
        for body in bodies {
            file.extend_from_slice(&body);
        }
        Ok(file)
    }

    /// Write the file under `root` at its catalog path, creating the
    /// directory as needed.
    pub fn write_to(&self, root: &Path) -> Result<PathBuf> {
        let path = zone_path(root, self.zone);
        let bytes = self.build()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| CatalogError::io(dir, e))?;
        }
        fs::write(&path, bytes).map_err(|e| CatalogError::io(&path, e))?;
        Ok(path)
    }

    fn header_line(&self) -> Vec<u8> {
        let e = &self.extras;
        let mut line = format!(
            "USNO-B1.0({}) {:03}/U{:04}.bin fld={}({}) pm={}({}) mag={}({}) xi={}({})",
            self.layout.fixed_len(),
            self.zone / 10,
            self.zone,
            e[0].offset,
            e[0].direct_max,
            e[1].offset,
            e[1].direct_max,
            e[2].offset,
            e[2].direct_max,
            e[3].offset,
            e[3].direct_max,
        )
        .into_bytes();
        if let Some(marker) = self.marker {
            line[7] = marker;
        }
        while (line.len() + 1) % 4 != 0 {
            line.push(b' ');
        }
        line.push(b'\n');
        line
    }

    fn encode_chunk(&self, number: usize, first_id: u32, records: &[CatalogRecord]) -> Result<Vec<u8>> {
        let ra_base = match self.layout {
            RecordLayout::Standard => (number as i32) << self.layout.ra_bits(),
            RecordLayout::Polar => 0,
        };
        let spd_base = self.zone as i32 * (ZONE_STEP_MAS / 10);

        let mut tables: [Vec<i16>; 4] = Default::default();
        let mut stream = Vec::new();
        let mut index = Vec::new();
        for (k, record) in records.iter().enumerate() {
            if k % self.index_stride == 0 {
                index.push((stream.len(), first_id + k as u32, record.ra / 10));
            }
            let bytes = self.encode_record(record, ra_base, spd_base, &mut tables)?;
            stream.extend_from_slice(&bytes);
        }
        if index.is_empty() {
            index.push((0, first_id, ra_base));
        }

        let table_len: usize = tables.iter().map(Vec::len).sum();
        let preface_len = round_up4(EXTRAS_AT + 2 * table_len);
        let stream_start = preface_len + INDEX_ENTRY_LEN * (index.len() + 1);
        let mut buf = vec![0u8; stream_start];

        let id_max = first_id + records.len().saturating_sub(1) as u32;
        let (ra_min, ra_max) = bounds(records.iter().map(|r| r.ra / 10)).unwrap_or((ra_base, ra_base));
        let (spd_min, spd_max) =
            bounds(records.iter().map(|r| r.spd / 10)).unwrap_or((spd_base, spd_base));
        let words = [
            preface_len as i32,
            first_id as i32,
            ra_min,
            spd_min,
            id_max as i32,
            ra_max,
            spd_max,
        ];
        for (i, word) in words.iter().enumerate() {
            BigEndian::write_i32(&mut buf[i * 4..], *word);
        }
        let mut at = EXTRAS_AT;
        for (k, table) in tables.iter().enumerate() {
            BigEndian::write_i16(&mut buf[COUNTS_AT + 2 * k..], table.len() as i16);
            for &value in table {
                BigEndian::write_i16(&mut buf[at..], value);
                at += 2;
            }
        }
        for (i, &(offset, id, ra)) in index.iter().enumerate() {
            let entry = preface_len + i * INDEX_ENTRY_LEN;
            BigEndian::write_u32(&mut buf[entry..], (stream_start + offset) as u32);
            BigEndian::write_u32(&mut buf[entry + 4..], id);
            BigEndian::write_i32(&mut buf[entry + 8..], ra);
        }
        // The trailing zero-offset entry stays as the sentinel.
        let sentinel = preface_len + index.len() * INDEX_ENTRY_LEN;
        BigEndian::write_u32(&mut buf[sentinel + 4..], first_id + records.len() as u32);

        buf.extend_from_slice(&stream);
        buf.resize(round_up4(buf.len()), 0);
        Ok(buf)
    }

    fn encode_record(
        &self,
        record: &CatalogRecord,
        ra_base: i32,
        spd_base: i32,
        tables: &mut [Vec<i16>; 4],
    ) -> Result<Vec<u8>> {
        let layout = self.layout;
        let ra_bits = layout.ra_bits();
        let ra_code = fit(record.ra as i64 / 10 - ra_base as i64, ra_bits, "right ascension")?;
        let spd_code = fit(record.spd as i64 / 10 - spd_base as i64, 16, "declination")?;

        let pm = [
            self.code(Extras::ProperMotion, record.pm_ra.div_euclid(2), tables)?,
            self.code(Extras::ProperMotion, record.pm_spd.div_euclid(2), tables)?,
        ];

        // Native photometry codes decide between the 6- and 7-byte forms.
        let mut present = 0u8;
        let mut entries: Vec<[u32; 5]> = Vec::new();
        for (band, &magnitude) in record.magnitudes.iter().enumerate() {
            let photometry = record.photometry(Band::ALL[band]);
            if magnitude == NULL_MAGNITUDE && photometry.is_none() {
                continue;
            }
            present |= STATUS_FIRST_BAND >> band;
            if let RecordSource::Native { .. } = record.source {
                let p = photometry.copied().unwrap_or_default();
                entries.push(self.photometry_codes(&p, magnitude, tables)?);
            } else {
                entries.push([fit(magnitude as i64, 16, "magnitude")?, 0, 0, 0, 0]);
            }
        }
        let long = entries
            .iter()
            .any(|[_, field, mag, xi, eta]| *field > 15 || *mag > 2047 || *xi > 2047 || *eta > 2047);

        let tycho = record.is_tycho();
        let status = present
            | if tycho { STATUS_TYCHO } else { 0 }
            | if long && !tycho { STATUS_LONG_PHOTOMETRY } else { 0 };
        let mut w = BitWriter::with_len(layout.record_len(status));
        let b = 12 + ra_bits as usize;
        w.write(0, 8, status as u32)?;
        w.write(8, 4, fit(record.detections as i64, 4, "detections")?)?;
        w.write(12, ra_bits, ra_code)?;
        w.write(b, 16, spd_code)?;
        w.write(b + 56, 12, pm[0])?;
        w.write(b + 68, 12, pm[1])?;

        match &record.source {
            RecordSource::Tycho(t) => {
                w.write(b + 16, 16, t.tyc1 as u32)?;
                w.write(b + 32, 16, t.tyc2 as u32)?;
                w.write(b + 48, 8, t.tyc3 as u32)?;
                w.write(b + 80, 1, (t.record_number < 0) as u32)?;
                w.write(b + 81, 5, fit(t.file_number as i64, 5, "Tycho file number")?)?;
                w.write(b + 86, 18, fit(t.record_number.unsigned_abs() as i64, 18, "Tycho record")?)?;
            }
            RecordSource::Native { astrometry: a, .. } => {
                w.write(b + 16, 10, fit(a.e_ra as i64, 10, "RA error")?)?;
                w.write(b + 26, 10, fit(a.e_spd as i64, 10, "declination error")?)?;
                w.write(b + 36, 3, ((record.flags >> 1) & 7) as u32)?;
                w.write(b + 39, 9, fit((a.epoch - EPOCH_ORIGIN) as i64, 9, "epoch")?)?;
                w.write(b + 48, 4, fit(a.fit_ra as i64, 4, "RA fit")?)?;
                w.write(b + 52, 4, fit(a.fit_spd as i64, 4, "declination fit")?)?;
                w.write(b + 80, 4, fit(a.pm_probability as i64, 4, "motion probability")?)?;
                w.write(b + 84, 10, fit(a.e_pm_ra as i64, 10, "motion error")?)?;
                w.write(b + 94, 10, fit(a.e_pm_spd as i64, 10, "motion error")?)?;
            }
        }

        let mut bytes = w.into_bytes();
        let mut at = layout.fixed_len();
        for entry in entries {
            if tycho {
                BigEndian::write_u16(&mut bytes[at..], entry[0] as u16);
                at += 2;
                continue;
            }
            let (width, field_bits, value_bits) = if long { (7, 6, 13) } else { (6, 4, 11) };
            let mut p = BitWriter::with_len(width);
            p.write(0, 11, entry[0])?;
            p.write(11, field_bits, fit(entry[1] as i64, field_bits, "field code")?)?;
            let mut bit = 11 + field_bits as usize;
            for &value in &entry[2..] {
                p.write(bit, value_bits, fit(value as i64, value_bits, "photometry code")?)?;
                bit += value_bits as usize;
            }
            bytes[at..at + width].copy_from_slice(&p.into_bytes());
            at += width;
        }
        Ok(bytes)
    }

    /// Survey word, then field, magnitude, xi and eta codes.
    fn photometry_codes(&self, p: &Photometry, magnitude: i32, tables: &mut [Vec<i16>; 4]) -> Result<[u32; 5]> {
        let word = p.stargal as i64 * 100 + p.calibration as i64 * 10 + p.survey as i64;
        Ok([
            fit(word, 11, "survey word")?,
            self.code(Extras::Field, p.field, tables)?,
            self.code(Extras::Magnitude, magnitude, tables)?,
            self.code(Extras::Centroid, p.xi, tables)?,
            self.code(Extras::Centroid, p.eta, tables)?,
        ])
    }

    /// Direct code of a value, or the code of its slot in the chunk's
    /// extras table.
    fn code(&self, which: Extras, value: i32, tables: &mut [Vec<i16>; 4]) -> Result<u32> {
        let spec = self.extras[which as usize];
        let raw = value - spec.offset;
        if (0..=spec.direct_max).contains(&raw) {
            return Ok(raw as u32);
        }
        let stored = i16::try_from(raw)
            .map_err(|_| CatalogError::out_of_range("extras", format!("{which:?} value {value}")))?;
        let table = &mut tables[which as usize];
        let slot = match table.iter().position(|&v| v == stored) {
            Some(slot) => slot,
            None => {
                table.push(stored);
                table.len() - 1
            }
        };
        Ok((spec.direct_max + 1) as u32 + slot as u32)
    }
}

fn fit(value: i64, width: u32, what: &'static str) -> Result<u32> {
    if (0..1i64 << width).contains(&value) {
        Ok(value as u32)
    } else {
        Err(CatalogError::out_of_range(
            what,
            format!("{value} does not fit in {width} bits"),
        ))
    }
}

fn bounds(values: impl Iterator<Item = i32>) -> Option<(i32, i32)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChunkMeta, ZoneHeader, QUARTER_CIRCLE_MAS};
    use crate::record::TychoId;

    #[test]
    fn test_header_line_is_aligned_and_parses() {
        let bytes = ZoneFileBuilder::new(900).with_marker(b'x').build().unwrap();
        let header = ZoneHeader::parse(Path::new("U0900.bin"), &bytes).unwrap();
        assert_eq!(header.zone, 900);
        assert_eq!(header.stargal_marker, Some(b'x'));
        assert_eq!(header.table_offset % 4, 0);
        assert_eq!(bytes[header.table_offset - 1], b'\n');

        let table = ChunkTable::parse(Path::new("U0900.bin"), &bytes[header.table_offset..]).unwrap();
        assert_eq!(table.count(), 124);
        assert_eq!(table.end_id(), 1);
    }

    #[test]
    fn test_records_numbered_in_ra_order() {
        let builder = ZoneFileBuilder::new(900)
            .push(CatalogRecord::native(0, 99, 2000, QUARTER_CIRCLE_MAS))
            .push(CatalogRecord::native(0, 98, 1000, QUARTER_CIRCLE_MAS));
        let stored = builder.stored_records();
        assert_eq!(stored[0].ra, 1000);
        assert_eq!((stored[0].zone, stored[0].id), (900, 1));
        assert_eq!(stored[1].id, 2);
    }

    #[test]
    fn test_overflow_values_land_in_extras_table() {
        let mut record = CatalogRecord::native(900, 1, 5000, QUARTER_CIRCLE_MAS + 100);
        record.pm_ra = 4000;
        record.magnitudes[Band::Red1.index()] = 2800;
        let builder = ZoneFileBuilder::polar(900).push(record);
        let bytes = builder.build().unwrap();

        let header = ZoneHeader::parse(Path::new("U0900.bin"), &bytes).unwrap();
        let table = ChunkTable::parse(Path::new("U0900.bin"), &bytes[header.table_offset..]).unwrap();
        let (offset, len) = table.span(0).unwrap();
        let chunk = &bytes[offset as usize..(offset as i64 + len) as usize];
        let meta = ChunkMeta::parse(900, 0, RecordLayout::Polar, chunk).unwrap();
        assert_eq!(meta.extras[Extras::ProperMotion as usize], vec![2500]);
        // 2800 - 700 = 2100 is past the direct range.
        assert_eq!(meta.extras[Extras::Magnitude as usize], vec![2100]);

        let decoded = meta.decode(&header, chunk, meta.stream_start(), 1).unwrap();
        assert_eq!(decoded.pm_ra, 4000);
        assert_eq!(decoded.magnitude(Band::Red1), Some(2800));
        assert_eq!(decoded.spd, QUARTER_CIRCLE_MAS + 100);
    }

    #[test]
    fn test_tycho_record_encodes() {
        let tycho = TychoId {
            tyc1: 4321,
            tyc2: 1234,
            tyc3: 1,
            file_number: 21,
            record_number: -77,
        };
        let mut record = CatalogRecord::tycho(0, 0, 10_000_000, QUARTER_CIRCLE_MAS, tycho);
        record.magnitudes[Band::Blue1.index()] = 1050;
        let bytes = ZoneFileBuilder::new(900).push(record).build().unwrap();
        assert!(bytes.len() > ChunkTable::BYTE_LEN);
    }

    #[test]
    fn test_unencodable_values_are_range_errors() {
        let mut record = CatalogRecord::native(900, 1, 0, QUARTER_CIRCLE_MAS);
        record.detections = 16;
        let err = ZoneFileBuilder::new(900).push(record).build().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Range);

        let outside = CatalogRecord::native(900, 1, 0, 0);
        assert!(ZoneFileBuilder::new(900).push(outside).build().is_err());
    }
}
