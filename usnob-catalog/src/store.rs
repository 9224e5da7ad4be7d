//! The catalog session: one open zone file, one resident chunk, one cursor.
//!
//! [`CatalogStore`] is an explicit context value. Every seek and read goes
//! through it, and independent sessions over the same catalog can coexist.
//!
//! ```ignore
//! use usnob_catalog::{CatalogConfig, CatalogStore};
//!
//! let mut store = CatalogStore::new(&CatalogConfig::new("/data/usnob"));
//! let id = store.seek_by_position(83 * 3_600_000, 85 * 3_600_000)?;
//! while let Some(record) = store.read_next()? {
//!     println!("{record}");
//! }
//! ```

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};

use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::format::chunk::ROUNDING_SLACK;
use crate::format::header::MAX_HEADER_LEN;
use crate::format::{
    zone_of_spd, zone_path, ChunkMeta, ChunkTable, RecordLayout, ZoneHeader, CHUNK_RA_BITS,
    CHUNK_SLOTS, FULL_CIRCLE_MAS, INDEX_STRIDE, ZONE_COUNT,
};
use crate::record::CatalogRecord;

/// Where [`CatalogStore::read_next`] stops instead of moving on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopPolicy {
    /// Continue through chunks and zone files to the end of the catalog.
    #[default]
    Never,
    /// Stop at the end of the open zone file.
    EndOfFile,
    /// Stop at the end of the resident chunk.
    EndOfChunk,
}

struct OpenZone {
    zone: u16,
    path: PathBuf,
    file: File,
    header: ZoneHeader,
    chunks: ChunkTable,
}

#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    position: usize,
    previous: Option<usize>,
    id: u32,
}

pub struct CatalogStore {
    root: PathBuf,
    zone: Option<OpenZone>,
    chunk: Option<ChunkMeta>,
    /// Chunk bytes; grown to the largest chunk seen and reused.
    buffer: Vec<u8>,
    cursor: Cursor,
    stop: StopPolicy,
}

impl CatalogStore {
    pub fn new(config: &CatalogConfig) -> Self {
        Self::with_root(&config.root)
    }

    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            zone: None,
            chunk: None,
            buffer: Vec::new(),
            cursor: Cursor::default(),
            stop: StopPolicy::Never,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the file of `zone`, closing any other zone. Opening the zone that
    /// is already open keeps its resident chunk and cursor.
    pub fn open(&mut self, zone: u16) -> Result<()> {
        if zone >= ZONE_COUNT {
            return Err(CatalogError::out_of_range(
                "zone",
                format!("{zone} is not in 0..{ZONE_COUNT}"),
            ));
        }
        if self.current_zone() == Some(zone) {
            return Ok(());
        }
        self.close();

        let path = zone_path(&self.root, zone);
        let mut file = File::open(&path).map_err(|e| CatalogError::io(&path, e))?;

        let mut head = Vec::with_capacity(MAX_HEADER_LEN);
        (&mut file)
            .take(MAX_HEADER_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| CatalogError::io(&path, e))?;
        let header = ZoneHeader::parse(&path, &head)?;
        if header.zone != zone {
            return Err(CatalogError::MalformedHeader {
                path,
                message: format!("header names zone {}, expected {zone}", header.zone),
            });
        }
        if let Some(marker) = header.stargal_marker {
            warn!(
                "zone {zone}: header marks star/galaxy classification as unreliable ({:?})",
                marker as char
            );
        }

        let mut table = vec![0u8; ChunkTable::BYTE_LEN];
        file.seek(SeekFrom::Start(header.table_offset as u64))
            .and_then(|_| file.read_exact(&mut table))
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => CatalogError::TruncatedHeader {
                    path: path.clone(),
                    message: "file ends inside the chunk table".into(),
                },
                _ => CatalogError::io(&path, e),
            })?;
        let chunks = ChunkTable::parse(&path, &table)?;

        debug!(
            "opened zone {zone} ({:?} layout, {} chunks, ids 1..{})",
            header.layout,
            chunks.count(),
            chunks.end_id()
        );
        self.zone = Some(OpenZone {
            zone,
            path,
            file,
            header,
            chunks,
        });
        Ok(())
    }

    /// Release the zone file and the resident chunk. The chunk buffer is kept
    /// for reuse.
    pub fn close(&mut self) {
        self.zone = None;
        self.chunk = None;
        self.cursor = Cursor::default();
    }

    pub fn current_zone(&self) -> Option<u16> {
        self.zone.as_ref().map(|z| z.zone)
    }

    pub fn header(&self) -> Option<&ZoneHeader> {
        self.zone.as_ref().map(|z| &z.header)
    }

    pub fn chunk_table(&self) -> Option<&ChunkTable> {
        self.zone.as_ref().map(|z| &z.chunks)
    }

    pub fn chunk(&self) -> Option<&ChunkMeta> {
        self.chunk.as_ref()
    }

    /// Identifier of the record under the cursor.
    pub fn cursor_id(&self) -> u32 {
        self.cursor.id
    }

    pub fn at_end_of_chunk(&self) -> bool {
        self.chunk
            .as_ref()
            .map_or(true, |c| self.cursor.position >= c.data_len)
    }

    pub fn stop_policy(&self) -> StopPolicy {
        self.stop
    }

    /// Set the stop policy, returning the previous one.
    pub fn set_stop_policy(&mut self, policy: StopPolicy) -> StopPolicy {
        std::mem::replace(&mut self.stop, policy)
    }

    fn open_zone(&self) -> Result<&OpenZone> {
        self.zone
            .as_ref()
            .ok_or_else(|| CatalogError::out_of_range("zone", "no zone file is open"))
    }

    fn layout(&self) -> Result<RecordLayout> {
        Ok(self.open_zone()?.header.layout)
    }

    fn resident(&self) -> Result<(&OpenZone, &ChunkMeta)> {
        let zone = self.open_zone()?;
        let chunk = self
            .chunk
            .as_ref()
            .ok_or_else(|| CatalogError::out_of_range("chunk", "no chunk is resident"))?;
        Ok((zone, chunk))
    }

    /// Make chunk `number` of the open zone resident, with the cursor on its
    /// first record. A no-op when it already is resident. Single-chunk polar
    /// files always load chunk 0.
    pub fn load_chunk(&mut self, number: usize) -> Result<()> {
        let Some(open) = self.zone.as_mut() else {
            return Err(CatalogError::out_of_range("chunk", "no zone file is open"));
        };
        let number = match open.header.layout {
            RecordLayout::Standard => number,
            RecordLayout::Polar => 0,
        };
        if self.chunk.as_ref().is_some_and(|c| c.number == number) {
            return Ok(());
        }
        if number >= CHUNK_SLOTS - 1 || number >= open.chunks.count() {
            return Err(CatalogError::out_of_range(
                "chunk",
                format!("{number} beyond the {} chunks of zone {}", open.chunks.count(), open.zone),
            ));
        }
        let Some((offset, len)) = open.chunks.span(number) else {
            return Err(CatalogError::corrupt_chunk(open.zone, number, "missing from chunk table"));
        };
        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len > 0)
            .ok_or_else(|| {
                CatalogError::corrupt_chunk(open.zone, number, format!("declared length {len}"))
            })?;

        self.chunk = None;
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
        let path = &open.path;
        open.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| open.file.read_exact(&mut self.buffer[..len]))
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => CatalogError::corrupt_chunk(
                    open.zone,
                    number,
                    format!("{len} bytes at offset {offset} run past end of file"),
                ),
                _ => CatalogError::io(path, e),
            })?;

        let meta = ChunkMeta::parse(open.zone, number, open.header.layout, &self.buffer[..len])?;
        debug!(
            "zone {} chunk {number}: {len} bytes, ids {}..={}, {} index entries",
            open.zone,
            meta.id_min,
            meta.id_max,
            meta.index.len()
        );
        self.cursor = Cursor {
            position: meta.stream_start(),
            previous: None,
            id: meta.id_min,
        };
        self.chunk = Some(meta);
        Ok(())
    }

    /// Decode the record at a byte position of the resident chunk, giving it
    /// identifier `id`.
    pub fn decode_at(&self, position: usize, id: u32) -> Result<CatalogRecord> {
        let (zone, chunk) = self.resident()?;
        chunk.decode(&zone.header, &self.buffer[..chunk.byte_len], position, id)
    }

    fn ra_code_at(&self, position: usize) -> Result<u32> {
        let (zone, chunk) = self.resident()?;
        chunk.ra_code_at(zone.header.layout, &self.buffer[..chunk.byte_len], position)
    }

    /// Step the cursor past the record under it. Returns `false` once the
    /// cursor reaches the end of the chunk. A step that would land beyond the
    /// chunk's rounding slack leaves the cursor in place and fails.
    pub fn advance(&mut self) -> Result<bool> {
        let layout = self.layout()?;
        let Some(chunk) = self.chunk.as_ref() else {
            return Ok(false);
        };
        let position = self.cursor.position;
        if position >= chunk.data_len {
            return Ok(false);
        }
        let next = position + layout.record_len(self.buffer[position]);
        if next > chunk.data_len + ROUNDING_SLACK {
            warn!(
                "zone {} chunk {}: record at {position} overruns chunk of {} bytes",
                chunk.zone, chunk.number, chunk.byte_len
            );
            return Err(CatalogError::CursorOverrun {
                zone: chunk.zone,
                chunk: chunk.number,
                position: next,
                length: chunk.data_len,
            });
        }
        self.cursor = Cursor {
            position: next,
            previous: Some(position),
            id: self.cursor.id + 1,
        };
        Ok(next < chunk.data_len)
    }

    /// Position the cursor on the first record of the zone holding `spd_mas`
    /// whose RA is at least `ra_mas`, and return its identifier. The cursor
    /// may end up at the end of the chunk when no such record exists there.
    pub fn seek_by_position(&mut self, ra_mas: i32, spd_mas: i32) -> Result<u32> {
        if !(0..FULL_CIRCLE_MAS).contains(&ra_mas) {
            return Err(CatalogError::out_of_range(
                "right ascension",
                format!("{ra_mas} mas is not in [0°, 360°)"),
            ));
        }
        let zone = zone_of_spd(spd_mas).ok_or_else(|| {
            CatalogError::out_of_range("declination", format!("polar distance {spd_mas} mas"))
        })?;
        self.open(zone)?;

        let value = ra_mas / 10;
        let number = match self.layout()? {
            RecordLayout::Standard => (value >> CHUNK_RA_BITS) as usize,
            RecordLayout::Polar => 0,
        };
        self.load_chunk(number)?;
        let (data_len, target, start) = {
            let (_, chunk) = self.resident()?;
            let start = chunk
                .index_for_ra(value)
                .map_or((chunk.stream_start(), chunk.id_min), |e| (e.offset as usize, e.id));
            (chunk.data_len, (value - chunk.ra_base) as u32, start)
        };

        // A sequential caller is often already there.
        if let Some(previous) = self.cursor.previous {
            if self.cursor.position < data_len
                && self.ra_code_at(previous)? < target
                && target <= self.ra_code_at(self.cursor.position)?
            {
                trace!("seek ra={ra_mas} zone={zone}: cursor already in place");
                return Ok(self.cursor.id);
            }
        }

        self.cursor = Cursor {
            position: start.0,
            previous: None,
            id: start.1,
        };
        while self.cursor.position < data_len {
            if self.ra_code_at(self.cursor.position)? >= target {
                break;
            }
            if !self.advance()? {
                break;
            }
        }
        trace!(
            "seek ra={ra_mas} zone={zone} chunk={number}: id {}",
            self.cursor.id
        );
        Ok(self.cursor.id)
    }

    /// Position the cursor on record `id` of `zone`. Identifiers below 1 are
    /// taken as 1.
    pub fn seek_by_id(&mut self, zone: u16, id: u32) -> Result<()> {
        self.open(zone)?;
        let id = id.max(1);
        if self.cursor.id == id && !self.at_end_of_chunk() {
            return Ok(());
        }

        let number = {
            let open = self.open_zone()?;
            open.chunks.locate_id(id).ok_or_else(|| {
                CatalogError::out_of_range(
                    "identifier",
                    format!("{zone}-{id} beyond last record {}", open.chunks.end_id().saturating_sub(1)),
                )
            })?
        };

        let use_index = match self.chunk.as_ref().filter(|c| c.number == number) {
            Some(chunk) => {
                let step = id as i64 - self.cursor.id as i64;
                step < 0
                    || (step > (INDEX_STRIDE / 3) as i64
                        && id.wrapping_sub(chunk.id_min) % INDEX_STRIDE < INDEX_STRIDE / 3)
            }
            None => true,
        };
        if use_index {
            self.load_chunk(number)?;
            let (_, chunk) = self.resident()?;
            if let Some(entry) = chunk.index_for_id(id) {
                self.cursor = Cursor {
                    position: entry.offset as usize,
                    previous: None,
                    id: entry.id,
                };
            }
        }

        while self.cursor.id < id {
            if !self.advance()? {
                break;
            }
        }
        if self.cursor.id != id || self.at_end_of_chunk() {
            let (_, chunk) = self.resident()?;
            return Err(CatalogError::corrupt_chunk(
                zone,
                chunk.number,
                format!("record {id} not found, cursor stopped at {}", self.cursor.id),
            ));
        }
        trace!("seek id {zone}-{id}: chunk {number}");
        Ok(())
    }

    /// Read one record by identifier.
    pub fn get(&mut self, zone: u16, id: u32) -> Result<CatalogRecord> {
        self.seek_by_id(zone, id)?;
        let record = self.decode_at(self.cursor.position, self.cursor.id)?;
        self.advance()?;
        Ok(record)
    }

    /// Close the session and open the first zone file present, ready for a
    /// sequential read of the whole catalog. Returns `false` when no zone
    /// file exists.
    pub fn rewind(&mut self) -> Result<bool> {
        self.close();
        self.open_from(0)
    }

    /// Open the first zone from `first` upward whose file exists.
    fn open_from(&mut self, first: u16) -> Result<bool> {
        for zone in first..ZONE_COUNT {
            match self.open(zone) {
                Ok(()) => return Ok(true),
                Err(CatalogError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    debug!("zone {zone} has no file, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Return the record under the cursor and step past it. At the end of a
    /// chunk the next chunk is loaded, and at the end of a zone file the next
    /// zone is opened, unless the stop policy says otherwise. Reading with no
    /// zone open starts at the south pole.
    pub fn read_next(&mut self) -> Result<Option<CatalogRecord>> {
        loop {
            if self.zone.is_none() {
                warn!("no zone selected, reading from the south pole");
                if !self.open_from(0)? {
                    return Ok(None);
                }
            }
            if !self.at_end_of_chunk() {
                let record = self.decode_at(self.cursor.position, self.cursor.id)?;
                self.advance()?;
                return Ok(Some(record));
            }

            if self.chunk.is_some() && self.stop == StopPolicy::EndOfChunk {
                return Ok(None);
            }
            let next = self.chunk.as_ref().map_or(0, |c| c.number + 1);
            let (zone, count, layout) = {
                let open = self.open_zone()?;
                (open.zone, open.chunks.count(), open.header.layout)
            };
            let past_last = match layout {
                RecordLayout::Standard => next >= count,
                RecordLayout::Polar => next >= 1,
            };
            if past_last {
                if self.stop != StopPolicy::Never {
                    return Ok(None);
                }
                if !self.open_from(zone + 1)? {
                    return Ok(None);
                }
                self.load_chunk(0)?;
            } else {
                self.load_chunk(next)?;
            }
        }
    }
}
