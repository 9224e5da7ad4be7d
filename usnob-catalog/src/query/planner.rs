//! Cell enumeration and the record-streaming search loop.
//!
//! A search window is cut along zone boundaries in SPD and along chunk
//! boundaries in RA. Each resulting cell lies in exactly one chunk of one
//! zone file, so it is served by one positional seek followed by a forward
//! read that ends when RA passes the cell.

use log::{debug, trace, warn};

use super::{IntRange, Visit};
use crate::coords::Vector3;
use crate::error::{CatalogError, Result};
use crate::format::{chunk_of_ra, CHUNK_STEP_MAS, FULL_CIRCLE_MAS, HALF_CIRCLE_MAS, ZONE_COUNT, ZONE_STEP_MAS};
use crate::record::CatalogRecord;
use crate::store::{CatalogStore, StopPolicy};

/// Order in which cells are visited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellOrder {
    /// Ascending zone, then RA: the order records are stored in.
    Catalog,
    /// Nearest cell center first, by chord distance to this direction.
    Nearest(Vector3),
}

/// One zone-by-chunk rectangle to visit. Both ranges are plain, never wrapped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub ra: IntRange,
    pub spd: IntRange,
}

impl Cell {
    fn center(&self) -> Vector3 {
        let ra = self.ra.lo / 2 + self.ra.hi / 2;
        let spd = self.spd.lo / 2 + self.spd.hi / 2;
        Vector3::from_catalog(ra, spd)
    }

    fn zone(&self) -> u16 {
        (self.spd.lo / ZONE_STEP_MAS).min(ZONE_COUNT as i32 - 1) as u16
    }
}

/// Counters reported by a search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Records read from the searched cells, including those outside a
    /// cell's SPD range that never reach the visitor.
    pub tested: u64,
    pub accepted: u64,
    /// The visitor ended the search early.
    pub stopped: bool,
}

impl SearchStats {
    fn record(&mut self, visit: Visit) -> bool {
        self.tested += 1;
        match visit {
            Visit::Accept => self.accepted += 1,
            Visit::Reject => {}
            Visit::Stop => self.stopped = true,
        }
        !self.stopped
    }
}

/// Split an RA range at 0°/360° into one or two plain ranges, in ascending
/// order.
pub fn split_ra(range: IntRange) -> Vec<IntRange> {
    if range.is_wrapped() {
        vec![
            IntRange::new(0, range.hi),
            IntRange::new(range.lo, FULL_CIRCLE_MAS - 1),
        ]
    } else {
        vec![range]
    }
}

/// Cut a plain SPD range at zone boundaries.
pub fn split_zones(spd: IntRange) -> Vec<IntRange> {
    let mut pieces = Vec::new();
    let mut lo = spd.lo;
    loop {
        let high = ZONE_STEP_MAS * (lo / ZONE_STEP_MAS) + ZONE_STEP_MAS - 1;
        if high >= spd.hi {
            pieces.push(IntRange::new(lo, spd.hi));
            return pieces;
        }
        pieces.push(IntRange::new(lo, high));
        lo = high + 1;
    }
}

/// Cut a plain RA range at chunk boundaries.
pub fn split_chunks(ra: IntRange) -> Vec<IntRange> {
    let mut pieces = Vec::new();
    let mut lo = ra.lo as i64;
    let hi = ra.hi as i64;
    loop {
        let high = (lo / CHUNK_STEP_MAS + 1) * CHUNK_STEP_MAS - 1;
        if high >= hi {
            pieces.push(IntRange::new(lo as i32, hi as i32));
            return pieces;
        }
        pieces.push(IntRange::new(lo as i32, high as i32));
        lo = high + 1;
    }
}

/// Cells covering plain RA pieces by an SPD range. With `per_chunk` unset
/// each RA piece stays whole.
pub fn plan_cells(ra: &[IntRange], spd: IntRange, per_chunk: bool, order: CellOrder) -> Vec<Cell> {
    let ra_cells: Vec<IntRange> = if per_chunk {
        ra.iter().flat_map(|&piece| split_chunks(piece)).collect()
    } else {
        ra.to_vec()
    };
    let mut cells: Vec<Cell> = split_zones(spd)
        .into_iter()
        .flat_map(|spd| ra_cells.iter().map(move |&ra| Cell { ra, spd }))
        .collect();

    if let CellOrder::Nearest(target) = order {
        let mut keyed: Vec<(f64, Cell)> = cells
            .into_iter()
            .map(|cell| (cell.center().chord_squared(&target), cell))
            .collect();
        keyed.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.spd.lo.cmp(&b.1.spd.lo))
                .then(a.1.ra.lo.cmp(&b.1.ra.lo))
        });
        cells = keyed.into_iter().map(|(_, cell)| cell).collect();
    }
    cells
}

fn validate(ra: Option<&[IntRange]>, spd: Option<IntRange>) -> Result<()> {
    if let Some(spd) = spd {
        if spd.is_wrapped() || spd.lo < 0 || spd.hi > HALF_CIRCLE_MAS {
            return Err(CatalogError::out_of_range(
                "declination",
                format!("polar distance range [{}, {}] mas", spd.lo, spd.hi),
            ));
        }
    }
    for piece in ra.unwrap_or(&[]) {
        let valid = 0..FULL_CIRCLE_MAS;
        if !valid.contains(&piece.lo) || !valid.contains(&piece.hi) {
            return Err(CatalogError::out_of_range(
                "right ascension",
                format!("range [{}, {}] mas is not within [0°, 360°)", piece.lo, piece.hi),
            ));
        }
    }
    Ok(())
}

fn covers_all_ra(range: &IntRange) -> bool {
    (range.lo == 0 && range.hi == FULL_CIRCLE_MAS - 1) || range.lo == range.hi + 1
}

/// Stream every record of a window to `visit`.
///
/// `ra` holds RA ranges, each possibly wrapped through 0°; `None` leaves RA
/// unrestricted and an empty slice selects nothing. `spd` is the south polar
/// distance range, `None` for all of it. Without any restriction the whole
/// catalog is read in file order.
pub fn search<F>(
    store: &mut CatalogStore,
    ra: Option<&[IntRange]>,
    spd: Option<IntRange>,
    order: CellOrder,
    mut visit: F,
) -> Result<SearchStats>
where
    F: FnMut(CatalogRecord) -> Visit,
{
    validate(ra, spd)?;
    let full_spd = spd.map_or(true, |s| s.lo == 0 && s.hi == HALF_CIRCLE_MAS);
    let full_ra = ra.map_or(true, |pieces| pieces.iter().any(covers_all_ra));
    if full_spd && full_ra {
        return whole_sky(store, &mut visit);
    }
    let spd = spd.unwrap_or(IntRange::new(0, HALF_CIRCLE_MAS));

    let (pieces, per_chunk) = if full_ra {
        (vec![IntRange::new(0, FULL_CIRCLE_MAS - 1)], false)
    } else {
        let pieces: Vec<IntRange> = ra.unwrap_or(&[]).iter().flat_map(|&r| split_ra(r)).collect();
        (pieces, true)
    };
    let cells = plan_cells(&pieces, spd, per_chunk, order);
    trace!(
        "search plan: {} cells over SPD [{}, {}] from {} RA pieces",
        cells.len(),
        spd.lo,
        spd.hi,
        pieces.len()
    );

    // Whole-RA cells read to the end of each zone file, others to the end of
    // their chunk.
    let policy = if per_chunk {
        StopPolicy::EndOfChunk
    } else {
        StopPolicy::EndOfFile
    };
    let previous = store.set_stop_policy(policy);
    let result = scan_cells(store, &cells, &mut visit);
    store.set_stop_policy(previous);

    if let Ok(stats) = &result {
        debug!(
            "search visited {} cells: {} tested, {} accepted{}",
            cells.len(),
            stats.tested,
            stats.accepted,
            if stats.stopped { ", stopped early" } else { "" }
        );
    }
    result
}

fn scan_cells<F>(store: &mut CatalogStore, cells: &[Cell], visit: &mut F) -> Result<SearchStats>
where
    F: FnMut(CatalogRecord) -> Visit,
{
    let mut stats = SearchStats::default();
    for cell in cells {
        match scan_cell(store, cell, visit, &mut stats) {
            Ok(true) => {}
            Ok(false) => return Ok(stats),
            Err(err) => {
                warn!(
                    "zone {} chunk {}: search cell RA [{}, {}] failed: {err}",
                    cell.zone(),
                    chunk_of_ra(cell.ra.lo),
                    cell.ra.lo,
                    cell.ra.hi
                );
                return Err(err);
            }
        }
    }
    Ok(stats)
}

/// Read one cell. Returns `false` once the visitor stops the search.
fn scan_cell<F>(store: &mut CatalogStore, cell: &Cell, visit: &mut F, stats: &mut SearchStats) -> Result<bool>
where
    F: FnMut(CatalogRecord) -> Visit,
{
    store.seek_by_position(cell.ra.lo, cell.spd.lo)?;
    while let Some(record) = store.read_next()? {
        if record.ra > cell.ra.hi {
            break;
        }
        // Chunks hold the whole zone in SPD.
        if !cell.spd.contains(record.spd) {
            stats.tested += 1;
            continue;
        }
        if !stats.record(visit(record)) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn whole_sky<F>(store: &mut CatalogStore, visit: &mut F) -> Result<SearchStats>
where
    F: FnMut(CatalogRecord) -> Visit,
{
    debug!("whole-sky scan of {:?}", store.root());
    let previous = store.set_stop_policy(StopPolicy::Never);
    let result = (|| -> Result<SearchStats> {
        let mut stats = SearchStats::default();
        if !store.rewind()? {
            return Ok(stats);
        }
        while let Some(record) = store.read_next()? {
            if !stats.record(visit(record)) {
                break;
            }
        }
        Ok(stats)
    })();
    store.set_stop_policy(previous);
    result
}

/// Stream one zone file from identifier `first` to its end.
pub fn scan_zone<F>(store: &mut CatalogStore, zone: u16, first: u32, mut visit: F) -> Result<SearchStats>
where
    F: FnMut(CatalogRecord) -> Visit,
{
    if zone >= ZONE_COUNT {
        return Err(CatalogError::out_of_range(
            "zone",
            format!("{zone} is not in 0..{ZONE_COUNT}"),
        ));
    }
    store.open(zone)?;
    let first = first.max(1);
    let end = store.chunk_table().map_or(1, |t| t.end_id());
    if first >= end {
        return Ok(SearchStats::default());
    }

    let previous = store.set_stop_policy(StopPolicy::EndOfFile);
    let result = (|| -> Result<SearchStats> {
        let mut stats = SearchStats::default();
        store.seek_by_id(zone, first)?;
        while let Some(record) = store.read_next()? {
            if !stats.record(visit(record)) {
                break;
            }
        }
        Ok(stats)
    })();
    store.set_stop_policy(previous);
    result
}
