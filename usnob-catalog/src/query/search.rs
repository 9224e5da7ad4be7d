//! The query executor.
//!
//! A [`Query`] names a target, extra constraints, sort keys and a limit.
//! [`Query::run`] resolves the target to search windows, drives the planner,
//! filters through a [`PredicateEngine`] and collects matches either in
//! arrival order or through a [`ResultOrderingEngine`].
//!
//! ```ignore
//! use usnob_catalog::query::{Field, Query, SkyPoint, SortKey, Target};
//!
//! let center = SkyPoint::from_degrees(83.82, -5.39)?;
//! let outcome = Query::new(Target::Circle { center, radius_mas: 120_000 })
//!     .sort_by(SortKey::ascending(Field::Distance))
//!     .limit(20)
//!     .run(&mut store)?;
//! ```

use log::debug;

use super::ordering::{Comparator, ResultOrderingEngine, SortKey};
use super::planner::{self, CellOrder, SearchStats};
use super::predicate::{Center, Constraint, Field, PredicateEngine};
use super::region::{Region, SkyPoint};
use super::{IntRange, Visit};
use crate::config::CatalogConfig;
use crate::coords::{back_project, Vector3};
use crate::error::{CatalogError, Result};
use crate::format::{FULL_CIRCLE_MAS, HALF_CIRCLE_MAS, ZONE_COUNT};
use crate::record::{CatalogRecord, REFERENCE_EPOCH};
use crate::store::CatalogStore;

/// What a query searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Records within a radius of a center.
    Circle { center: SkyPoint, radius_mas: i32 },
    /// A box on the tangent plane at a center.
    Box {
        center: SkyPoint,
        width_mas: i32,
        height_mas: i32,
    },
    /// Only the query's RA and SPD limits restrict the search.
    Limits,
    /// Identifiers `first..=last` of one zone.
    Identifier { zone: u16, first: u32, last: u32 },
    /// One whole zone file.
    Zone(u16),
    WholeSky,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub target: Target,
    /// RA limits in mas, wrapped through 0° when `lo > hi`.
    pub ra_limits: Option<IntRange>,
    /// South polar distance limits in mas.
    pub spd_limits: Option<IntRange>,
    pub constraints: Vec<Constraint>,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
    /// Move each record to its mean epoch before testing it.
    pub epoch_correction: bool,
    /// Compute tangent-plane offsets for every match.
    pub offsets: bool,
}

/// What a query returns.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub records: Vec<CatalogRecord>,
    /// Records read by the search, including those its cell bounds drop
    /// before the predicate.
    pub tested: u64,
    /// Records that passed it; unknown once a streaming query is cut short.
    pub matched: Option<u64>,
    /// More records matched than the limit let through.
    pub truncated: bool,
}

enum Collector {
    Stream(Vec<CatalogRecord>),
    Sorted(ResultOrderingEngine),
}

impl Query {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            ra_limits: None,
            spd_limits: None,
            constraints: Vec::new(),
            sort: Vec::new(),
            limit: None,
            epoch_correction: false,
            offsets: false,
        }
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ra_limits(mut self, lo: i32, hi: i32) -> Self {
        self.ra_limits = Some(IntRange::new(lo, hi));
        self
    }

    pub fn spd_limits(mut self, lo: i32, hi: i32) -> Self {
        self.spd_limits = Some(IntRange::new(lo, hi));
        self
    }

    pub fn epoch_correction(mut self, on: bool) -> Self {
        self.epoch_correction = on;
        self
    }

    pub fn offsets(mut self, on: bool) -> Self {
        self.offsets = on;
        self
    }

    fn validate_limits(&self) -> Result<()> {
        if let Some(ra) = self.ra_limits {
            let valid = 0..FULL_CIRCLE_MAS;
            if !valid.contains(&ra.lo) || !valid.contains(&ra.hi) {
                return Err(CatalogError::out_of_range(
                    "right ascension",
                    format!("limits [{}, {}] mas are not within [0°, 360°)", ra.lo, ra.hi),
                ));
            }
        }
        if let Some(spd) = self.spd_limits {
            if spd.is_wrapped() || spd.lo < 0 || spd.hi > HALF_CIRCLE_MAS {
                return Err(CatalogError::out_of_range(
                    "declination",
                    format!("polar distance limits [{}, {}] mas", spd.lo, spd.hi),
                ));
            }
        }
        Ok(())
    }

    fn region(&self) -> Result<Region> {
        match self.target {
            Target::Circle { center, radius_mas } => Region::circle(center, radius_mas),
            Target::Box {
                center,
                width_mas,
                height_mas,
            } => Region::rectangle(center, width_mas, height_mas),
            Target::Limits | Target::WholeSky | Target::Identifier { .. } | Target::Zone(_) => {
                Ok(Region::unbounded())
            }
        }
    }

    fn engine(&self, region: &Region) -> Result<PredicateEngine> {
        let mut constraints = self.constraints.clone();
        if let Some((x, y)) = region.offset_limits {
            constraints.push(Constraint::range(Field::OffsetX, -x, x)?);
            constraints.push(Constraint::range(Field::OffsetY, -y, y)?);
        }
        let stop_past = if let Target::Identifier { zone, first, last } = self.target {
            constraints.push(Constraint::identifier(zone, first, last)?);
            true
        } else {
            false
        };
        let center = region
            .center
            .map(|c| Center::new(c.ra_mas, c.spd_mas, region.radius_mas))
            .transpose()?;
        let sort_offsets = self.sort.iter().any(|key| key.field.is_offset());
        Ok(PredicateEngine::new(constraints, center)?
            .with_offsets(self.offsets || sort_offsets)
            .with_stop_past_identifier(stop_past))
    }

    /// Run the query, collecting matches.
    pub fn run(&self, store: &mut CatalogStore) -> Result<QueryOutcome> {
        self.validate_limits()?;
        let region = self.region()?;
        let engine = self.engine(&region)?;
        if !engine.has_center() {
            if let Some(key) = self.sort.iter().find(|key| key.field.is_derived()) {
                return Err(CatalogError::out_of_range(
                    "sort",
                    format!("{:?} needs a query center", key.field),
                ));
            }
        }

        let mut collector = if self.sort.is_empty() {
            Collector::Stream(Vec::new())
        } else {
            let comparator = Comparator::new(self.sort.clone());
            Collector::Sorted(ResultOrderingEngine::new(comparator, self.limit.unwrap_or(usize::MAX)))
        };
        let mut matched = 0u64;
        let mut cut_short = false;

        let stats = self.execute(store, &region, |mut record| {
            if self.epoch_correction {
                correct_epoch(&mut record);
            }
            match engine.check(&mut record) {
                Visit::Accept => {}
                other => return other,
            }
            matched += 1;
            match &mut collector {
                Collector::Stream(records) => {
                    if self.limit.is_some_and(|limit| records.len() >= limit) {
                        cut_short = true;
                        return Visit::Stop;
                    }
                    records.push(record);
                }
                Collector::Sorted(tree) => {
                    tree.insert(record);
                }
            }
            Visit::Accept
        })?;

        let (records, truncated) = match collector {
            Collector::Stream(records) => (records, cut_short),
            Collector::Sorted(tree) => {
                let truncated = tree.is_truncated();
                (tree.into_sorted(), truncated)
            }
        };
        debug!(
            "query {:?}: {} tested, {} matched, {} returned{}",
            self.target,
            stats.tested,
            matched,
            records.len(),
            if truncated { " (truncated)" } else { "" }
        );
        Ok(QueryOutcome {
            records,
            tested: stats.tested,
            matched: (!cut_short).then_some(matched),
            truncated,
        })
    }

    /// Run the query, streaming each match to `sink` in search order. Sort
    /// keys and the limit are ignored; the sink stops the search by
    /// returning [`Visit::Stop`].
    pub fn run_with<F>(&self, store: &mut CatalogStore, mut sink: F) -> Result<SearchStats>
    where
        F: FnMut(CatalogRecord) -> Visit,
    {
        self.validate_limits()?;
        let region = self.region()?;
        let engine = self.engine(&region)?;
        self.execute(store, &region, |mut record| {
            if self.epoch_correction {
                correct_epoch(&mut record);
            }
            match engine.check(&mut record) {
                Visit::Accept => sink(record),
                other => other,
            }
        })
    }

    fn cell_order(&self, region: &Region) -> CellOrder {
        let distance_sorted = self
            .sort
            .first()
            .is_some_and(|key| key.field == Field::Distance && !key.descending);
        match region.center {
            Some(center) if !distance_sorted => {
                CellOrder::Nearest(Vector3::from_catalog(center.ra_mas, center.spd_mas))
            }
            _ => CellOrder::Catalog,
        }
    }

    fn execute<F>(&self, store: &mut CatalogStore, region: &Region, visit: F) -> Result<SearchStats>
    where
        F: FnMut(CatalogRecord) -> Visit,
    {
        match self.target {
            Target::Identifier { zone, first, .. } => {
                check_zone(zone)?;
                planner::scan_zone(store, zone, first, visit)
            }
            Target::Zone(zone) => {
                check_zone(zone)?;
                planner::scan_zone(store, zone, 1, visit)
            }
            Target::WholeSky if self.ra_limits.is_none() && self.spd_limits.is_none() => {
                planner::search(store, None, None, CellOrder::Catalog, visit)
            }
            _ => {
                let Some(window) = region.restrict(self.ra_limits, self.spd_limits) else {
                    debug!("query {:?}: limits leave nothing to search", self.target);
                    return Ok(SearchStats::default());
                };
                planner::search(
                    store,
                    window.ra.as_deref(),
                    window.spd,
                    self.cell_order(region),
                    visit,
                )
            }
        }
    }
}

fn check_zone(zone: u16) -> Result<()> {
    if zone >= ZONE_COUNT {
        return Err(CatalogError::out_of_range(
            "zone",
            format!("{zone} is not in 0..{ZONE_COUNT}"),
        ));
    }
    Ok(())
}

/// Move a record from its 2000.0 position to its mean epoch.
fn correct_epoch(record: &mut CatalogRecord) {
    let years = (record.epoch() - REFERENCE_EPOCH) as f64 / 10.0;
    let (ra, spd) = back_project(record.ra, record.spd, record.pm_ra, record.pm_spd, years);
    record.ra = ra;
    record.spd = spd;
}

impl CatalogConfig {
    /// A query on `target` limited to the configured default.
    pub fn query(&self, target: Target) -> Query {
        Query::new(target).limit(self.default_limit)
    }

    /// A circle of the configured default radius around `center`.
    pub fn cone(&self, center: SkyPoint) -> Query {
        self.query(Target::Circle {
            center,
            radius_mas: self.default_radius_mas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::QUARTER_CIRCLE_MAS;

    #[test]
    fn test_config_query_defaults() {
        let config = CatalogConfig::new("/data");
        let center = SkyPoint::new(0, QUARTER_CIRCLE_MAS).unwrap();
        let query = config.cone(center);
        assert_eq!(query.limit, Some(100));
        assert_eq!(
            query.target,
            Target::Circle {
                center,
                radius_mas: 450_000
            }
        );
    }

    #[test]
    fn test_invalid_limits_rejected_before_io() {
        let mut store = CatalogStore::with_root("/nonexistent");
        let err = Query::new(Target::Limits)
            .spd_limits(10, 5)
            .run(&mut store)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);

        let err = Query::new(Target::Zone(1800)).run(&mut store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);

        let err = Query::new(Target::WholeSky)
            .sort_by(SortKey::ascending(Field::Distance))
            .run(&mut store)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }

    #[test]
    fn test_disjoint_limits_search_nothing() {
        let mut store = CatalogStore::with_root("/nonexistent");
        let center = SkyPoint::from_degrees(10.0, 0.0).unwrap();
        let outcome = Query::new(Target::Circle {
            center,
            radius_mas: 60_000,
        })
        .ra_limits(0, 1000)
        .run(&mut store)
        .unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.tested, 0);
        assert_eq!(outcome.matched, Some(0));
    }

    #[test]
    fn test_epoch_correction_moves_record() {
        let mut record = CatalogRecord::native(900, 1, 1_000_000, QUARTER_CIRCLE_MAS);
        record.pm_spd = 100;
        if let crate::record::RecordSource::Native { astrometry, .. } = &mut record.source {
            astrometry.epoch = 19800;
        }
        correct_epoch(&mut record);
        // 20 years before 2000.0 at 100 mas/yr north.
        assert_eq!(record.spd, QUARTER_CIRCLE_MAS - 2000);
        assert_eq!(record.ra, 1_000_000);
    }
}
