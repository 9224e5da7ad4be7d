use std::collections::BTreeMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use tempfile::TempDir;
use usnob_catalog::coords::{chord_threshold, mas_to_rad, Vector3};
use usnob_catalog::format::{zone_of_spd, zone_path, MAS_PER_DEGREE, QUARTER_CIRCLE_MAS, ZONE_STEP_MAS};
use usnob_catalog::query::{
    ColorSelector, Constraint, Field, Query, SkyPoint, SortKey, Target,
};
use usnob_catalog::record::{Astrometry, RecordSource, TychoId};
use usnob_catalog::test_helpers::ZoneFileBuilder;
use usnob_catalog::{Band, CatalogRecord, CatalogStore, ErrorKind};

const DEG: i32 = MAS_PER_DEGREE;

fn deg(value: f64) -> i32 {
    (value * DEG as f64).round() as i32
}

fn spd_of_dec(dec_deg: f64) -> i32 {
    QUARTER_CIRCLE_MAS + deg(dec_deg)
}

/// Write every zone of `zones`, each holding the records whose SPD falls in
/// it, and return the records as stored.
fn write_zones(root: &Path, zones: RangeInclusive<u16>, records: Vec<CatalogRecord>) -> Vec<CatalogRecord> {
    let mut by_zone: BTreeMap<u16, Vec<CatalogRecord>> = BTreeMap::new();
    for record in records {
        let zone = zone_of_spd(record.spd).expect("record outside the sky");
        assert!(zones.contains(&zone), "record in zone {zone} outside {zones:?}");
        by_zone.entry(zone).or_default().push(record);
    }
    let mut stored = Vec::new();
    for zone in zones {
        let builder = ZoneFileBuilder::new(zone).extend(by_zone.remove(&zone).unwrap_or_default());
        builder.write_to(root).expect("Failed to write zone file");
        stored.extend(builder.stored_records());
    }
    stored
}

fn ids(records: &[CatalogRecord]) -> Vec<(u16, u32)> {
    let mut ids: Vec<_> = records.iter().map(|r| (r.zone, r.id)).collect();
    ids.sort();
    ids
}

fn ras(records: &[CatalogRecord]) -> Vec<i32> {
    let mut ras: Vec<_> = records.iter().map(|r| r.ra).collect();
    ras.sort();
    ras
}

fn star(ra_deg: f64, dec_deg: f64) -> CatalogRecord {
    CatalogRecord::native(0, 0, deg(ra_deg), spd_of_dec(dec_deg))
}

#[test]
fn test_cone_returns_every_record_within_radius() {
    let dir = TempDir::new().unwrap();
    // The grid straddles the boundary between chunks 2 and 3 near 8.738°.
    let mut records = Vec::new();
    for zone in 896..=904u16 {
        let spd = zone as i32 * ZONE_STEP_MAS + ZONE_STEP_MAS / 2;
        for j in 0..25 {
            records.push(CatalogRecord::native(0, 0, deg(8.14) + j * deg(0.05), spd));
        }
        records.push(CatalogRecord::native(0, 0, deg(20.0), spd));
    }
    let stored = write_zones(dir.path(), 896..=904, records);

    let center = SkyPoint::from_degrees(8.74, 0.0).unwrap();
    let radius = deg(0.3);
    let direction = Vector3::from_catalog(center.ra_mas, center.spd_mas);
    let limit = chord_threshold(mas_to_rad(radius as f64));
    let expected: Vec<CatalogRecord> = stored
        .into_iter()
        .filter(|r| Vector3::from_catalog(r.ra, r.spd).chord_squared(&direction) <= limit)
        .collect();
    assert!(expected.len() > 20);

    let mut store = CatalogStore::with_root(dir.path());
    let outcome = Query::new(Target::Circle {
        center,
        radius_mas: radius,
    })
    .run(&mut store)
    .unwrap();
    assert_eq!(ids(&outcome.records), ids(&expected));
    assert_eq!(outcome.matched, Some(expected.len() as u64));
    assert!(!outcome.truncated);
    for record in &outcome.records {
        assert!(record.distance().unwrap() <= radius);
    }

    // The five nearest, in order.
    let mut distances: Vec<i32> = outcome.records.iter().filter_map(|r| r.distance()).collect();
    distances.sort();
    let nearest = Query::new(Target::Circle {
        center,
        radius_mas: radius,
    })
    .sort_by(SortKey::ascending(Field::Distance))
    .limit(5)
    .run(&mut store)
    .unwrap();
    let got: Vec<i32> = nearest.records.iter().filter_map(|r| r.distance()).collect();
    assert_eq!(got, distances[..5].to_vec());
    assert!(nearest.truncated);
}

#[test]
fn test_cone_wraps_through_zero_ra() {
    let dir = TempDir::new().unwrap();
    write_zones(
        dir.path(),
        896..=904,
        vec![
            star(359.9, 0.05),
            star(0.05, 0.05),
            star(0.2, 0.05),
            star(180.0, 0.05),
            star(359.0, 0.05),
        ],
    );

    let mut store = CatalogStore::with_root(dir.path());
    let outcome = Query::new(Target::Circle {
        center: SkyPoint::from_degrees(0.0, 0.05).unwrap(),
        radius_mas: deg(0.3),
    })
    .run(&mut store)
    .unwrap();
    assert_eq!(ras(&outcome.records), vec![deg(0.05), deg(0.2), deg(359.9)]);
}

#[test]
fn test_box_uses_tangent_plane_offsets() {
    let dir = TempDir::new().unwrap();
    write_zones(
        dir.path(),
        898..=902,
        vec![
            star(10.09, 0.05),
            star(10.11, 0.05),
            star(10.0, 0.09),
            star(10.001, 0.11),
            star(9.92, 0.02),
        ],
    );

    let mut store = CatalogStore::with_root(dir.path());
    let outcome = Query::new(Target::Box {
        center: SkyPoint::from_degrees(10.0, 0.05).unwrap(),
        width_mas: deg(0.2),
        height_mas: deg(0.1),
    })
    .offsets(true)
    .run(&mut store)
    .unwrap();
    assert_eq!(ras(&outcome.records), vec![deg(9.92), deg(10.0), deg(10.09)]);
    for record in &outcome.records {
        let (x, y) = record.offsets().unwrap();
        assert!(x.abs() <= deg(0.1) && y.abs() <= deg(0.05));
    }
}

#[test]
fn test_limits_target_with_wrapped_ra() {
    let dir = TempDir::new().unwrap();
    write_zones(
        dir.path(),
        900..=900,
        vec![
            star(9.95, 0.01),
            star(10.05, 0.01),
            star(10.15, 0.01),
            star(0.5, 0.01),
            star(359.5, 0.01),
            star(180.0, 0.01),
        ],
    );
    let zone = (QUARTER_CIRCLE_MAS, QUARTER_CIRCLE_MAS + ZONE_STEP_MAS - 1);

    let mut store = CatalogStore::with_root(dir.path());
    let outcome = Query::new(Target::Limits)
        .ra_limits(deg(9.9), deg(10.1))
        .spd_limits(zone.0, zone.1)
        .run(&mut store)
        .unwrap();
    assert_eq!(ras(&outcome.records), vec![deg(9.95), deg(10.05)]);

    let outcome = Query::new(Target::Limits)
        .ra_limits(deg(359.0), deg(1.0))
        .spd_limits(zone.0, zone.1)
        .run(&mut store)
        .unwrap();
    assert_eq!(ras(&outcome.records), vec![deg(0.5), deg(359.5)]);
}

#[test]
fn test_cone_past_half_circle_covers_whole_sky() {
    let dir = TempDir::new().unwrap();
    write_zones(
        dir.path(),
        900..=900,
        vec![
            star(0.5, 0.05),
            star(120.0, 0.05),
            star(180.0, 0.05),
            star(300.0, 0.05),
        ],
    );

    let mut store = CatalogStore::with_root(dir.path());
    let outcome = Query::new(Target::Circle {
        center: SkyPoint::from_degrees(0.0, 0.05).unwrap(),
        radius_mas: deg(270.0),
    })
    .sort_by(SortKey::ascending(Field::Distance))
    .run(&mut store)
    .unwrap();
    assert_eq!(outcome.records.len(), 4);
    assert_eq!(outcome.matched, Some(4));
    let distances: Vec<i32> = outcome.records.iter().filter_map(|r| r.distance()).collect();
    assert_eq!(distances.len(), 4);
    // Both sides sit 0.05° north of the equator.
    assert!((distances[2] - deg(120.0)).abs() <= deg(0.01));
    assert!((distances[3] - deg(179.9)).abs() <= deg(0.01));
}

#[test]
fn test_inverted_dec_range_is_range_error() {
    let dir = TempDir::new().unwrap();
    write_zones(dir.path(), 900..=900, vec![star(10.0, 0.05)]);
    let mut store = CatalogStore::with_root(dir.path());

    let err = Query::new(Target::Limits)
        .spd_limits(spd_of_dec(0.09), spd_of_dec(0.01))
        .run(&mut store)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);

    let err = Constraint::range(Field::PolarDistance, spd_of_dec(30.0), spd_of_dec(-30.0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

#[test]
fn test_tested_counts_records_outside_cell_polar_distance() {
    let dir = TempDir::new().unwrap();
    write_zones(
        dir.path(),
        900..=900,
        vec![star(10.0, 0.01), star(10.02, 0.09), star(50.0, 0.01)],
    );
    let mut store = CatalogStore::with_root(dir.path());

    let outcome = Query::new(Target::Limits)
        .ra_limits(deg(9.9), deg(10.1))
        .spd_limits(QUARTER_CIRCLE_MAS, spd_of_dec(0.05))
        .run(&mut store)
        .unwrap();
    assert_eq!(ras(&outcome.records), vec![deg(10.0)]);
    assert_eq!(outcome.matched, Some(1));
    assert_eq!(outcome.tested, 2);
}

#[test]
fn test_corrupt_chunk_fails_windowed_search() {
    let dir = TempDir::new().unwrap();
    let mut bytes = ZoneFileBuilder::new(900).push(star(359.2, 0.01)).build().unwrap();
    bytes.truncate(bytes.len() - 8);
    let path = zone_path(dir.path(), 900);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, bytes).unwrap();

    let mut store = CatalogStore::with_root(dir.path());
    let err = Query::new(Target::Limits)
        .ra_limits(deg(359.0), deg(359.5))
        .spd_limits(QUARTER_CIRCLE_MAS, spd_of_dec(0.05))
        .run(&mut store)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

fn magnitude_zone(dir: &Path) -> Vec<CatalogRecord> {
    let records = (0..50)
        .map(|i| {
            let mut record = CatalogRecord::native(0, 0, (i + 1) * 100_000, QUARTER_CIRCLE_MAS + 10);
            record.magnitudes[Band::Blue1.index()] = 1000 + ((i * 37) % 50) * 10;
            record
        })
        .collect();
    write_zones(dir, 900..=900, records)
}

#[test]
fn test_sorted_query_keeps_top_k() {
    let dir = TempDir::new().unwrap();
    magnitude_zone(dir.path());

    let mut store = CatalogStore::with_root(dir.path());
    let outcome = Query::new(Target::WholeSky)
        .sort_by(SortKey::descending(Field::Magnitude(ColorSelector::Blue)))
        .limit(3)
        .run(&mut store)
        .unwrap();
    let mags: Vec<i32> = outcome
        .records
        .iter()
        .map(|r| r.magnitude(Band::Blue1).unwrap())
        .collect();
    assert_eq!(mags, vec![1490, 1480, 1470]);
    assert!(outcome.truncated);
    assert_eq!(outcome.matched, Some(50));
    assert_eq!(outcome.tested, 50);
}

#[test]
fn test_streaming_limit() {
    let dir = TempDir::new().unwrap();
    magnitude_zone(dir.path());
    let mut store = CatalogStore::with_root(dir.path());

    let outcome = Query::new(Target::Zone(900)).limit(10).run(&mut store).unwrap();
    let got: Vec<u32> = outcome.records.iter().map(|r| r.id).collect();
    assert_eq!(got, (1..=10).collect::<Vec<_>>());
    assert!(outcome.truncated);
    assert_eq!(outcome.matched, None);

    let outcome = Query::new(Target::Zone(900)).limit(50).run(&mut store).unwrap();
    assert_eq!(outcome.records.len(), 50);
    assert!(!outcome.truncated);
    assert_eq!(outcome.matched, Some(50));
}

#[test]
fn test_identifier_target_stops_past_last() {
    let dir = TempDir::new().unwrap();
    magnitude_zone(dir.path());
    let mut store = CatalogStore::with_root(dir.path());

    let outcome = Query::new(Target::Identifier {
        zone: 900,
        first: 3,
        last: 5,
    })
    .run(&mut store)
    .unwrap();
    let got: Vec<u32> = outcome.records.iter().map(|r| r.id).collect();
    assert_eq!(got, vec![3, 4, 5]);
    assert_eq!(outcome.tested, 4);

    let err = Query::new(Target::Identifier {
        zone: 900,
        first: 5,
        last: 3,
    })
    .run(&mut store)
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

#[test]
fn test_constraints_filter_matches() {
    let dir = TempDir::new().unwrap();
    let mut records: Vec<CatalogRecord> = (0..50)
        .map(|i| {
            let mut record = CatalogRecord::native(0, 0, (i + 1) * 100_000, QUARTER_CIRCLE_MAS + 10);
            record.magnitudes[Band::Blue1.index()] = 1000 + ((i * 37) % 50) * 10;
            record.pm_ra = if i % 5 == 0 { 300 } else { 0 };
            record
        })
        .collect();
    let tycho = TychoId {
        tyc1: 1,
        tyc2: 2,
        tyc3: 1,
        file_number: 1,
        record_number: 7,
    };
    records.push(CatalogRecord::tycho(0, 0, 6_000_000, QUARTER_CIRCLE_MAS + 10, tycho));
    write_zones(dir.path(), 900..=900, records);
    let mut store = CatalogStore::with_root(dir.path());

    let bright = Query::new(Target::Zone(900))
        .constraint(Constraint::range(Field::Magnitude(ColorSelector::Blue), 1000, 1100).unwrap())
        .run(&mut store)
        .unwrap();
    assert_eq!(bright.records.len(), 11);

    let moving = Query::new(Target::Zone(900))
        .constraint(Constraint::range(Field::ProperMotion, 200, 10_000).unwrap())
        .run(&mut store)
        .unwrap();
    assert_eq!(moving.records.len(), 10);

    let tycho_only = Query::new(Target::Zone(900))
        .constraint(Constraint::Tycho(true))
        .run(&mut store)
        .unwrap();
    assert_eq!(tycho_only.records.len(), 1);
    assert!(tycho_only.records[0].is_tycho());
}

#[test]
fn test_epoch_correction_moves_records_before_testing() {
    let dir = TempDir::new().unwrap();
    let ra = 100_000_000;
    let spd = QUARTER_CIRCLE_MAS + 180_000;
    let mut record = CatalogRecord::native(0, 0, ra, spd);
    record.pm_spd = 200;
    record.source = RecordSource::Native {
        astrometry: Astrometry {
            epoch: 19500,
            ..Astrometry::default()
        },
        photometry: [None; 5],
    };
    write_zones(dir.path(), 900..=900, vec![record]);
    let mut store = CatalogStore::with_root(dir.path());
    let center = SkyPoint::new(ra, spd).unwrap();

    let wide = Target::Circle {
        center,
        radius_mas: 15_000,
    };
    let plain = Query::new(wide).run(&mut store).unwrap();
    assert_eq!(plain.records[0].distance(), Some(0));

    // 50 years at 200 mas/yr back toward the south.
    let corrected = Query::new(wide).epoch_correction(true).run(&mut store).unwrap();
    let moved = &corrected.records[0];
    assert!((moved.spd - (spd - 10_000)).abs() <= 1);
    assert!((moved.distance().unwrap() - 10_000).abs() <= 1);

    let narrow = Query::new(Target::Circle {
        center,
        radius_mas: 5_000,
    })
    .epoch_correction(true)
    .run(&mut store)
    .unwrap();
    assert!(narrow.records.is_empty());
    assert_eq!(narrow.tested, 1);
}

#[test]
fn test_run_with_streams_to_sink() {
    let dir = TempDir::new().unwrap();
    magnitude_zone(dir.path());
    let mut store = CatalogStore::with_root(dir.path());

    let mut seen = Vec::new();
    let stats = Query::new(Target::Zone(900))
        .run_with(&mut store, |record| {
            seen.push(record.id);
            if seen.len() == 4 {
                usnob_catalog::query::Visit::Stop
            } else {
                usnob_catalog::query::Visit::Accept
            }
        })
        .unwrap();
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert!(stats.stopped);
    assert_eq!(stats.tested, 4);
}
