use usnob_catalog::query::{ColorSelector, Constraint, Field, SkyPoint, SortKey};
use usnob_catalog::{Band, CatalogConfig, CatalogStore};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let root = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("Usage: cone_search <catalog-root>"))?;

    let config = CatalogConfig::new(root);
    let mut store = CatalogStore::new(&config);

    let center = SkyPoint::from_degrees(83.633, -5.375)?;
    let outcome = config
        .cone(center)
        .constraint(Constraint::range(Field::Magnitude(ColorSelector::Red), 0, 1500)?)
        .sort_by(SortKey::ascending(Field::Distance))
        .limit(20)
        .run(&mut store)?;
    println!(
        "\n{} sources within {:.1}' of ({:.3}, {:.3}), {} tested:\n",
        outcome.records.len(),
        config.default_radius_mas as f64 / 60_000.0,
        center.ra_mas as f64 / 3_600_000.0,
        center.dec_mas() as f64 / 3_600_000.0,
        outcome.tested,
    );

    for r in &outcome.records {
        let red = r
            .magnitude(Band::Red1)
            .or(r.magnitude(Band::Red2))
            .map_or(f64::NAN, |m| m as f64 / 100.0);
        println!(
            "  {}  RA {:.6}°  Dec {:+.6}°  R {:.2}  dist {:.2}\"",
            r.designation(),
            r.ra_deg(),
            r.dec_deg(),
            red,
            r.distance().unwrap_or(0) as f64 / 1000.0,
        );
    }

    Ok(())
}
