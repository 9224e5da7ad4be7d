use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;

use usnob_catalog::format::MAS_PER_DEGREE;
use usnob_catalog::query::{
    ColorSelector, Constraint, Field, QueryOutcome, SkyPoint, SortKey, Target,
};
use usnob_catalog::{Band, CatalogConfig, CatalogRecord, CatalogStore};

const MAS_PER_ARCMIN: f64 = 60_000.0;

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "query-usnob")]
#[command(about = "Query a USNO-B1.0 zone catalog")]
#[command(version)]
struct Cli {
    /// Directory holding the ddd/Uzzzz.bin zone files
    #[arg(long, env = "USNOB_ROOT")]
    root: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header and chunk table summary of a zone file
    Info {
        /// Zone number, 0 (south pole) to 1799
        zone: u16,
    },
    /// Search around a center, inside RA/Dec limits, or over the whole sky
    Search {
        /// Center right ascension in degrees
        #[arg(long, requires = "dec", allow_hyphen_values = true)]
        ra: Option<f64>,
        /// Center declination in degrees
        #[arg(long, requires = "ra", allow_hyphen_values = true)]
        dec: Option<f64>,
        /// Search radius in arcminutes
        #[arg(long, conflicts_with = "box_size")]
        radius: Option<f64>,
        /// Box size as WIDTHxHEIGHT in arcminutes
        #[arg(long = "box", value_name = "WxH")]
        box_size: Option<String>,
        /// RA limits in degrees, LO,HI; LO > HI wraps through 0
        #[arg(long, value_name = "LO,HI", allow_hyphen_values = true)]
        ra_range: Option<String>,
        /// Declination limits in degrees, LO,HI
        #[arg(long, value_name = "LO,HI", allow_hyphen_values = true)]
        dec_range: Option<String>,
        /// Magnitude limits, LO,HI
        #[arg(long, value_name = "LO,HI", allow_hyphen_values = true)]
        mag: Option<String>,
        /// Band for --mag and mag sorting: b, r, b1, r1, b2, r2 or i
        #[arg(long, default_value = "")]
        color: String,
        /// Total proper motion limits in mas/yr, LO,HI
        #[arg(long, value_name = "LO,HI")]
        pm: Option<String>,
        /// Keep only Tycho-2 sourced records, or exclude them with false
        #[arg(long)]
        tycho: Option<bool>,
        /// Sort key, repeatable: dist, ra, dec, pm, epoch, mag, class, ndet, x, y;
        /// a leading '-' sorts descending
        #[arg(long, allow_hyphen_values = true)]
        sort: Vec<String>,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
        /// Move each source to its mean epoch before testing it
        #[arg(long)]
        epoch: bool,
        /// Print tangent-plane offsets from the center
        #[arg(long)]
        offsets: bool,
        /// Print query timing
        #[arg(long)]
        timing: bool,
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Fetch records by catalog designation
    Get {
        zone: u16,
        id: u32,
        /// Last identifier of a range starting at ID
        #[arg(long)]
        last: Option<u32>,
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &cli.root {
        Some(root) => CatalogConfig::new(root),
        None => CatalogConfig::default(),
    };
    let mut store = CatalogStore::new(&config);

    match cli.command {
        Commands::Info { zone } => {
            store.open(zone)?;
            if let (Some(header), Some(table)) = (store.header(), store.chunk_table()) {
                println!("{header}");
                println!("File: {}", config.zone_path(zone).display());
                println!("Chunks: {}", table.count());
                println!("Records: {}", table.end_id().saturating_sub(1));
            }
        }
        Commands::Search {
            ra,
            dec,
            radius,
            box_size,
            ra_range,
            dec_range,
            mag,
            color,
            pm,
            tycho,
            sort,
            limit,
            epoch,
            offsets,
            timing,
            format,
        } => {
            let target = match (ra, dec) {
                (Some(ra), Some(dec)) => {
                    let center = SkyPoint::from_degrees(ra, dec)?;
                    match (&box_size, radius) {
                        (Some(size), _) => {
                            let (w, h) = parse_box(size)?;
                            Target::Box {
                                center,
                                width_mas: arcmin_to_mas(w),
                                height_mas: arcmin_to_mas(h),
                            }
                        }
                        (None, Some(r)) => Target::Circle {
                            center,
                            radius_mas: arcmin_to_mas(r),
                        },
                        (None, None) => Target::Circle {
                            center,
                            radius_mas: config.default_radius_mas,
                        },
                    }
                }
                _ if ra_range.is_some() || dec_range.is_some() => Target::Limits,
                _ => Target::WholeSky,
            };

            let color: ColorSelector = color.parse()?;
            let mut query = config.query(target).epoch_correction(epoch).offsets(offsets);
            if let Some(n) = limit {
                query = query.limit(n);
            }
            if let Some(range) = ra_range {
                let (lo, hi) = parse_pair(&range)?;
                query = query.ra_limits(deg_to_ra_mas(lo), deg_to_ra_mas(hi));
            }
            if let Some(range) = dec_range {
                let (lo, hi) = parse_pair(&range)?;
                query = query.spd_limits(dec_to_spd_mas(lo), dec_to_spd_mas(hi));
            }
            if let Some(range) = mag {
                let (lo, hi) = parse_pair(&range)?;
                let (lo, hi) = ((lo * 100.0).round() as i32, (hi * 100.0).round() as i32);
                query = query.constraint(Constraint::range(Field::Magnitude(color), lo, hi)?);
            }
            if let Some(range) = pm {
                let (lo, hi) = parse_pair(&range)?;
                query = query.constraint(Constraint::range(
                    Field::ProperMotion,
                    lo.round() as i32,
                    hi.round() as i32,
                )?);
            }
            if let Some(only) = tycho {
                query = query.constraint(Constraint::Tycho(only));
            }
            for key in &sort {
                query = query.sort_by(parse_sort_key(key, color)?);
            }

            let start = if timing { Some(Instant::now()) } else { None };
            let outcome = query.run(&mut store)?;
            if let Some(start_time) = start {
                let elapsed = start_time.elapsed();
                eprintln!(
                    "Query completed in {:.2} ms, {} records tested",
                    elapsed.as_secs_f64() * 1000.0,
                    outcome.tested
                );
            }
            print_outcome(&outcome, &format)?;
        }
        Commands::Get {
            zone,
            id,
            last,
            format,
        } => {
            let outcome = config
                .query(Target::Identifier {
                    zone,
                    first: id,
                    last: last.unwrap_or(id),
                })
                .run(&mut store)?;
            print_outcome(&outcome, &format)?;
        }
    }

    Ok(())
}

fn print_outcome(outcome: &QueryOutcome, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => print_table(outcome),
        OutputFormat::Json => print_json(&outcome.records)?,
        OutputFormat::Csv => print_csv(&outcome.records),
    }
    Ok(())
}

fn print_table(outcome: &QueryOutcome) {
    println!(
        "{:12} {:>11} {:>11} {:>5} {:>5} {:>5} {:>5} {:>5} {:>6} {:>6} {:>9}",
        "USNO-B1.0", "RA", "Dec", "B1", "R1", "B2", "R2", "I", "pmRA", "pmDE", "dist\""
    );
    for record in &outcome.records {
        let distance = record
            .distance()
            .map_or_else(String::new, |d| format!("{:9.3}", d as f64 / 1000.0));
        print!(
            "{record} {:6} {:6} {distance}",
            record.pm_ra,
            -record.pm_spd
        );
        if let Some((x, y)) = record.offsets() {
            print!(" x={:+.3}\" y={:+.3}\"", x as f64 / 1000.0, y as f64 / 1000.0);
        }
        println!();
    }

    if outcome.records.is_empty() {
        println!("No records found matching the search criteria.");
    } else {
        println!("\nTotal results: {}", outcome.records.len());
        if outcome.truncated {
            match outcome.matched {
                Some(matched) => println!("Limit reached: {matched} records matched"),
                None => println!("Limit reached: more records matched"),
            }
        }
    }
}

#[derive(serde::Serialize)]
struct JsonRecord {
    designation: String,
    ra_deg: f64,
    dec_deg: f64,
    pm_ra: i32,
    pm_dec: i32,
    epoch: f64,
    magnitudes: Vec<Option<f64>>,
    tycho: bool,
    distance_arcsec: Option<f64>,
}

fn print_json(records: &[CatalogRecord]) -> anyhow::Result<()> {
    let rows: Vec<JsonRecord> = records
        .iter()
        .map(|r| JsonRecord {
            designation: r.designation(),
            ra_deg: r.ra_deg(),
            dec_deg: r.dec_deg(),
            pm_ra: r.pm_ra,
            pm_dec: -r.pm_spd,
            epoch: r.epoch() as f64 / 10.0,
            magnitudes: Band::ALL
                .iter()
                .map(|&band| r.magnitude(band).map(|m| m as f64 / 100.0))
                .collect(),
            tycho: r.is_tycho(),
            distance_arcsec: r.distance().map(|d| d as f64 / 1000.0),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn print_csv(records: &[CatalogRecord]) {
    println!("designation,ra_deg,dec_deg,pm_ra,pm_dec,epoch,b1,r1,b2,r2,i,distance_arcsec");
    for r in records {
        let mags: Vec<String> = Band::ALL
            .iter()
            .map(|&band| r.magnitude(band).map_or_else(String::new, |m| format!("{:.2}", m as f64 / 100.0)))
            .collect();
        println!(
            "{},{},{},{},{},{:.1},{},{}",
            r.designation(),
            r.ra_deg(),
            r.dec_deg(),
            r.pm_ra,
            -r.pm_spd,
            r.epoch() as f64 / 10.0,
            mags.join(","),
            r.distance().map_or_else(String::new, |d| format!("{:.3}", d as f64 / 1000.0))
        );
    }
}

fn arcmin_to_mas(arcmin: f64) -> i32 {
    (arcmin * MAS_PER_ARCMIN).round() as i32
}

fn deg_to_ra_mas(deg: f64) -> i32 {
    let full = 360 * MAS_PER_DEGREE as i64;
    ((deg * MAS_PER_DEGREE as f64).round() as i64).rem_euclid(full) as i32
}

fn dec_to_spd_mas(deg: f64) -> i32 {
    ((deg + 90.0) * MAS_PER_DEGREE as f64).round() as i32
}

fn parse_pair(s: &str) -> anyhow::Result<(f64, f64)> {
    let (lo, hi) = s
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("Expected LO,HI, got '{}'", s))?;
    Ok((lo.trim().parse()?, hi.trim().parse()?))
}

fn parse_box(s: &str) -> anyhow::Result<(f64, f64)> {
    match s.split_once(['x', 'X']) {
        Some((w, h)) => Ok((w.trim().parse()?, h.trim().parse()?)),
        None => {
            let side: f64 = s.trim().parse()?;
            Ok((side, side))
        }
    }
}

fn parse_sort_key(s: &str, color: ColorSelector) -> anyhow::Result<SortKey> {
    let (descending, name) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let field = match name {
        "dist" | "distance" => Field::Distance,
        "ra" => Field::RightAscension,
        "dec" | "spd" => Field::PolarDistance,
        "pm" => Field::ProperMotion,
        "epoch" => Field::Epoch,
        "mag" => Field::Magnitude(color),
        "class" => Field::Classification(color),
        "ndet" => Field::Detections,
        "x" => Field::OffsetX,
        "y" => Field::OffsetY,
        "id" => Field::Identifier,
        _ => anyhow::bail!("Unknown sort key '{}'", name),
    };
    Ok(if descending {
        SortKey::descending(field)
    } else {
        SortKey::ascending(field)
    })
}
