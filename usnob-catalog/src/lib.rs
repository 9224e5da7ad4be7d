//! Reader and spatial query engine for the USNO-B1.0 zone catalog.
//!
//! The catalog is a read-only tree of about 1800 binary zone files, one per
//! 0.1° declination band, holding roughly a billion sources. This crate
//! opens zone files one at a time, decodes their bit-packed records, and runs
//! circle, box, limit, identifier and whole-sky searches with field
//! constraints, multi-key sorting and a bounded top-K result set.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`format`] | Header line, chunk table, chunk preface and record bit layout |
//! | [`store`] | [`CatalogStore`] session: open zone, resident chunk, cursor, seeks |
//! | [`record`] | Decoded [`CatalogRecord`], bands, photometry and Tycho-2 fields |
//! | [`coords`] | Unit vectors, chord thresholds, tangent-plane offsets, epoch back-projection |
//! | [`query`] | [`Query`](query::Query) executor, planner, predicates and top-K ordering |
//! | [`config`] | [`CatalogConfig`]: catalog root and query defaults |
//! | [`error`] | [`CatalogError`] and its coarse [`ErrorKind`] |
//! | [`test_helpers`] | [`ZoneFileBuilder`](test_helpers::ZoneFileBuilder) for synthetic zone files |
//!
//! # Quick Start
//!
//! ```ignore
//! use usnob_catalog::query::{Field, SkyPoint, SortKey};
//! use usnob_catalog::{CatalogConfig, CatalogStore};
//!
//! let config = CatalogConfig::new("/data/usnob");
//! let mut store = CatalogStore::new(&config);
//!
//! let center = SkyPoint::from_degrees(83.633, -5.375)?;
//! let outcome = config
//!     .cone(center)
//!     .sort_by(SortKey::ascending(Field::Distance))
//!     .limit(50)
//!     .run(&mut store)?;
//! for record in &outcome.records {
//!     println!("{record}");
//! }
//! ```
//!
//! # Binary Format
//!
//! Each zone file starts with an ASCII header line, then a table of 125
//! `(offset, first_id)` pairs, then one chunk per 2^20 × 10 mas RA band. A
//! chunk carries a preface with its identifier and position bounds, tables
//! of overflow values, a sparse `(offset, id, ra)` index and a stream of
//! variable-length records sorted by RA. Polar zone files hold a single chunk
//! with a 28-bit RA field. Everything is big-endian. See [`format`].
//!
//! # Features
//!
//! - **`serde`**: `Serialize`/`Deserialize` on records, headers and query types.
//! - **`cli`**: the `query-usnob` binary for querying a catalog tree from the
//!   command line.

pub mod config;
pub mod coords;
pub mod error;
pub mod format;
pub mod query;
pub mod record;
pub mod store;
pub mod test_helpers;

pub use config::CatalogConfig;
pub use error::{CatalogError, ErrorKind, Result};
pub use record::{Band, CatalogRecord};
pub use store::{CatalogStore, StopPolicy};
