//! Typed catalog records.
//!
//! A [`CatalogRecord`] is fully materialized on decode: nothing in it borrows
//! the chunk buffer, so records may be kept across chunk loads and queries.

use std::cell::OnceCell;
use std::fmt;

use crate::format::{MAS_PER_DEGREE, NULL_MAGNITUDE, QUARTER_CIRCLE_MAS};

/// Diffraction spike.
pub const FLAG_SPIKE: u8 = 0x02;
/// Correlated with a YS4.0 entry.
pub const FLAG_YS4: u8 = 0x04;
/// Proper motion confirmed.
pub const FLAG_PROPER_MOTION: u8 = 0x08;
/// Tycho-2 record from supplement 1.
pub const FLAG_TYCHO_SUPPLEMENT_1: u8 = 0x10;
/// Tycho-2 record from supplement 2.
pub const FLAG_TYCHO_SUPPLEMENT_2: u8 = 0x20;
/// Record comes from Tycho-2 rather than the native survey.
pub const FLAG_TYCHO: u8 = 0x80;

/// Epoch 2000.0 in tenths of a year: the epoch of Tycho-2 positions and
/// the reference of all proper motions.
pub const REFERENCE_EPOCH: i32 = 20000;

/// Photometry bands in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Band {
    Blue1 = 0,
    Red1 = 1,
    Blue2 = 2,
    Red2 = 3,
    Infrared = 4,
}

impl Band {
    pub const ALL: [Band; 5] = [
        Band::Blue1,
        Band::Red1,
        Band::Blue2,
        Band::Red2,
        Band::Infrared,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Band> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Band::Blue1 => "B1",
            Band::Red1 => "R1",
            Band::Blue2 => "B2",
            Band::Red2 => "R2",
            Band::Infrared => "I",
        }
    }
}

/// Survey details of one native photometry entry. The magnitude itself is
/// kept in [`CatalogRecord::magnitudes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Photometry {
    /// Star/galaxy estimator, 0 (galaxy-like) to 11 (star-like); 19 when unknown.
    pub stargal: u8,
    pub calibration: u8,
    pub survey: u8,
    pub field: i32,
    /// Centroid residuals, in mas.
    pub xi: i32,
    pub eta: i32,
}

/// Trailing astrometric fields of a native record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Astrometry {
    /// Position errors, in mas.
    pub e_ra: u16,
    pub e_spd: u16,
    /// Mean epoch, in tenths of a year.
    pub epoch: i32,
    /// Fit residuals, in units of 100 mas.
    pub fit_ra: u8,
    pub fit_spd: u8,
    /// Total proper-motion probability, in tenths.
    pub pm_probability: u8,
    /// Proper-motion errors, in mas/yr.
    pub e_pm_ra: u16,
    pub e_pm_spd: u16,
}

/// Tycho-2 identification carried by Tycho-sourced records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TychoId {
    pub tyc1: u16,
    pub tyc2: u16,
    pub tyc3: u8,
    pub file_number: u8,
    /// Negative for records taken from a supplement.
    pub record_number: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecordSource {
    Native {
        astrometry: Astrometry,
        photometry: [Option<Photometry>; 5],
    },
    Tycho(TychoId),
}

/// Values computed against a query center, plus the lazily cached total
/// proper motion.
#[derive(Debug, Clone, Default)]
pub(crate) struct Derived {
    pub(crate) distance: Option<i32>,
    pub(crate) offsets: Option<(i32, i32)>,
    pub(crate) pm_total: OnceCell<i32>,
}

/// One catalog source.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CatalogRecord {
    pub zone: u16,
    /// Sequential identifier within the zone, starting at 1.
    pub id: u32,
    /// Right ascension, in mas.
    pub ra: i32,
    /// South polar distance, in mas.
    pub spd: i32,
    /// Proper motion, in mas/yr. `pm_ra` includes the cos(δ) factor.
    pub pm_ra: i32,
    pub pm_spd: i32,
    pub detections: u8,
    /// Bitfield of `FLAG_*` constants.
    pub flags: u8,
    /// Magnitudes in centimag, [`NULL_MAGNITUDE`] when absent.
    pub magnitudes: [i32; 5],
    pub source: RecordSource,
    /// Catalog-wide marker from the zone header when classifications may be
    /// unreliable.
    pub classification_marker: Option<u8>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) derived: Derived,
}

impl CatalogRecord {
    /// A native record at epoch 2000.0 with zeroed errors and no photometry.
    pub fn native(zone: u16, id: u32, ra: i32, spd: i32) -> Self {
        let astrometry = Astrometry {
            epoch: REFERENCE_EPOCH,
            ..Astrometry::default()
        };
        Self::with_source(
            zone,
            id,
            ra,
            spd,
            RecordSource::Native {
                astrometry,
                photometry: [None; 5],
            },
        )
    }

    /// A Tycho-2 sourced record with no magnitudes.
    pub fn tycho(zone: u16, id: u32, ra: i32, spd: i32, tycho: TychoId) -> Self {
        let mut record = Self::with_source(zone, id, ra, spd, RecordSource::Tycho(tycho));
        record.flags = FLAG_TYCHO;
        record
    }

    fn with_source(zone: u16, id: u32, ra: i32, spd: i32, source: RecordSource) -> Self {
        Self {
            zone,
            id,
            ra,
            spd,
            pm_ra: 0,
            pm_spd: 0,
            detections: 0,
            flags: 0,
            magnitudes: [NULL_MAGNITUDE; 5],
            source,
            classification_marker: None,
            derived: Derived::default(),
        }
    }

    pub fn is_tycho(&self) -> bool {
        matches!(self.source, RecordSource::Tycho(_))
    }

    /// Declination, in mas.
    pub fn dec(&self) -> i32 {
        self.spd - QUARTER_CIRCLE_MAS
    }

    pub fn ra_deg(&self) -> f64 {
        self.ra as f64 / MAS_PER_DEGREE as f64
    }

    pub fn dec_deg(&self) -> f64 {
        self.dec() as f64 / MAS_PER_DEGREE as f64
    }

    /// Mean epoch of the position, in tenths of a year.
    pub fn epoch(&self) -> i32 {
        match &self.source {
            RecordSource::Native { astrometry, .. } => astrometry.epoch,
            RecordSource::Tycho(_) => REFERENCE_EPOCH,
        }
    }

    pub fn magnitude(&self, band: Band) -> Option<i32> {
        let mag = self.magnitudes[band.index()];
        (mag != NULL_MAGNITUDE).then_some(mag)
    }

    pub fn photometry(&self, band: Band) -> Option<&Photometry> {
        match &self.source {
            RecordSource::Native { photometry, .. } => photometry[band.index()].as_ref(),
            RecordSource::Tycho(_) => None,
        }
    }

    /// Total proper motion in mas/yr, computed on first use.
    pub fn total_proper_motion(&self) -> i32 {
        *self.derived.pm_total.get_or_init(|| {
            let (a, d) = (self.pm_ra as f64, self.pm_spd as f64);
            (0.5 + libm::sqrt(a * a + d * d)) as i32
        })
    }

    /// Distance from the query center, in mas, once a centered query has
    /// evaluated the record.
    pub fn distance(&self) -> Option<i32> {
        self.derived.distance
    }

    /// Tangent-plane offsets (x toward east, y toward north) from the query
    /// center, in mas.
    pub fn offsets(&self) -> Option<(i32, i32)> {
        self.derived.offsets
    }

    pub(crate) fn clear_derived_position(&mut self) {
        self.derived.distance = None;
        self.derived.offsets = None;
    }

    /// `zzzz-nnnnnnn`, the catalog designation.
    pub fn designation(&self) -> String {
        format!("{:04}-{:07}", self.zone, self.id)
    }
}

impl fmt::Display for CatalogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:11.7} {:+11.7}",
            self.designation(),
            self.ra_deg(),
            self.dec_deg()
        )?;
        for mag in self.magnitudes {
            if mag == NULL_MAGNITUDE {
                write!(f, "      ")?;
            } else {
                write!(f, " {:5.2}", mag as f64 / 100.0)?;
            }
        }
        Ok(())
    }
}
