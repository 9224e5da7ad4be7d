//! Field constraints and center-relative derived values.

use std::str::FromStr;

use super::{IntRange, Visit};
use crate::coords::{
    catalog_to_radians, chord_threshold, chord_to_angle, mas_to_rad, rad_to_mas, LocalFrame,
    Vector3,
};
use crate::error::{CatalogError, Result};
use crate::format::{FULL_CIRCLE_MAS, HALF_CIRCLE_MAS, ZONE_COUNT};
use crate::record::{Band, CatalogRecord};

/// Which photometry band a magnitude or classification field reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSelector {
    /// The first band with a magnitude, in storage order.
    #[default]
    FirstAvailable,
    /// B1, or B2 when B1 is absent.
    Blue,
    /// R1, or R2 when R1 is absent.
    Red,
    Band(Band),
}

impl ColorSelector {
    pub fn resolve(self, record: &CatalogRecord) -> Option<Band> {
        let with_fallback = |first: Band, second: Band| {
            if record.magnitude(first).is_some() {
                first
            } else {
                second
            }
        };
        match self {
            Self::FirstAvailable => Band::ALL.into_iter().find(|&b| record.magnitude(b).is_some()),
            Self::Blue => Some(with_fallback(Band::Blue1, Band::Blue2)),
            Self::Red => Some(with_fallback(Band::Red1, Band::Red2)),
            Self::Band(band) => Some(band),
        }
    }
}

impl FromStr for ColorSelector {
    type Err = CatalogError;

    /// Accepts `b`, `r`, `b1`, `r1`, `b2`, `r2`, `i`, `n`, the plate letters
    /// `O`, `E`, `J`, `F`, `N`, and the empty string for the first available
    /// band.
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "" => Self::FirstAvailable,
            "b" => Self::Blue,
            "r" => Self::Red,
            "b1" | "O" => Self::Band(Band::Blue1),
            "r1" | "E" => Self::Band(Band::Red1),
            "b2" | "J" => Self::Band(Band::Blue2),
            "r2" | "F" => Self::Band(Band::Red2),
            "i" | "n" | "N" => Self::Band(Band::Infrared),
            other => {
                return Err(CatalogError::out_of_range(
                    "colour",
                    format!("unknown band selector {other:?}"),
                ))
            }
        })
    }
}

/// A record quantity that can be constrained or sorted on. Units are the
/// catalog's: mas for positions and distances, mas/yr for proper motion,
/// tenths of a year for epochs, centimag for magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Distance from the query center.
    Distance,
    /// Tangent-plane offset toward east from the query center.
    OffsetX,
    /// Tangent-plane offset toward north from the query center.
    OffsetY,
    RightAscension,
    PolarDistance,
    ProperMotion,
    Epoch,
    Magnitude(ColorSelector),
    /// Star/galaxy estimator of a native photometry entry.
    Classification(ColorSelector),
    Detections,
    Zone,
    /// Sequential identifier; sorts by zone first.
    Identifier,
}

impl Field {
    /// Needs a query center to have a value.
    pub fn is_derived(self) -> bool {
        matches!(self, Self::Distance | Self::OffsetX | Self::OffsetY)
    }

    pub fn is_offset(self) -> bool {
        matches!(self, Self::OffsetX | Self::OffsetY)
    }

    /// Value of the field on a record, `None` when the record has none: a
    /// derived value not computed, an absent band, or a classification on a
    /// Tycho record or a field-0 entry.
    pub fn value(self, record: &CatalogRecord) -> Option<i32> {
        match self {
            Self::Distance => record.distance(),
            Self::OffsetX => record.offsets().map(|(x, _)| x),
            Self::OffsetY => record.offsets().map(|(_, y)| y),
            Self::RightAscension => Some(record.ra),
            Self::PolarDistance => Some(record.spd),
            Self::ProperMotion => Some(record.total_proper_motion()),
            Self::Epoch => Some(record.epoch()),
            Self::Magnitude(color) => color.resolve(record).and_then(|b| record.magnitude(b)),
            Self::Classification(color) => {
                let entry = record.photometry(color.resolve(record)?)?;
                (entry.field != 0).then_some(entry.stargal as i32)
            }
            Self::Detections => Some(record.detections as i32),
            Self::Zone => Some(record.zone as i32),
            Self::Identifier => Some(record.id as i32),
        }
    }
}

/// One condition a record must meet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Field value within a range. Only RA ranges may wrap, as the union of
    /// their two ends.
    Range { field: Field, range: IntRange },
    /// Identifiers `first..=last` of one zone.
    Identifier { zone: u16, first: u32, last: u32 },
    /// Tycho-2 sourced records only, or native records only.
    Tycho(bool),
}

impl Constraint {
    pub fn range(field: Field, lo: i32, hi: i32) -> Result<Self> {
        if field == Field::Identifier {
            return Err(CatalogError::out_of_range(
                "identifier",
                "identifier ranges need a zone, use Constraint::identifier",
            ));
        }
        if lo > hi && field != Field::RightAscension {
            return Err(CatalogError::out_of_range(
                "constraint",
                format!("{field:?} range [{lo}, {hi}] has min above max"),
            ));
        }
        Ok(Self::Range {
            field,
            range: IntRange::new(lo, hi),
        })
    }

    pub fn identifier(zone: u16, first: u32, last: u32) -> Result<Self> {
        if zone >= ZONE_COUNT {
            return Err(CatalogError::out_of_range(
                "zone",
                format!("{zone} is not in 0..{ZONE_COUNT}"),
            ));
        }
        if first > last {
            return Err(CatalogError::out_of_range(
                "identifier",
                format!("range {first}..={last} of zone {zone} is empty"),
            ));
        }
        Ok(Self::Identifier { zone, first, last })
    }

    fn field(&self) -> Option<Field> {
        match self {
            Self::Range { field, .. } => Some(*field),
            _ => None,
        }
    }
}

/// A query center in catalog units, with an optional radius limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Center {
    pub ra_mas: i32,
    pub spd_mas: i32,
    pub radius_mas: Option<i32>,
}

impl Center {
    pub fn new(ra_mas: i32, spd_mas: i32, radius_mas: Option<i32>) -> Result<Self> {
        if !(0..FULL_CIRCLE_MAS).contains(&ra_mas) || !(0..=HALF_CIRCLE_MAS).contains(&spd_mas) {
            return Err(CatalogError::out_of_range(
                "center",
                format!("RA {ra_mas} mas, polar distance {spd_mas} mas"),
            ));
        }
        if radius_mas.is_some_and(|r| r < 0) {
            return Err(CatalogError::out_of_range("radius", "negative radius"));
        }
        Ok(Self {
            ra_mas,
            spd_mas,
            radius_mas,
        })
    }

    pub fn direction(&self) -> Vector3 {
        Vector3::from_catalog(self.ra_mas, self.spd_mas)
    }
}

#[derive(Debug, Clone, Copy)]
struct CenterFrame {
    frame: LocalFrame,
    max_chord2: Option<f64>,
}

/// Evaluates constraints against candidate records.
#[derive(Debug, Clone)]
pub struct PredicateEngine {
    center: Option<CenterFrame>,
    constraints: Vec<Constraint>,
    offsets: bool,
    stop_past_identifier: bool,
}

impl PredicateEngine {
    /// Distance and offset constraints need a center.
    pub fn new(constraints: Vec<Constraint>, center: Option<Center>) -> Result<Self> {
        if center.is_none() {
            let derived = constraints
                .iter()
                .filter_map(Constraint::field)
                .find(|f| f.is_derived());
            if let Some(field) = derived {
                return Err(CatalogError::out_of_range(
                    "constraint",
                    format!("{field:?} needs a query center"),
                ));
            }
        }
        let offsets = constraints
            .iter()
            .filter_map(Constraint::field)
            .any(Field::is_offset);
        let center = center.map(|c| {
            let (ra, dec) = catalog_to_radians(c.ra_mas, c.spd_mas);
            CenterFrame {
                frame: LocalFrame::at(ra, dec),
                // A radius of half a circle or more admits every direction.
                max_chord2: c
                    .radius_mas
                    .filter(|&r| r < HALF_CIRCLE_MAS)
                    .map(|r| chord_threshold(mas_to_rad(r as f64))),
            }
        });
        Ok(Self {
            center,
            constraints,
            offsets,
            stop_past_identifier: false,
        })
    }

    /// Also compute tangent-plane offsets for every accepted record.
    pub fn with_offsets(mut self, offsets: bool) -> Self {
        self.offsets |= offsets;
        self
    }

    /// Ask the caller to stop once a record of the constrained zone is past
    /// the identifier range, for scans that run in identifier order.
    pub fn with_stop_past_identifier(mut self, stop: bool) -> Self {
        self.stop_past_identifier = stop;
        self
    }

    pub fn has_center(&self) -> bool {
        self.center.is_some()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Evaluate `record`, filling its distance and offsets when centered.
    pub fn check(&self, record: &mut CatalogRecord) -> Visit {
        record.clear_derived_position();
        if let Some(center) = &self.center {
            let v = Vector3::from_catalog(record.ra, record.spd);
            let d2 = center.frame.center().chord_squared(&v);
            if center.max_chord2.is_some_and(|max| d2 > max) {
                return Visit::Reject;
            }
            record.derived.distance = Some(libm::round(rad_to_mas(chord_to_angle(d2))) as i32);
            if self.offsets {
                // No projection at or beyond 90° from the center.
                let Some((x, y)) = center.frame.tangent_offsets(&v) else {
                    return Visit::Reject;
                };
                record.derived.offsets = Some((
                    libm::round(rad_to_mas(x)) as i32,
                    libm::round(rad_to_mas(y)) as i32,
                ));
            }
        }

        for constraint in &self.constraints {
            match *constraint {
                Constraint::Range { field, range } => match field.value(record) {
                    Some(value) if range.contains(value) => {}
                    _ => return Visit::Reject,
                },
                Constraint::Identifier { zone, first, last } => {
                    if record.zone != zone || record.id < first {
                        return Visit::Reject;
                    }
                    if record.id > last {
                        return if self.stop_past_identifier {
                            Visit::Stop
                        } else {
                            Visit::Reject
                        };
                    }
                }
                Constraint::Tycho(wanted) => {
                    if record.is_tycho() != wanted {
                        return Visit::Reject;
                    }
                }
            }
        }
        Visit::Accept
    }
}
