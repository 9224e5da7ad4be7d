//! Circle and box geometry resolved to RA and SPD search windows.

use super::planner::split_ra;
use super::IntRange;
use crate::coords::{mas_to_rad, rad_to_mas};
use crate::error::{CatalogError, Result};
use crate::format::{FULL_CIRCLE_MAS, HALF_CIRCLE_MAS, MAS_PER_DEGREE, QUARTER_CIRCLE_MAS};

/// A validated sky position in catalog units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkyPoint {
    pub ra_mas: i32,
    pub spd_mas: i32,
}

impl SkyPoint {
    pub fn new(ra_mas: i32, spd_mas: i32) -> Result<Self> {
        if !(0..FULL_CIRCLE_MAS).contains(&ra_mas) {
            return Err(CatalogError::out_of_range(
                "right ascension",
                format!("{ra_mas} mas is not in [0°, 360°)"),
            ));
        }
        if !(0..=HALF_CIRCLE_MAS).contains(&spd_mas) {
            return Err(CatalogError::out_of_range(
                "declination",
                format!("polar distance {spd_mas} mas is not in [0°, 180°]"),
            ));
        }
        Ok(Self { ra_mas, spd_mas })
    }

    /// From RA and declination in degrees. RA wraps into `[0°, 360°)`;
    /// declination must be within ±90°.
    pub fn from_degrees(ra_deg: f64, dec_deg: f64) -> Result<Self> {
        if !ra_deg.is_finite() || !(-90.0..=90.0).contains(&dec_deg) {
            return Err(CatalogError::out_of_range(
                "declination",
                format!("({ra_deg}°, {dec_deg}°) is not a sky position"),
            ));
        }
        let mas = MAS_PER_DEGREE as f64;
        let ra = (libm::round(ra_deg * mas) as i64).rem_euclid(FULL_CIRCLE_MAS as i64) as i32;
        let spd = libm::round(dec_deg * mas) as i32 + QUARTER_CIRCLE_MAS;
        Self::new(ra, spd)
    }

    pub fn dec_mas(&self) -> i32 {
        self.spd_mas - QUARTER_CIRCLE_MAS
    }
}

/// Geometry of a search target after resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub center: Option<SkyPoint>,
    /// Accept radius around the center, in mas.
    pub radius_mas: Option<i32>,
    /// RA window, possibly wrapped; `None` for all RA.
    pub ra: Option<IntRange>,
    /// SPD window; `None` for all of it.
    pub spd: Option<IntRange>,
    /// Half-sizes of a box on the tangent plane, in mas.
    pub offset_limits: Option<(i32, i32)>,
}

impl Region {
    /// No geometric restriction.
    pub fn unbounded() -> Self {
        Self {
            center: None,
            radius_mas: None,
            ra: None,
            spd: None,
            offset_limits: None,
        }
    }

    /// Records within `radius_mas` of `center`. A radius of 180° or more
    /// covers the whole sky.
    pub fn circle(center: SkyPoint, radius_mas: i32) -> Result<Self> {
        if radius_mas < 0 {
            return Err(CatalogError::out_of_range(
                "radius",
                format!("{radius_mas} mas is negative"),
            ));
        }
        let (ra, spd) = windows(center, radius_mas);
        Ok(Self {
            center: Some(center),
            radius_mas: Some(radius_mas),
            ra,
            spd,
            offset_limits: None,
        })
    }

    /// A `width_mas` by `height_mas` box on the tangent plane at `center`,
    /// each side under 180°.
    pub fn rectangle(center: SkyPoint, width_mas: i32, height_mas: i32) -> Result<Self> {
        if !(0..HALF_CIRCLE_MAS).contains(&width_mas) || !(0..HALF_CIRCLE_MAS).contains(&height_mas) {
            return Err(CatalogError::out_of_range(
                "box",
                format!("{width_mas} x {height_mas} mas is not within [0°, 180°)"),
            ));
        }
        let tan_x = libm::tan(mas_to_rad(width_mas as f64) / 2.0);
        let tan_y = libm::tan(mas_to_rad(height_mas as f64) / 2.0);
        // The corner of the box bounds the windows.
        let corner = rad_to_mas(libm::atan(libm::sqrt(tan_x * tan_x + tan_y * tan_y)));
        let (ra, spd) = windows(center, libm::ceil(corner) as i32);
        Ok(Self {
            center: Some(center),
            radius_mas: None,
            ra,
            spd,
            offset_limits: Some((
                libm::round(rad_to_mas(tan_x)) as i32,
                libm::round(rad_to_mas(tan_y)) as i32,
            )),
        })
    }

    /// Intersect with explicit RA and SPD limits. `None` means nothing can
    /// match.
    pub fn restrict(&self, ra_limits: Option<IntRange>, spd_limits: Option<IntRange>) -> Option<Window> {
        let spd = match (self.spd, spd_limits) {
            (Some(a), Some(b)) => Some(a.intersect(&b)?),
            (a, b) => a.or(b),
        };
        let ra = match (self.ra, ra_limits) {
            (Some(a), Some(b)) => {
                let pieces: Vec<IntRange> = split_ra(a)
                    .iter()
                    .flat_map(|p| split_ra(b).into_iter().filter_map(move |q| p.intersect(&q)))
                    .collect();
                if pieces.is_empty() {
                    return None;
                }
                Some(pieces)
            }
            (a, b) => a.or(b).map(|r| vec![r]),
        };
        Some(Window { ra, spd })
    }
}

/// RA pieces and SPD range handed to the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub ra: Option<Vec<IntRange>>,
    pub spd: Option<IntRange>,
}

/// RA and SPD windows of a circle.
fn windows(center: SkyPoint, radius_mas: i32) -> (Option<IntRange>, Option<IntRange>) {
    if radius_mas >= HALF_CIRCLE_MAS {
        return (None, None);
    }
    let lo = (center.spd_mas - radius_mas).max(0);
    let hi = (center.spd_mas + radius_mas).min(HALF_CIRCLE_MAS);
    let spd = IntRange::new(lo, hi);
    // A circle reaching a pole spans all RA.
    if lo == 0 || hi == HALF_CIRCLE_MAS {
        return (None, Some(spd));
    }

    let cos_dec = libm::cos(mas_to_rad(center.dec_mas() as f64));
    let sin_r = libm::sin(mas_to_rad(radius_mas as f64));
    if sin_r >= cos_dec {
        return (None, Some(spd));
    }
    let half_width = libm::ceil(rad_to_mas(libm::asin(sin_r / cos_dec))) as i64;
    if 2 * half_width >= FULL_CIRCLE_MAS as i64 {
        return (None, Some(spd));
    }
    let full = FULL_CIRCLE_MAS as i64;
    let ra_lo = (center.ra_mas as i64 - half_width).rem_euclid(full) as i32;
    let ra_hi = (center.ra_mas as i64 + half_width).rem_euclid(full) as i32;
    (Some(IntRange::new(ra_lo, ra_hi)), Some(spd))
}
