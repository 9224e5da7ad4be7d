//! Spherical geometry on catalog positions.
//!
//! Positions are carried as integer mas (RA and south polar distance) and
//! converted to direction cosines for distance tests. A [`LocalFrame`] built
//! at a query center has the center direction as its first row and the east
//! and north unit vectors as the other two, so rotating a direction into it
//! gives tangent-plane offsets directly:
//!
//! ```
//! use usnob_catalog::coords::{LocalFrame, Vector3};
//!
//! let frame = LocalFrame::at(0.0, 0.0);
//! let east = Vector3::from_spherical(0.001, 0.0);
//! let (x, y) = frame.tangent_offsets(&east).unwrap();
//! assert!((x - libm::tan(0.001)).abs() < 1e-15);
//! assert!(y.abs() < 1e-15);
//! ```

use std::f64::consts::{PI, TAU};

use crate::format::{FULL_CIRCLE_MAS, HALF_CIRCLE_MAS, QUARTER_CIRCLE_MAS};

/// Milliarcseconds per radian.
pub const MAS_PER_RADIAN: f64 = 180.0 / PI * 3_600_000.0;

/// Declination beyond which proper motion is applied by rotation rather
/// than by the tangent-plane shortcut.
const POLAR_CAP_DEG: f64 = 84.0;

pub fn mas_to_rad(mas: f64) -> f64 {
    mas / MAS_PER_RADIAN
}

pub fn rad_to_mas(rad: f64) -> f64 {
    rad * MAS_PER_RADIAN
}

/// Right ascension and declination in radians of a catalog position.
pub fn catalog_to_radians(ra_mas: i32, spd_mas: i32) -> (f64, f64) {
    (
        mas_to_rad(ra_mas as f64),
        mas_to_rad((spd_mas - QUARTER_CIRCLE_MAS) as f64),
    )
}

/// Catalog position of a direction given in radians, rounded to the mas and
/// wrapped into `[0°, 360°)` and `[0°, 180°]`.
pub fn radians_to_catalog(ra: f64, dec: f64) -> (i32, i32) {
    let ra_mas = (libm::round(rad_to_mas(ra)) as i64).rem_euclid(FULL_CIRCLE_MAS as i64) as i32;
    let spd_mas = libm::round(rad_to_mas(dec)) as i64 + QUARTER_CIRCLE_MAS as i64;
    (ra_mas, spd_mas.clamp(0, HALF_CIRCLE_MAS as i64) as i32)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Unit vector toward `(ra, dec)`, both in radians.
    pub fn from_spherical(ra: f64, dec: f64) -> Self {
        let (sin_ra, cos_ra) = libm::sincos(ra);
        let (sin_dec, cos_dec) = libm::sincos(dec);
        Self::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec)
    }

    pub fn from_catalog(ra_mas: i32, spd_mas: i32) -> Self {
        let (ra, dec) = catalog_to_radians(ra_mas, spd_mas);
        Self::from_spherical(ra, dec)
    }

    /// `(ra, dec)` in radians with RA in `[0, 2π)`. On the polar axis the RA
    /// is reported as 0 and the declination as ±π/2.
    pub fn to_spherical(&self) -> (f64, f64) {
        let d2 = self.x * self.x + self.y * self.y;
        if d2 == 0.0 {
            let dec = if self.z < 0.0 { -PI / 2.0 } else { PI / 2.0 };
            return (0.0, dec);
        }
        let mut ra = libm::atan2(self.y, self.x);
        if ra < 0.0 {
            ra += TAU;
        }
        (ra, libm::atan2(self.z, libm::sqrt(d2)))
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn magnitude(&self) -> f64 {
        libm::sqrt(self.dot(self))
    }

    pub fn normalize(&self) -> Self {
        let m = self.magnitude();
        if m == 0.0 {
            return *self;
        }
        Self::new(self.x / m, self.y / m, self.z / m)
    }

    /// Squared chord length between two unit vectors.
    pub fn chord_squared(&self, other: &Self) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        dx * dx + dy * dy + dz * dz
    }
}

/// Rotation into the zenith/east/north frame of a center position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    rows: [Vector3; 3],
}

impl LocalFrame {
    /// Frame at `(ra, dec)` in radians.
    pub fn at(ra: f64, dec: f64) -> Self {
        let (sin_ra, cos_ra) = libm::sincos(ra);
        let (sin_dec, cos_dec) = libm::sincos(dec);
        Self {
            rows: [
                Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec),
                Vector3::new(-sin_ra, cos_ra, 0.0),
                Vector3::new(-sin_dec * cos_ra, -sin_dec * sin_ra, cos_dec),
            ],
        }
    }

    pub fn center(&self) -> Vector3 {
        self.rows[0]
    }

    pub fn rotate(&self, v: &Vector3) -> Vector3 {
        Vector3::new(self.rows[0].dot(v), self.rows[1].dot(v), self.rows[2].dot(v))
    }

    /// Inverse rotation, by the transpose.
    pub fn unrotate(&self, v: &Vector3) -> Vector3 {
        let [a, b, c] = self.rows;
        Vector3::new(
            a.x * v.x + b.x * v.y + c.x * v.z,
            a.y * v.x + b.y * v.y + c.y * v.z,
            a.z * v.x + b.z * v.y + c.z * v.z,
        )
    }

    /// Gnomonic offsets `(east, north)` in radians of a direction, or `None`
    /// for directions 90° or more from the center.
    pub fn tangent_offsets(&self, v: &Vector3) -> Option<(f64, f64)> {
        let local = self.rotate(v);
        (local.x > 0.0).then(|| (local.y / local.x, local.z / local.x))
    }

    /// Unit vector displaced from the center by small `east` and `north`
    /// angles in radians.
    pub fn displace(&self, east: f64, north: f64) -> Vector3 {
        self.unrotate(&Vector3::new(1.0, east, north)).normalize()
    }
}

/// Squared chord length subtended by an angle in radians.
pub fn chord_threshold(radius: f64) -> f64 {
    let chord = 2.0 * libm::sin(radius / 2.0);
    chord * chord
}

/// Angle in radians subtended by a squared chord length.
pub fn chord_to_angle(chord_squared: f64) -> f64 {
    2.0 * libm::asin((0.5 * libm::sqrt(chord_squared)).min(1.0))
}

/// Position at the record's mean epoch from its position at 2000.0.
///
/// `pm_ra` (including cos δ) and `pm_spd` are in mas/yr and `years` is the
/// mean epoch minus 2000.0. Away from the poles the motion is added in the
/// tangent plane; above |δ| = 84° it is applied by rotating a displaced
/// direction back out of the local frame.
pub fn back_project(ra_mas: i32, spd_mas: i32, pm_ra: i32, pm_spd: i32, years: f64) -> (i32, i32) {
    if (pm_ra == 0 && pm_spd == 0) || years == 0.0 {
        return (ra_mas, spd_mas);
    }
    let (ra, dec) = catalog_to_radians(ra_mas, spd_mas);
    let east = mas_to_rad(pm_ra as f64 * years);
    let north = mas_to_rad(pm_spd as f64 * years);

    let (ra, dec) = if dec.abs() > POLAR_CAP_DEG.to_radians() {
        LocalFrame::at(ra, dec).displace(east, north).to_spherical()
    } else {
        (ra + east / libm::cos(dec), dec + north)
    };
    radians_to_catalog(ra, dec)
}
