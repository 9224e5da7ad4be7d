//! Spatial queries over an open [`CatalogStore`](crate::store::CatalogStore).
//!
//! - [`planner`]: cell enumeration and the record-streaming search loop
//! - [`predicate`]: field constraints and center-relative derived values
//! - [`ordering`]: bounded top-K accumulation under a multi-key comparator
//! - [`region`]: circle and box geometry resolved to RA/SPD windows
//! - [`search`]: the [`Query`] executor tying the above together

pub mod ordering;
pub mod planner;
pub mod predicate;
pub mod region;
pub mod search;

pub use ordering::{Comparator, ResultOrderingEngine, SortKey};
pub use planner::{search, CellOrder, SearchStats};
pub use predicate::{Center, ColorSelector, Constraint, Field, PredicateEngine};
pub use region::{Region, SkyPoint, Window};
pub use search::{Query, QueryOutcome, Target};

/// Outcome of handing one record to a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Accept,
    Reject,
    /// Abandon the rest of the search.
    Stop,
}

/// Inclusive integer range. `lo > hi` stands for the union `[lo, ∞) ∪ (-∞, hi]`,
/// which is how a cyclic range such as RA 350°..10° is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntRange {
    pub lo: i32,
    pub hi: i32,
}

impl IntRange {
    pub const fn new(lo: i32, hi: i32) -> Self {
        Self { lo, hi }
    }

    pub fn is_wrapped(&self) -> bool {
        self.lo > self.hi
    }

    pub fn contains(&self, value: i32) -> bool {
        if self.is_wrapped() {
            value >= self.lo || value <= self.hi
        } else {
            (self.lo..=self.hi).contains(&value)
        }
    }

    /// Overlap of two plain ranges, `None` when disjoint.
    pub fn intersect(&self, other: &IntRange) -> Option<IntRange> {
        let range = IntRange::new(self.lo.max(other.lo), self.hi.min(other.hi));
        (range.lo <= range.hi).then_some(range)
    }
}
