//! Range Model: closed price intervals and how two of them relate.
//!
//! Every constructor and mutation clamps so that `0 <= lower <= upper` holds
//! without panicking. Relations are pure functions of two ranges and are never
//! cached, since both sides move every round.

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::types::{IntervalRelation, Price, ProductId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct PriceRange {
    pub lower: Price,
    pub upper: Price,
}

impl PriceRange {
    /// Clamping constructor: non-finite bounds collapse to zero, the lower bound
    /// is floored at zero and the upper bound at the lower one.
    pub fn new(lower: Price, upper: Price) -> Self {
        let lower = if lower.is_finite() { lower.max(0.0) } else { 0.0 };
        let upper = if upper.is_finite() { upper.max(lower) } else { lower };
        Self { lower, upper }
    }

    /// Strict constructor used when validating setup input.
    pub fn try_new(lower: Price, upper: Price) -> Option<Self> {
        (lower.is_finite() && upper.is_finite() && lower >= 0.0 && lower <= upper)
            .then_some(Self { lower, upper })
    }

    /// Range of the given width centered on `center`, clamped non-negative.
    pub fn centered(center: Price, width: Price) -> Self {
        let half = width.max(0.0) / 2.0;
        Self::new(center - half, center + half)
    }

    pub fn width(&self) -> Price {
        self.upper - self.lower
    }

    pub fn center(&self) -> Price {
        (self.lower + self.upper) / 2.0
    }

    pub fn contains(&self, price: Price) -> bool {
        self.lower <= price && price <= self.upper
    }

    pub fn is_valid(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite() && 0.0 <= self.lower && self.lower <= self.upper
    }

    /// Overlap of two ranges; touching endpoints count as a one-point overlap.
    pub fn intersection(&self, other: &PriceRange) -> Option<PriceRange> {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        (lower <= upper).then_some(PriceRange { lower, upper })
    }

    pub fn clamp_price(&self, price: Price) -> Price {
        price.clamp(self.lower, self.upper)
    }

    pub fn shift(&self, delta: Price) -> Self {
        Self::new(self.lower + delta, self.upper + delta)
    }

    pub fn widen(&self, amount: Price) -> Self {
        let half = amount.max(0.0) / 2.0;
        Self::new(self.lower - half, self.upper + half)
    }

    /// Multiply both bounds by `factor`.
    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.lower * factor, self.upper * factor)
    }

    /// Move the range up, width preserved, until its lower bound reaches `floor`.
    pub fn with_floor(&self, floor: Price) -> Self {
        if self.lower < floor {
            Self::new(floor, floor + self.width())
        } else {
            *self
        }
    }
}

/// Classify an agent's range against a factory's supply range.
pub fn relation(agent: &PriceRange, factory: &PriceRange) -> IntervalRelation {
    if agent.upper < factory.lower {
        IntervalRelation::AgentBelowFactory
    } else if agent.lower > factory.upper {
        IntervalRelation::AgentAboveFactory
    } else {
        IntervalRelation::Overlapping
    }
}

/// Bound-by-bound change between two ranges.
///
/// Changes are `new - old`, so a widening lower bound and a narrowing upper bound
/// are both negative. Ratios divide each change by the old width and are zero
/// when the old range had no width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeDelta {
    pub lower_change: f64,
    pub upper_change: f64,
    pub total_change: f64,
    pub lower_change_ratio: f64,
    pub upper_change_ratio: f64,
}

impl RangeDelta {
    pub fn between(old: &PriceRange, new: &PriceRange) -> Self {
        let width = old.width();
        let lower_change = new.lower - old.lower;
        let upper_change = new.upper - old.upper;
        let ratio = |change: f64| if width > 0.0 { change / width } else { 0.0 };
        Self {
            lower_change,
            upper_change,
            total_change: (new.lower + new.upper) - (old.lower + old.upper),
            lower_change_ratio: ratio(lower_change),
            upper_change_ratio: ratio(upper_change),
        }
    }
}

/// Anything that holds a current acceptable range per product.
pub trait RangeModel {
    fn current_range(&self, product: ProductId) -> Option<PriceRange>;
}
