// Market participants: demand-side agents and supply-side factories

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::range::{PriceRange, RangeModel};
use crate::types::{AgentId, FactoryId, Price, ProductId};

// === AGENTS ===

/// An agent's stance on one product.
///
/// The original price and elasticity are fixed at creation; only Range
/// Negotiation moves the current price and range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Preference {
    pub original_price: Price,
    pub original_elasticity: f64,
    pub current_price: Price,
    pub current_range: PriceRange,
}

impl Preference {
    pub fn new(price: Price, elasticity: f64, range: PriceRange) -> Self {
        Self {
            original_price: price,
            original_elasticity: elasticity,
            current_price: range.clamp_price(price),
            current_range: range,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub preferences: BTreeMap<ProductId, Preference>,
}

impl Agent {
    pub fn new(id: AgentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            preferences: BTreeMap::new(),
        }
    }

    pub fn with_preference(mut self, product: ProductId, preference: Preference) -> Self {
        self.preferences.insert(product, preference);
        self
    }

    pub fn preference(&self, product: ProductId) -> Option<&Preference> {
        self.preferences.get(&product)
    }

    pub fn preference_mut(&mut self, product: ProductId) -> Option<&mut Preference> {
        self.preferences.get_mut(&product)
    }
}

impl RangeModel for Agent {
    fn current_range(&self, product: ProductId) -> Option<PriceRange> {
        self.preferences.get(&product).map(|p| p.current_range)
    }
}

// === FACTORIES ===

/// Round-open production policy for a supply line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Production {
    /// Share of cash the factory is willing to commit, and how hard it scales up after selling out.
    pub risk_appetite: f64,
}

/// What a factory offers for one product. Stock counters live in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyLine {
    pub supply_range: PriceRange,
    pub unit_cost: Price,
    /// Fraction of unsold stock that survives to the next round.
    pub durability: f64,
    pub production: Option<Production>,
}

impl SupplyLine {
    pub fn new(supply_range: PriceRange, unit_cost: Price) -> Self {
        Self {
            supply_range,
            unit_cost,
            durability: 1.0,
            production: None,
        }
    }

    pub fn with_durability(mut self, durability: f64) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_production(mut self, production: Production) -> Self {
        self.production = Some(production);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Factory {
    pub id: FactoryId,
    pub name: String,
    pub lines: BTreeMap<ProductId, SupplyLine>,
}

impl Factory {
    pub fn new(id: FactoryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            lines: BTreeMap::new(),
        }
    }

    pub fn with_line(mut self, product: ProductId, line: SupplyLine) -> Self {
        self.lines.insert(product, line);
        self
    }

    pub fn line(&self, product: ProductId) -> Option<&SupplyLine> {
        self.lines.get(&product)
    }
}

impl RangeModel for Factory {
    fn current_range(&self, product: ProductId) -> Option<PriceRange> {
        self.lines.get(&product).map(|l| l.supply_range)
    }
}
