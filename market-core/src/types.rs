use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use tsify_next::Tsify;

// ============================================================================
// IDs - Using slotmap for generational indices
// ============================================================================

new_key_type! {
    pub struct AgentId;
    pub struct FactoryId;
}

/// Trait for converting SlotMap keys to u64 for the WASM and telemetry boundaries
pub trait KeyToU64 {
    fn to_u64(self) -> u64;
}

impl KeyToU64 for AgentId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

impl KeyToU64 for FactoryId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ProductId(pub u32);

impl ProductId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

pub type Price = f64;

// ============================================================================
// Products
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum ProductCategory {
    Food,
    Clothing,
    Housing,
    Transport,
    Entertainment,
    Other,
}

impl ProductCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCategory::Food => "Food",
            ProductCategory::Clothing => "Clothing",
            ProductCategory::Housing => "Housing",
            ProductCategory::Transport => "Transport",
            ProductCategory::Entertainment => "Entertainment",
            ProductCategory::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: ProductCategory,
}

// ============================================================================
// Trade outcomes
// ============================================================================

/// How an agent's range sits relative to a factory's supply range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum IntervalRelation {
    Overlapping,
    AgentBelowFactory,
    AgentAboveFactory,
}

impl IntervalRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalRelation::Overlapping => "Overlapping",
            IntervalRelation::AgentBelowFactory => "AgentBelowFactory",
            IntervalRelation::AgentAboveFactory => "AgentAboveFactory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum FailureCause {
    /// Lost the allocation race: the line ran out before this candidate.
    StockExhausted,
    /// Clipped price exceeded the agent's cash.
    InsufficientCash,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum TradeResult {
    Success { price: Price },
    Failed(FailureCause),
    NotMatched,
    /// Deferred to next round without touching either range.
    NotYet,
}

impl TradeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeResult::Success { .. } => "Success",
            TradeResult::Failed(_) => "Failed",
            TradeResult::NotMatched => "NotMatched",
            TradeResult::NotYet => "NotYet",
        }
    }

    pub fn price(&self) -> Option<Price> {
        match self {
            TradeResult::Success { price } => Some(*price),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TradeResult::Success { .. })
    }
}

/// One evaluated agent/factory pair in a round.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub id: u64,
    pub round: u64,
    pub agent: AgentId,
    pub factory: FactoryId,
    pub product: ProductId,
    pub relation: IntervalRelation,
    pub result: TradeResult,
    /// Agent cash once this pair was resolved.
    pub agent_cash: f64,
    /// Line stock once this pair was resolved.
    pub factory_stock: u32,
}
