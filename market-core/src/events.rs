//! Round events: the engine's only output channel.
//!
//! Every record the engine produces is one variant of [`RoundEvent`] pushed
//! into an [`EventSink`]. Field sets mirror the telemetry tables one to one,
//! and every event carries `timestamp`, `round` and `task_id`.

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

/// Stand-in for an absent price in flat telemetry columns.
pub const NO_PRICE: f64 = -1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct TradeLog {
    pub timestamp: i64,
    pub round: u64,
    pub task_id: String,
    pub trade_id: u64,
    pub agent_id: u64,
    pub agent_name: String,
    pub agent_cash: f64,
    pub factory_id: u64,
    pub factory_name: String,
    pub product_id: u64,
    pub product_name: String,
    pub trade_result: String,
    pub interval_relation: String,
    pub price: Option<f64>,
    pub factory_supply_range_lower: f64,
    pub factory_supply_range_upper: f64,
    pub factory_stock: u64,
    pub agent_pref_original_price: f64,
    pub agent_pref_original_elastic: f64,
    pub agent_pref_current_price: f64,
    pub agent_pref_current_range_lower: f64,
    pub agent_pref_current_range_upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct AgentRangeAdjustmentLog {
    pub timestamp: i64,
    pub round: u64,
    pub task_id: String,
    pub agent_id: u64,
    pub agent_name: String,
    pub product_id: u64,
    pub old_range_lower: f64,
    pub old_range_upper: f64,
    pub new_range_lower: f64,
    pub new_range_upper: f64,
    pub lower_change: f64,
    pub upper_change: f64,
    pub min_change_ratio: f64,
    pub max_change_ratio: f64,
    pub center: f64,
    /// `trade_success` or `trade_failed`.
    pub adjustment_type: String,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct FactoryRangeOptimizationLog {
    pub timestamp: i64,
    pub round: u64,
    pub task_id: String,
    pub factory_id: u64,
    pub factory_name: String,
    pub product_id: u64,
    pub product_category: String,
    pub old_range_lower: f64,
    pub old_range_upper: f64,
    pub new_range_lower: f64,
    pub new_range_upper: f64,
    pub lower_change: f64,
    pub upper_change: f64,
    pub total_change: f64,
    pub lower_change_ratio: f64,
    pub upper_change_ratio: f64,
    /// What drove the change: `scarcity`, `excess_inventory`, `hold` or `per_trade`.
    pub trade_result: String,
    pub sell_through: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct AgentCashLog {
    pub timestamp: i64,
    pub round: u64,
    pub task_id: String,
    pub agent_id: u64,
    pub agent_name: String,
    pub cash: f64,
    pub total_trades: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct AgentDemandRemovalLog {
    pub timestamp: i64,
    pub round: u64,
    pub task_id: String,
    pub agent_id: u64,
    pub agent_name: String,
    pub product_id: u64,
    pub agent_cash: f64,
    pub agent_pref_original_price: f64,
    pub agent_pref_original_elastic: f64,
    pub agent_pref_current_price: f64,
    pub agent_pref_current_range_lower: f64,
    pub agent_pref_current_range_upper: f64,
    /// `insolvency` or `stagnation`.
    pub removal_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct FactoryEndOfRoundLog {
    pub timestamp: i64,
    pub round: u64,
    pub task_id: String,
    pub factory_id: u64,
    pub factory_name: String,
    pub product_id: u64,
    pub product_category: String,
    pub cash: f64,
    pub initial_stock: u64,
    pub remaining_stock: u64,
    pub supply_range_lower: f64,
    pub supply_range_upper: f64,
    pub produced: u64,
    pub units_sold: u64,
    pub spoiled: u64,
    pub revenue: f64,
    pub production_cost: f64,
    pub profit: f64,
}

/// Append-only record of something that happened in a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(tag = "kind")]
pub enum RoundEvent {
    Trade(TradeLog),
    AgentRangeAdjustment(AgentRangeAdjustmentLog),
    FactoryRangeOptimization(FactoryRangeOptimizationLog),
    AgentCash(AgentCashLog),
    AgentDemandRemoval(AgentDemandRemovalLog),
    FactoryEndOfRound(FactoryEndOfRoundLog),
}

impl RoundEvent {
    /// Telemetry table this event belongs to.
    pub fn table(&self) -> &'static str {
        match self {
            RoundEvent::Trade(_) => "trade_log",
            RoundEvent::AgentRangeAdjustment(_) => "agent_range_adjustment_log",
            RoundEvent::FactoryRangeOptimization(_) => "factory_range_optimization_log",
            RoundEvent::AgentCash(_) => "agent_cash_log",
            RoundEvent::AgentDemandRemoval(_) => "agent_demand_removal_log",
            RoundEvent::FactoryEndOfRound(_) => "factory_end_of_round_log",
        }
    }

    pub fn round(&self) -> u64 {
        match self {
            RoundEvent::Trade(e) => e.round,
            RoundEvent::AgentRangeAdjustment(e) => e.round,
            RoundEvent::FactoryRangeOptimization(e) => e.round,
            RoundEvent::AgentCash(e) => e.round,
            RoundEvent::AgentDemandRemoval(e) => e.round,
            RoundEvent::FactoryEndOfRound(e) => e.round,
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Where round events go. The engine emits in phase order from one thread.
pub trait EventSink {
    fn emit(&mut self, event: RoundEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: RoundEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    pub events: Vec<RoundEvent>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<RoundEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn count(&self, table: &str) -> usize {
        self.events.iter().filter(|e| e.table() == table).count()
    }

    pub fn trades(&self) -> impl Iterator<Item = &TradeLog> {
        self.events.iter().filter_map(|e| match e {
            RoundEvent::Trade(t) => Some(t),
            _ => None,
        })
    }

    pub fn adjustments(&self) -> impl Iterator<Item = &AgentRangeAdjustmentLog> {
        self.events.iter().filter_map(|e| match e {
            RoundEvent::AgentRangeAdjustment(a) => Some(a),
            _ => None,
        })
    }

    pub fn optimizations(&self) -> impl Iterator<Item = &FactoryRangeOptimizationLog> {
        self.events.iter().filter_map(|e| match e {
            RoundEvent::FactoryRangeOptimization(o) => Some(o),
            _ => None,
        })
    }

    pub fn removals(&self) -> impl Iterator<Item = &AgentDemandRemovalLog> {
        self.events.iter().filter_map(|e| match e {
            RoundEvent::AgentDemandRemoval(r) => Some(r),
            _ => None,
        })
    }
}

impl EventSink for VecSink {
    fn emit(&mut self, event: RoundEvent) {
        self.events.push(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: RoundEvent) {
        (**self).emit(event);
    }
}

/// Fans out to two sinks.
pub struct Tee<A, B>(pub A, pub B);

impl<A: EventSink, B: EventSink> EventSink for Tee<A, B> {
    fn emit(&mut self, event: RoundEvent) {
        self.1.emit(event.clone());
        self.0.emit(event);
    }
}

/// Forwards every event to `tracing`, one target per telemetry table.
#[cfg(feature = "instrument")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[cfg(feature = "instrument")]
impl EventSink for TracingSink {
    fn emit(&mut self, event: RoundEvent) {
        match event {
            RoundEvent::Trade(e) => tracing::info!(
                target: "trade_log",
                timestamp = e.timestamp,
                round = e.round,
                task_id = e.task_id.as_str(),
                trade_id = e.trade_id,
                agent_id = e.agent_id,
                agent_name = e.agent_name.as_str(),
                agent_cash = e.agent_cash,
                factory_id = e.factory_id,
                factory_name = e.factory_name.as_str(),
                product_id = e.product_id,
                product_name = e.product_name.as_str(),
                trade_result = e.trade_result.as_str(),
                interval_relation = e.interval_relation.as_str(),
                price = e.price.unwrap_or(NO_PRICE),
                factory_supply_range_lower = e.factory_supply_range_lower,
                factory_supply_range_upper = e.factory_supply_range_upper,
                factory_stock = e.factory_stock,
                agent_pref_original_price = e.agent_pref_original_price,
                agent_pref_original_elastic = e.agent_pref_original_elastic,
                agent_pref_current_price = e.agent_pref_current_price,
                agent_pref_current_range_lower = e.agent_pref_current_range_lower,
                agent_pref_current_range_upper = e.agent_pref_current_range_upper,
            ),
            RoundEvent::AgentRangeAdjustment(e) => tracing::info!(
                target: "agent_range_adjustment_log",
                timestamp = e.timestamp,
                round = e.round,
                task_id = e.task_id.as_str(),
                agent_id = e.agent_id,
                agent_name = e.agent_name.as_str(),
                product_id = e.product_id,
                old_range_lower = e.old_range_lower,
                old_range_upper = e.old_range_upper,
                new_range_lower = e.new_range_lower,
                new_range_upper = e.new_range_upper,
                lower_change = e.lower_change,
                upper_change = e.upper_change,
                min_change_ratio = e.min_change_ratio,
                max_change_ratio = e.max_change_ratio,
                center = e.center,
                adjustment_type = e.adjustment_type.as_str(),
                price = e.price.unwrap_or(NO_PRICE),
            ),
            RoundEvent::FactoryRangeOptimization(e) => tracing::info!(
                target: "factory_range_optimization_log",
                timestamp = e.timestamp,
                round = e.round,
                task_id = e.task_id.as_str(),
                factory_id = e.factory_id,
                factory_name = e.factory_name.as_str(),
                product_id = e.product_id,
                product_category = e.product_category.as_str(),
                old_range_lower = e.old_range_lower,
                old_range_upper = e.old_range_upper,
                new_range_lower = e.new_range_lower,
                new_range_upper = e.new_range_upper,
                lower_change = e.lower_change,
                upper_change = e.upper_change,
                total_change = e.total_change,
                lower_change_ratio = e.lower_change_ratio,
                upper_change_ratio = e.upper_change_ratio,
                trade_result = e.trade_result.as_str(),
                sell_through = e.sell_through,
            ),
            RoundEvent::AgentCash(e) => tracing::info!(
                target: "agent_cash_log",
                timestamp = e.timestamp,
                round = e.round,
                task_id = e.task_id.as_str(),
                agent_id = e.agent_id,
                agent_name = e.agent_name.as_str(),
                cash = e.cash,
                total_trades = e.total_trades,
            ),
            RoundEvent::AgentDemandRemoval(e) => tracing::info!(
                target: "agent_demand_removal_log",
                timestamp = e.timestamp,
                round = e.round,
                task_id = e.task_id.as_str(),
                agent_id = e.agent_id,
                agent_name = e.agent_name.as_str(),
                product_id = e.product_id,
                agent_cash = e.agent_cash,
                agent_pref_original_price = e.agent_pref_original_price,
                agent_pref_original_elastic = e.agent_pref_original_elastic,
                agent_pref_current_price = e.agent_pref_current_price,
                agent_pref_current_range_lower = e.agent_pref_current_range_lower,
                agent_pref_current_range_upper = e.agent_pref_current_range_upper,
                removal_reason = e.removal_reason.as_str(),
            ),
            RoundEvent::FactoryEndOfRound(e) => tracing::info!(
                target: "factory_end_of_round_log",
                timestamp = e.timestamp,
                round = e.round,
                task_id = e.task_id.as_str(),
                factory_id = e.factory_id,
                factory_name = e.factory_name.as_str(),
                product_id = e.product_id,
                product_category = e.product_category.as_str(),
                cash = e.cash,
                initial_stock = e.initial_stock,
                remaining_stock = e.remaining_stock,
                supply_range_lower = e.supply_range_lower,
                supply_range_upper = e.supply_range_upper,
                produced = e.produced,
                units_sold = e.units_sold,
                spoiled = e.spoiled,
                revenue = e.revenue,
                production_cost = e.production_cost,
                profit = e.profit,
            ),
        }
    }
}
