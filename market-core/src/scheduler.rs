//! Round Scheduler and the owned simulation context.
//!
//! [`Market`] holds all per-run state (participants, ledger, round counter,
//! rng) and drives each round through a fixed phase order:
//!
//! ```text
//! Init -> { Open -> Match -> Settle -> Adjust -> Prune -> Snapshot } -> Terminated
//! ```
//!
//! Invariants are checked after Settle, Adjust and Prune; a violation aborts
//! the run. Snapshot always observes post-Prune state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tsify_next::Tsify;

use crate::config::SimConfig;
use crate::entities::{Agent, Factory, Preference, SupplyLine};
use crate::error::{SimError, SimResult};
use crate::events::{
    AgentCashLog, AgentDemandRemovalLog, AgentRangeAdjustmentLog, EventSink, FactoryEndOfRoundLog,
    FactoryRangeOptimizationLog, NO_PRICE, RoundEvent, TradeLog,
};
use crate::ledger::Ledger;
use crate::lifecycle::{self, Optimization, OptimizerParams, Removal};
use crate::matching;
use crate::negotiation::{self, Adjustment, NegotiationParams};
use crate::range::PriceRange;
use crate::types::{AgentId, FactoryId, KeyToU64, Product, ProductId, Trade};

// ============================================================================
// Phases and termination
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum TerminationReason {
    MaxRounds,
    NoActiveAgents,
    NoActiveFactories,
    /// No line has stock and none can produce.
    SupplyExhausted,
    /// Too many consecutive rounds without a successful trade.
    MarketIdle,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum Phase {
    Init,
    Open,
    Match,
    Settle,
    Adjust,
    Prune,
    Snapshot,
    Terminated(TerminationReason),
}

/// What one call to [`Market::advance_round`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundReport {
    pub round: u64,
    /// False when the market was already terminated and no round ran.
    pub executed: bool,
    pub pairs: usize,
    pub successes: usize,
    pub adjustments: usize,
    pub removals: usize,
    pub termination: Option<TerminationReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct RunSummary {
    pub rounds: u64,
    pub reason: TerminationReason,
    pub total_trades: u64,
}

// ============================================================================
// Snapshot types for rendering
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct AgentSnapshot {
    pub id: u64,
    pub name: String,
    pub cash: f64,
    pub total_trades: u64,
    pub preferences: Vec<(ProductId, Preference)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct LineSnapshot {
    pub factory_id: u64,
    pub factory_name: String,
    pub product: ProductId,
    pub cash: f64,
    pub supply_range: PriceRange,
    pub initial_stock: u32,
    pub remaining_stock: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct MarketSnapshot {
    pub round: u64,
    pub phase: Phase,
    pub agents: Vec<AgentSnapshot>,
    pub lines: Vec<LineSnapshot>,
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    #[cfg(target_arch = "wasm32")]
    {
        js_sys::Date::now() as i64
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64)
    }
}

// ============================================================================
// Market
// ============================================================================

/// Complete state of one simulation run.
#[derive(Debug, Clone)]
pub struct Market {
    config: SimConfig,
    products: BTreeMap<ProductId, Product>,
    agents: SlotMap<AgentId, Agent>,
    factories: SlotMap<FactoryId, Factory>,
    ledger: Ledger,
    round: u64,
    phase: Phase,
    rng: StdRng,
    next_trade_id: u64,
    /// Consecutive rounds without a successful trade, market-wide.
    idle_rounds: u32,
    total_trades: u64,
}

impl Market {
    /// Empty market. Fails if `config` does not validate.
    pub fn new(config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            products: BTreeMap::new(),
            agents: SlotMap::with_key(),
            factories: SlotMap::with_key(),
            ledger: Ledger::new(),
            round: 0,
            phase: Phase::Init,
            rng,
            next_trade_id: 0,
            idle_rounds: 0,
            total_trades: 0,
        })
    }

    // === Setup ===

    pub fn add_product(&mut self, product: Product) {
        self.products.insert(product.id, product);
    }

    pub fn add_agent(
        &mut self,
        name: impl Into<String>,
        cash: f64,
        preferences: impl IntoIterator<Item = (ProductId, Preference)>,
    ) -> AgentId {
        let name = name.into();
        let id = self.agents.insert_with_key(|id| {
            let mut agent = Agent::new(id, name);
            agent.preferences.extend(preferences);
            agent
        });
        self.ledger.open_agent(id, cash);
        id
    }

    pub fn add_factory(&mut self, name: impl Into<String>, cash: f64) -> FactoryId {
        let name = name.into();
        let id = self.factories.insert_with_key(|id| Factory::new(id, name));
        self.ledger.open_factory(id, cash);
        id
    }

    /// Give `factory` a supply line for `product` with `stock` units on hand.
    pub fn add_line(&mut self, factory: FactoryId, product: ProductId, line: SupplyLine, stock: u32) {
        if let Some(f) = self.factories.get_mut(factory) {
            f.lines.insert(product, line);
            self.ledger.open_line(factory, product, stock);
        }
    }

    // === Accessors ===

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated(_))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn agents(&self) -> &SlotMap<AgentId, Agent> {
        &self.agents
    }

    pub fn factories(&self) -> &SlotMap<FactoryId, Factory> {
        &self.factories
    }

    pub fn product(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id)
    }

    pub fn total_trades(&self) -> u64 {
        self.total_trades
    }

    // === Running ===

    /// Run rounds until a termination condition holds or `cancel` is set.
    /// Cancellation is only observed between rounds.
    pub fn run(&mut self, sink: &mut impl EventSink, cancel: &AtomicBool) -> SimResult<RunSummary> {
        let reason = loop {
            if let Phase::Terminated(reason) = self.phase {
                break reason;
            }
            if cancel.load(Ordering::Relaxed) {
                self.phase = Phase::Terminated(TerminationReason::Cancelled);
                break TerminationReason::Cancelled;
            }
            self.advance_round(sink)?;
        };
        Ok(RunSummary {
            rounds: self.round,
            reason,
            total_trades: self.total_trades,
        })
    }

    /// Execute one full round, or record termination if the market cannot continue.
    pub fn advance_round(&mut self, sink: &mut impl EventSink) -> SimResult<RoundReport> {
        if let Phase::Terminated(reason) = self.phase {
            return Ok(RoundReport {
                round: self.round,
                termination: Some(reason),
                ..RoundReport::default()
            });
        }
        if let Some(reason) = self.termination() {
            self.phase = Phase::Terminated(reason);
            return Ok(RoundReport {
                round: self.round,
                termination: Some(reason),
                ..RoundReport::default()
            });
        }

        self.round += 1;
        let round = self.round;
        let timestamp = now_millis();

        // 1. Open: reset counters, produce, pay income
        self.phase = Phase::Open;
        lifecycle::open_round(
            round,
            &self.agents,
            &self.factories,
            &mut self.ledger,
            self.config.income,
            &mut self.rng,
        );

        // 2. Match: classify and rank every candidate pair
        self.phase = Phase::Match;
        let plan = matching::evaluate(
            &self.agents,
            &self.factories,
            &self.ledger,
            self.config.force_sequential,
        );

        // 3. Settle: single-writer allocation through the ledger
        self.phase = Phase::Settle;
        let trades = matching::arbitrate(
            plan,
            round,
            &mut self.ledger,
            &mut self.rng,
            &mut self.next_trade_id,
        );
        for trade in &trades {
            if let Some(event) = self.trade_log(timestamp, trade) {
                sink.emit(RoundEvent::Trade(event));
            }
        }
        self.verify()?;

        // 4. Adjust: agent ranges react to their outcomes
        self.phase = Phase::Adjust;
        let adjustments = negotiation::adjust_agents(
            &mut self.agents,
            &self.factories,
            &self.ledger,
            &trades,
            &NegotiationParams::from(&self.config),
        );
        for adjustment in &adjustments {
            if let Some(event) = self.adjustment_log(timestamp, adjustment) {
                sink.emit(RoundEvent::AgentRangeAdjustment(event));
            }
        }
        self.verify()?;

        // 5. Prune: factory re-optimization, spoilage, agent removal
        self.phase = Phase::Prune;
        self.ledger.close_round();
        let optimizations = lifecycle::optimize_factories(
            &mut self.factories,
            &self.ledger,
            &trades,
            &OptimizerParams::from(&self.config),
        );
        for optimization in &optimizations {
            if let Some(event) = self.optimization_log(timestamp, optimization) {
                sink.emit(RoundEvent::FactoryRangeOptimization(event));
            }
        }
        lifecycle::spoil_stock(&self.factories, &mut self.ledger);
        let removals = lifecycle::prune_agents(
            &mut self.agents,
            &mut self.ledger,
            self.config.cash_floor,
            self.config.stagnation_rounds,
        );
        for removal in &removals {
            for event in self.removal_logs(timestamp, removal) {
                sink.emit(RoundEvent::AgentDemandRemoval(event));
            }
        }
        self.verify()?;

        // 6. Snapshot: one row per active agent and per factory line
        self.phase = Phase::Snapshot;
        self.emit_snapshot(timestamp, sink);

        let successes = trades.iter().filter(|t| t.result.is_success()).count();
        self.total_trades += successes as u64;
        self.idle_rounds = if successes == 0 { self.idle_rounds + 1 } else { 0 };

        let termination = self.termination();
        if let Some(reason) = termination {
            self.phase = Phase::Terminated(reason);
        }

        Ok(RoundReport {
            round,
            executed: true,
            pairs: trades.len(),
            successes,
            adjustments: adjustments.len(),
            removals: removals.len(),
            termination,
        })
    }

    /// Why the market cannot run another round, if it cannot.
    fn termination(&self) -> Option<TerminationReason> {
        if self.round >= self.config.max_rounds {
            return Some(TerminationReason::MaxRounds);
        }
        if self.agents.is_empty() {
            return Some(TerminationReason::NoActiveAgents);
        }
        if self.factories.is_empty() {
            return Some(TerminationReason::NoActiveFactories);
        }
        let can_supply = self.factories.iter().any(|(id, f)| {
            f.lines.iter().any(|(product, line)| {
                line.production.is_some() || self.ledger.remaining_stock(id, *product) > 0
            })
        });
        if !can_supply {
            return Some(TerminationReason::SupplyExhausted);
        }
        if let Some(max_idle) = self.config.max_idle_rounds
            && self.idle_rounds >= max_idle
        {
            return Some(TerminationReason::MarketIdle);
        }
        None
    }

    /// Check every range and balance.
    fn verify(&self) -> SimResult<()> {
        for (id, agent) in &self.agents {
            for (product, pref) in &agent.preferences {
                if !pref.current_range.is_valid() {
                    return Err(SimError::invariant(
                        self.round,
                        format!("agent {} ({}) product {}", id.to_u64(), agent.name, product.0),
                        format!(
                            "range [{}, {}] is not ordered and non-negative",
                            pref.current_range.lower, pref.current_range.upper
                        ),
                    ));
                }
            }
        }
        for (id, factory) in &self.factories {
            for (product, line) in &factory.lines {
                if !line.supply_range.is_valid() {
                    return Err(SimError::invariant(
                        self.round,
                        format!("factory {} ({}) product {}", id.to_u64(), factory.name, product.0),
                        format!(
                            "supply range [{}, {}] is not ordered and non-negative",
                            line.supply_range.lower, line.supply_range.upper
                        ),
                    ));
                }
            }
        }
        self.ledger.verify(self.round)
    }

    // === Event construction ===

    fn trade_log(&self, timestamp: i64, trade: &Trade) -> Option<TradeLog> {
        let agent = self.agents.get(trade.agent)?;
        let pref = agent.preference(trade.product)?;
        let factory = self.factories.get(trade.factory)?;
        let line = factory.line(trade.product)?;
        Some(TradeLog {
            timestamp,
            round: trade.round,
            task_id: self.config.task_id.clone(),
            trade_id: trade.id,
            agent_id: trade.agent.to_u64(),
            agent_name: agent.name.clone(),
            agent_cash: trade.agent_cash,
            factory_id: trade.factory.to_u64(),
            factory_name: factory.name.clone(),
            product_id: trade.product.0 as u64,
            product_name: self.product_name(trade.product),
            trade_result: trade.result.as_str().to_string(),
            interval_relation: trade.relation.as_str().to_string(),
            price: trade.result.price(),
            factory_supply_range_lower: line.supply_range.lower,
            factory_supply_range_upper: line.supply_range.upper,
            factory_stock: trade.factory_stock as u64,
            agent_pref_original_price: pref.original_price,
            agent_pref_original_elastic: pref.original_elasticity,
            agent_pref_current_price: pref.current_price,
            agent_pref_current_range_lower: pref.current_range.lower,
            agent_pref_current_range_upper: pref.current_range.upper,
        })
    }

    fn adjustment_log(&self, timestamp: i64, adj: &Adjustment) -> Option<AgentRangeAdjustmentLog> {
        let agent = self.agents.get(adj.agent)?;
        Some(AgentRangeAdjustmentLog {
            timestamp,
            round: self.round,
            task_id: self.config.task_id.clone(),
            agent_id: adj.agent.to_u64(),
            agent_name: agent.name.clone(),
            product_id: adj.product.0 as u64,
            old_range_lower: adj.old_range.lower,
            old_range_upper: adj.old_range.upper,
            new_range_lower: adj.new_range.lower,
            new_range_upper: adj.new_range.upper,
            lower_change: adj.delta.lower_change,
            upper_change: adj.delta.upper_change,
            min_change_ratio: adj.delta.lower_change_ratio,
            max_change_ratio: adj.delta.upper_change_ratio,
            center: adj.new_range.center(),
            adjustment_type: adj.kind.as_str().to_string(),
            price: adj.price,
        })
    }

    fn optimization_log(
        &self,
        timestamp: i64,
        opt: &Optimization,
    ) -> Option<FactoryRangeOptimizationLog> {
        let factory = self.factories.get(opt.factory)?;
        Some(FactoryRangeOptimizationLog {
            timestamp,
            round: self.round,
            task_id: self.config.task_id.clone(),
            factory_id: opt.factory.to_u64(),
            factory_name: factory.name.clone(),
            product_id: opt.product.0 as u64,
            product_category: self.product_category(opt.product),
            old_range_lower: opt.old_range.lower,
            old_range_upper: opt.old_range.upper,
            new_range_lower: opt.new_range.lower,
            new_range_upper: opt.new_range.upper,
            lower_change: opt.delta.lower_change,
            upper_change: opt.delta.upper_change,
            total_change: opt.delta.total_change,
            lower_change_ratio: opt.delta.lower_change_ratio,
            upper_change_ratio: opt.delta.upper_change_ratio,
            trade_result: opt.trigger.as_str().to_string(),
            sell_through: opt.sell_through,
        })
    }

    /// One row per preference the agent held when it was removed.
    fn removal_logs(&self, timestamp: i64, removal: &Removal) -> Vec<AgentDemandRemovalLog> {
        let agent = &removal.agent;
        let row = |product_id: u64, pref: Option<&Preference>| AgentDemandRemovalLog {
            timestamp,
            round: self.round,
            task_id: self.config.task_id.clone(),
            agent_id: agent.id.to_u64(),
            agent_name: agent.name.clone(),
            product_id,
            agent_cash: removal.cash,
            agent_pref_original_price: pref.map_or(NO_PRICE, |p| p.original_price),
            agent_pref_original_elastic: pref.map_or(NO_PRICE, |p| p.original_elasticity),
            agent_pref_current_price: pref.map_or(NO_PRICE, |p| p.current_price),
            agent_pref_current_range_lower: pref.map_or(NO_PRICE, |p| p.current_range.lower),
            agent_pref_current_range_upper: pref.map_or(NO_PRICE, |p| p.current_range.upper),
            removal_reason: removal.reason.as_str().to_string(),
        };
        if agent.preferences.is_empty() {
            return vec![row(0, None)];
        }
        agent
            .preferences
            .iter()
            .map(|(product, pref)| row(product.0 as u64, Some(pref)))
            .collect()
    }

    fn emit_snapshot(&self, timestamp: i64, sink: &mut impl EventSink) {
        for (id, agent) in &self.agents {
            let Some(account) = self.ledger.agent(id) else {
                continue;
            };
            sink.emit(RoundEvent::AgentCash(AgentCashLog {
                timestamp,
                round: self.round,
                task_id: self.config.task_id.clone(),
                agent_id: id.to_u64(),
                agent_name: agent.name.clone(),
                cash: account.cash,
                total_trades: account.total_trades,
            }));
        }

        for (id, factory) in &self.factories {
            let cash = self.ledger.factory(id).map_or(0.0, |f| f.cash);
            for (product, line) in &factory.lines {
                let stock = self.ledger.line(id, *product).cloned().unwrap_or_default();
                sink.emit(RoundEvent::FactoryEndOfRound(FactoryEndOfRoundLog {
                    timestamp,
                    round: self.round,
                    task_id: self.config.task_id.clone(),
                    factory_id: id.to_u64(),
                    factory_name: factory.name.clone(),
                    product_id: product.0 as u64,
                    product_category: self.product_category(*product),
                    cash,
                    initial_stock: stock.initial_stock as u64,
                    remaining_stock: stock.remaining_stock as u64,
                    supply_range_lower: line.supply_range.lower,
                    supply_range_upper: line.supply_range.upper,
                    produced: stock.produced as u64,
                    units_sold: stock.units_sold as u64,
                    spoiled: stock.spoiled as u64,
                    revenue: stock.revenue,
                    production_cost: stock.production_cost,
                    profit: stock.profit(line.unit_cost),
                }));
            }
        }
    }

    fn product_name(&self, id: ProductId) -> String {
        self.products
            .get(&id)
            .map_or_else(|| format!("product_{}", id.0), |p| p.name.clone())
    }

    fn product_category(&self, id: ProductId) -> String {
        self.products
            .get(&id)
            .map_or("Other", |p| p.category.as_str())
            .to_string()
    }

    // === Snapshot for rendering ===

    pub fn snapshot(&self) -> MarketSnapshot {
        let agents = self
            .agents
            .iter()
            .map(|(id, agent)| {
                let account = self.ledger.agent(id).cloned().unwrap_or_default();
                AgentSnapshot {
                    id: id.to_u64(),
                    name: agent.name.clone(),
                    cash: account.cash,
                    total_trades: account.total_trades,
                    preferences: agent
                        .preferences
                        .iter()
                        .map(|(p, pref)| (*p, pref.clone()))
                        .collect(),
                }
            })
            .collect();

        let lines = self
            .factories
            .iter()
            .flat_map(|(id, factory)| {
                let cash = self.ledger.factory(id).map_or(0.0, |f| f.cash);
                factory.lines.iter().map(move |(product, line)| {
                    let stock = self.ledger.line(id, *product).cloned().unwrap_or_default();
                    LineSnapshot {
                        factory_id: id.to_u64(),
                        factory_name: factory.name.clone(),
                        product: *product,
                        cash,
                        supply_range: line.supply_range,
                        initial_stock: stock.initial_stock,
                        remaining_stock: stock.remaining_stock,
                    }
                })
            })
            .collect();

        MarketSnapshot {
            round: self.round,
            phase: self.phase,
            agents,
            lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecSink;
    use crate::types::ProductCategory;

    const BREAD: ProductId = ProductId(1);

    fn market(config: SimConfig) -> Market {
        let mut market = Market::new(config).unwrap();
        market.add_product(Product {
            id: BREAD,
            name: "bread".to_string(),
            category: ProductCategory::Food,
        });
        market
    }

    fn pref(price: f64, lower: f64, upper: f64) -> (ProductId, Preference) {
        (BREAD, Preference::new(price, 0.5, PriceRange::new(lower, upper)))
    }

    #[test]
    fn test_round_emits_dense_snapshot() {
        let mut m = market(SimConfig::default());
        m.add_agent("a1", 500.0, [pref(150.0, 120.0, 180.0)]);
        m.add_agent("a2", 500.0, [pref(50.0, 40.0, 60.0)]);
        let f = m.add_factory("f1", 0.0);
        m.add_line(f, BREAD, SupplyLine::new(PriceRange::new(100.0, 200.0), 10.0), 5);
        let f2 = m.add_factory("f2", 0.0);
        m.add_line(f2, BREAD, SupplyLine::new(PriceRange::new(300.0, 400.0), 10.0), 0);

        let mut sink = VecSink::new();
        let report = m.advance_round(&mut sink).unwrap();

        assert!(report.executed);
        assert_eq!(report.successes, 1);
        assert_eq!(sink.count("agent_cash_log"), 2, "one cash row per active agent");
        assert_eq!(sink.count("factory_end_of_round_log"), 2, "one row per factory line");
        assert_eq!(
            sink.count("factory_range_optimization_log"),
            2,
            "optimization rows are emitted even when unchanged"
        );
        assert_eq!(m.phase(), Phase::Snapshot);
    }

    #[test]
    fn test_terminates_at_max_rounds() {
        let config = SimConfig {
            max_rounds: 3,
            max_idle_rounds: None,
            stagnation_rounds: 100,
            ..SimConfig::default()
        };
        let mut m = market(config);
        m.add_agent("a", 1.0e6, [pref(150.0, 120.0, 180.0)]);
        let f = m.add_factory("f", 0.0);
        m.add_line(f, BREAD, SupplyLine::new(PriceRange::new(100.0, 200.0), 10.0), 100);

        let summary = m.run(&mut VecSink::new(), &AtomicBool::new(false)).unwrap();
        assert_eq!(summary.reason, TerminationReason::MaxRounds);
        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.total_trades, 3);

        let after = m.advance_round(&mut VecSink::new()).unwrap();
        assert!(!after.executed, "a terminated market runs no further rounds");
    }

    #[test]
    fn test_cancel_before_first_round() {
        let mut m = market(SimConfig::default());
        m.add_agent("a", 100.0, [pref(150.0, 120.0, 180.0)]);
        let f = m.add_factory("f", 0.0);
        m.add_line(f, BREAD, SupplyLine::new(PriceRange::new(100.0, 200.0), 10.0), 1);

        let summary = m.run(&mut VecSink::new(), &AtomicBool::new(true)).unwrap();
        assert_eq!(summary.reason, TerminationReason::Cancelled);
        assert_eq!(summary.rounds, 0);
    }

    #[test]
    fn test_empty_market_terminates_without_running() {
        let mut m = market(SimConfig::default());
        let report = m.advance_round(&mut VecSink::new()).unwrap();
        assert!(!report.executed);
        assert_eq!(report.termination, Some(TerminationReason::NoActiveAgents));
    }

    #[test]
    fn test_idle_market_stops() {
        let config = SimConfig {
            max_idle_rounds: Some(2),
            stagnation_rounds: 100,
            ..SimConfig::default()
        };
        let mut m = market(config);
        m.add_agent("a", 100.0, [pref(50.0, 40.0, 60.0)]);
        let f = m.add_factory("f", 0.0);
        m.add_line(f, BREAD, SupplyLine::new(PriceRange::new(100.0, 200.0), 10.0), 5);

        let summary = m.run(&mut VecSink::new(), &AtomicBool::new(false)).unwrap();
        assert_eq!(summary.reason, TerminationReason::MarketIdle);
        assert_eq!(summary.rounds, 2);
    }

    #[test]
    fn test_sold_out_market_is_supply_exhausted() {
        let config = SimConfig {
            stagnation_rounds: 100,
            ..SimConfig::default()
        };
        let mut m = market(config);
        m.add_agent("a", 1000.0, [pref(150.0, 120.0, 180.0)]);
        let f = m.add_factory("f", 0.0);
        m.add_line(f, BREAD, SupplyLine::new(PriceRange::new(100.0, 200.0), 10.0), 1);

        let report = m.advance_round(&mut VecSink::new()).unwrap();
        assert_eq!(report.successes, 1);
        assert_eq!(report.termination, Some(TerminationReason::SupplyExhausted));
    }

    #[test]
    fn test_verify_reports_bad_range() {
        let mut m = market(SimConfig::default());
        let a = m.add_agent("a", 100.0, [pref(150.0, 120.0, 180.0)]);
        m.agents[a].preferences.get_mut(&BREAD).unwrap().current_range =
            PriceRange { lower: 10.0, upper: 5.0 };
        match m.verify() {
            Err(SimError::InvariantViolation { entity, .. }) => assert!(entity.contains("(a)")),
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_lists_agents_and_lines() {
        let mut m = market(SimConfig::default());
        m.add_agent("a", 100.0, [pref(150.0, 120.0, 180.0)]);
        let f = m.add_factory("f", 25.0);
        m.add_line(f, BREAD, SupplyLine::new(PriceRange::new(100.0, 200.0), 10.0), 3);

        let snap = m.snapshot();
        assert_eq!(snap.agents.len(), 1);
        assert_eq!(snap.lines.len(), 1);
        assert_eq!(snap.lines[0].remaining_stock, 3);
        assert_eq!(snap.lines[0].cash, 25.0);
        assert_eq!(snap.phase, Phase::Init);
    }
}
