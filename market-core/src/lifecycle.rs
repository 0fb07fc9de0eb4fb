// Lifecycle Manager: round-open bookkeeping, factory re-optimization, agent removal

use rand::Rng;
use rand::rngs::StdRng;
use slotmap::SlotMap;

use crate::config::{FactoryAdjustment, IncomeConfig, SimConfig};
use crate::entities::{Agent, Factory, Production};
use crate::ledger::{AgentAccount, Ledger, StockAccount};
use crate::range::{PriceRange, RangeDelta};
use crate::types::{AgentId, FactoryId, FailureCause, ProductId, Trade, TradeResult};

// === TUNING ===

/// Growth factor after selling out is `SELLOUT_GROWTH_BASE + SELLOUT_GROWTH_RISK * risk_appetite`.
pub const SELLOUT_GROWTH_BASE: f64 = 1.1;
pub const SELLOUT_GROWTH_RISK: f64 = 0.4;

// ============================================================================
// Round open
// ============================================================================

/// Units a line plans to make this round, from how last round went.
pub fn production_target(last: &StockAccount, production: &Production) -> u32 {
    if last.initial_stock == 0 {
        1
    } else if last.remaining_stock == 0 {
        let rate = SELLOUT_GROWTH_BASE + SELLOUT_GROWTH_RISK * production.risk_appetite;
        (last.initial_stock as f64 * rate).floor() as u32
    } else {
        last.produced.max(1)
    }
}

/// Units a factory is willing to pay for: a `risk_appetite` share of its cash.
pub fn production_budget(cash: f64, unit_cost: f64, production: &Production) -> u32 {
    if unit_cost <= 0.0 {
        return u32::MAX;
    }
    (cash * production.risk_appetite / unit_cost).floor().clamp(0.0, u32::MAX as f64) as u32
}

/// Open a round: reset flow counters, run production and pay income.
///
/// Production only runs from the second round on; the first round trades the
/// stock the market was set up with.
pub fn open_round(
    round: u64,
    agents: &SlotMap<AgentId, Agent>,
    factories: &SlotMap<FactoryId, Factory>,
    ledger: &mut Ledger,
    income: Option<IncomeConfig>,
    rng: &mut StdRng,
) {
    let mut plans: Vec<(FactoryId, ProductId, u32, f64, Production)> = Vec::new();
    if round > 1 {
        for (id, factory) in factories {
            for (product, line) in &factory.lines {
                let (Some(production), Some(last)) = (line.production, ledger.line(id, *product))
                else {
                    continue;
                };
                plans.push((
                    id,
                    *product,
                    production_target(last, &production),
                    line.unit_cost,
                    production,
                ));
            }
        }
    }

    ledger.open_round();

    for (id, product, target, unit_cost, production) in plans {
        let cash = ledger.factory(id).map_or(0.0, |f| f.cash);
        let units = target.min(production_budget(cash, unit_cost, &production));
        ledger.produce(id, product, units, unit_cost);
    }

    if let Some(income) = income {
        for id in agents.keys() {
            let amount = rng.random_range(income.min..=income.max);
            ledger.credit_agent(id, amount);
        }
    }
}

// ============================================================================
// Factory optimization
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationTrigger {
    Scarcity,
    ExcessInventory,
    Hold,
    PerTrade,
}

impl OptimizationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationTrigger::Scarcity => "scarcity",
            OptimizationTrigger::ExcessInventory => "excess_inventory",
            OptimizationTrigger::Hold => "hold",
            OptimizationTrigger::PerTrade => "per_trade",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerParams {
    pub sellthrough_high: f64,
    pub sellthrough_low: f64,
    pub optimization_step: f64,
    pub mode: FactoryAdjustment,
    pub per_trade_step: f64,
}

impl From<&SimConfig> for OptimizerParams {
    fn from(config: &SimConfig) -> Self {
        Self {
            sellthrough_high: config.sellthrough_high,
            sellthrough_low: config.sellthrough_low,
            optimization_step: config.optimization_step,
            mode: config.factory_adjustment,
            per_trade_step: config.per_trade_step,
        }
    }
}

/// One line's re-optimization. Emitted every round, even when nothing moved.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimization {
    pub factory: FactoryId,
    pub product: ProductId,
    pub old_range: PriceRange,
    pub new_range: PriceRange,
    pub delta: RangeDelta,
    pub trigger: OptimizationTrigger,
    pub sell_through: f64,
}

/// Sell-through driven target. The move grows with the distance past the band edge.
pub fn round_end_target(
    range: &PriceRange,
    stock: &StockAccount,
    unit_cost: f64,
    params: &OptimizerParams,
) -> (PriceRange, OptimizationTrigger) {
    // Nothing was offered, so there is nothing to learn from
    if stock.initial_stock == 0 {
        return (*range, OptimizationTrigger::Hold);
    }
    let st = stock.sell_through();
    let (high, low) = (params.sellthrough_high, params.sellthrough_low);

    if st > high {
        let pressure = (st - high) / (1.0 - high);
        (
            range.scale(1.0 + params.optimization_step * pressure),
            OptimizationTrigger::Scarcity,
        )
    } else if st < low {
        let pressure = (low - st) / low;
        let lowered = range.scale(1.0 - params.optimization_step * pressure);
        (lowered.with_floor(unit_cost), OptimizationTrigger::ExcessInventory)
    } else {
        (*range, OptimizationTrigger::Hold)
    }
}

/// Replay the line's trades of the round, one small step each.
pub fn per_trade_target<'a>(
    range: &PriceRange,
    results: impl IntoIterator<Item = &'a TradeResult>,
    unit_cost: f64,
    step: f64,
) -> (PriceRange, OptimizationTrigger) {
    let mut current = *range;
    let mut moved = false;
    for result in results {
        current = match result {
            TradeResult::Success { .. } | TradeResult::Failed(FailureCause::StockExhausted) => {
                current.scale(1.0 + step)
            }
            TradeResult::Failed(FailureCause::InsufficientCash) => {
                current.scale(1.0 - step).with_floor(unit_cost)
            }
            TradeResult::NotMatched | TradeResult::NotYet => continue,
        };
        moved = true;
    }
    let trigger = if moved {
        OptimizationTrigger::PerTrade
    } else {
        OptimizationTrigger::Hold
    };
    (current, trigger)
}

/// Re-optimize every factory line. Returned in ascending (factory, product) order.
pub fn optimize_factories(
    factories: &mut SlotMap<FactoryId, Factory>,
    ledger: &Ledger,
    trades: &[Trade],
    params: &OptimizerParams,
) -> Vec<Optimization> {
    let mut out = Vec::new();
    for (id, factory) in factories.iter_mut() {
        for (product, line) in factory.lines.iter_mut() {
            let stock = ledger.line(id, *product).cloned().unwrap_or_default();
            let old_range = line.supply_range;
            let (new_range, trigger) = match params.mode {
                FactoryAdjustment::RoundEnd => {
                    round_end_target(&old_range, &stock, line.unit_cost, params)
                }
                FactoryAdjustment::PerTrade => per_trade_target(
                    &old_range,
                    trades
                        .iter()
                        .filter(|t| t.factory == id && t.product == *product)
                        .map(|t| &t.result),
                    line.unit_cost,
                    params.per_trade_step,
                ),
            };
            line.supply_range = new_range;

            out.push(Optimization {
                factory: id,
                product: *product,
                old_range,
                new_range,
                delta: RangeDelta::between(&old_range, &new_range),
                trigger,
                sell_through: stock.sell_through(),
            });
        }
    }
    out
}

/// Drop the share of unsold stock that does not keep.
pub fn spoil_stock(factories: &SlotMap<FactoryId, Factory>, ledger: &mut Ledger) {
    for (id, factory) in factories {
        for (product, line) in &factory.lines {
            if line.durability >= 1.0 {
                continue;
            }
            let remaining = ledger.remaining_stock(id, *product);
            let lost = (remaining as f64 * (1.0 - line.durability.max(0.0))).floor() as u32;
            ledger.spoil(id, *product, lost);
        }
    }
}

// ============================================================================
// Agent removal
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Cash at or below the configured floor.
    Insolvency,
    /// Too many consecutive rounds without a successful trade.
    Stagnation,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Insolvency => "insolvency",
            RemovalReason::Stagnation => "stagnation",
        }
    }
}

pub fn removal_reason(
    account: &AgentAccount,
    cash_floor: f64,
    stagnation_rounds: u32,
) -> Option<RemovalReason> {
    if account.cash <= cash_floor {
        Some(RemovalReason::Insolvency)
    } else if account.idle_rounds >= stagnation_rounds {
        Some(RemovalReason::Stagnation)
    } else {
        None
    }
}

/// A removed agent's terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub agent: Agent,
    pub cash: f64,
    pub reason: RemovalReason,
}

/// Remove every agent that meets a removal criterion, in ascending id order.
///
/// Removal frees the slotmap key, so the agent can never be matched again.
pub fn prune_agents(
    agents: &mut SlotMap<AgentId, Agent>,
    ledger: &mut Ledger,
    cash_floor: f64,
    stagnation_rounds: u32,
) -> Vec<Removal> {
    let mut doomed: Vec<(AgentId, RemovalReason)> = agents
        .keys()
        .filter_map(|id| {
            let account = ledger.agent(id)?;
            removal_reason(account, cash_floor, stagnation_rounds).map(|r| (id, r))
        })
        .collect();
    doomed.sort_by_key(|(id, _)| *id);

    doomed
        .into_iter()
        .filter_map(|(id, reason)| {
            let agent = agents.remove(id)?;
            let cash = ledger.close_agent(id).map_or(0.0, |a| a.cash);
            Some(Removal {
                agent,
                cash,
                reason,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Preference, SupplyLine};
    use rand::SeedableRng;

    const GRAIN: ProductId = ProductId(1);

    fn params() -> OptimizerParams {
        OptimizerParams::from(&SimConfig::default())
    }

    fn sold(initial: u32, units_sold: u32) -> StockAccount {
        StockAccount {
            initial_stock: initial,
            remaining_stock: initial - units_sold,
            units_sold,
            ..StockAccount::default()
        }
    }

    #[test]
    fn test_sellout_raises_range() {
        let range = PriceRange::new(100.0, 200.0);
        let (new, trigger) = round_end_target(&range, &sold(10, 10), 50.0, &params());
        assert_eq!(trigger, OptimizationTrigger::Scarcity);
        // Full pressure: scale by 1 + 0.05
        assert!((new.lower - 105.0).abs() < 1e-9);
        assert!((new.upper - 210.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsold_stock_lowers_range_down_to_cost() {
        let range = PriceRange::new(100.0, 200.0);
        let (new, trigger) = round_end_target(&range, &sold(10, 0), 50.0, &params());
        assert_eq!(trigger, OptimizationTrigger::ExcessInventory);
        assert!((new.lower - 95.0).abs() < 1e-9);

        let (floored, _) = round_end_target(&PriceRange::new(50.0, 60.0), &sold(10, 0), 50.0, &params());
        assert_eq!(floored.lower, 50.0, "lower bound never drops below unit cost");
        assert!((floored.width() - 10.0 * 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_band_holds_range_unchanged() {
        let range = PriceRange::new(100.0, 200.0);
        let (new, trigger) = round_end_target(&range, &sold(10, 5), 50.0, &params());
        assert_eq!(trigger, OptimizationTrigger::Hold);
        assert_eq!(new, range);
    }

    #[test]
    fn test_per_trade_replay() {
        let range = PriceRange::new(100.0, 200.0);
        let results = [
            TradeResult::Success { price: 150.0 },
            TradeResult::NotMatched,
            TradeResult::Failed(FailureCause::InsufficientCash),
        ];
        let (new, trigger) = per_trade_target(&range, &results, 10.0, 0.01);
        assert_eq!(trigger, OptimizationTrigger::PerTrade);
        assert!((new.lower - 100.0 * 1.01 * 0.99).abs() < 1e-9);

        let (same, trigger) = per_trade_target(&range, &[TradeResult::NotYet], 10.0, 0.01);
        assert_eq!(trigger, OptimizationTrigger::Hold);
        assert_eq!(same, range);
    }

    #[test]
    fn test_production_target_rules() {
        let production = Production { risk_appetite: 0.5 };
        assert_eq!(production_target(&StockAccount::default(), &production), 1);
        // Sold out: 10 * (1.1 + 0.2)
        assert_eq!(production_target(&sold(10, 10), &production), 13);
        let mut partial = sold(10, 4);
        partial.produced = 6;
        assert_eq!(production_target(&partial, &production), 6);
        assert_eq!(production_budget(100.0, 10.0, &production), 5);
    }

    #[test]
    fn test_removal_reasons() {
        let broke = AgentAccount {
            cash: 0.0,
            ..AgentAccount::default()
        };
        assert_eq!(removal_reason(&broke, 0.0, 10), Some(RemovalReason::Insolvency));

        let idle = AgentAccount {
            cash: 50.0,
            idle_rounds: 10,
            ..AgentAccount::default()
        };
        assert_eq!(removal_reason(&idle, 0.0, 10), Some(RemovalReason::Stagnation));
        assert_eq!(removal_reason(&idle, 0.0, 11), None);
    }

    #[test]
    fn test_prune_removes_agent_and_account() {
        let mut agents: SlotMap<AgentId, Agent> = SlotMap::with_key();
        let mut ledger = Ledger::new();
        let broke = agents.insert_with_key(|id| {
            Agent::new(id, "broke")
                .with_preference(GRAIN, Preference::new(10.0, 0.5, PriceRange::new(5.0, 15.0)))
        });
        let rich = agents.insert_with_key(|id| Agent::new(id, "rich"));
        ledger.open_agent(broke, 0.0);
        ledger.open_agent(rich, 100.0);

        let removed = prune_agents(&mut agents, &mut ledger, 0.0, 10);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].agent.name, "broke");
        assert_eq!(removed[0].reason, RemovalReason::Insolvency);
        assert!(!agents.contains_key(broke));
        assert!(ledger.agent(broke).is_none());
        assert!(agents.contains_key(rich));
    }

    #[test]
    fn test_open_round_produces_and_pays_income() {
        let mut agents: SlotMap<AgentId, Agent> = SlotMap::with_key();
        let mut factories: SlotMap<FactoryId, Factory> = SlotMap::with_key();
        let mut ledger = Ledger::new();
        let agent = agents.insert_with_key(|id| Agent::new(id, "a"));
        ledger.open_agent(agent, 0.0);
        let factory = factories.insert_with_key(|id| {
            Factory::new(id, "f").with_line(
                GRAIN,
                SupplyLine::new(PriceRange::new(10.0, 20.0), 2.0)
                    .with_production(Production { risk_appetite: 0.5 }),
            )
        });
        ledger.open_factory(factory, 100.0);
        ledger.open_line(factory, GRAIN, 4);
        ledger.settle(agent, factory, GRAIN, 0.0).unwrap();
        ledger.settle(agent, factory, GRAIN, 0.0).unwrap();
        ledger.settle(agent, factory, GRAIN, 0.0).unwrap();
        ledger.settle(agent, factory, GRAIN, 0.0).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let income = IncomeConfig { min: 800.0, max: 1200.0 };
        open_round(2, &agents, &factories, &mut ledger, Some(income), &mut rng);

        // Sold out 4 units: target floor(4 * 1.3) = 5, budget 100 * 0.5 / 2 = 25
        let line = ledger.line(factory, GRAIN).unwrap();
        assert_eq!(line.produced, 5);
        assert_eq!(line.initial_stock, 5);
        assert_eq!(ledger.factory(factory).unwrap().cash, 90.0);

        let cash = ledger.agent_cash(agent);
        assert!((800.0..=1200.0).contains(&cash), "income {cash} outside configured band");
    }

    #[test]
    fn test_spoilage_removes_unsold_share() {
        let mut factories: SlotMap<FactoryId, Factory> = SlotMap::with_key();
        let mut ledger = Ledger::new();
        let factory = factories.insert_with_key(|id| {
            Factory::new(id, "f").with_line(
                GRAIN,
                SupplyLine::new(PriceRange::new(10.0, 20.0), 2.0).with_durability(0.75),
            )
        });
        ledger.open_factory(factory, 0.0);
        ledger.open_line(factory, GRAIN, 10);

        spoil_stock(&factories, &mut ledger);
        let line = ledger.line(factory, GRAIN).unwrap();
        assert_eq!(line.spoiled, 2);
        assert_eq!(line.remaining_stock, 8);
    }
}
