//! Range Negotiation: how an agent's range reacts to a trade outcome.
//!
//! Success pulls the range in around the settled price; failure widens it and
//! drifts it toward whatever blocked the trade. Elasticity scales both moves:
//! inelastic agents converge faster and widen less.

use std::collections::BTreeMap;

use slotmap::SlotMap;

use crate::config::SimConfig;
use crate::entities::{Agent, Factory, Preference};
use crate::ledger::Ledger;
use crate::range::{PriceRange, RangeDelta};
use crate::types::{AgentId, FactoryId, FailureCause, Price, ProductId, Trade, TradeResult};

/// Elasticity is clamped into this band before it scales anything.
const ELASTICITY_MIN: f64 = 0.01;
const ELASTICITY_MAX: f64 = 1.0;
/// Elasticity at which the configured factors apply unscaled.
const REFERENCE_ELASTICITY: f64 = 0.5;
const EXPAND_SCALE_MIN: f64 = 0.2;
const EXPAND_SCALE_MAX: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiationParams {
    pub shrink_factor: f64,
    pub expand_step: f64,
    pub min_width_ratio: f64,
}

impl From<&SimConfig> for NegotiationParams {
    fn from(config: &SimConfig) -> Self {
        Self {
            shrink_factor: config.shrink_factor,
            expand_step: config.expand_step,
            min_width_ratio: config.min_width_ratio,
        }
    }
}

fn clamp_elasticity(elasticity: f64) -> f64 {
    if elasticity.is_finite() {
        elasticity.clamp(ELASTICITY_MIN, ELASTICITY_MAX)
    } else {
        REFERENCE_ELASTICITY
    }
}

/// Width multiplier after a success. Equals `shrink_factor` at elasticity 0.5
/// and shrinks harder as elasticity falls.
pub fn effective_shrink(shrink_factor: f64, elasticity: f64) -> f64 {
    shrink_factor.powf(REFERENCE_ELASTICITY / clamp_elasticity(elasticity))
}

/// New range and current price after settling at `price`.
pub fn on_success(pref: &Preference, price: Price, params: &NegotiationParams) -> (PriceRange, Price) {
    let shrunk = pref.current_range.width() * effective_shrink(params.shrink_factor, pref.original_elasticity);
    let width = shrunk.max(params.min_width_ratio * price);
    let range = PriceRange::centered(price, width);
    (range, range.clamp_price(price))
}

/// New range and current price after failing against `counterpart`.
///
/// The range widens by one step and its center moves toward the counterpart's
/// center by at most one step.
pub fn on_failure(
    pref: &Preference,
    counterpart: &PriceRange,
    params: &NegotiationParams,
) -> (PriceRange, Price) {
    let old = pref.current_range;
    let base = old.width().max(params.min_width_ratio * pref.current_price);
    let scale = (clamp_elasticity(pref.original_elasticity) / REFERENCE_ELASTICITY)
        .clamp(EXPAND_SCALE_MIN, EXPAND_SCALE_MAX);
    let step = params.expand_step * base * scale;

    let drift = (counterpart.center() - old.center()).clamp(-step, step);
    let range = old.widen(step).shift(drift);
    (range, range.clamp_price(pref.current_price + drift))
}

// === ROUND ADJUSTMENT ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentKind {
    TradeSuccess,
    TradeFailed,
}

impl AdjustmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentKind::TradeSuccess => "trade_success",
            AdjustmentKind::TradeFailed => "trade_failed",
        }
    }
}

/// One applied range change, with the full before/after state.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub agent: AgentId,
    pub product: ProductId,
    pub kind: AdjustmentKind,
    pub old_range: PriceRange,
    pub new_range: PriceRange,
    pub delta: RangeDelta,
    /// Settled price; present only on success.
    pub price: Option<Price>,
}

/// What an agent-product pair reacts to this round.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Success(Price),
    Failed(PriceRange),
}

/// Reduce a round's trades to at most one outcome per agent-product.
/// A success wins over any failure; otherwise the first failure counts.
fn outcomes(
    trades: &[Trade],
    factories: &SlotMap<FactoryId, Factory>,
    ledger: &Ledger,
) -> BTreeMap<(AgentId, ProductId), Outcome> {
    let mut out: BTreeMap<(AgentId, ProductId), Outcome> = BTreeMap::new();
    for trade in trades {
        let key = (trade.agent, trade.product);
        match trade.result {
            TradeResult::Success { price } => {
                out.insert(key, Outcome::Success(price));
            }
            TradeResult::Failed(cause) => {
                if out.contains_key(&key) {
                    continue;
                }
                let counterpart = match cause {
                    FailureCause::StockExhausted => factories
                        .get(trade.factory)
                        .and_then(|f| f.line(trade.product))
                        .map(|l| l.supply_range),
                    FailureCause::InsufficientCash => {
                        Some(PriceRange::new(0.0, ledger.agent_cash(trade.agent)))
                    }
                };
                if let Some(counterpart) = counterpart {
                    out.insert(key, Outcome::Failed(counterpart));
                }
            }
            TradeResult::NotMatched | TradeResult::NotYet => {}
        }
    }
    out
}

/// Adjust phase: apply one adjustment per agent-product that traded or failed.
///
/// Returned in ascending (agent, product) order.
pub fn adjust_agents(
    agents: &mut SlotMap<AgentId, Agent>,
    factories: &SlotMap<FactoryId, Factory>,
    ledger: &Ledger,
    trades: &[Trade],
    params: &NegotiationParams,
) -> Vec<Adjustment> {
    let mut applied = Vec::new();
    for ((agent, product), outcome) in outcomes(trades, factories, ledger) {
        let Some(pref) = agents.get_mut(agent).and_then(|a| a.preference_mut(product)) else {
            continue;
        };
        let old_range = pref.current_range;
        let (new_range, new_price, kind, price) = match outcome {
            Outcome::Success(price) => {
                let (range, current) = on_success(pref, price, params);
                (range, current, AdjustmentKind::TradeSuccess, Some(price))
            }
            Outcome::Failed(counterpart) => {
                let (range, current) = on_failure(pref, &counterpart, params);
                (range, current, AdjustmentKind::TradeFailed, None)
            }
        };
        pref.current_range = new_range;
        pref.current_price = new_price;

        applied.push(Adjustment {
            agent,
            product,
            kind,
            old_range,
            new_range,
            delta: RangeDelta::between(&old_range, &new_range),
            price,
        });
    }
    applied
}
