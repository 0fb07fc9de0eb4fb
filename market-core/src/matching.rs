//! Matching Engine.
//!
//! A round's matching runs in two passes:
//!
//! 1. [`evaluate`] (Match phase): every factory line with stock forms a group.
//!    Each group classifies every interested agent against the line's supply
//!    range and ranks the overlapping ones. Groups only read shared state, so
//!    they can be evaluated on parallel workers.
//! 2. [`arbitrate`] (Settle phase): a single writer walks the groups in a
//!    seeded order and allocates stock greedily in rank order through the
//!    ledger, which is the only place cash and stock change.
//!
//! Ranking is by willingness to pay (the agent's current price clipped into
//! the overlap) descending, ties broken by agent id, so allocation is
//! reproducible for a given seed.

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use slotmap::SlotMap;

use crate::entities::{Agent, Factory};
use crate::error::InsufficientResource;
use crate::ledger::Ledger;
use crate::parallel;
use crate::range::{PriceRange, RangeModel, relation};
use crate::types::{
    AgentId, FactoryId, FailureCause, IntervalRelation, Price, ProductId, Trade, TradeResult,
};

/// An overlapping agent's claim on a line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bid {
    pub agent: AgentId,
    pub willingness_to_pay: Price,
}

/// Evaluation of one factory line against every interested agent.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchGroup {
    pub factory: FactoryId,
    pub product: ProductId,
    /// Overlapping agents in allocation order.
    pub candidates: Vec<Bid>,
    /// Agents whose range misses the supply range, by agent id.
    pub unmatched: Vec<(AgentId, IntervalRelation)>,
}

/// Output of the Match phase, input of the Settle phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchPlan {
    pub groups: Vec<MatchGroup>,
}

impl MatchPlan {
    pub fn pair_count(&self) -> usize {
        self.groups
            .iter()
            .map(|g| g.candidates.len() + g.unmatched.len())
            .sum()
    }
}

struct Demand {
    agent: AgentId,
    range: PriceRange,
    price: Price,
}

struct Supply {
    factory: FactoryId,
    product: ProductId,
    range: PriceRange,
}

/// Descending willingness to pay, then ascending agent id.
pub fn rank_bids(bids: &mut [Bid]) {
    bids.sort_by(|a, b| {
        b.willingness_to_pay
            .total_cmp(&a.willingness_to_pay)
            .then(a.agent.cmp(&b.agent))
    });
}

fn evaluate_group(supply: &Supply, demand: &[Demand]) -> MatchGroup {
    let mut candidates = Vec::new();
    let mut unmatched = Vec::new();

    for d in demand {
        match relation(&d.range, &supply.range) {
            IntervalRelation::Overlapping => {
                // Relation says they overlap, so the intersection exists
                let overlap = d.range.intersection(&supply.range).unwrap_or(supply.range);
                candidates.push(Bid {
                    agent: d.agent,
                    willingness_to_pay: overlap.clamp_price(d.price),
                });
            }
            other => unmatched.push((d.agent, other)),
        }
    }
    rank_bids(&mut candidates);

    MatchGroup {
        factory: supply.factory,
        product: supply.product,
        candidates,
        unmatched,
    }
}

/// Match phase: classify and rank every (agent, line) pair that could trade.
///
/// Only lines with stock and agents with cash take part. Relations are computed
/// fresh from the ranges as they stand now.
pub fn evaluate(
    agents: &SlotMap<AgentId, Agent>,
    factories: &SlotMap<FactoryId, Factory>,
    ledger: &Ledger,
    force_sequential: bool,
) -> MatchPlan {
    let mut demand: BTreeMap<ProductId, Vec<Demand>> = BTreeMap::new();
    for (id, agent) in agents {
        if ledger.agent_cash(id) <= 0.0 {
            continue;
        }
        for (product, pref) in &agent.preferences {
            let Some(range) = agent.current_range(*product) else {
                continue;
            };
            demand.entry(*product).or_default().push(Demand {
                agent: id,
                range,
                price: pref.current_price,
            });
        }
    }
    for bidders in demand.values_mut() {
        bidders.sort_by_key(|d| d.agent);
    }

    let mut supply: Vec<Supply> = factories
        .iter()
        .flat_map(|(id, factory)| {
            factory.lines.keys().filter_map(move |product| {
                Some(Supply {
                    factory: id,
                    product: *product,
                    range: factory.current_range(*product)?,
                })
            })
        })
        .filter(|s| ledger.remaining_stock(s.factory, s.product) > 0)
        .filter(|s| demand.contains_key(&s.product))
        .collect();
    supply.sort_by_key(|s| (s.factory, s.product));

    let groups = parallel::map_slice(
        &supply,
        |s| evaluate_group(s, demand.get(&s.product).map_or(&[][..], Vec::as_slice)),
        force_sequential,
    );
    MatchPlan { groups }
}

/// Settle phase: allocate stock group by group and record every pair's outcome.
///
/// Groups are visited in an order shuffled by `rng`. Within a group candidates
/// are served in rank order; an agent already served for the product this
/// round is deferred as `NotYet`. Trade ids continue from `next_trade_id`.
pub fn arbitrate(
    mut plan: MatchPlan,
    round: u64,
    ledger: &mut Ledger,
    rng: &mut StdRng,
    next_trade_id: &mut u64,
) -> Vec<Trade> {
    plan.groups.shuffle(rng);

    let mut served: HashSet<(AgentId, ProductId)> = HashSet::new();
    let mut trades = Vec::with_capacity(plan.pair_count());

    for group in plan.groups {
        let (factory, product) = (group.factory, group.product);

        for bid in group.candidates {
            let result = if served.contains(&(bid.agent, product)) {
                TradeResult::NotYet
            } else if ledger.remaining_stock(factory, product) == 0 {
                TradeResult::Failed(FailureCause::StockExhausted)
            } else {
                match ledger.settle(bid.agent, factory, product, bid.willingness_to_pay) {
                    Ok(()) => {
                        served.insert((bid.agent, product));
                        TradeResult::Success {
                            price: bid.willingness_to_pay,
                        }
                    }
                    Err(InsufficientResource::Cash { .. }) => {
                        TradeResult::Failed(FailureCause::InsufficientCash)
                    }
                    Err(InsufficientResource::Stock { .. }) => {
                        TradeResult::Failed(FailureCause::StockExhausted)
                    }
                }
            };
            trades.push(record(
                next_trade_id,
                round,
                ledger,
                bid.agent,
                factory,
                product,
                IntervalRelation::Overlapping,
                result,
            ));
        }

        for (agent, relation) in group.unmatched {
            trades.push(record(
                next_trade_id,
                round,
                ledger,
                agent,
                factory,
                product,
                relation,
                TradeResult::NotMatched,
            ));
        }
    }
    trades
}

#[allow(clippy::too_many_arguments)]
fn record(
    next_trade_id: &mut u64,
    round: u64,
    ledger: &Ledger,
    agent: AgentId,
    factory: FactoryId,
    product: ProductId,
    relation: IntervalRelation,
    result: TradeResult,
) -> Trade {
    let id = *next_trade_id;
    *next_trade_id += 1;
    Trade {
        id,
        round,
        agent,
        factory,
        product,
        relation,
        result,
        agent_cash: ledger.agent_cash(agent),
        factory_stock: ledger.remaining_stock(factory, product),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Preference, SupplyLine};
    use rand::SeedableRng;

    const GRAIN: ProductId = ProductId(1);

    struct Fixture {
        agents: SlotMap<AgentId, Agent>,
        factories: SlotMap<FactoryId, Factory>,
        ledger: Ledger,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                agents: SlotMap::with_key(),
                factories: SlotMap::with_key(),
                ledger: Ledger::new(),
            }
        }

        fn agent(&mut self, cash: f64, price: f64, range: (f64, f64)) -> AgentId {
            let id = self.agents.insert_with_key(|id| {
                Agent::new(id, "agent").with_preference(
                    GRAIN,
                    Preference::new(price, 0.5, PriceRange::new(range.0, range.1)),
                )
            });
            self.ledger.open_agent(id, cash);
            id
        }

        fn factory(&mut self, stock: u32, range: (f64, f64)) -> FactoryId {
            let id = self.factories.insert_with_key(|id| {
                Factory::new(id, "factory")
                    .with_line(GRAIN, SupplyLine::new(PriceRange::new(range.0, range.1), 1.0))
            });
            self.ledger.open_factory(id, 0.0);
            self.ledger.open_line(id, GRAIN, stock);
            id
        }

        fn run(&mut self, seed: u64) -> Vec<Trade> {
            let plan = evaluate(&self.agents, &self.factories, &self.ledger, true);
            let mut rng = StdRng::seed_from_u64(seed);
            let mut next_id = 0;
            arbitrate(plan, 1, &mut self.ledger, &mut rng, &mut next_id)
        }
    }

    #[test]
    fn test_contention_goes_to_highest_bidder() {
        let mut fx = Fixture::new();
        let low = fx.agent(1000.0, 160.0, (140.0, 180.0));
        let high = fx.agent(1000.0, 170.0, (140.0, 180.0));
        let factory = fx.factory(1, (100.0, 200.0));

        let trades = fx.run(3);
        let outcome = |a| trades.iter().find(|t| t.agent == a).unwrap().result;

        assert_eq!(outcome(high), TradeResult::Success { price: 170.0 });
        assert_eq!(outcome(low), TradeResult::Failed(FailureCause::StockExhausted));
        assert_eq!(fx.ledger.remaining_stock(factory, GRAIN), 0);
    }

    #[test]
    fn test_ties_break_by_agent_id() {
        let mut bids = vec![
            Bid {
                agent: AgentId::default(),
                willingness_to_pay: 5.0,
            },
            Bid {
                agent: AgentId::default(),
                willingness_to_pay: 9.0,
            },
        ];
        rank_bids(&mut bids);
        assert_eq!(bids[0].willingness_to_pay, 9.0);

        let mut fx = Fixture::new();
        let first = fx.agent(1000.0, 150.0, (140.0, 160.0));
        let second = fx.agent(1000.0, 150.0, (140.0, 160.0));
        fx.factory(1, (100.0, 200.0));
        let trades = fx.run(0);
        let winner = trades.iter().find(|t| t.result.is_success()).unwrap();
        assert_eq!(winner.agent, first.min(second));
    }

    #[test]
    fn test_price_is_clipped_into_overlap() {
        let mut fx = Fixture::new();
        fx.agent(1000.0, 175.0, (120.0, 180.0));
        fx.factory(5, (100.0, 160.0));

        let trades = fx.run(0);
        assert_eq!(trades[0].result, TradeResult::Success { price: 160.0 });
    }

    #[test]
    fn test_cash_check_downgrades_to_failed() {
        let mut fx = Fixture::new();
        let agent = fx.agent(100.0, 150.0, (120.0, 180.0));
        let factory = fx.factory(5, (100.0, 200.0));

        let trades = fx.run(0);
        assert_eq!(trades[0].result, TradeResult::Failed(FailureCause::InsufficientCash));
        assert_eq!(fx.ledger.agent_cash(agent), 100.0, "rejected settlement must not move cash");
        assert_eq!(fx.ledger.remaining_stock(factory, GRAIN), 5);
    }

    #[test]
    fn test_non_overlapping_pair_is_not_matched() {
        let mut fx = Fixture::new();
        fx.agent(1000.0, 70.0, (50.0, 90.0));
        fx.factory(5, (100.0, 200.0));

        let trades = fx.run(0);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].result, TradeResult::NotMatched);
        assert_eq!(trades[0].relation, IntervalRelation::AgentBelowFactory);
    }

    #[test]
    fn test_second_line_for_same_product_is_deferred() {
        let mut fx = Fixture::new();
        let agent = fx.agent(1000.0, 150.0, (120.0, 180.0));
        fx.factory(5, (100.0, 200.0));
        fx.factory(5, (100.0, 200.0));

        let trades = fx.run(11);
        let results: Vec<_> = trades.iter().filter(|t| t.agent == agent).map(|t| t.result).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert_eq!(results[1], TradeResult::NotYet);
        assert_eq!(fx.ledger.agent(agent).unwrap().total_trades, 1);
    }

    #[test]
    fn test_broke_agents_and_empty_lines_are_skipped() {
        let mut fx = Fixture::new();
        fx.agent(0.0, 150.0, (120.0, 180.0));
        fx.factory(5, (100.0, 200.0));
        assert!(fx.run(0).is_empty(), "agent without cash should not be evaluated");

        let mut fx = Fixture::new();
        fx.agent(500.0, 150.0, (120.0, 180.0));
        fx.factory(0, (100.0, 200.0));
        assert!(fx.run(0).is_empty(), "line without stock should not be evaluated");
    }

    #[test]
    fn test_same_seed_same_allocation() {
        let build = || {
            let mut fx = Fixture::new();
            for i in 0..6 {
                fx.agent(1000.0, 150.0 + i as f64, (120.0, 180.0));
            }
            fx.factory(2, (100.0, 200.0));
            fx.factory(1, (140.0, 150.0));
            fx
        };
        let a: Vec<_> = build().run(42).into_iter().map(|t| (t.agent, t.result)).collect();
        let b: Vec<_> = build().run(42).into_iter().map(|t| (t.agent, t.result)).collect();
        assert_eq!(a, b);
    }
}
