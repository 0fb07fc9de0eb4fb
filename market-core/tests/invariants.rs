//! Invariant checks over seeded random markets.
//!
//! Every round of every run is checked for range ordering, non-negative
//! balances, stock conservation, event density and terminal removal.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use market_core::{
    FactoryAdjustment, IncomeConfig, KeyToU64, Market, Preference, PriceRange, Product,
    ProductCategory, ProductId, Production, RoundEvent, SimConfig, SupplyLine, VecSink,
};

const PRODUCTS: u32 = 3;

// === FIXTURES ===

fn random_range(rng: &mut StdRng, lo: f64, hi: f64) -> PriceRange {
    let a = rng.random_range(lo..hi);
    let b = rng.random_range(lo..hi);
    PriceRange::new(a.min(b), a.max(b))
}

/// A market with a few products, agents and factories drawn from `seed`.
fn random_market(seed: u64, config: SimConfig) -> Market {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut market = Market::new(config.with_seed(seed)).expect("valid config");

    for p in 1..=PRODUCTS {
        market.add_product(Product {
            id: ProductId(p),
            name: format!("product_{p}"),
            category: ProductCategory::Other,
        });
    }

    for i in 0..rng.random_range(3..12) {
        let chosen: Vec<u32> = (1..=PRODUCTS).filter(|_| rng.random_bool(0.7)).collect();
        let prefs: Vec<_> = chosen
            .into_iter()
            .map(|p| {
                let range = random_range(&mut rng, 20.0, 220.0);
                let price = rng.random_range(range.lower..=range.upper);
                let elasticity = rng.random_range(0.05..=1.0);
                (ProductId(p), Preference::new(price, elasticity, range))
            })
            .collect();
        let cash = rng.random_range(50.0..2000.0);
        market.add_agent(format!("agent_{i}"), cash, prefs);
    }

    for i in 0..rng.random_range(1..5) {
        let id = market.add_factory(format!("factory_{i}"), rng.random_range(0.0..500.0));
        for p in 1..=PRODUCTS {
            if !rng.random_bool(0.6) {
                continue;
            }
            let range = random_range(&mut rng, 40.0, 260.0);
            let unit_cost = rng.random_range(5.0..40.0);
            let mut line = SupplyLine::new(range, unit_cost)
                .with_durability(rng.random_range(0.5..=1.0));
            if rng.random_bool(0.5) {
                line = line.with_production(Production {
                    risk_appetite: rng.random_range(0.1..=0.9),
                });
            }
            market.add_line(id, ProductId(p), line, rng.random_range(0..20));
        }
    }
    market
}

fn config() -> SimConfig {
    SimConfig {
        max_rounds: 40,
        income: Some(IncomeConfig {
            min: 0.0,
            max: 30.0,
        }),
        ..SimConfig::default()
    }
}

// === CHECKS ===

fn check_state(market: &Market) {
    let round = market.round();
    for (id, agent) in market.agents() {
        let cash = market.ledger().agent_cash(id);
        assert!(cash >= 0.0, "round {round}: agent {} cash {cash}", agent.name);
        for (product, pref) in &agent.preferences {
            let r = pref.current_range;
            assert!(
                r.lower >= 0.0 && r.lower <= r.upper,
                "round {round}: agent {} product {product:?} range {r:?}",
                agent.name
            );
        }
    }
    for (id, factory) in market.factories() {
        let account = market.ledger().factory(id).expect("factory account");
        assert!(account.cash >= 0.0, "round {round}: factory {} cash", factory.name);
        for (product, line) in &factory.lines {
            let r = line.supply_range;
            assert!(r.lower >= 0.0 && r.lower <= r.upper, "round {round}: supply range {r:?}");
            let stock = market.ledger().line(id, *product).expect("stock account");
            assert!(
                stock.units_sold + stock.spoiled + stock.remaining_stock == stock.initial_stock,
                "round {round}: factory {} product {product:?} stock does not balance: {stock:?}",
                factory.name
            );
        }
    }
}

fn line_count(market: &Market) -> usize {
    market.factories().values().map(|f| f.lines.len()).sum()
}

/// Run one seeded market to termination, checking every round.
fn run_checked(seed: u64, config: SimConfig) {
    let mut market = random_market(seed, config);
    let mut removed: BTreeSet<u64> = BTreeSet::new();

    loop {
        let active_before: BTreeSet<u64> = market.agents().keys().map(|id| id.to_u64()).collect();
        let mut sink = VecSink::new();
        let report = market.advance_round(&mut sink).expect("no invariant violation");
        if !report.executed {
            break;
        }
        check_state(&market);

        // Removed agents never come back
        for trade in sink.trades() {
            assert!(active_before.contains(&trade.agent_id), "seed {seed}: unknown trader");
            assert!(!removed.contains(&trade.agent_id), "seed {seed}: removed agent traded");
        }
        removed.extend(sink.removals().map(|r| r.agent_id));

        // Settled units never exceed stock on hand when the round opened
        let mut sold: HashMap<(u64, u64), u32> = HashMap::new();
        for trade in sink.trades().filter(|t| t.trade_result == "Success") {
            *sold.entry((trade.factory_id, trade.product_id)).or_default() += 1;
        }
        for end in sink.events.iter().filter_map(|e| match e {
            RoundEvent::FactoryEndOfRound(end) => Some(end),
            _ => None,
        }) {
            let units = sold.get(&(end.factory_id, end.product_id)).copied().unwrap_or(0);
            assert_eq!(units as u64, end.units_sold, "seed {seed}: sold rows vs ledger");
            assert!(units as u64 <= end.initial_stock, "seed {seed}: oversold line");
        }

        // One success at most per agent and product
        let mut served = BTreeSet::new();
        for trade in sink.trades().filter(|t| t.trade_result == "Success") {
            assert!(
                served.insert((trade.agent_id, trade.product_id)),
                "seed {seed}: agent bought twice in one round"
            );
        }

        // Density
        assert_eq!(sink.count("agent_cash_log"), market.agents().len());
        assert_eq!(sink.count("factory_end_of_round_log"), line_count(&market));
        assert_eq!(sink.count("factory_range_optimization_log"), line_count(&market));
        assert!(sink.events.iter().all(|e| e.round() == report.round));

        if report.termination.is_some() {
            break;
        }
    }
    assert!(market.is_terminated());
}

// === TESTS ===

#[test]
fn invariant_random_markets_round_end() {
    for seed in 0..25 {
        run_checked(seed, config());
    }
}

#[test]
fn invariant_random_markets_per_trade() {
    for seed in 100..120 {
        run_checked(
            seed,
            SimConfig {
                factory_adjustment: FactoryAdjustment::PerTrade,
                ..config()
            },
        );
    }
}

#[test]
fn invariant_random_markets_sequential() {
    for seed in 200..210 {
        run_checked(
            seed,
            SimConfig {
                force_sequential: true,
                cash_floor: 25.0,
                ..config()
            },
        );
    }
}

#[test]
fn invariant_same_seed_same_run() {
    let run = |seed| {
        let mut market = random_market(seed, config());
        let mut sink = VecSink::new();
        market
            .run(&mut sink, &std::sync::atomic::AtomicBool::new(false))
            .expect("run should finish");
        sink.trades()
            .map(|t| (t.round, t.agent_id, t.factory_id, t.product_id, t.trade_result.clone(), t.price))
            .collect::<Vec<_>>()
    };
    for seed in [3, 17, 42] {
        assert_eq!(run(seed), run(seed), "seed {seed} is not reproducible");
    }
}
