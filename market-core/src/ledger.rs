//! Cash and stock ledger.
//!
//! Owns every balance in the market. `settle` is the only path that moves cash
//! between an agent and a factory, and it checks both sides before touching
//! either, so a rejected settlement leaves no trace.

use std::collections::BTreeMap;

use slotmap::SecondaryMap;

use crate::error::{InsufficientResource, SimError, SimResult};
use crate::types::{AgentId, FactoryId, KeyToU64, Price, ProductId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentAccount {
    pub cash: f64,
    pub total_trades: u64,
    pub trades_this_round: u32,
    /// Consecutive completed rounds without a successful trade.
    pub idle_rounds: u32,
}

/// Stock and per-round flow counters for one factory line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockAccount {
    /// Stock available when the round opened.
    pub initial_stock: u32,
    pub remaining_stock: u32,
    pub produced: u32,
    pub units_sold: u32,
    pub spoiled: u32,
    pub revenue: f64,
    pub production_cost: f64,
}

impl StockAccount {
    pub fn new(stock: u32) -> Self {
        Self {
            initial_stock: stock,
            remaining_stock: stock,
            ..Self::default()
        }
    }

    /// Share of the round's opening stock that sold.
    pub fn sell_through(&self) -> f64 {
        if self.initial_stock == 0 {
            0.0
        } else {
            self.units_sold as f64 / self.initial_stock as f64
        }
    }

    pub fn profit(&self, unit_cost: Price) -> f64 {
        self.revenue - (self.units_sold + self.spoiled) as f64 * unit_cost
    }

    fn open_round(&mut self) {
        self.initial_stock = self.remaining_stock;
        self.produced = 0;
        self.units_sold = 0;
        self.spoiled = 0;
        self.revenue = 0.0;
        self.production_cost = 0.0;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactoryAccount {
    pub cash: f64,
    pub lines: BTreeMap<ProductId, StockAccount>,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    agents: SecondaryMap<AgentId, AgentAccount>,
    factories: SecondaryMap<FactoryId, FactoryAccount>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // === Accounts ===

    pub fn open_agent(&mut self, id: AgentId, cash: f64) {
        self.agents.insert(
            id,
            AgentAccount {
                cash,
                ..AgentAccount::default()
            },
        );
    }

    pub fn open_factory(&mut self, id: FactoryId, cash: f64) {
        self.factories.insert(
            id,
            FactoryAccount {
                cash,
                lines: BTreeMap::new(),
            },
        );
    }

    pub fn open_line(&mut self, id: FactoryId, product: ProductId, stock: u32) {
        if let Some(account) = self.factories.get_mut(id) {
            account.lines.insert(product, StockAccount::new(stock));
        }
    }

    pub fn close_agent(&mut self, id: AgentId) -> Option<AgentAccount> {
        self.agents.remove(id)
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentAccount> {
        self.agents.get(id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut AgentAccount> {
        self.agents.get_mut(id)
    }

    pub fn factory(&self, id: FactoryId) -> Option<&FactoryAccount> {
        self.factories.get(id)
    }

    pub fn line(&self, id: FactoryId, product: ProductId) -> Option<&StockAccount> {
        self.factories.get(id).and_then(|f| f.lines.get(&product))
    }

    pub fn agent_cash(&self, id: AgentId) -> f64 {
        self.agents.get(id).map_or(0.0, |a| a.cash)
    }

    pub fn remaining_stock(&self, id: FactoryId, product: ProductId) -> u32 {
        self.line(id, product).map_or(0, |l| l.remaining_stock)
    }

    // === Round bookkeeping ===

    /// Reset per-round counters. Opening stock becomes whatever is left.
    pub fn open_round(&mut self) {
        for account in self.agents.values_mut() {
            account.trades_this_round = 0;
        }
        for account in self.factories.values_mut() {
            for line in account.lines.values_mut() {
                line.open_round();
            }
        }
    }

    /// Advance idle counters once a round's trading is done.
    pub fn close_round(&mut self) {
        for account in self.agents.values_mut() {
            if account.trades_this_round == 0 {
                account.idle_rounds += 1;
            } else {
                account.idle_rounds = 0;
            }
        }
    }

    pub fn credit_agent(&mut self, id: AgentId, amount: f64) {
        if let Some(account) = self.agents.get_mut(id) {
            account.cash += amount.max(0.0);
        }
    }

    /// Produce up to `units` at `unit_cost` each, never spending more cash than
    /// the factory holds. Returns the units actually produced.
    pub fn produce(&mut self, id: FactoryId, product: ProductId, units: u32, unit_cost: Price) -> u32 {
        let Some(account) = self.factories.get_mut(id) else {
            return 0;
        };
        let affordable = if unit_cost > 0.0 {
            (account.cash / unit_cost).floor().min(u32::MAX as f64) as u32
        } else {
            units
        };
        let mut units = units.min(affordable);
        // floor(cash / cost) * cost can still exceed cash by a rounding error
        while units > 0 && units as f64 * unit_cost > account.cash {
            units -= 1;
        }
        let Some(line) = account.lines.get_mut(&product) else {
            return 0;
        };
        let cost = units as f64 * unit_cost;
        account.cash -= cost;
        line.remaining_stock += units;
        line.initial_stock += units;
        line.produced += units;
        line.production_cost += cost;
        units
    }

    /// Remove `units` of unsold stock. Returns the units actually removed.
    pub fn spoil(&mut self, id: FactoryId, product: ProductId, units: u32) -> u32 {
        let Some(line) = self
            .factories
            .get_mut(id)
            .and_then(|f| f.lines.get_mut(&product))
        else {
            return 0;
        };
        let units = units.min(line.remaining_stock);
        line.remaining_stock -= units;
        line.spoiled += units;
        units
    }

    // === Settlement ===

    /// Move one unit from the factory line to the agent at `price`.
    ///
    /// Both sides are checked first; on error nothing has changed.
    pub fn settle(
        &mut self,
        agent: AgentId,
        factory: FactoryId,
        product: ProductId,
        price: Price,
    ) -> Result<(), InsufficientResource> {
        let available = self.agent_cash(agent);
        if price.is_nan() || price > available {
            return Err(InsufficientResource::Cash {
                required: price,
                available,
            });
        }
        if self.remaining_stock(factory, product) == 0 {
            return Err(InsufficientResource::Stock { product });
        }

        let (Some(buyer), Some(seller)) = (self.agents.get_mut(agent), self.factories.get_mut(factory))
        else {
            return Err(InsufficientResource::Stock { product });
        };
        let Some(line) = seller.lines.get_mut(&product) else {
            return Err(InsufficientResource::Stock { product });
        };

        buyer.cash -= price;
        buyer.total_trades += 1;
        buyer.trades_this_round += 1;
        seller.cash += price;
        line.remaining_stock -= 1;
        line.units_sold += 1;
        line.revenue += price;
        Ok(())
    }

    // === Invariants ===

    /// Check every balance. The first violation found aborts the run.
    pub fn verify(&self, round: u64) -> SimResult<()> {
        for (id, account) in &self.agents {
            if !account.cash.is_finite() || account.cash < 0.0 {
                return Err(SimError::invariant(
                    round,
                    format!("agent {}", id.to_u64()),
                    format!("cash is {}", account.cash),
                ));
            }
        }
        for (id, account) in &self.factories {
            if !account.cash.is_finite() || account.cash < 0.0 {
                return Err(SimError::invariant(
                    round,
                    format!("factory {}", id.to_u64()),
                    format!("cash is {}", account.cash),
                ));
            }
            for (product, line) in &account.lines {
                if line.remaining_stock > line.initial_stock {
                    return Err(SimError::invariant(
                        round,
                        format!("factory {} product {}", id.to_u64(), product.0),
                        format!(
                            "remaining stock {} exceeds initial stock {}",
                            line.remaining_stock, line.initial_stock
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
