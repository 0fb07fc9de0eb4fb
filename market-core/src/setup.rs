//! Initial participants of a run.
//!
//! A [`MarketSetup`] is plain data (usually JSON). [`MarketSetup::build`]
//! checks every participant and returns an owned [`Market`] ready for round 1.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::config::SimConfig;
use crate::entities::{Preference, Production, SupplyLine};
use crate::error::{ConfigError, SimError};
use crate::range::PriceRange;
use crate::scheduler::Market;
use crate::types::{Price, Product, ProductId};

fn default_durability() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct PreferenceSetup {
    pub product: ProductId,
    pub price: Price,
    pub elasticity: f64,
    pub range: PriceRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct AgentSetup {
    pub name: String,
    pub cash: f64,
    pub preferences: Vec<PreferenceSetup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct LineSetup {
    pub product: ProductId,
    pub stock: u32,
    pub range: PriceRange,
    pub unit_cost: Price,
    /// Share of unsold stock that survives the round.
    #[serde(default = "default_durability")]
    pub durability: f64,
    #[serde(default)]
    pub production: Option<Production>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct FactorySetup {
    pub name: String,
    pub cash: f64,
    pub lines: Vec<LineSetup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct MarketSetup {
    pub products: Vec<Product>,
    pub agents: Vec<AgentSetup>,
    pub factories: Vec<FactorySetup>,
}

fn check_range(
    owner: &str,
    product: ProductId,
    range: &PriceRange,
) -> Result<PriceRange, ConfigError> {
    PriceRange::try_new(range.lower, range.upper).ok_or_else(|| ConfigError::InvalidRange {
        owner: owner.to_string(),
        product,
        lower: range.lower,
        upper: range.upper,
    })
}

fn check_cash(owner: &str, cash: f64) -> Result<(), ConfigError> {
    if cash.is_finite() && cash >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParticipant {
            owner: owner.to_string(),
            detail: format!("cash {cash} must be finite and non-negative"),
        })
    }
}

fn invalid(owner: &str, detail: String) -> ConfigError {
    ConfigError::InvalidParticipant {
        owner: owner.to_string(),
        detail,
    }
}

impl MarketSetup {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check every participant against the declared products.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut known = BTreeSet::new();
        for product in &self.products {
            if !known.insert(product.id) {
                return Err(ConfigError::DuplicateProduct(product.id));
            }
        }

        for agent in &self.agents {
            let owner = format!("agent {}", agent.name);
            check_cash(&owner, agent.cash)?;
            if agent.preferences.is_empty() {
                return Err(invalid(&owner, "has no preferences".to_string()));
            }
            let mut seen = BTreeSet::new();
            for pref in &agent.preferences {
                if !known.contains(&pref.product) {
                    return Err(ConfigError::UnknownProduct {
                        owner,
                        product: pref.product,
                    });
                }
                if !seen.insert(pref.product) {
                    return Err(invalid(
                        &owner,
                        format!("declares product {} twice", pref.product.0),
                    ));
                }
                check_range(&owner, pref.product, &pref.range)?;
                if !pref.price.is_finite() || pref.price < 0.0 {
                    return Err(invalid(&owner, format!("price {} is not a valid price", pref.price)));
                }
                if !pref.elasticity.is_finite() || pref.elasticity <= 0.0 || pref.elasticity > 1.0 {
                    return Err(invalid(
                        &owner,
                        format!("elasticity {} must lie in (0, 1]", pref.elasticity),
                    ));
                }
            }
        }

        for factory in &self.factories {
            let owner = format!("factory {}", factory.name);
            check_cash(&owner, factory.cash)?;
            let mut seen = BTreeSet::new();
            for line in &factory.lines {
                if !known.contains(&line.product) {
                    return Err(ConfigError::UnknownProduct {
                        owner,
                        product: line.product,
                    });
                }
                if !seen.insert(line.product) {
                    return Err(invalid(
                        &owner,
                        format!("has two lines for product {}", line.product.0),
                    ));
                }
                check_range(&owner, line.product, &line.range)?;
                if !line.unit_cost.is_finite() || line.unit_cost <= 0.0 {
                    return Err(invalid(
                        &owner,
                        format!("unit cost {} must be positive", line.unit_cost),
                    ));
                }
                if !(0.0..=1.0).contains(&line.durability) {
                    return Err(invalid(
                        &owner,
                        format!("durability {} must lie in [0, 1]", line.durability),
                    ));
                }
                if let Some(production) = line.production {
                    if !(0.0..=1.0).contains(&production.risk_appetite) {
                        return Err(invalid(
                            &owner,
                            format!(
                                "risk appetite {} must lie in [0, 1]",
                                production.risk_appetite
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate and build the market. Participants are inserted in
    /// declaration order, so ids (and the tie-break) follow that order.
    pub fn build(&self, config: SimConfig) -> Result<Market, SimError> {
        self.validate()?;
        let mut market = Market::new(config)?;

        for product in &self.products {
            market.add_product(product.clone());
        }
        for agent in &self.agents {
            market.add_agent(
                agent.name.clone(),
                agent.cash,
                agent.preferences.iter().map(|p| {
                    (p.product, Preference::new(p.price, p.elasticity, p.range))
                }),
            );
        }
        for factory in &self.factories {
            let id = market.add_factory(factory.name.clone(), factory.cash);
            for line in &factory.lines {
                let mut supply = SupplyLine::new(line.range, line.unit_cost)
                    .with_durability(line.durability);
                if let Some(production) = line.production {
                    supply = supply.with_production(production);
                }
                market.add_line(id, line.product, supply, line.stock);
            }
        }
        Ok(market)
    }
}
