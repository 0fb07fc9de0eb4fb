//! Market clearing and adaptive range negotiation.
//!
//! Agents hold a price range per product, factories hold a supply range per
//! line. Each round pairs them by interval relation, settles contested stock
//! through the ledger, then lets both sides move their ranges.

pub mod config;
pub mod entities;
pub mod error;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod matching;
pub mod negotiation;
pub mod parallel;
pub mod range;
pub mod scheduler;
pub mod setup;
pub mod types;
mod wasm;

pub use config::{FactoryAdjustment, IncomeConfig, SimConfig};
pub use entities::{Agent, Factory, Preference, Production, SupplyLine};
pub use error::{ConfigError, InsufficientResource, SimError, SimResult};
pub use events::{EventSink, NullSink, RoundEvent, Tee, VecSink};
pub use range::{PriceRange, RangeDelta, RangeModel};
pub use scheduler::{Market, MarketSnapshot, Phase, RoundReport, RunSummary, TerminationReason};
pub use setup::MarketSetup;
pub use types::*;
pub use wasm::Simulation;

#[cfg(feature = "instrument")]
pub use events::TracingSink;

/// The telemetry sink, re-exported so callers record runs without a second dependency.
#[cfg(feature = "instrument")]
pub use telemetry as instrument;
