use wasm_bindgen::prelude::*;

use crate::config::SimConfig;
use crate::events::{EventSink, RoundEvent, VecSink};
use crate::scheduler::{Market, MarketSnapshot};
use crate::setup::MarketSetup;

// ============================================================================
// WASM API - Simulation
// ============================================================================

#[wasm_bindgen]
pub struct Simulation {
    market: Market,
    /// Events since the last `drain_events` call.
    pending: VecSink,
}

impl Simulation {
    /// Build a simulation outside the JS boundary.
    pub fn from_parts(config: SimConfig, setup: &MarketSetup) -> Result<Self, crate::SimError> {
        Ok(Self {
            market: setup.build(config)?,
            pending: VecSink::new(),
        })
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    /// Run one round, sending events both to the pending buffer and to `extra`.
    fn step(&mut self, extra: &mut impl EventSink) -> Result<bool, crate::SimError> {
        let mut tee = crate::events::Tee(&mut self.pending, extra);
        let report = self.market.advance_round(&mut tee)?;
        Ok(report.termination.is_none())
    }

    pub fn take_events(&mut self) -> Vec<RoundEvent> {
        self.pending.take()
    }
}

#[wasm_bindgen]
impl Simulation {
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue, setup: JsValue) -> Result<Simulation, JsError> {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        let config: SimConfig = if config.is_undefined() || config.is_null() {
            SimConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)?
        };
        let setup: MarketSetup = serde_wasm_bindgen::from_value(setup)?;
        Ok(Self::from_parts(config, &setup)?)
    }

    /// Advance by one round. Returns false once the run has terminated.
    #[wasm_bindgen]
    pub fn advance_round(&mut self) -> Result<bool, JsError> {
        #[cfg(feature = "instrument")]
        let continues = self.step(&mut crate::events::TracingSink)?;
        #[cfg(not(feature = "instrument"))]
        let continues = self.step(&mut crate::events::NullSink)?;
        Ok(continues)
    }

    #[wasm_bindgen]
    pub fn get_round(&self) -> u64 {
        self.market.round()
    }

    #[wasm_bindgen]
    pub fn get_snapshot(&self) -> MarketSnapshot {
        self.market.snapshot()
    }

    /// All events recorded since the previous call, as an array of tagged objects.
    #[wasm_bindgen]
    pub fn drain_events(&mut self) -> Result<JsValue, JsError> {
        Ok(serde_wasm_bindgen::to_value(&self.take_events())?)
    }
}
