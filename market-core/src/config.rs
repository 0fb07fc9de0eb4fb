// Per-task tunables, immutable once a market is built

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::ConfigError;

// === DEFAULTS ===

pub const DEFAULT_MAX_ROUNDS: u64 = 8000;
pub const DEFAULT_SHRINK_FACTOR: f64 = 0.9;
pub const DEFAULT_EXPAND_STEP: f64 = 0.1;
/// Floor on a range's width as a share of its center price.
pub const DEFAULT_MIN_WIDTH_RATIO: f64 = 0.05;
pub const DEFAULT_SELLTHROUGH_HIGH: f64 = 0.8;
pub const DEFAULT_SELLTHROUGH_LOW: f64 = 0.3;
pub const DEFAULT_OPTIMIZATION_STEP: f64 = 0.05;
pub const DEFAULT_STAGNATION_ROUNDS: u32 = 10;
pub const DEFAULT_PER_TRADE_STEP: f64 = 0.01;
pub const DEFAULT_MAX_IDLE_ROUNDS: u32 = 20;

/// When factories move their supply ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum FactoryAdjustment {
    /// Once per line at round end, driven by sell-through.
    #[default]
    RoundEnd,
    /// Replays each of the round's trades on the line at round end.
    PerTrade,
}

/// Per-round cash grant to every active agent, drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct IncomeConfig {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub task_id: String,
    pub seed: u64,
    pub max_rounds: u64,

    // Range negotiation
    /// Success-side width multiplier at elasticity 0.5.
    pub shrink_factor: f64,
    /// Failure-side widening as a share of the current width.
    pub expand_step: f64,
    pub min_width_ratio: f64,

    // Factory optimization
    pub sellthrough_high: f64,
    pub sellthrough_low: f64,
    pub optimization_step: f64,
    pub factory_adjustment: FactoryAdjustment,
    pub per_trade_step: f64,

    // Removal
    pub cash_floor: f64,
    pub stagnation_rounds: u32,

    pub income: Option<IncomeConfig>,
    /// Stop after this many consecutive rounds without a successful trade.
    pub max_idle_rounds: Option<u32>,
    /// Evaluate match groups on the calling thread even with `parallel` enabled.
    pub force_sequential: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            task_id: "task".to_string(),
            seed: 0,
            max_rounds: DEFAULT_MAX_ROUNDS,
            shrink_factor: DEFAULT_SHRINK_FACTOR,
            expand_step: DEFAULT_EXPAND_STEP,
            min_width_ratio: DEFAULT_MIN_WIDTH_RATIO,
            sellthrough_high: DEFAULT_SELLTHROUGH_HIGH,
            sellthrough_low: DEFAULT_SELLTHROUGH_LOW,
            optimization_step: DEFAULT_OPTIMIZATION_STEP,
            factory_adjustment: FactoryAdjustment::RoundEnd,
            per_trade_step: DEFAULT_PER_TRADE_STEP,
            cash_floor: 0.0,
            stagnation_rounds: DEFAULT_STAGNATION_ROUNDS,
            income: None,
            max_idle_rounds: Some(DEFAULT_MAX_IDLE_ROUNDS),
            force_sequential: false,
        }
    }
}

fn check(
    field: &'static str,
    value: f64,
    ok: bool,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected,
        })
    }
}

impl SimConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task_id.trim().is_empty() {
            return Err(ConfigError::Missing("task_id"));
        }
        let rounds = self.max_rounds as f64;
        check("max_rounds", rounds, self.max_rounds >= 1, ">= 1")?;

        let s = self.shrink_factor;
        check("shrink_factor", s, s > 0.0 && s < 1.0, "(0, 1)")?;
        let e = self.expand_step;
        check("expand_step", e, e > 0.0 && e <= 1.0, "(0, 1]")?;
        let w = self.min_width_ratio;
        check("min_width_ratio", w, (0.0..1.0).contains(&w), "[0, 1)")?;

        let (low, high) = (self.sellthrough_low, self.sellthrough_high);
        check("sellthrough_low", low, (0.0..1.0).contains(&low), "[0, 1)")?;
        check("sellthrough_high", high, high > low && high <= 1.0, "(sellthrough_low, 1]")?;
        let o = self.optimization_step;
        check("optimization_step", o, o > 0.0 && o <= 1.0, "(0, 1]")?;
        let p = self.per_trade_step;
        check("per_trade_step", p, p > 0.0 && p < 1.0, "(0, 1)")?;

        check("cash_floor", self.cash_floor, self.cash_floor >= 0.0, ">= 0")?;
        let stag = self.stagnation_rounds as f64;
        check("stagnation_rounds", stag, self.stagnation_rounds >= 1, ">= 1")?;

        if let Some(income) = self.income {
            check("income.min", income.min, income.min >= 0.0, ">= 0")?;
            check("income.max", income.max, income.max >= income.min, ">= income.min")?;
        }
        if let Some(idle) = self.max_idle_rounds {
            check("max_idle_rounds", idle as f64, idle >= 1, ">= 1")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(SimConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = SimConfig::from_json(r#"{"task_id": "t-1", "shrink_factor": 0.5}"#).unwrap();
        assert_eq!(config.task_id, "t-1");
        assert_eq!(config.shrink_factor, 0.5);
        assert_eq!(config.stagnation_rounds, DEFAULT_STAGNATION_ROUNDS);
        assert_eq!(config.factory_adjustment, FactoryAdjustment::RoundEnd);
    }

    #[test]
    fn test_from_json_parses_enum_and_income() {
        let config = SimConfig::from_json(
            r#"{"factory_adjustment": "per_trade", "income": {"min": 800.0, "max": 1200.0}}"#,
        )
        .unwrap();
        assert_eq!(config.factory_adjustment, FactoryAdjustment::PerTrade);
        assert_eq!(config.income, Some(IncomeConfig { min: 800.0, max: 1200.0 }));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = SimConfig::from_json(r#"{"shrink": 0.5}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn test_out_of_range_names_the_field() {
        let config = SimConfig {
            shrink_factor: 1.5,
            ..SimConfig::default()
        };
        match config.validate() {
            Err(ConfigError::OutOfRange { field, value, .. }) => {
                assert_eq!(field, "shrink_factor");
                assert_eq!(value, 1.5);
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn test_inverted_sellthrough_band_is_rejected() {
        let config = SimConfig {
            sellthrough_low: 0.9,
            sellthrough_high: 0.5,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_task_id_is_rejected() {
        let config = SimConfig::default().with_task_id("  ");
        assert_eq!(config.validate(), Err(ConfigError::Missing("task_id")));
    }
}
