use thiserror::Error;

use crate::types::ProductId;

/// Fatal errors. Either aborts the run with the offending entity and round named.
#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error("Invariant violated in round {round} by {entity}: {detail}")]
    InvariantViolation {
        round: u64,
        entity: String,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl SimError {
    pub fn invariant(round: u64, entity: impl Into<String>, detail: impl Into<String>) -> Self {
        SimError::InvariantViolation {
            round,
            entity: entity.into(),
            detail: detail.into(),
        }
    }
}

/// Rejected configuration or setup input. Raised before any round executes.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("{field} = {value} is out of range (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("{0} must not be empty")]
    Missing(&'static str),

    #[error("Product {0:?} is declared more than once")]
    DuplicateProduct(ProductId),

    #[error("{owner} references unknown product {product:?}")]
    UnknownProduct { owner: String, product: ProductId },

    #[error("{owner} has an invalid range [{lower}, {upper}] for product {product:?}")]
    InvalidRange {
        owner: String,
        product: ProductId,
        lower: f64,
        upper: f64,
    },

    #[error("{owner}: {detail}")]
    InvalidParticipant { owner: String, detail: String },
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// A settlement that would overdraw cash or stock. Recovered inside the round
/// by downgrading the trade to `Failed`; never surfaces from a round.
#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum InsufficientResource {
    #[error("Insufficient cash: required {required}, available {available}")]
    Cash { required: f64, available: f64 },

    #[error("No stock left for product {product:?}")]
    Stock { product: ProductId },
}

pub type SimResult<T> = Result<T, SimError>;
