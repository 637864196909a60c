//! Error types for fake_quant

use thiserror::Error;

use crate::quant_info::{QuantizationMethod, QuantizationTarget, QuantizerID};

#[derive(Error, Debug)]
pub enum Error {
    /// A quantizer declaration violates the registry contract.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No quantizer registered for ({target}, {method}, {identifier})")]
    NotFound {
        target: QuantizationTarget,
        method: QuantizationMethod,
        identifier: QuantizerID,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
