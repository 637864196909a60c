//! Tags used to label quantizer implementations in the registry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tensor role a quantizer is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuantizationTarget {
    Weights,
    Activation,
}

/// Quantization scheme a quantizer declares support for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuantizationMethod {
    /// Symmetric with a power-of-two threshold
    PowerOfTwo,
    Symmetric,
    /// Asymmetric min/max range with a zero point
    Uniform,
    /// Look-up table over a power-of-two threshold
    LutPowerOfTwo,
    /// Look-up table over an arbitrary symmetric threshold
    LutSymmetric,
}

/// Capability set a registered quantizer fulfills.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuantizerID {
    /// Fixed parameters, inference only
    Inferable,
    /// Parameters updated during training
    Trainable,
}

impl fmt::Display for QuantizationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantizationTarget::Weights => write!(f, "WEIGHTS"),
            QuantizationTarget::Activation => write!(f, "ACTIVATION"),
        }
    }
}

impl fmt::Display for QuantizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuantizationMethod::PowerOfTwo => "POWER_OF_TWO",
            QuantizationMethod::Symmetric => "SYMMETRIC",
            QuantizationMethod::Uniform => "UNIFORM",
            QuantizationMethod::LutPowerOfTwo => "LUT_POWER_OF_TWO",
            QuantizationMethod::LutSymmetric => "LUT_SYMMETRIC",
        };
        f.write_str(name)
    }
}

impl fmt::Display for QuantizerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantizerID::Inferable => write!(f, "INFERABLE"),
            QuantizerID::Trainable => write!(f, "TRAINABLE"),
        }
    }
}
