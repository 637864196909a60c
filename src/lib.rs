//! # fake_quant: inference-time fake quantization
//!
//! Derives scale, zero point and clipping range from thresholds or min/max
//! ranges, applies the quantize-dequantize transform per tensor or per
//! channel, and keeps a registry that maps
//! `(QuantizationTarget, QuantizationMethod, QuantizerID)` to the quantizer
//! implementation able to rebuild a serialized quantizer.
//!
//! ## Modules
//!
//! - **quant_info**: target, method and identifier tags
//! - **quantization**: the quantizer contract, range fixing, parameter
//!   derivation and the affine transform
//! - **registry**: declaration validation, lookup and record restore
//! - **tensors**: tensor helpers (axis resolution, ranges, error metrics)

pub mod error;
pub mod quant_info;
pub mod quantization;
pub mod registry;
pub mod tensors;

pub use error::{Error, Result};
pub use quant_info::{QuantizationMethod, QuantizationTarget, QuantizerID};
pub use quantization::{ChannelLayout, InferableQuantizer, QuantizedDomain, QuantizerConfig};
pub use registry::{mark_quantizer, MarkedQuantizer, QuantizerRecord, QuantizerRegistry};
