//! Fake quantization of weights and activations.
//!
//! Every quantizer derives its scale (and, for uniform quantization, its zero
//! point) once at construction and is immutable afterwards. `apply` maps a
//! tensor onto the quantization grid and back to `f32`:
//!
//! ```text
//! q   = clip(round(x / scale) + zero_point, quant_min, quant_max)
//! out = (q - zero_point) * scale
//! ```

pub mod affine;
#[cfg(feature = "lut")]
pub mod lut;
pub mod range;
pub mod symmetric;
pub mod uniform;

use std::borrow::Cow;
use std::fmt;

use ndarray::{ArrayD, Axis};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::tensors::resolve_axis;

/// Ordered mapping of constructor parameter name to value.
pub type QuantizerConfig = serde_json::Map<String, Value>;

/// Capability every concrete quantizer implements.
///
/// Implementations must not mutate state in `apply`, so one instance can be
/// shared across threads.
pub trait InferableQuantizer: fmt::Debug + Send + Sync {
    fn num_bits(&self) -> u32;

    /// Fake quantize `input`. The output has the shape of the input.
    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>>;

    /// Constructor parameters needed to rebuild an identical quantizer.
    fn describe(&self) -> QuantizerConfig;
}

/// Whether parameters are shared by the whole tensor or indexed by channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelLayout {
    /// One parameter set for the whole tensor. `axis` is kept as given so
    /// `describe()` reports it back; it plays no part in the transform.
    PerTensor { axis: Option<isize> },
    /// One parameter set per index along `axis`; negative axes count from the end.
    PerChannel { axis: isize },
}

impl ChannelLayout {
    pub const fn per_tensor() -> Self {
        ChannelLayout::PerTensor { axis: None }
    }

    pub fn new(per_channel: bool, channel_axis: Option<isize>) -> Result<Self> {
        match (per_channel, channel_axis) {
            (true, Some(axis)) => Ok(ChannelLayout::PerChannel { axis }),
            (true, None) => Err(Error::InvalidParameter(
                "channel_axis is required for per-channel quantization".to_string(),
            )),
            (false, Some(axis)) => {
                warn!(axis, "channel_axis has no effect on per-tensor quantization");
                Ok(ChannelLayout::PerTensor { axis: Some(axis) })
            }
            (false, None) => Ok(ChannelLayout::per_tensor()),
        }
    }

    pub fn is_per_channel(&self) -> bool {
        matches!(self, ChannelLayout::PerChannel { .. })
    }

    /// The axis as configured, including one given to a per-tensor layout.
    pub fn channel_axis(&self) -> Option<isize> {
        match self {
            ChannelLayout::PerTensor { axis } => *axis,
            ChannelLayout::PerChannel { axis } => Some(*axis),
        }
    }

    /// Per-tensor quantization takes exactly one value per parameter.
    pub(crate) fn check_param_len(&self, name: &str, len: usize) -> Result<()> {
        match self {
            ChannelLayout::PerTensor { .. } if len != 1 => Err(Error::InvalidParameter(format!(
                "per-tensor quantization expects a single {name} value, got {len}"
            ))),
            _ if len == 0 => Err(Error::InvalidParameter(format!("{name} is empty"))),
            _ => Ok(()),
        }
    }

    /// Resolve the channel axis against `input` and return it with its extent.
    pub(crate) fn resolve(&self, input: &ArrayD<f32>) -> Result<Option<(usize, usize)>> {
        match self {
            ChannelLayout::PerTensor { .. } => Ok(None),
            ChannelLayout::PerChannel { axis } => {
                let axis = resolve_axis(*axis, input.ndim())?;
                Ok(Some((axis, input.len_of(Axis(axis)))))
            }
        }
    }
}

/// Inclusive range of integer codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuantizedDomain {
    pub min: i32,
    pub max: i32,
}

impl QuantizedDomain {
    /// `[-2^(n-1), 2^(n-1) - 1]` when signed, `[0, 2^n - 1]` otherwise.
    pub fn new(num_bits: u32, signed: bool) -> Result<Self> {
        validate_num_bits(num_bits)?;
        let domain = if signed {
            let half = 1i64 << (num_bits - 1);
            QuantizedDomain {
                min: -half as i32,
                max: (half - 1) as i32,
            }
        } else {
            QuantizedDomain {
                min: 0,
                max: ((1i64 << num_bits) - 1) as i32,
            }
        };
        Ok(domain)
    }

    pub fn unsigned(num_bits: u32) -> Result<Self> {
        Self::new(num_bits, false)
    }
}

pub fn validate_num_bits(num_bits: u32) -> Result<()> {
    if num_bits == 0 || num_bits > 31 {
        return Err(Error::InvalidParameter(format!(
            "num_bits must be in 1..=31, got {num_bits}"
        )));
    }
    Ok(())
}

/// Reject empty or non-finite parameter arrays.
pub(crate) fn validate_finite(name: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::InvalidParameter(format!("{name} is empty")));
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(Error::InvalidParameter(format!(
            "{name} must be finite, got {bad}"
        )));
    }
    Ok(())
}

/// Repeat a single-element parameter across `channels`, or check it already
/// has one value per channel.
pub(crate) fn broadcast_channels<'a, T: Copy>(
    name: &str,
    values: &'a [T],
    channels: usize,
) -> Result<Cow<'a, [T]>> {
    match values {
        [single] if channels != 1 => Ok(Cow::Owned(vec![*single; channels])),
        _ if values.len() == channels => Ok(Cow::Borrowed(values)),
        _ => Err(Error::InvalidParameter(format!(
            "{name} has {} values but the input has {channels} channels",
            values.len()
        ))),
    }
}

/// Parse a configuration mapping into a typed parameter struct.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &QuantizerConfig) -> Result<T> {
    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|e| Error::InvalidParameter(e.to_string()))
}

/// Apply the affine fake-quantization map under `layout`.
pub(crate) fn apply_affine(
    layout: ChannelLayout,
    scales: &[f32],
    zero_points: &[i32],
    domain: QuantizedDomain,
    input: &ArrayD<f32>,
) -> Result<ArrayD<f32>> {
    match layout.resolve(input)? {
        None => match (scales, zero_points) {
            ([scale], [zero_point]) => Ok(affine::fake_quantize_per_tensor_affine(
                input,
                *scale,
                *zero_point,
                domain,
            )),
            _ => Err(Error::InvalidParameter(format!(
                "per-tensor quantization expects one scale and zero point, got {} and {}",
                scales.len(),
                zero_points.len()
            ))),
        },
        Some((axis, channels)) => {
            let scales = broadcast_channels("scale", scales, channels)?;
            let zero_points = broadcast_channels("zero_point", zero_points, channels)?;
            affine::fake_quantize_per_channel_affine(input, &scales, &zero_points, axis, domain)
        }
    }
}
