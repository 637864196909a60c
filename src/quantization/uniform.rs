//! Uniform (asymmetric) quantizers over a `[min_range, max_range]` interval.
//!
//! Codes span `[0, 2^n - 1]`; the zero point is the code that represents
//! the real value 0.

use ndarray::ArrayD;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::range::fix_range_to_include_zero;
use super::{
    apply_affine, parse_config, validate_finite, ChannelLayout, InferableQuantizer,
    QuantizedDomain, QuantizerConfig,
};
use crate::error::{Error, Result};
use crate::quant_info::{QuantizationMethod, QuantizationTarget, QuantizerID};
use crate::registry::{MarkedQuantizer, ParamKind, ParamSpec};

/// Scale and zero point per element of the range arrays.
///
/// The range is fixed to include zero first; the result must not be empty.
pub fn uniform_scales_and_zero_points(
    min_range: &[f64],
    max_range: &[f64],
    num_bits: u32,
) -> Result<(Vec<f32>, Vec<i32>)> {
    let domain = QuantizedDomain::unsigned(num_bits)?;
    let (min_range, max_range) = fix_range_to_include_zero(min_range, max_range)?;
    let levels = domain.max as f64;

    let mut scales = Vec::with_capacity(min_range.len());
    let mut zero_points = Vec::with_capacity(min_range.len());
    for (min, max) in min_range.into_iter().zip(max_range) {
        if max <= min {
            return Err(Error::InvalidParameter(format!(
                "quantization range [{min}, {max}] is empty"
            )));
        }
        let scale = (max - min) / levels;
        let zero_point = (-min / scale).round().clamp(0.0, levels) as i32;
        scales.push(scale as f32);
        zero_points.push(zero_point);
    }

    Ok((scales, zero_points))
}

#[derive(Clone, Debug)]
pub struct UniformQuantizer {
    num_bits: u32,
    min_range: Vec<f64>,
    max_range: Vec<f64>,
    layout: ChannelLayout,
    domain: QuantizedDomain,
    scales: Vec<f32>,
    zero_points: Vec<i32>,
}

impl UniformQuantizer {
    pub fn new(
        num_bits: u32,
        min_range: Vec<f64>,
        max_range: Vec<f64>,
        layout: ChannelLayout,
    ) -> Result<Self> {
        validate_finite("min_range", &min_range)?;
        validate_finite("max_range", &max_range)?;
        layout.check_param_len("min_range", min_range.len())?;
        layout.check_param_len("max_range", max_range.len())?;

        let (scales, zero_points) = uniform_scales_and_zero_points(&min_range, &max_range, num_bits)?;
        debug!(
            num_bits,
            channels = scales.len(),
            per_channel = layout.is_per_channel(),
            "uniform quantizer configured"
        );

        Ok(Self {
            num_bits,
            min_range,
            max_range,
            layout,
            domain: QuantizedDomain::unsigned(num_bits)?,
            scales,
            zero_points,
        })
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Range as given at construction, before fixing.
    pub fn min_range(&self) -> &[f64] {
        &self.min_range
    }

    pub fn max_range(&self) -> &[f64] {
        &self.max_range
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    pub fn domain(&self) -> QuantizedDomain {
        self.domain
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    pub fn zero_points(&self) -> &[i32] {
        &self.zero_points
    }

    pub fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        apply_affine(self.layout, &self.scales, &self.zero_points, self.domain, input)
    }

    fn describe_into(&self, config: &mut QuantizerConfig) {
        config.insert("num_bits".into(), self.num_bits.into());
        config.insert("min_range".into(), self.min_range.clone().into());
        config.insert("max_range".into(), self.max_range.clone().into());
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WeightsParams {
    num_bits: u32,
    min_range: Vec<f64>,
    max_range: Vec<f64>,
    per_channel: bool,
    #[serde(default)]
    channel_axis: Option<isize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActivationParams {
    num_bits: u32,
    min_range: Vec<f64>,
    max_range: Vec<f64>,
}

/// Unsigned uniform weights quantizer.
#[derive(Clone, Debug)]
pub struct WeightsUniformQuantizer(UniformQuantizer);

impl WeightsUniformQuantizer {
    pub fn new(
        num_bits: u32,
        min_range: Vec<f64>,
        max_range: Vec<f64>,
        per_channel: bool,
        channel_axis: Option<isize>,
    ) -> Result<Self> {
        let layout = ChannelLayout::new(per_channel, channel_axis)?;
        UniformQuantizer::new(num_bits, min_range, max_range, layout).map(Self)
    }

    pub fn inner(&self) -> &UniformQuantizer {
        &self.0
    }
}

impl InferableQuantizer for WeightsUniformQuantizer {
    fn num_bits(&self) -> u32 {
        self.0.num_bits
    }

    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.0.apply(input)
    }

    fn describe(&self) -> QuantizerConfig {
        let mut config = QuantizerConfig::new();
        self.0.describe_into(&mut config);
        config.insert("per_channel".into(), self.0.layout.is_per_channel().into());
        config.insert(
            "channel_axis".into(),
            self.0.layout.channel_axis().map_or(Value::Null, Value::from),
        );
        config
    }
}

impl MarkedQuantizer for WeightsUniformQuantizer {
    const NAME: &'static str = "WeightsUniformInferableQuantizer";
    const TARGET: QuantizationTarget = QuantizationTarget::Weights;
    const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::Uniform];
    const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
    const SIGNATURE: &'static [ParamSpec] = &[
        ParamSpec::required("num_bits", ParamKind::Integer),
        ParamSpec::required("min_range", ParamKind::Sequence),
        ParamSpec::required("max_range", ParamKind::Sequence),
        ParamSpec::required("per_channel", ParamKind::Boolean),
        ParamSpec::optional("channel_axis", ParamKind::Integer),
    ];

    fn configure(config: &QuantizerConfig) -> Result<Self> {
        let p: WeightsParams = parse_config(config)?;
        Self::new(p.num_bits, p.min_range, p.max_range, p.per_channel, p.channel_axis)
    }
}

/// Per-tensor uniform activation quantizer.
#[derive(Clone, Debug)]
pub struct ActivationUniformQuantizer(UniformQuantizer);

impl ActivationUniformQuantizer {
    pub fn new(num_bits: u32, min_range: Vec<f64>, max_range: Vec<f64>) -> Result<Self> {
        UniformQuantizer::new(num_bits, min_range, max_range, ChannelLayout::per_tensor()).map(Self)
    }

    pub fn inner(&self) -> &UniformQuantizer {
        &self.0
    }
}

impl InferableQuantizer for ActivationUniformQuantizer {
    fn num_bits(&self) -> u32 {
        self.0.num_bits
    }

    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.0.apply(input)
    }

    fn describe(&self) -> QuantizerConfig {
        let mut config = QuantizerConfig::new();
        self.0.describe_into(&mut config);
        config
    }
}

impl MarkedQuantizer for ActivationUniformQuantizer {
    const NAME: &'static str = "ActivationUniformInferableQuantizer";
    const TARGET: QuantizationTarget = QuantizationTarget::Activation;
    const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::Uniform];
    const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
    const SIGNATURE: &'static [ParamSpec] = &[
        ParamSpec::required("num_bits", ParamKind::Integer),
        ParamSpec::required("min_range", ParamKind::Sequence),
        ParamSpec::required("max_range", ParamKind::Sequence),
    ];

    fn configure(config: &QuantizerConfig) -> Result<Self> {
        let p: ActivationParams = parse_config(config)?;
        Self::new(p.num_bits, p.min_range, p.max_range)
    }
}
