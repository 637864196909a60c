//! Look-up-table quantizers.
//!
//! Values are scaled by the threshold onto a `multiplier_n_bits` integer grid
//! and then snapped to the nearest of at most `2^num_bits` integer cluster
//! centers.

use ndarray::{ArrayD, Axis};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::symmetric::{validate_power_of_two, validate_threshold};
use super::{
    broadcast_channels, parse_config, validate_finite, validate_num_bits, ChannelLayout,
    InferableQuantizer, QuantizedDomain, QuantizerConfig,
};
use crate::error::{Error, Result};
use crate::quant_info::{QuantizationMethod, QuantizationTarget, QuantizerID};
use crate::registry::{MarkedQuantizer, ParamKind, ParamSpec};

pub const DEFAULT_MULTIPLIER_N_BITS: u32 = 8;
pub const DEFAULT_EPS: f64 = 1e-8;

/// Center closest to `value`; ties go to the first one.
fn nearest_center(centers: &[f64], value: f64) -> Option<f64> {
    centers
        .iter()
        .copied()
        .fold(None, |best: Option<f64>, c| match best {
            Some(b) if (b - value).abs() <= (c - value).abs() => Some(b),
            _ => Some(c),
        })
}

#[derive(Clone, Debug)]
pub struct LutQuantizer {
    num_bits: u32,
    cluster_centers: Vec<f64>,
    threshold: Vec<f64>,
    signed: bool,
    layout: ChannelLayout,
    multiplier_n_bits: u32,
    eps: f64,
    /// Integer grid the inputs are scaled onto before the table look-up
    multiplier_domain: QuantizedDomain,
}

impl LutQuantizer {
    pub fn new(
        num_bits: u32,
        cluster_centers: Vec<f64>,
        threshold: Vec<f64>,
        signed: bool,
        layout: ChannelLayout,
        multiplier_n_bits: u32,
        eps: f64,
    ) -> Result<Self> {
        validate_num_bits(num_bits)?;
        validate_num_bits(multiplier_n_bits)?;
        if multiplier_n_bits < num_bits {
            return Err(Error::InvalidParameter(format!(
                "multiplier_n_bits ({multiplier_n_bits}) must be at least num_bits ({num_bits})"
            )));
        }
        if signed && multiplier_n_bits < 2 {
            return Err(Error::InvalidParameter(
                "signed look-up table quantization needs at least 2 multiplier bits".to_string(),
            ));
        }
        if !(eps.is_finite() && eps >= 0.0) {
            return Err(Error::InvalidParameter(format!(
                "eps must be a non-negative number, got {eps}"
            )));
        }
        validate_threshold(&threshold)?;
        layout.check_param_len("threshold", threshold.len())?;

        validate_finite("cluster_centers", &cluster_centers)?;
        if cluster_centers.is_empty() {
            return Err(Error::InvalidParameter(
                "at least one cluster center is required".to_string(),
            ));
        }
        if cluster_centers.len() > 1usize << num_bits {
            return Err(Error::InvalidParameter(format!(
                "{} cluster centers exceed the 2^{num_bits} available codes",
                cluster_centers.len()
            )));
        }
        if let Some(c) = cluster_centers.iter().find(|c| c.fract() != 0.0) {
            return Err(Error::InvalidParameter(format!(
                "cluster centers must be integers, got {c}"
            )));
        }
        let multiplier_domain = QuantizedDomain::new(multiplier_n_bits, signed)?;
        if let Some(c) = cluster_centers
            .iter()
            .find(|&&c| c < multiplier_domain.min as f64 || c > multiplier_domain.max as f64)
        {
            return Err(Error::InvalidParameter(format!(
                "cluster center {c} lies outside [{}, {}]",
                multiplier_domain.min, multiplier_domain.max
            )));
        }

        debug!(
            num_bits,
            multiplier_n_bits,
            centers = cluster_centers.len(),
            per_channel = layout.is_per_channel(),
            "look-up table quantizer configured"
        );

        Ok(Self {
            num_bits,
            cluster_centers,
            threshold,
            signed,
            layout,
            multiplier_n_bits,
            eps,
            multiplier_domain,
        })
    }

    pub fn power_of_two(
        num_bits: u32,
        cluster_centers: Vec<f64>,
        threshold: Vec<f64>,
        signed: bool,
        layout: ChannelLayout,
        multiplier_n_bits: u32,
        eps: f64,
    ) -> Result<Self> {
        validate_threshold(&threshold)?;
        validate_power_of_two(&threshold)?;
        Self::new(
            num_bits,
            cluster_centers,
            threshold,
            signed,
            layout,
            multiplier_n_bits,
            eps,
        )
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    pub fn cluster_centers(&self) -> &[f64] {
        &self.cluster_centers
    }

    pub fn threshold(&self) -> &[f64] {
        &self.threshold
    }

    pub fn signed(&self) -> bool {
        self.signed
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    pub fn multiplier_n_bits(&self) -> u32 {
        self.multiplier_n_bits
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// `2^(multiplier_n_bits - signed)`
    fn multiplier(&self) -> f64 {
        2f64.powi(self.multiplier_n_bits as i32 - self.signed as i32)
    }

    fn quantize_value(&self, x: f32, threshold: f64) -> f32 {
        let multiplier = self.multiplier();
        let scaled = (x as f64 / (threshold + self.eps) * multiplier).clamp(
            self.multiplier_domain.min as f64,
            self.multiplier_domain.max as f64,
        );
        // centers are validated non-empty
        let center = nearest_center(&self.cluster_centers, scaled).unwrap_or(0.0);
        (center / multiplier * threshold) as f32
    }

    pub fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self.layout.resolve(input)? {
            None => match self.threshold.as_slice() {
                [threshold] => Ok(input.mapv(|x| self.quantize_value(x, *threshold))),
                _ => Err(Error::InvalidParameter(format!(
                    "per-tensor quantization expects a single threshold, got {}",
                    self.threshold.len()
                ))),
            },
            Some((axis, channels)) => {
                let thresholds = broadcast_channels("threshold", &self.threshold, channels)?;
                let mut output = input.clone();
                for (mut channel, &threshold) in
                    output.axis_iter_mut(Axis(axis)).zip(thresholds.iter())
                {
                    channel.mapv_inplace(|x| self.quantize_value(x, threshold));
                }
                Ok(output)
            }
        }
    }

    fn describe_head(&self) -> QuantizerConfig {
        let mut config = QuantizerConfig::new();
        config.insert("num_bits".into(), self.num_bits.into());
        config.insert("cluster_centers".into(), self.cluster_centers.clone().into());
        config.insert("threshold".into(), self.threshold.clone().into());
        config
    }

    fn describe_tail(&self, config: &mut QuantizerConfig) {
        config.insert("multiplier_n_bits".into(), self.multiplier_n_bits.into());
        config.insert("eps".into(), self.eps.into());
    }
}

const WEIGHTS_SIGNATURE: &[ParamSpec] = &[
    ParamSpec::required("num_bits", ParamKind::Integer),
    ParamSpec::required("cluster_centers", ParamKind::Sequence),
    ParamSpec::required("threshold", ParamKind::Sequence),
    ParamSpec::required("per_channel", ParamKind::Boolean),
    ParamSpec::optional("channel_axis", ParamKind::Integer),
    ParamSpec::optional("multiplier_n_bits", ParamKind::Integer),
    ParamSpec::optional("eps", ParamKind::Float),
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WeightsParams {
    num_bits: u32,
    cluster_centers: Vec<f64>,
    threshold: Vec<f64>,
    per_channel: bool,
    #[serde(default)]
    channel_axis: Option<isize>,
    /// Missing and `null` both fall back to the defaults.
    #[serde(default)]
    multiplier_n_bits: Option<u32>,
    #[serde(default)]
    eps: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActivationParams {
    num_bits: u32,
    cluster_centers: Vec<f64>,
    threshold: Vec<f64>,
    signed: bool,
    #[serde(default)]
    multiplier_n_bits: Option<u32>,
    #[serde(default)]
    eps: Option<f64>,
}

fn describe_weights(inner: &LutQuantizer) -> QuantizerConfig {
    let mut config = inner.describe_head();
    config.insert("per_channel".into(), inner.layout.is_per_channel().into());
    config.insert(
        "channel_axis".into(),
        inner.layout.channel_axis().map_or(Value::Null, Value::from),
    );
    inner.describe_tail(&mut config);
    config
}

/// Signed look-up-table weights quantizer with arbitrary thresholds.
#[derive(Clone, Debug)]
pub struct WeightsLutSymmetricQuantizer(LutQuantizer);

impl WeightsLutSymmetricQuantizer {
    pub fn new(
        num_bits: u32,
        cluster_centers: Vec<f64>,
        threshold: Vec<f64>,
        per_channel: bool,
        channel_axis: Option<isize>,
        multiplier_n_bits: u32,
        eps: f64,
    ) -> Result<Self> {
        let layout = ChannelLayout::new(per_channel, channel_axis)?;
        LutQuantizer::new(
            num_bits,
            cluster_centers,
            threshold,
            true,
            layout,
            multiplier_n_bits,
            eps,
        )
        .map(Self)
    }

    pub fn inner(&self) -> &LutQuantizer {
        &self.0
    }
}

impl InferableQuantizer for WeightsLutSymmetricQuantizer {
    fn num_bits(&self) -> u32 {
        self.0.num_bits
    }

    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.0.apply(input)
    }

    fn describe(&self) -> QuantizerConfig {
        describe_weights(&self.0)
    }
}

impl MarkedQuantizer for WeightsLutSymmetricQuantizer {
    const NAME: &'static str = "WeightsLUTSymmetricInferableQuantizer";
    const TARGET: QuantizationTarget = QuantizationTarget::Weights;
    const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::LutSymmetric];
    const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
    const SIGNATURE: &'static [ParamSpec] = WEIGHTS_SIGNATURE;

    fn configure(config: &QuantizerConfig) -> Result<Self> {
        let p: WeightsParams = parse_config(config)?;
        Self::new(
            p.num_bits,
            p.cluster_centers,
            p.threshold,
            p.per_channel,
            p.channel_axis,
            p.multiplier_n_bits.unwrap_or(DEFAULT_MULTIPLIER_N_BITS),
            p.eps.unwrap_or(DEFAULT_EPS),
        )
    }
}

/// Signed look-up-table weights quantizer with power-of-two thresholds.
#[derive(Clone, Debug)]
pub struct WeightsLutPotQuantizer(LutQuantizer);

impl WeightsLutPotQuantizer {
    pub fn new(
        num_bits: u32,
        cluster_centers: Vec<f64>,
        threshold: Vec<f64>,
        per_channel: bool,
        channel_axis: Option<isize>,
        multiplier_n_bits: u32,
        eps: f64,
    ) -> Result<Self> {
        let layout = ChannelLayout::new(per_channel, channel_axis)?;
        LutQuantizer::power_of_two(
            num_bits,
            cluster_centers,
            threshold,
            true,
            layout,
            multiplier_n_bits,
            eps,
        )
        .map(Self)
    }

    pub fn inner(&self) -> &LutQuantizer {
        &self.0
    }
}

impl InferableQuantizer for WeightsLutPotQuantizer {
    fn num_bits(&self) -> u32 {
        self.0.num_bits
    }

    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.0.apply(input)
    }

    fn describe(&self) -> QuantizerConfig {
        describe_weights(&self.0)
    }
}

impl MarkedQuantizer for WeightsLutPotQuantizer {
    const NAME: &'static str = "WeightsLUTPOTInferableQuantizer";
    const TARGET: QuantizationTarget = QuantizationTarget::Weights;
    const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::LutPowerOfTwo];
    const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
    const SIGNATURE: &'static [ParamSpec] = WEIGHTS_SIGNATURE;

    fn configure(config: &QuantizerConfig) -> Result<Self> {
        let p: WeightsParams = parse_config(config)?;
        Self::new(
            p.num_bits,
            p.cluster_centers,
            p.threshold,
            p.per_channel,
            p.channel_axis,
            p.multiplier_n_bits.unwrap_or(DEFAULT_MULTIPLIER_N_BITS),
            p.eps.unwrap_or(DEFAULT_EPS),
        )
    }
}

/// Per-tensor look-up-table activation quantizer with a power-of-two threshold.
#[derive(Clone, Debug)]
pub struct ActivationLutPotQuantizer(LutQuantizer);

impl ActivationLutPotQuantizer {
    pub fn new(
        num_bits: u32,
        cluster_centers: Vec<f64>,
        threshold: Vec<f64>,
        signed: bool,
        multiplier_n_bits: u32,
        eps: f64,
    ) -> Result<Self> {
        LutQuantizer::power_of_two(
            num_bits,
            cluster_centers,
            threshold,
            signed,
            ChannelLayout::per_tensor(),
            multiplier_n_bits,
            eps,
        )
        .map(Self)
    }

    pub fn inner(&self) -> &LutQuantizer {
        &self.0
    }
}

impl InferableQuantizer for ActivationLutPotQuantizer {
    fn num_bits(&self) -> u32 {
        self.0.num_bits
    }

    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.0.apply(input)
    }

    fn describe(&self) -> QuantizerConfig {
        let mut config = self.0.describe_head();
        config.insert("signed".into(), self.0.signed.into());
        self.0.describe_tail(&mut config);
        config
    }
}

impl MarkedQuantizer for ActivationLutPotQuantizer {
    const NAME: &'static str = "ActivationLutPOTInferableQuantizer";
    const TARGET: QuantizationTarget = QuantizationTarget::Activation;
    const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::LutPowerOfTwo];
    const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
    const SIGNATURE: &'static [ParamSpec] = &[
        ParamSpec::required("num_bits", ParamKind::Integer),
        ParamSpec::required("cluster_centers", ParamKind::Sequence),
        ParamSpec::required("threshold", ParamKind::Sequence),
        ParamSpec::required("signed", ParamKind::Boolean),
        ParamSpec::optional("multiplier_n_bits", ParamKind::Integer),
        ParamSpec::optional("eps", ParamKind::Float),
    ];

    fn configure(config: &QuantizerConfig) -> Result<Self> {
        let p: ActivationParams = parse_config(config)?;
        Self::new(
            p.num_bits,
            p.cluster_centers,
            p.threshold,
            p.signed,
            p.multiplier_n_bits.unwrap_or(DEFAULT_MULTIPLIER_N_BITS),
            p.eps.unwrap_or(DEFAULT_EPS),
        )
    }
}
