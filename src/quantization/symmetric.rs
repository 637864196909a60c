//! Symmetric and power-of-two quantizers.
//!
//! The threshold `t` bounds the representable magnitude; the zero point is
//! always 0.

use ndarray::ArrayD;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    apply_affine, parse_config, validate_finite, validate_num_bits, ChannelLayout,
    InferableQuantizer, QuantizedDomain, QuantizerConfig,
};
use crate::error::{Error, Result};
use crate::quant_info::{QuantizationMethod, QuantizationTarget, QuantizerID};
use crate::registry::{MarkedQuantizer, ParamKind, ParamSpec};

/// `round(log2(t)) == log2(t)`, i.e. `t` is an exact power of two.
pub fn is_power_of_two(t: f64) -> bool {
    if !(t.is_finite() && t > 0.0) {
        return false;
    }
    let exponent = t.log2();
    exponent.round() == exponent
}

/// `t / (2^(n-1) - 1)` when signed, `t / (2^n - 1)` otherwise.
pub fn symmetric_scales(threshold: &[f64], num_bits: u32, signed: bool) -> Result<Vec<f32>> {
    validate_num_bits(num_bits)?;
    let levels = if signed {
        (1i64 << (num_bits - 1)) - 1
    } else {
        (1i64 << num_bits) - 1
    };
    if levels <= 0 {
        return Err(Error::InvalidParameter(
            "signed symmetric quantization needs at least 2 bits".to_string(),
        ));
    }
    Ok(threshold
        .iter()
        .map(|&t| (t / levels as f64) as f32)
        .collect())
}

pub(crate) fn validate_threshold(threshold: &[f64]) -> Result<()> {
    validate_finite("threshold", threshold)?;
    if let Some(t) = threshold.iter().find(|&&t| t <= 0.0) {
        return Err(Error::InvalidParameter(format!(
            "threshold must be positive, got {t}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_power_of_two(threshold: &[f64]) -> Result<()> {
    if let Some(t) = threshold.iter().find(|&&t| !is_power_of_two(t)) {
        return Err(Error::InvalidParameter(format!(
            "expected threshold to be a power of 2 but got {t}"
        )));
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct SymmetricQuantizer {
    num_bits: u32,
    threshold: Vec<f64>,
    signed: bool,
    layout: ChannelLayout,
    domain: QuantizedDomain,
    scales: Vec<f32>,
    zero_points: Vec<i32>,
}

impl SymmetricQuantizer {
    pub fn new(
        num_bits: u32,
        threshold: Vec<f64>,
        signed: bool,
        layout: ChannelLayout,
    ) -> Result<Self> {
        validate_threshold(&threshold)?;
        layout.check_param_len("threshold", threshold.len())?;

        let scales = symmetric_scales(&threshold, num_bits, signed)?;
        let domain = QuantizedDomain::new(num_bits, signed)?;
        debug!(
            num_bits,
            signed,
            channels = threshold.len(),
            per_channel = layout.is_per_channel(),
            "symmetric quantizer configured"
        );

        Ok(Self {
            num_bits,
            zero_points: vec![0; scales.len()],
            threshold,
            signed,
            layout,
            domain,
            scales,
        })
    }

    /// Like [`SymmetricQuantizer::new`], additionally requiring every threshold
    /// to be an exact power of two.
    pub fn power_of_two(
        num_bits: u32,
        threshold: Vec<f64>,
        signed: bool,
        layout: ChannelLayout,
    ) -> Result<Self> {
        validate_threshold(&threshold)?;
        validate_power_of_two(&threshold)?;
        Self::new(num_bits, threshold, signed, layout)
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
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

    pub fn domain(&self) -> QuantizedDomain {
        self.domain
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    pub fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        apply_affine(self.layout, &self.scales, &self.zero_points, self.domain, input)
    }

    fn describe_weights(&self) -> QuantizerConfig {
        let mut config = QuantizerConfig::new();
        config.insert("num_bits".into(), self.num_bits.into());
        config.insert("threshold".into(), self.threshold.clone().into());
        config.insert("per_channel".into(), self.layout.is_per_channel().into());
        config.insert(
            "channel_axis".into(),
            self.layout.channel_axis().map_or(Value::Null, Value::from),
        );
        config
    }

    fn describe_activation(&self) -> QuantizerConfig {
        let mut config = QuantizerConfig::new();
        config.insert("num_bits".into(), self.num_bits.into());
        config.insert("threshold".into(), self.threshold.clone().into());
        config.insert("signed".into(), self.signed.into());
        config
    }
}

const WEIGHTS_SIGNATURE: &[ParamSpec] = &[
    ParamSpec::required("num_bits", ParamKind::Integer),
    ParamSpec::required("threshold", ParamKind::Sequence),
    ParamSpec::required("per_channel", ParamKind::Boolean),
    ParamSpec::optional("channel_axis", ParamKind::Integer),
];

const ACTIVATION_SIGNATURE: &[ParamSpec] = &[
    ParamSpec::required("num_bits", ParamKind::Integer),
    ParamSpec::required("threshold", ParamKind::Sequence),
    ParamSpec::required("signed", ParamKind::Boolean),
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WeightsParams {
    num_bits: u32,
    threshold: Vec<f64>,
    per_channel: bool,
    #[serde(default)]
    channel_axis: Option<isize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActivationParams {
    num_bits: u32,
    threshold: Vec<f64>,
    signed: bool,
}

/// Signed symmetric weights quantizer.
#[derive(Clone, Debug)]
pub struct WeightsSymmetricQuantizer(SymmetricQuantizer);

impl WeightsSymmetricQuantizer {
    pub fn new(
        num_bits: u32,
        threshold: Vec<f64>,
        per_channel: bool,
        channel_axis: Option<isize>,
    ) -> Result<Self> {
        let layout = ChannelLayout::new(per_channel, channel_axis)?;
        SymmetricQuantizer::new(num_bits, threshold, true, layout).map(Self)
    }

    pub fn inner(&self) -> &SymmetricQuantizer {
        &self.0
    }
}

impl InferableQuantizer for WeightsSymmetricQuantizer {
    fn num_bits(&self) -> u32 {
        self.0.num_bits
    }

    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.0.apply(input)
    }

    fn describe(&self) -> QuantizerConfig {
        self.0.describe_weights()
    }
}

impl MarkedQuantizer for WeightsSymmetricQuantizer {
    const NAME: &'static str = "WeightsSymmetricInferableQuantizer";
    const TARGET: QuantizationTarget = QuantizationTarget::Weights;
    const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::Symmetric];
    const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
    const SIGNATURE: &'static [ParamSpec] = WEIGHTS_SIGNATURE;

    fn configure(config: &QuantizerConfig) -> Result<Self> {
        let p: WeightsParams = parse_config(config)?;
        Self::new(p.num_bits, p.threshold, p.per_channel, p.channel_axis)
    }
}

/// Signed power-of-two weights quantizer.
#[derive(Clone, Debug)]
pub struct WeightsPotQuantizer(SymmetricQuantizer);

impl WeightsPotQuantizer {
    pub fn new(
        num_bits: u32,
        threshold: Vec<f64>,
        per_channel: bool,
        channel_axis: Option<isize>,
    ) -> Result<Self> {
        let layout = ChannelLayout::new(per_channel, channel_axis)?;
        SymmetricQuantizer::power_of_two(num_bits, threshold, true, layout).map(Self)
    }

    pub fn inner(&self) -> &SymmetricQuantizer {
        &self.0
    }
}

impl InferableQuantizer for WeightsPotQuantizer {
    fn num_bits(&self) -> u32 {
        self.0.num_bits
    }

    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.0.apply(input)
    }

    fn describe(&self) -> QuantizerConfig {
        self.0.describe_weights()
    }
}

impl MarkedQuantizer for WeightsPotQuantizer {
    const NAME: &'static str = "WeightsPOTInferableQuantizer";
    const TARGET: QuantizationTarget = QuantizationTarget::Weights;
    const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::PowerOfTwo];
    const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
    const SIGNATURE: &'static [ParamSpec] = WEIGHTS_SIGNATURE;

    fn configure(config: &QuantizerConfig) -> Result<Self> {
        let p: WeightsParams = parse_config(config)?;
        Self::new(p.num_bits, p.threshold, p.per_channel, p.channel_axis)
    }
}

/// Per-tensor symmetric activation quantizer.
#[derive(Clone, Debug)]
pub struct ActivationSymmetricQuantizer(SymmetricQuantizer);

impl ActivationSymmetricQuantizer {
    pub fn new(num_bits: u32, threshold: Vec<f64>, signed: bool) -> Result<Self> {
        SymmetricQuantizer::new(num_bits, threshold, signed, ChannelLayout::per_tensor()).map(Self)
    }

    pub fn inner(&self) -> &SymmetricQuantizer {
        &self.0
    }
}

impl InferableQuantizer for ActivationSymmetricQuantizer {
    fn num_bits(&self) -> u32 {
        self.0.num_bits
    }

    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.0.apply(input)
    }

    fn describe(&self) -> QuantizerConfig {
        self.0.describe_activation()
    }
}

impl MarkedQuantizer for ActivationSymmetricQuantizer {
    const NAME: &'static str = "ActivationSymmetricInferableQuantizer";
    const TARGET: QuantizationTarget = QuantizationTarget::Activation;
    const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::Symmetric];
    const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
    const SIGNATURE: &'static [ParamSpec] = ACTIVATION_SIGNATURE;

    fn configure(config: &QuantizerConfig) -> Result<Self> {
        let p: ActivationParams = parse_config(config)?;
        Self::new(p.num_bits, p.threshold, p.signed)
    }
}

/// Per-tensor power-of-two activation quantizer.
#[derive(Clone, Debug)]
pub struct ActivationPotQuantizer(SymmetricQuantizer);

impl ActivationPotQuantizer {
    pub fn new(num_bits: u32, threshold: Vec<f64>, signed: bool) -> Result<Self> {
        SymmetricQuantizer::power_of_two(num_bits, threshold, signed, ChannelLayout::per_tensor())
            .map(Self)
    }

    pub fn inner(&self) -> &SymmetricQuantizer {
        &self.0
    }
}

impl InferableQuantizer for ActivationPotQuantizer {
    fn num_bits(&self) -> u32 {
        self.0.num_bits
    }

    fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.0.apply(input)
    }

    fn describe(&self) -> QuantizerConfig {
        self.0.describe_activation()
    }
}

impl MarkedQuantizer for ActivationPotQuantizer {
    const NAME: &'static str = "ActivationPOTInferableQuantizer";
    const TARGET: QuantizationTarget = QuantizationTarget::Activation;
    const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::PowerOfTwo];
    const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
    const SIGNATURE: &'static [ParamSpec] = ACTIVATION_SIGNATURE;

    fn configure(config: &QuantizerConfig) -> Result<Self> {
        let p: ActivationParams = parse_config(config)?;
        Self::new(p.num_bits, p.threshold, p.signed)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3, Axis};
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn power_of_two_check() {
        for k in -10..=10 {
            assert!(is_power_of_two(2f64.powi(k)), "2^{k}");
        }
        for t in [3.0, 0.3, 1.5, 0.0, -2.0, f64::NAN, f64::INFINITY] {
            assert!(!is_power_of_two(t), "{t}");
        }
    }

    #[test]
    fn pot_example_clips_large_values() {
        let q = WeightsPotQuantizer::new(8, vec![2.0], false, None).unwrap();
        assert_abs_diff_eq!(q.inner().scales()[0], 2.0 / 127.0, epsilon = 1e-7);
        assert_abs_diff_eq!(q.inner().scales()[0], 0.015748, epsilon = 1e-6);

        let output = q.apply(&array![1.0f32, -2.0, 2.5].into_dyn()).unwrap();
        let scale = q.inner().scales()[0];
        assert_abs_diff_eq!(output[0], 1.0, epsilon = scale);
        assert_abs_diff_eq!(output[1], -2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(output[2], 127.0 * scale, epsilon = 1e-6);
    }

    #[test]
    fn unsigned_scale_uses_full_range() {
        let q = ActivationSymmetricQuantizer::new(8, vec![3.0], false).unwrap();
        assert_abs_diff_eq!(q.inner().scales()[0], 3.0 / 255.0, epsilon = 1e-7);
        assert_eq!(q.inner().domain(), QuantizedDomain { min: 0, max: 255 });

        let output = q.apply(&array![-1.0f32, 1.5].into_dyn()).unwrap();
        assert_eq!(output[0], 0.0);
        assert_abs_diff_eq!(output[1], 1.5, epsilon = 3.0 / 255.0);
    }

    #[test]
    fn rejects_non_power_of_two_threshold() {
        let err = WeightsPotQuantizer::new(8, vec![3.0], false, None).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        let err = WeightsPotQuantizer::new(8, vec![1.0, 2.0, 6.0], true, Some(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(ActivationPotQuantizer::new(8, vec![0.75], true).is_err());
    }

    #[test]
    fn symmetric_accepts_any_positive_threshold() {
        assert!(WeightsSymmetricQuantizer::new(8, vec![3.0], false, None).is_ok());
        assert!(WeightsSymmetricQuantizer::new(8, vec![0.0], false, None).is_err());
        assert!(WeightsSymmetricQuantizer::new(8, vec![-1.0], false, None).is_err());
        assert!(WeightsSymmetricQuantizer::new(1, vec![1.0], false, None).is_err());
        assert!(WeightsSymmetricQuantizer::new(0, vec![1.0], false, None).is_err());
        assert!(ActivationSymmetricQuantizer::new(1, vec![1.0], false).is_ok());
    }

    #[test]
    fn per_channel_requires_axis() {
        let err = WeightsSymmetricQuantizer::new(8, vec![1.0, 2.0], true, None).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(WeightsSymmetricQuantizer::new(8, vec![1.0, 2.0], false, None).is_err());
    }

    #[test]
    fn per_channel_scales_each_channel() {
        let q = WeightsPotQuantizer::new(8, vec![1.0, 2.0, 4.0], true, Some(0)).unwrap();
        let input = Array3::<f32>::from_elem((3, 2, 2), 3.0).into_dyn();
        let output = q.apply(&input).unwrap();

        for (c, channel) in output.axis_iter(Axis(0)).enumerate() {
            let scale = q.inner().scales()[c];
            let expected = (3.0f32 / scale).round_ties_even().min(127.0) * scale;
            assert!(channel.iter().all(|&x| x == expected));
        }
        assert_abs_diff_eq!(output[[0, 0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(output[[1, 0, 0]], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(output[[2, 0, 0]], 3.0, epsilon = 4.0 / 127.0);
    }

    #[test]
    fn per_channel_apply_rejects_wrong_channel_count() {
        let q = WeightsSymmetricQuantizer::new(8, vec![1.0, 2.0], true, Some(-1)).unwrap();
        let input = Array3::<f32>::zeros((2, 2, 3)).into_dyn();
        assert!(matches!(q.apply(&input), Err(Error::InvalidParameter(_))));
        let input = Array3::<f32>::zeros((3, 2, 2)).into_dyn();
        assert!(q.apply(&input).is_ok());
    }

    #[test]
    fn describe_lists_constructor_parameters_in_order() {
        let q = WeightsSymmetricQuantizer::new(4, vec![0.5, 1.5], true, Some(1)).unwrap();
        let config = q.describe();
        let keys: Vec<&str> = config.keys().map(String::as_str).collect();
        assert_eq!(keys, ["num_bits", "threshold", "per_channel", "channel_axis"]);
        assert_eq!(config["channel_axis"], 1);

        let rebuilt = WeightsSymmetricQuantizer::configure(&config).unwrap();
        assert_eq!(rebuilt.inner().scales(), q.inner().scales());
    }

    #[test]
    fn configure_rejects_unknown_fields() {
        let mut config = ActivationPotQuantizer::new(8, vec![4.0], true)
            .unwrap()
            .describe();
        config.insert("zero_point".into(), 3.into());
        assert!(matches!(
            ActivationPotQuantizer::configure(&config),
            Err(Error::InvalidParameter(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_pot_thresholds_construct(k in -12i32..12, bits in 2u32..=16) {
            let t = 2f64.powi(k);
            prop_assert!(WeightsPotQuantizer::new(bits, vec![t], false, None).is_ok());
        }

        #[test]
        fn prop_apply_is_idempotent(
            data in prop::collection::vec(-8.0f32..8.0, 1..64),
            k in -3i32..4,
            bits in 2u32..=8,
        ) {
            let q = WeightsPotQuantizer::new(bits, vec![2f64.powi(k)], false, None).unwrap();
            let input = ndarray::Array1::from(data).into_dyn();
            let once = q.apply(&input).unwrap();
            let twice = q.apply(&once).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
