//! Registry of quantizer implementations keyed by
//! `(QuantizationTarget, QuantizationMethod, QuantizerID)`.
//!
//! A quantizer is declared by implementing [`MarkedQuantizer`]; its metadata
//! is validated by [`mark_quantizer`] and stored in a [`QuantizerRegistry`].
//! A model loader persists a [`QuantizerRecord`] per node and later rebuilds
//! the quantizer through the registry without naming the concrete type.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::quant_info::{QuantizationMethod, QuantizationTarget, QuantizerID};
use crate::quantization::symmetric::{
    ActivationPotQuantizer, ActivationSymmetricQuantizer, WeightsPotQuantizer,
    WeightsSymmetricQuantizer,
};
use crate::quantization::uniform::{ActivationUniformQuantizer, WeightsUniformQuantizer};
use crate::quantization::{InferableQuantizer, QuantizerConfig};

/// Type of a constructor parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Float,
    Boolean,
    /// Ordered sequence of numbers
    Sequence,
    String,
    /// A live object that cannot be serialized, named by its type
    Opaque(&'static str),
}

impl ParamKind {
    pub fn is_serializable(&self) -> bool {
        !matches!(self, ParamKind::Opaque(_))
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Float => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Sequence => value.is_array(),
            ParamKind::String => value.is_string(),
            ParamKind::Opaque(_) => false,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Integer => write!(f, "integer"),
            ParamKind::Float => write!(f, "float"),
            ParamKind::Boolean => write!(f, "boolean"),
            ParamKind::Sequence => write!(f, "sequence"),
            ParamKind::String => write!(f, "string"),
            ParamKind::Opaque(name) => write!(f, "opaque `{name}`"),
        }
    }
}

/// One constructor parameter of a registered quantizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    /// May be omitted or `null`.
    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Declaration a quantizer implementation attaches to itself.
pub trait MarkedQuantizer: InferableQuantizer + Sized + 'static {
    const NAME: &'static str;
    const TARGET: QuantizationTarget;
    const METHODS: &'static [QuantizationMethod];
    const IDENTIFIER: QuantizerID;
    /// Constructor parameters in declaration order
    const SIGNATURE: &'static [ParamSpec];

    /// Validate `config` and derive the quantization parameters.
    fn configure(config: &QuantizerConfig) -> Result<Self>;
}

type Constructor = fn(&QuantizerConfig) -> Result<Box<dyn InferableQuantizer>>;

fn construct<Q: MarkedQuantizer>(config: &QuantizerConfig) -> Result<Box<dyn InferableQuantizer>> {
    Ok(Box::new(Q::configure(config)?))
}

/// Registry entry: metadata plus a constructor.
#[derive(Clone)]
pub struct QuantizerDescriptor {
    name: &'static str,
    target: QuantizationTarget,
    methods: Vec<QuantizationMethod>,
    identifier: QuantizerID,
    signature: &'static [ParamSpec],
    constructor: Constructor,
}

impl fmt::Debug for QuantizerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantizerDescriptor")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("methods", &self.methods)
            .field("identifier", &self.identifier)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl QuantizerDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target(&self) -> QuantizationTarget {
        self.target
    }

    pub fn methods(&self) -> &[QuantizationMethod] {
        &self.methods
    }

    pub fn identifier(&self) -> QuantizerID {
        self.identifier
    }

    pub fn signature(&self) -> &'static [ParamSpec] {
        self.signature
    }

    /// Check `config` against the signature and build the quantizer.
    pub fn construct(&self, config: &QuantizerConfig) -> Result<Box<dyn InferableQuantizer>> {
        self.check_config(config)?;
        (self.constructor)(config)
    }

    fn check_config(&self, config: &QuantizerConfig) -> Result<()> {
        if let Some(key) = config
            .keys()
            .find(|key| !self.signature.iter().any(|p| p.name == key.as_str()))
        {
            return Err(Error::InvalidParameter(format!(
                "{} has no parameter `{key}`",
                self.name
            )));
        }

        for param in self.signature {
            match config.get(param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(Error::InvalidParameter(format!(
                        "{} requires parameter `{}`",
                        self.name, param.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.kind.accepts(value) => {
                    return Err(Error::InvalidParameter(format!(
                        "{}: parameter `{}` expects a {}, got {value}",
                        self.name, param.name, param.kind
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn keys(&self) -> impl Iterator<Item = (QuantizationTarget, QuantizationMethod, QuantizerID)> + '_ {
        self.methods
            .iter()
            .map(|&method| (self.target, method, self.identifier))
    }
}

/// Validate the declaration of `Q` and produce its registry entry.
///
/// Fails with [`Error::Configuration`] when the declaration lists no
/// methods, repeats a method or parameter, or takes a parameter that cannot
/// be serialized.
pub fn mark_quantizer<Q: MarkedQuantizer>() -> Result<QuantizerDescriptor> {
    if Q::NAME.is_empty() {
        return Err(Error::Configuration(
            "quantizer name must not be empty".to_string(),
        ));
    }
    if Q::METHODS.is_empty() {
        return Err(Error::Configuration(format!(
            "{} declares no quantization method",
            Q::NAME
        )));
    }
    let mut methods = HashSet::new();
    if let Some(method) = Q::METHODS.iter().find(|&&m| !methods.insert(m)) {
        return Err(Error::Configuration(format!(
            "{} declares method {method} twice",
            Q::NAME
        )));
    }

    let mut names = HashSet::new();
    for param in Q::SIGNATURE {
        if param.name.is_empty() {
            return Err(Error::Configuration(format!(
                "{} has a parameter without a name",
                Q::NAME
            )));
        }
        if !names.insert(param.name) {
            return Err(Error::Configuration(format!(
                "{} declares parameter `{}` twice",
                Q::NAME,
                param.name
            )));
        }
        if !param.kind.is_serializable() {
            return Err(Error::Configuration(format!(
                "{}: parameter `{}` is {}, which cannot be serialized",
                Q::NAME,
                param.name,
                param.kind
            )));
        }
    }

    Ok(QuantizerDescriptor {
        name: Q::NAME,
        target: Q::TARGET,
        methods: Q::METHODS.to_vec(),
        identifier: Q::IDENTIFIER,
        signature: Q::SIGNATURE,
        constructor: construct::<Q>,
    })
}

/// Serialized form of one quantizer in a model graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizerRecord {
    pub target: QuantizationTarget,
    pub method: QuantizationMethod,
    pub identifier: QuantizerID,
    pub config: QuantizerConfig,
}

impl QuantizerRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Default)]
pub struct QuantizerRegistry {
    entries: Vec<QuantizerDescriptor>,
    index: HashMap<(QuantizationTarget, QuantizationMethod, QuantizerID), usize>,
}

impl QuantizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in quantizer family.
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_marked::<WeightsPotQuantizer>()?;
        registry.register_marked::<WeightsSymmetricQuantizer>()?;
        registry.register_marked::<WeightsUniformQuantizer>()?;
        registry.register_marked::<ActivationPotQuantizer>()?;
        registry.register_marked::<ActivationSymmetricQuantizer>()?;
        registry.register_marked::<ActivationUniformQuantizer>()?;

        #[cfg(feature = "lut")]
        {
            use crate::quantization::lut::{
                ActivationLutPotQuantizer, WeightsLutPotQuantizer, WeightsLutSymmetricQuantizer,
            };
            registry.register_marked::<WeightsLutSymmetricQuantizer>()?;
            registry.register_marked::<WeightsLutPotQuantizer>()?;
            registry.register_marked::<ActivationLutPotQuantizer>()?;
        }

        Ok(registry)
    }

    /// Process-wide registry of the built-in quantizers, populated once on
    /// first use and read-only afterwards.
    pub fn builtin() -> Result<&'static QuantizerRegistry> {
        static BUILTIN: OnceLock<std::result::Result<QuantizerRegistry, String>> = OnceLock::new();
        BUILTIN
            .get_or_init(|| Self::with_builtin().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| Error::Configuration(e.clone()))
    }

    /// Add an entry. Fails without modifying the registry if any of its
    /// `(target, method, identifier)` triples is already claimed.
    pub fn register(&mut self, descriptor: QuantizerDescriptor) -> Result<()> {
        if let Some(key) = descriptor.keys().find(|key| self.index.contains_key(key)) {
            let existing = &self.entries[self.index[&key]];
            return Err(Error::Configuration(format!(
                "{} claims ({}, {}, {}) already registered by {}",
                descriptor.name, key.0, key.1, key.2, existing.name
            )));
        }

        debug!(
            name = descriptor.name,
            target = %descriptor.target,
            methods = ?descriptor.methods,
            "registering quantizer"
        );
        let slot = self.entries.len();
        for key in descriptor.keys() {
            self.index.insert(key, slot);
        }
        self.entries.push(descriptor);
        Ok(())
    }

    /// Validate the declaration of `Q` and register it.
    pub fn register_marked<Q: MarkedQuantizer>(&mut self) -> Result<()> {
        self.register(mark_quantizer::<Q>()?)
    }

    pub fn lookup(
        &self,
        target: QuantizationTarget,
        method: QuantizationMethod,
        identifier: QuantizerID,
    ) -> Result<&QuantizerDescriptor> {
        self.index
            .get(&(target, method, identifier))
            .map(|&slot| &self.entries[slot])
            .ok_or(Error::NotFound {
                target,
                method,
                identifier,
            })
    }

    pub fn build(
        &self,
        target: QuantizationTarget,
        method: QuantizationMethod,
        identifier: QuantizerID,
        config: &QuantizerConfig,
    ) -> Result<Box<dyn InferableQuantizer>> {
        self.lookup(target, method, identifier)?.construct(config)
    }

    /// Pair a live quantizer with its registry triple under `method`.
    ///
    /// Fails when `Q` does not declare `method`, or when the triple is held by
    /// a different implementation, so every record produced here restores.
    pub fn record<Q: MarkedQuantizer>(
        &self,
        method: QuantizationMethod,
        quantizer: &Q,
    ) -> Result<QuantizerRecord> {
        if !Q::METHODS.contains(&method) {
            return Err(Error::InvalidParameter(format!(
                "{} does not implement method {method}",
                Q::NAME
            )));
        }
        let descriptor = self.lookup(Q::TARGET, method, Q::IDENTIFIER)?;
        if descriptor.name != Q::NAME {
            return Err(Error::Configuration(format!(
                "({}, {method}, {}) is registered to {}, not {}",
                Q::TARGET,
                Q::IDENTIFIER,
                descriptor.name,
                Q::NAME
            )));
        }
        Ok(QuantizerRecord {
            target: Q::TARGET,
            method,
            identifier: Q::IDENTIFIER,
            config: quantizer.describe(),
        })
    }

    pub fn restore(&self, record: &QuantizerRecord) -> Result<Box<dyn InferableQuantizer>> {
        self.build(record.target, record.method, record.identifier, &record.config)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &QuantizerDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, ArrayD};

    use super::*;

    /// Stand-in that claims the same slot as the built-in uniform weights quantizer.
    #[derive(Debug)]
    struct ShadowUniform;

    impl InferableQuantizer for ShadowUniform {
        fn num_bits(&self) -> u32 {
            8
        }

        fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
            Ok(input.clone())
        }

        fn describe(&self) -> QuantizerConfig {
            QuantizerConfig::new()
        }
    }

    impl MarkedQuantizer for ShadowUniform {
        const NAME: &'static str = "ShadowUniform";
        const TARGET: QuantizationTarget = QuantizationTarget::Weights;
        const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::Uniform];
        const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
        const SIGNATURE: &'static [ParamSpec] = &[];

        fn configure(_config: &QuantizerConfig) -> Result<Self> {
            Ok(ShadowUniform)
        }
    }

    #[derive(Debug)]
    struct HoldsModule;

    impl InferableQuantizer for HoldsModule {
        fn num_bits(&self) -> u32 {
            8
        }

        fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
            Ok(input.clone())
        }

        fn describe(&self) -> QuantizerConfig {
            QuantizerConfig::new()
        }
    }

    impl MarkedQuantizer for HoldsModule {
        const NAME: &'static str = "HoldsModule";
        const TARGET: QuantizationTarget = QuantizationTarget::Activation;
        const METHODS: &'static [QuantizationMethod] = &[QuantizationMethod::Symmetric];
        const IDENTIFIER: QuantizerID = QuantizerID::Trainable;
        const SIGNATURE: &'static [ParamSpec] = &[
            ParamSpec::required("num_bits", ParamKind::Integer),
            ParamSpec::required("layer", ParamKind::Opaque("nn.Module")),
        ];

        fn configure(_config: &QuantizerConfig) -> Result<Self> {
            Ok(HoldsModule)
        }
    }

    #[derive(Debug)]
    struct NoMethods;

    impl InferableQuantizer for NoMethods {
        fn num_bits(&self) -> u32 {
            8
        }

        fn apply(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
            Ok(input.clone())
        }

        fn describe(&self) -> QuantizerConfig {
            QuantizerConfig::new()
        }
    }

    impl MarkedQuantizer for NoMethods {
        const NAME: &'static str = "NoMethods";
        const TARGET: QuantizationTarget = QuantizationTarget::Weights;
        const METHODS: &'static [QuantizationMethod] = &[];
        const IDENTIFIER: QuantizerID = QuantizerID::Inferable;
        const SIGNATURE: &'static [ParamSpec] = &[];

        fn configure(_config: &QuantizerConfig) -> Result<Self> {
            Ok(NoMethods)
        }
    }

    #[test]
    fn duplicate_triple_is_rejected() {
        let mut registry = QuantizerRegistry::new();
        registry.register_marked::<WeightsUniformQuantizer>().unwrap();
        let err = registry.register_marked::<ShadowUniform>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry
                .lookup(
                    QuantizationTarget::Weights,
                    QuantizationMethod::Uniform,
                    QuantizerID::Inferable
                )
                .unwrap()
                .name(),
            "WeightsUniformInferableQuantizer"
        );
    }

    #[test]
    fn opaque_parameter_is_rejected() {
        let err = mark_quantizer::<HoldsModule>().unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("layer")));
    }

    #[test]
    fn empty_method_list_is_rejected() {
        assert!(matches!(
            mark_quantizer::<NoMethods>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn lookup_miss_reports_triple() {
        let registry = QuantizerRegistry::new();
        let err = registry
            .lookup(
                QuantizationTarget::Activation,
                QuantizationMethod::Uniform,
                QuantizerID::Trainable,
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(
            err.to_string(),
            "No quantizer registered for (ACTIVATION, UNIFORM, TRAINABLE)"
        );
    }

    #[test]
    fn builtin_registry_covers_every_family() {
        let registry = QuantizerRegistry::builtin().unwrap();
        let expected = if cfg!(feature = "lut") { 9 } else { 6 };
        assert_eq!(registry.len(), expected);

        let pot = registry
            .lookup(
                QuantizationTarget::Weights,
                QuantizationMethod::PowerOfTwo,
                QuantizerID::Inferable,
            )
            .unwrap();
        assert_eq!(pot.name(), "WeightsPOTInferableQuantizer");
        assert_eq!(pot.signature().len(), 4);
        assert!(registry.descriptors().all(|d| d.identifier() == QuantizerID::Inferable));
    }

    #[test]
    fn build_checks_signature() {
        let registry = QuantizerRegistry::builtin().unwrap();
        let mut config = QuantizerConfig::new();
        config.insert("num_bits".into(), 8.into());
        config.insert("threshold".into(), vec![4.0].into());

        // missing required `signed`
        let err = registry
            .build(
                QuantizationTarget::Activation,
                QuantizationMethod::Symmetric,
                QuantizerID::Inferable,
                &config,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(msg) if msg.contains("signed")));

        // wrong kind
        config.insert("signed".into(), "yes".into());
        assert!(registry
            .build(
                QuantizationTarget::Activation,
                QuantizationMethod::Symmetric,
                QuantizerID::Inferable,
                &config,
            )
            .is_err());

        config.insert("signed".into(), true.into());
        let q = registry
            .build(
                QuantizationTarget::Activation,
                QuantizationMethod::Symmetric,
                QuantizerID::Inferable,
                &config,
            )
            .unwrap();
        assert_eq!(q.num_bits(), 8);
        assert_eq!(q.describe(), config);
    }

    #[test]
    fn record_round_trips_through_json() {
        let registry = QuantizerRegistry::builtin().unwrap();
        let q = WeightsUniformQuantizer::new(8, vec![-1.0], vec![3.0], false, None).unwrap();
        let record = registry.record(QuantizationMethod::Uniform, &q).unwrap();

        let json = record.to_json().unwrap();
        assert!(json.starts_with(r#"{"target":"WEIGHTS","method":"UNIFORM","identifier":"INFERABLE""#));
        let parsed = QuantizerRecord::from_json(&json).unwrap();
        assert_eq!(parsed, record);

        let restored = registry.restore(&parsed).unwrap();
        let input = array![-2.0f32, -0.3, 0.0, 0.77, 3.5].into_dyn();
        assert_eq!(restored.apply(&input).unwrap(), q.apply(&input).unwrap());
    }

    #[test]
    fn record_requires_registered_triple() {
        let registry = QuantizerRegistry::new();
        let q = WeightsUniformQuantizer::new(8, vec![-1.0], vec![3.0], false, None).unwrap();
        assert!(matches!(
            registry.record(QuantizationMethod::Uniform, &q),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn record_rejects_undeclared_method() {
        let registry = QuantizerRegistry::builtin().unwrap();
        // 3.0 is a valid symmetric threshold but would not restore as power-of-two
        let q = WeightsSymmetricQuantizer::new(8, vec![3.0], false, None).unwrap();
        assert!(matches!(
            registry.record(QuantizationMethod::PowerOfTwo, &q),
            Err(Error::InvalidParameter(msg)) if msg.contains("POWER_OF_TWO")
        ));

        let record = registry.record(QuantizationMethod::Symmetric, &q).unwrap();
        assert!(registry.restore(&record).is_ok());
    }

    #[test]
    fn record_rejects_triple_held_by_another_implementation() {
        let mut registry = QuantizerRegistry::new();
        registry.register_marked::<ShadowUniform>().unwrap();
        let q = WeightsUniformQuantizer::new(8, vec![-1.0], vec![3.0], false, None).unwrap();
        assert!(matches!(
            registry.record(QuantizationMethod::Uniform, &q),
            Err(Error::Configuration(msg)) if msg.contains("ShadowUniform")
        ));
    }
}
