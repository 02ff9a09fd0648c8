//! Configuration structures for the conformance harness.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::matcher::SlotOverrides;

/// Main configuration for a zoocheck run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Numeric comparison tolerances.
    pub tolerance: ToleranceConfig,

    /// Model zoo layout settings.
    pub discovery: DiscoveryConfig,

    /// Models to skip, and why.
    pub exclusions: ExclusionConfig,

    /// Per-model fixture-to-slot overrides.
    pub overrides: SlotOverrides,

    /// Inference session settings.
    pub runtime: RuntimeConfig,
}

/// Tolerances used by the tensor comparator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Absolute tolerance for float32.
    pub f32_atol: f64,

    /// Relative tolerance for float32.
    pub f32_rtol: f64,

    /// Absolute tolerance for float64.
    pub f64_atol: f64,

    /// Relative tolerance for float64.
    pub f64_rtol: f64,

    /// Maximum distance between float16/bfloat16 bit patterns.
    pub reduced_precision_ulps: u32,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            f32_atol: 1e-5,
            f32_rtol: 1e-4,
            f64_atol: 1e-8,
            f64_rtol: 1e-7,
            reduced_precision_ulps: 2,
        }
    }
}

/// Model zoo layout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Prefix of test data directory names inside a model directory.
    pub test_data_prefix: String,

    /// Models whose test data directories use a different prefix.
    pub test_data_overrides: Vec<TestDataOverride>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            test_data_prefix: "test_data".to_string(),
            test_data_overrides: vec![TestDataOverride {
                model: "LSTM_Seq_lens_unpacked".to_string(),
                opset: "opset9".to_string(),
                prefix: "seq_lens".to_string(),
            }],
        }
    }
}

impl DiscoveryConfig {
    /// Test data directory prefix for a model.
    pub fn test_data_prefix_for(&self, model: &str, opset: &str) -> &str {
        self.test_data_overrides
            .iter()
            .find(|o| o.model == model && o.opset == opset)
            .map(|o| o.prefix.as_str())
            .unwrap_or(&self.test_data_prefix)
    }
}

/// Test data directory prefix for one (model, opset) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestDataOverride {
    pub model: String,
    pub opset: String,
    pub prefix: String,
}

/// Exclusion list data.
///
/// Conditional groups only apply when their switch is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionConfig {
    /// Model directory name to skip reason.
    pub skip: BTreeMap<String, String>,

    /// Case-insensitive substrings; any model name containing one is skipped.
    pub skip_substrings: Vec<String>,

    /// The runtime was built without contrib ops.
    pub contrib_ops_disabled: bool,

    /// Additional skips when contrib ops are disabled.
    pub contrib_ops_skip: BTreeMap<String, String>,

    /// The runtime was built without traditional ML ops.
    pub ml_ops_disabled: bool,

    /// Model name prefixes of traditional ML models.
    pub ml_ops_prefixes: Vec<String>,

    /// Host cannot fit large models; `None` detects 32-bit targets.
    pub low_memory: Option<bool>,

    /// Additional skips on low-memory hosts.
    pub low_memory_skip: BTreeMap<String, String>,
}

const BUILTIN_SKIPS: &[(&str, &str)] = &[
    ("mxnet_arcface", "Model is an invalid ONNX model"),
    ("tf_inception_v2", "Debug failing model"),
    ("fp16_tiny_yolov2", "Tolerance level for float16 is not known"),
    ("fp16_test_tiny_yolov2", "ImageScaler is not a registered function/op"),
    ("fp16_coreml_FNS-Candy", "ImageScaler is not a registered function/op"),
    (
        "fp16_coreml_LinearRegression_NYCTaxi",
        "No Op registered for FeatureVectorizer with domain_version of 1",
    ),
    ("test_mnist", "Tensors of this element type are not supported by the fixture loader"),
    ("BERT_Squad", "Could not find an implementation for bert/embeddings/one_hot:OneHot(9)"),
    ("mlperf_ssd_mobilenet_300", "Could not find file output_0.pb"),
    ("tf_resnet_v1_50", "result mismatch when Conv BN Fusion is applied"),
    ("tf_resnet_v1_101", "result mismatch when Conv BN Fusion is applied"),
    ("tf_resnet_v1_152", "result mismatch when Conv BN Fusion is applied"),
    ("cntk_simple_seg", "Bad test output caused by wrong SAME_UPPER/SAME_LOWER for ConvTranspose"),
    (
        "coreml_Imputer-LogisticRegression_sklearn_load_breast_cancer",
        "Can't determine model file name",
    ),
    ("mask_rcnn_keras", "Model should be edited to remove the extra outputs"),
    ("test_maxunpool_export_with_output_shape", "results mismatch"),
    ("test_min_int8", "Could not find an implementation for Min(13)"),
    ("test_min_uint8", "Could not find an implementation for Min(13)"),
    ("test_min_int16", "Could not find an implementation for Min(13)"),
    ("test_min_uint16", "Could not find an implementation for Min(13)"),
    ("test_max_int8", "Could not find an implementation for Max(13)"),
    ("test_max_uint8", "Could not find an implementation for Max(13)"),
    ("test_max_int16", "Could not find an implementation for Max(13)"),
    ("test_max_uint16", "Could not find an implementation for Max(13)"),
    ("test_mul_uint8", "Could not find an implementation for Mul(14)"),
    ("test_cast_STRING_to_FLOAT", "Output mismatch"),
    ("test_cast_BFLOAT16_to_FLOAT", "Output mismatch"),
    ("test_cast_FLOAT_to_STRING", "Output strings can not be compared exactly"),
    ("test_castlike_STRING_to_FLOAT", "Output mismatch"),
    ("test_castlike_STRING_to_FLOAT_expanded", "Output mismatch"),
    ("test_castlike_BFLOAT16_to_FLOAT", "Metadata and expected data element counts differ"),
    (
        "test_castlike_BFLOAT16_to_FLOAT_expanded",
        "Metadata and expected data element counts differ",
    ),
    ("test_castlike_FLOAT_to_BFLOAT16", "Test data dims do not match model metadata"),
    ("test_castlike_FLOAT_to_BFLOAT16_expanded", "Test data dims do not match model metadata"),
    ("test_castlike_FLOAT_to_STRING", "string comparison does not match due to float rounding"),
    (
        "test_castlike_FLOAT_to_STRING_expanded",
        "string comparison does not match due to float rounding",
    ),
    ("test_bitshift_right_uint16", "Could not find an implementation for BitShift(11)"),
    ("test_bitshift_left_uint16", "Could not find an implementation for BitShift(11)"),
    ("test_pow_types_float32_uint64", "Could not find an implementation for Pow(15)"),
    ("test_pow_types_float32_uint32", "Could not find an implementation for Pow(15)"),
    ("test_resize_downsample_scales_cubic_align_corners", "Results mismatch"),
    ("test_resize_downsample_scales_linear_align_corners", "Results mismatch"),
    ("test_gru_batchwise", "batchwise operations not supported"),
    ("test_lstm_batchwise", "batchwise recurrent operations (layout == 1) are not supported"),
    ("test_simple_rnn_batchwise", "batchwise operations not supported"),
    ("test_batchnorm_example_training_mode", "opset14 version not implemented yet"),
    ("test_bernoulli", "random generator, results mismatch"),
    ("test_bernoulli_seed", "random generator, results mismatch"),
    ("test_bernoulli_double", "random generator, results mismatch"),
    ("test_bernoulli_expanded", "random generator, results mismatch"),
    ("test_bernoulli_seed_expanded", "random generator, results mismatch"),
    ("test_bernoulli_double_expanded", "random generator, results mismatch"),
    ("test_clip_default_int8_max_expanded", "Could not find an implementation for Less(13)"),
    ("test_softplus_expanded", "Could not find an implementation for Exp(1)"),
    ("test_softplus_example_expanded", "Could not find an implementation for Exp(1)"),
    ("test_div_uint8", "Could not find an implementation for Div(14)"),
    ("test_add_uint8", "Could not find an implementation for Add(14)"),
    ("test_col2im_pads", "Results mismatch due to a typo in test data"),
    (
        "test_optional_has_element_empty_optional_input",
        "Optional element type of the input is undefined",
    ),
    ("test_loop13_seq", "3rd input is an empty sequence, which the runtime rejects"),
    ("BERT-Squad-int8", "training domain"),
    ("YOLOv3-12-int8", "training domain"),
    ("test_training_dropout_default", "results mismatch"),
    ("test_training_dropout_default_mask", "results mismatch"),
    ("test_training_dropout", "results mismatch"),
    ("test_training_dropout_mask", "results mismatch"),
    ("test_momentum", "ai.onnx.preview.training:Momentum(-1) is not a registered function/op"),
    (
        "test_momentum_multiple",
        "ai.onnx.preview.training:Momentum(-1) is not a registered function/op",
    ),
    (
        "test_nesterov_momentum",
        "ai.onnx.preview.training:Momentum(-1) is not a registered function/op",
    ),
    ("test_adam", "ai.onnx.preview.training:Adam(-1) is not a registered function/op"),
    ("test_adam_multiple", "ai.onnx.preview.training:Adam(-1) is not a registered function/op"),
    ("test_adagrad", "ai.onnx.preview.training:Adagrad(-1) is not a registered function/op"),
    (
        "test_adagrad_multiple",
        "ai.onnx.preview.training:Adagrad(-1) is not a registered function/op",
    ),
];

const CONTRIB_OPS_SKIPS: &[(&str, &str)] = &[
    ("test_tiny_yolov2", "Fails when contrib ops are disabled"),
    ("mask_rcnn_keras", "Pad is not a registered function/op"),
];

const LOW_MEMORY_SKIPS: &[(&str, &str)] = &[
    ("test_vgg19", "Get preallocated buffer for initializer failed"),
    ("GPT2_LM_HEAD", "System out of memory"),
    ("GPT2", "System out of memory"),
    ("test_GPT2", "System out of memory"),
    ("tf_pnasnet_large", "Get preallocated buffer for initializer failed"),
    ("tf_nasnet_large", "Get preallocated buffer for initializer failed"),
    ("test_zfnet512", "System out of memory"),
    ("test_bvlc_reference_caffenet", "System out of memory"),
    ("coreml_VGG16_ImageNet", "System out of memory"),
    ("test_ssd", "System out of memory"),
    ("roberta_sequence_classification", "System out of memory"),
    ("VGG 19", "bad allocation"),
    ("VGG 19-caffe2", "bad allocation"),
    ("VGG 19-bn", "bad allocation"),
    ("VGG 16", "bad allocation"),
    ("VGG 16-bn", "bad allocation"),
    ("VGG 16-fp32", "bad allocation"),
];

fn to_map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            skip: to_map(BUILTIN_SKIPS),
            skip_substrings: vec!["int8".to_string(), "qdq".to_string()],
            contrib_ops_disabled: false,
            contrib_ops_skip: to_map(CONTRIB_OPS_SKIPS),
            ml_ops_disabled: false,
            ml_ops_prefixes: ["scikit_", "libsvm_", "coreml_", "keras2coreml_", "XGBoost_"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            low_memory: None,
            low_memory_skip: to_map(LOW_MEMORY_SKIPS),
        }
    }
}

impl ExclusionConfig {
    /// An exclusion list that skips nothing.
    pub fn empty() -> Self {
        Self {
            skip: BTreeMap::new(),
            skip_substrings: Vec::new(),
            contrib_ops_disabled: false,
            contrib_ops_skip: BTreeMap::new(),
            ml_ops_disabled: false,
            ml_ops_prefixes: Vec::new(),
            low_memory: Some(false),
            low_memory_skip: BTreeMap::new(),
        }
    }
}

/// Inference session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Intra-op threads per session.
    pub intra_threads: usize,

    /// Run full graph optimizations.
    pub optimize: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            intra_threads: 1,
            optimize: true,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Apply `DisableContribOps` / `DisableMlOps` switches from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment switches using `lookup` as the variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("DisableContribOps").as_deref() == Some("ON") {
            self.exclusions.contrib_ops_disabled = true;
        }
        if lookup("DisableMlOps").as_deref() == Some("ON") {
            self.exclusions.ml_ops_disabled = true;
        }
    }
}
