//! Models the harness does not run.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::config::ExclusionConfig;

/// Resolved exclusion list.
///
/// Switch-gated groups are folded in at construction, so lookups only
/// consult what is active for this run. An active group's reason replaces
/// the base reason for a model listed in both.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    skip: BTreeMap<String, String>,
    substrings: Vec<String>,
    prefixes: Vec<String>,
}

impl ExclusionList {
    pub fn from_config(config: &ExclusionConfig) -> Self {
        let mut skip = config.skip.clone();

        if config.contrib_ops_disabled {
            for (model, reason) in &config.contrib_ops_skip {
                skip.insert(model.clone(), reason.clone());
            }
        }

        let low_memory = config
            .low_memory
            .unwrap_or(cfg!(target_pointer_width = "32"));
        if low_memory {
            for (model, reason) in &config.low_memory_skip {
                skip.insert(model.clone(), reason.clone());
            }
        }

        let prefixes = if config.ml_ops_disabled {
            config.ml_ops_prefixes.clone()
        } else {
            Vec::new()
        };

        Self {
            skip,
            substrings: config
                .skip_substrings
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            prefixes,
        }
    }

    /// Why `model` is skipped, or `None` if it should run.
    pub fn reason(&self, model: &str) -> Option<Cow<'_, str>> {
        if let Some(reason) = self.skip.get(model) {
            return Some(Cow::Borrowed(reason.as_str()));
        }

        if let Some(prefix) = self.prefixes.iter().find(|p| model.starts_with(p.as_str())) {
            return Some(Cow::Owned(format!(
                "traditional ML ops are disabled ({}*)",
                prefix
            )));
        }

        let lower = model.to_lowercase();
        self.substrings
            .iter()
            .find(|s| lower.contains(s.as_str()))
            .map(|s| Cow::Owned(format!("model name contains '{}'", s)))
    }

    /// Number of exact-name entries in effect.
    pub fn len(&self) -> usize {
        self.skip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skip.is_empty() && self.substrings.is_empty() && self.prefixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exact_names() {
        let list = ExclusionList::from_config(&ExclusionConfig::default());
        assert_eq!(
            list.reason("mxnet_arcface").as_deref(),
            Some("Model is an invalid ONNX model")
        );
        assert_eq!(list.reason("squeezenet"), None);
        assert_eq!(list.reason("mxnet_arcface_v2"), None);
    }

    #[test]
    fn test_substrings_ignore_case() {
        let list = ExclusionList::from_config(&ExclusionConfig::default());
        assert!(list.reason("ResNet50-INT8").is_some());
        assert!(list.reason("mobilenet_QDQ").is_some());
        assert_eq!(
            list.reason("yolo_int8").as_deref(),
            Some("model name contains 'int8'")
        );
    }

    #[test]
    fn test_switch_gated_groups() {
        let mut config = ExclusionConfig::default();
        config.low_memory = Some(false);

        let list = ExclusionList::from_config(&config);
        assert_eq!(list.reason("test_tiny_yolov2"), None);
        assert_eq!(list.reason("scikit_LinearRegression"), None);
        assert_eq!(list.reason("GPT2"), None);

        config.contrib_ops_disabled = true;
        config.ml_ops_disabled = true;
        config.low_memory = Some(true);
        let list = ExclusionList::from_config(&config);
        assert!(list.reason("test_tiny_yolov2").is_some());
        assert!(list.reason("scikit_LinearRegression").is_some());
        assert!(list.reason("XGBoost_classifier").is_some());
        assert_eq!(list.reason("GPT2").as_deref(), Some("System out of memory"));
    }

    #[test]
    fn test_group_reason_replaces_base_reason() {
        let mut config = ExclusionConfig::default();
        config.low_memory = Some(false);
        let list = ExclusionList::from_config(&config);
        assert_eq!(
            list.reason("mask_rcnn_keras").as_deref(),
            Some("Model should be edited to remove the extra outputs")
        );

        config.contrib_ops_disabled = true;
        let list = ExclusionList::from_config(&config);
        assert_eq!(
            list.reason("mask_rcnn_keras").as_deref(),
            Some("Pad is not a registered function/op")
        );
    }

    #[test]
    fn test_empty_list_skips_nothing() {
        let list = ExclusionList::from_config(&ExclusionConfig::empty());
        assert!(list.is_empty());
        assert_eq!(list.reason("BERT-Squad-int8"), None);
    }
}
