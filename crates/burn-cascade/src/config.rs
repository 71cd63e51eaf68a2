//! Cascade and stage configuration
//!
//! A cascade document lists its stages under `diffusion_cascade` using
//! sequential keys. Each entry either points at a separate stage document
//! or embeds the stage configuration directly:
//!
//! ```yaml
//! diffusion_cascade:
//!   cascade_layer_1:
//!     config: base_64.yaml
//!   cascade_layer_2:
//!     data:
//!       image_size: 256
//!     super_resolution:
//!       conditioning_key: low_res
//!       low_resolution_size: 64
//! ```
//!
//! Everything a stage needs beyond resolution and conditioning (network,
//! noise schedule, training settings) is kept untouched in `extra` and
//! handed to the stage factory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix of the sequential stage keys
pub const STAGE_KEY_PREFIX: &str = "cascade_layer_";

/// Key of the stage at `index` (1-based)
pub fn stage_key(index: usize) -> String {
    format!("{STAGE_KEY_PREFIX}{index}")
}

/// Parses a canonical stage key back into its 1-based index
fn parse_stage_key(key: &str) -> Option<usize> {
    let index: usize = key.strip_prefix(STAGE_KEY_PREFIX)?.parse().ok()?;
    (index >= 1 && stage_key(index) == key).then_some(index)
}

fn default_num_channels() -> usize {
    3
}

/// Data settings of a single stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Square spatial size the stage consumes and produces
    pub image_size: usize,
    /// Image channels
    #[serde(default = "default_num_channels")]
    pub num_channels: usize,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Low-resolution conditioning contract of a super-resolution stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperResolutionConfig {
    /// Context key under which the low-resolution image is provided
    pub conditioning_key: String,
    /// Square size of the low-resolution image
    pub low_resolution_size: usize,
    /// Stage-specific conditioning settings (e.g. noise augmentation)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Configuration of one diffusion stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub data: DataConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_resolution: Option<SuperResolutionConfig>,
    /// Stage-specific sections consumed by the stage itself
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl StageConfig {
    /// Creates a stage configuration with the given input size
    pub fn new(image_size: usize) -> Self {
        Self {
            data: DataConfig {
                image_size,
                num_channels: default_num_channels(),
                extra: BTreeMap::new(),
            },
            super_resolution: None,
            extra: BTreeMap::new(),
        }
    }

    /// Declares this stage as a super-resolution stage
    pub fn with_super_resolution(
        mut self,
        conditioning_key: impl Into<String>,
        low_resolution_size: usize,
    ) -> Self {
        self.super_resolution = Some(SuperResolutionConfig {
            conditioning_key: conditioning_key.into(),
            low_resolution_size,
            extra: BTreeMap::new(),
        });
        self
    }

    /// Sets the number of image channels
    pub fn with_num_channels(mut self, num_channels: usize) -> Self {
        self.data.num_channels = num_channels;
        self
    }

    /// Loads a stage document from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents, &path.display().to_string())
    }

    /// Parses a stage document; `origin` names it in error messages
    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
            origin: origin.to_string(),
            source,
        })
    }

    /// Serializes back to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|source| ConfigError::Yaml {
            origin: "stage config".to_string(),
            source,
        })
    }

    /// Input size of the stage
    pub fn image_size(&self) -> usize {
        self.data.image_size
    }

    /// Conditioning contract, present only on super-resolution stages
    pub fn conditioning(&self) -> Option<&SuperResolutionConfig> {
        self.super_resolution.as_ref()
    }

    /// Checks the structural invariants of a single stage
    pub fn validate(&self, stage: usize) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidStage {
            stage,
            reason: reason.to_string(),
        };

        if self.data.image_size == 0 {
            return Err(invalid("data.image_size must be positive"));
        }
        if self.data.num_channels == 0 {
            return Err(invalid("data.num_channels must be positive"));
        }
        if let Some(sr) = &self.super_resolution {
            if sr.conditioning_key.is_empty() {
                return Err(invalid("super_resolution.conditioning_key must not be empty"));
            }
            if sr.low_resolution_size == 0 {
                return Err(invalid("super_resolution.low_resolution_size must be positive"));
            }
        }
        Ok(())
    }
}

/// Reference to a stage document on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageReference {
    pub config: PathBuf,
}

/// A stage entry in the cascade document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageEntry {
    /// Stage configuration stored in its own document
    Reference(StageReference),
    /// Stage configuration embedded in the cascade document
    Inline(Box<StageConfig>),
}

/// Where a resolved stage configuration came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StageSource {
    File(PathBuf),
    Inline,
}

impl fmt::Display for StageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageSource::File(path) => write!(f, "{}", path.display()),
            StageSource::Inline => write!(f, "<inline>"),
        }
    }
}

/// A stage configuration with its position in the cascade
#[derive(Debug, Clone)]
pub struct ResolvedStage {
    /// 1-based position
    pub index: usize,
    pub source: StageSource,
    pub config: StageConfig,
}

/// Configuration of a whole cascade
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CascadeConfig {
    pub diffusion_cascade: BTreeMap<String, StageEntry>,
    /// Other top-level sections, kept for the training driver
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
    /// Directory relative stage references resolve against
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl CascadeConfig {
    /// Builds a cascade configuration from embedded stage configurations
    pub fn from_stages(stages: impl IntoIterator<Item = StageConfig>) -> Self {
        let diffusion_cascade = stages
            .into_iter()
            .enumerate()
            .map(|(i, stage)| (stage_key(i + 1), StageEntry::Inline(Box::new(stage))))
            .collect();
        Self {
            diffusion_cascade,
            ..Default::default()
        }
    }

    /// Loads a cascade document; relative stage references resolve
    /// against the document's directory
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
            origin: path.display().to_string(),
            source,
        })?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parses a cascade document; relative stage references resolve
    /// against the working directory
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
            origin: "cascade config".to_string(),
            source,
        })
    }

    /// Overrides the directory relative stage references resolve against
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Stage entries in cascade order
    ///
    /// Scans `cascade_layer_1`, `cascade_layer_2`, ... up to the first
    /// missing index. Any other key under `diffusion_cascade` is rejected so
    /// a gap never silently truncates the cascade.
    pub fn stage_entries(&self) -> Result<Vec<(usize, &StageEntry)>, ConfigError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.diffusion_cascade.get(&stage_key(entries.len() + 1)) {
            entries.push((entries.len() + 1, entry));
        }

        let contiguous = entries.len();
        for key in self.diffusion_cascade.keys() {
            match parse_stage_key(key) {
                Some(index) if index <= contiguous => {}
                Some(_) => {
                    return Err(ConfigError::StageGap {
                        key: key.clone(),
                        missing: contiguous + 1,
                    });
                }
                None => return Err(ConfigError::UnknownStageKey(key.clone())),
            }
        }

        if entries.is_empty() {
            return Err(ConfigError::EmptyCascade);
        }
        Ok(entries)
    }

    /// Number of stages, or an error if the stage keys are malformed
    pub fn num_stages(&self) -> Result<usize, ConfigError> {
        self.stage_entries().map(|entries| entries.len())
    }

    /// Loads every stage configuration in cascade order
    pub fn resolve_stages(&self) -> Result<Vec<ResolvedStage>, ConfigError> {
        self.stage_entries()?
            .into_iter()
            .map(|(index, entry)| {
                let (source, config) = match entry {
                    StageEntry::Inline(config) => (StageSource::Inline, config.as_ref().clone()),
                    StageEntry::Reference(reference) => {
                        let path = self.resolve_path(&reference.config);
                        let config = StageConfig::from_file(&path)?;
                        (StageSource::File(path), config)
                    }
                };
                config.validate(index)?;
                Ok(ResolvedStage {
                    index,
                    source,
                    config,
                })
            })
            .collect()
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_STAGE: &str = r#"
diffusion_cascade:
  cascade_layer_1:
    data:
      image_size: 64
  cascade_layer_2:
    data:
      image_size: 256
      num_channels: 3
    super_resolution:
      conditioning_key: low_res
      low_resolution_size: 64
    model:
      channels: 128
training:
  batch_size: 8
"#;

    #[test]
    fn test_stage_key_roundtrip() {
        assert_eq!(stage_key(3), "cascade_layer_3");
        assert_eq!(parse_stage_key("cascade_layer_3"), Some(3));
        assert_eq!(parse_stage_key("cascade_layer_0"), None);
        assert_eq!(parse_stage_key("cascade_layer_01"), None);
        assert_eq!(parse_stage_key("layer_1"), None);
    }

    #[test]
    fn test_parse_inline_cascade() {
        let config = CascadeConfig::from_yaml_str(TWO_STAGE).unwrap();
        let stages = config.resolve_stages().unwrap();

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].index, 1);
        assert_eq!(stages[0].config.image_size(), 64);
        assert_eq!(stages[0].config.data.num_channels, 3);
        assert!(stages[0].config.conditioning().is_none());

        let sr = stages[1].config.conditioning().unwrap();
        assert_eq!(sr.conditioning_key, "low_res");
        assert_eq!(sr.low_resolution_size, 64);
        assert!(stages[1].config.extra.contains_key("model"));
        assert!(config.extra.contains_key("training"));
    }

    #[test]
    fn test_gap_is_rejected() {
        let yaml = r#"
diffusion_cascade:
  cascade_layer_1:
    data: { image_size: 64 }
  cascade_layer_3:
    data: { image_size: 256 }
"#;
        let config = CascadeConfig::from_yaml_str(yaml).unwrap();
        match config.stage_entries() {
            Err(ConfigError::StageGap { key, missing }) => {
                assert_eq!(key, "cascade_layer_3");
                assert_eq!(missing, 2);
            }
            other => panic!("expected StageGap, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_first_stage() {
        let yaml = r#"
diffusion_cascade:
  cascade_layer_2:
    data: { image_size: 64 }
"#;
        let config = CascadeConfig::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            config.stage_entries(),
            Err(ConfigError::StageGap { missing: 1, .. })
        ));
    }

    #[test]
    fn test_empty_and_unknown_keys() {
        let config = CascadeConfig::from_yaml_str("diffusion_cascade: {}").unwrap();
        assert!(matches!(config.stage_entries(), Err(ConfigError::EmptyCascade)));

        let yaml = r#"
diffusion_cascade:
  cascade_layer_1:
    data: { image_size: 64 }
  refiner:
    data: { image_size: 64 }
"#;
        let config = CascadeConfig::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            config.stage_entries(),
            Err(ConfigError::UnknownStageKey(key)) if key == "refiner"
        ));
    }

    #[test]
    fn test_many_stages_keep_numeric_order() {
        let config = CascadeConfig::from_stages((1..=11).map(|i| StageConfig::new(i * 8)));
        let sizes: Vec<usize> = config
            .resolve_stages()
            .unwrap()
            .iter()
            .map(|s| s.config.image_size())
            .collect();
        assert_eq!(sizes, (1..=11).map(|i| i * 8).collect::<Vec<_>>());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(StageConfig::new(0).validate(1).is_err());
        assert!(StageConfig::new(64)
            .with_super_resolution("low_res", 0)
            .validate(2)
            .is_err());
        assert!(StageConfig::new(64)
            .with_super_resolution("", 32)
            .validate(2)
            .is_err());
        assert!(StageConfig::new(64)
            .with_super_resolution("low_res", 32)
            .validate(2)
            .is_ok());
    }

    #[test]
    fn test_stage_yaml_roundtrip_preserves_extra() {
        let config = CascadeConfig::from_yaml_str(TWO_STAGE).unwrap();
        let stage = config.resolve_stages().unwrap().remove(1).config;
        let yaml = stage.to_yaml().unwrap();
        let parsed = StageConfig::from_yaml_str(&yaml, "roundtrip").unwrap();
        assert_eq!(parsed, stage);
    }

    #[test]
    fn test_super_resolution_settings_survive_roundtrip() {
        let yaml = r#"
data:
  image_size: 256
super_resolution:
  conditioning_key: low_res
  low_resolution_size: 64
  noise_augmentation: 0.2
"#;
        let stage = StageConfig::from_yaml_str(yaml, "upsampler").unwrap();
        let sr = stage.conditioning().unwrap();
        assert_eq!(sr.low_resolution_size, 64);
        assert_eq!(
            sr.extra.get("noise_augmentation").and_then(|v| v.as_f64()),
            Some(0.2)
        );

        let out = stage.to_yaml().unwrap();
        assert!(out.contains("noise_augmentation"));
        let reparsed = StageConfig::from_yaml_str(&out, "roundtrip").unwrap();
        assert_eq!(reparsed, stage);
    }
}
