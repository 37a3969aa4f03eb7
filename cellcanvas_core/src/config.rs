//! Pipeline configuration via TOML files.
//!
//! Every section is optional. Defaults: 1 s debounce, live fitting off,
//! random forest, 1st percentile background painted as label 1.
//!
//! ```toml
//! [pipeline]
//! debounce_ms = 1000
//! live_fit = false
//! live_prediction = true
//!
//! [pipeline.viewport]
//! z_step = 12
//! corners = [[12, 0, 0], [12, 256, 256]]
//!
//! [features]
//! enabled = ["tomotwin"]
//!
//! [classifier]
//! kind = "random_forest"
//! seed = 42
//!
//! [classifier.forest]
//! n_estimators = 50
//!
//! [background]
//! percentile = 1.0
//! label = 1
//!
//! [logging]
//! job_log = "logs/jobs.jsonl"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::background::BackgroundConfig;
use crate::features::{FeatureSelection, RegionPolicy};
use crate::learner::ClassifierConfig;
use crate::volume::Region;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Scheduling behaviour of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    /// Quiescence window before label changes trigger a refresh
    pub debounce: Duration,
    /// Refit after every user paint
    pub live_fit: bool,
    /// Predict after every successful fit
    pub live_prediction: bool,
    pub region: RegionPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(default_debounce_ms()),
            live_fit: false,
            live_prediction: false,
            region: RegionPolicy::WholeVolume,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoggingConfig {
    /// JSON-lines job log, disabled when absent
    pub job_log: Option<PathBuf>,
}

/// Complete configuration of a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanvasConfig {
    pub pipeline: PipelineConfig,
    /// Feature sources enabled at start-up
    pub features: FeatureSelection,
    pub classifier: ClassifierConfig,
    pub background: BackgroundConfig,
    pub logging: LoggingConfig,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            features: FeatureSelection::from_names(default_enabled()),
            classifier: ClassifierConfig::default(),
            background: BackgroundConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CanvasConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawCanvasConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;

        let pipeline = PipelineConfig::try_from(raw.pipeline)?;
        let features = FeatureSelection::from_names(raw.features.enabled);

        raw.classifier
            .validate()
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        raw.background
            .validate()
            .map_err(|err| ConfigError::Parse(err.to_string()))?;

        Ok(Self {
            pipeline,
            features,
            classifier: raw.classifier,
            background: raw.background,
            logging: LoggingConfig {
                job_log: raw.logging.job_log,
            },
        })
    }
}

impl PipelineConfig {
    fn try_from(raw: RawPipeline) -> Result<Self, ConfigError> {
        let region = match raw.viewport {
            None => RegionPolicy::WholeVolume,
            Some(viewport) => {
                let region = Region::viewport(viewport.z_step, viewport.corners);
                if region.is_empty() {
                    return Err(ConfigError::Parse(
                        "pipeline.viewport must span at least one voxel".into(),
                    ));
                }
                RegionPolicy::Viewport(region)
            }
        };

        Ok(Self {
            debounce: Duration::from_millis(raw.debounce_ms),
            live_fit: raw.live_fit,
            live_prediction: raw.live_prediction,
            region,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCanvasConfig {
    #[serde(default)]
    pipeline: RawPipeline,
    #[serde(default)]
    features: RawFeatures,
    #[serde(default)]
    classifier: ClassifierConfig,
    #[serde(default)]
    background: BackgroundConfig,
    #[serde(default)]
    logging: RawLogging,
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    #[serde(default = "default_debounce_ms")]
    debounce_ms: u64,
    #[serde(default)]
    live_fit: bool,
    #[serde(default)]
    live_prediction: bool,
    #[serde(default)]
    viewport: Option<RawViewport>,
}

impl Default for RawPipeline {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            live_fit: false,
            live_prediction: false,
            viewport: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawViewport {
    z_step: usize,
    corners: [[usize; 3]; 2],
}

#[derive(Debug, Deserialize)]
struct RawFeatures {
    #[serde(default = "default_enabled")]
    enabled: Vec<String>,
}

impl Default for RawFeatures {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawLogging {
    #[serde(default)]
    job_log: Option<PathBuf>,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_enabled() -> Vec<String> {
    vec!["tomotwin".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::ModelKind;

    #[test]
    fn empty_document_uses_defaults() {
        let config = CanvasConfig::from_str("").unwrap();
        assert_eq!(config, CanvasConfig::default());
        assert_eq!(config.pipeline.debounce, Duration::from_secs(1));
        assert!(config.features.is_enabled("tomotwin"));
        assert_eq!(config.classifier.forest.n_estimators, 50);
        assert_eq!(config.background.label, 1);
    }

    #[test]
    fn parses_custom_values() {
        let toml = r#"
            [pipeline]
            debounce_ms = 250
            live_prediction = true

            [pipeline.viewport]
            z_step = 3
            corners = [[3, 0, 0], [3, 16, 32]]

            [features]
            enabled = ["skimage", "tomotwin"]

            [classifier]
            kind = "gradient_boosting"

            [classifier.boost]
            n_rounds = 10

            [background]
            percentile = 5.0
            label = 9

            [logging]
            job_log = "logs/jobs.jsonl"
        "#;
        let config = CanvasConfig::from_str(toml).unwrap();

        assert_eq!(config.pipeline.debounce, Duration::from_millis(250));
        assert!(config.pipeline.live_prediction);
        assert!(!config.pipeline.live_fit);
        assert_eq!(
            config.pipeline.region,
            RegionPolicy::Viewport(Region::new(3..4, 0..16, 0..32))
        );
        assert!(config.features.is_enabled("skimage"));
        assert_eq!(config.classifier.kind, ModelKind::GradientBoosting);
        assert_eq!(config.classifier.boost.n_rounds, 10);
        assert_eq!(config.classifier.boost.learning_rate, 0.1);
        assert_eq!(config.background.percentile, 5.0);
        assert_eq!(
            config.logging.job_log,
            Some(PathBuf::from("logs/jobs.jsonl"))
        );
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            CanvasConfig::from_str("[background]\npercentile = 101.0"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            CanvasConfig::from_str("[classifier.forest]\nmax_samples = 0.0"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            CanvasConfig::from_str("[classifier]\nkind = \"svm\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            CanvasConfig::from_str("[pipeline]\ndebounce_ms = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CanvasConfig::load_from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
