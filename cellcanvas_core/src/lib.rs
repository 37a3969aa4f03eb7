//! # CellCanvas Core
//!
//! Interactive voxel classification for 3D volumes. A user paints sparse
//! labels; the pipeline samples per-voxel feature vectors under those labels,
//! fits a classifier, predicts a dense segmentation and keeps a 2D embedding
//! of the labeled voxels in which new labels can be lassoed.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use cellcanvas_core::{CanvasConfig, MemoryStore, Pipeline};
//! use ndarray::{Array3, Array4};
//!
//! let features = Array4::from_shape_fn((2, 4, 4, 1), |(_, _, x, _)| x as f32);
//! let store = MemoryStore::new(Array3::zeros((2, 4, 4)))
//!     .with_feature_source("tomotwin", features)
//!     .unwrap();
//!
//! let mut pipeline = Pipeline::new(Arc::new(store), CanvasConfig::default()).unwrap();
//! pipeline.paint(vec![([0, 0, 0], 1), ([0, 0, 3], 2)]).unwrap();
//! pipeline.request_fit().unwrap();
//! pipeline.wait_idle().unwrap();
//!
//! pipeline.request_predict().unwrap();
//! pipeline.wait_idle().unwrap();
//! assert!(pipeline.prediction_distribution().labeled_count() > 0);
//! ```
//!
//! ## Core Modules
//!
//! - [`volume`] - Volume addressing and the label/prediction store
//! - [`features`] - Training samples drawn from a region policy
//! - [`learner`] - Random forest and gradient boosting classifiers
//! - [`embedding`] - Supervised 2D projection of the feature space
//! - [`selection`] - Lasso selection in embedding space
//! - [`background`] - Median-distance background proposals
//! - [`jobs`] - Single-flight job slots and versioned results
//! - [`pipeline`] - Control state machine and the job engine
//! - [`config`] - Pipeline configuration via TOML
//! - [`logging`] - tracing setup and the JSON-lines job log

pub mod background;
pub mod config;
pub mod embedding;
pub mod error;
pub mod features;
pub mod jobs;
pub mod learner;
pub mod logging;
pub mod pipeline;
pub mod selection;
pub mod volume;

pub use background::{BackgroundConfig, BackgroundEstimate, BackgroundEstimator};
pub use config::{CanvasConfig, ConfigError, LoggingConfig, PipelineConfig};
pub use embedding::{Embedding, EmbeddingProjector, PlsProjector, Projection, Projector};
pub use error::{CanvasError, CanvasResult, ErrorClass};
pub use features::{FeatureSelection, RegionPolicy, SampleBatch, SampleExtractor};
pub use jobs::{CancellationToken, JobKind, JobOutcome};
pub use learner::{
    Classifier, ClassifierConfig, GradientBoosting, Model, ModelKind, ModelSummary, RandomForest,
    TrainedModel,
};
pub use logging::{init_tracing, JobLog, JobLogEntry};
pub use pipeline::{Command, Pipeline, PipelineEvent};
pub use selection::{InteractiveSelector, SelectionOutcome};
pub use volume::{
    FeatureSource, Label, MemoryStore, OpenMode, Region, VolumeShape, VolumeStore, UNLABELED,
};

pub use cellcanvas_shared::{ClassDistribution, Point2, Polygon};
