//! Error types for the classification pipeline
//!
//! Every failure is tagged with an [`ErrorClass`] that decides how a job
//! reacts to it: configuration and data errors are expected steady states
//! (the job is skipped and prior state stays active), state errors are usage
//! order violations that go back to the caller, and storage errors fail only
//! the job that hit them.

use serde::Serialize;
use thiserror::Error;

use crate::volume::snapshot::SnapshotError;

/// Result type alias for pipeline operations
pub type CanvasResult<T> = Result<T, CanvasError>;

/// Coarse taxonomy used by the job policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorClass {
    Configuration,
    Data,
    State,
    Storage,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CanvasError {
    /// No feature volume is enabled for sampling
    #[error("No feature source selected: enable at least one feature volume")]
    NoFeatureSourceSelected,

    /// The selection names a feature volume the store does not have
    #[error("Unknown feature source '{name}'")]
    UnknownFeatureSource { name: String },

    /// Region contains no voxel with label > 0
    #[error("Empty label set: region {region} contains no labeled voxels")]
    EmptyLabelSet { region: String },

    /// Nothing left to train on once unlabeled rows are discarded
    #[error("Insufficient labels: no labeled samples remain after discarding label 0")]
    InsufficientLabels,

    /// The embedding needs at least two labeled points
    #[error("Insufficient samples: embedding requires {required} labeled voxels, found {found}")]
    InsufficientSamples { required: usize, found: usize },

    /// Every voxel sits on the feature median
    #[error("No variance: all feature vectors equal the median, background threshold is undefined")]
    NoVariance,

    /// Shapes that must agree do not
    #[error("Dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        expected: usize,
        got: usize,
        context: String,
    },

    /// A lasso with fewer than three vertices
    #[error("Degenerate polygon: a lasso needs at least 3 vertices, got {vertices}")]
    DegeneratePolygon { vertices: usize },

    /// A parameter outside its valid range
    #[error("Invalid parameter '{parameter}' = '{value}': must satisfy {constraint}")]
    InvalidParameter {
        parameter: String,
        value: String,
        constraint: String,
    },

    /// Prediction requested before any model was fit
    #[error("No model available: fit a model before requesting a prediction")]
    NoModelAvailable,

    /// Selection requested before any embedding was built
    #[error("No projection available: the embedding needs at least two labeled voxels")]
    NoProjection,

    /// A job was superseded or shut down before it could publish
    #[error("Job cancelled before publishing its result")]
    Cancelled,

    /// Region does not fit inside the volume
    #[error("Region {region} is out of bounds for volume {shape}")]
    RegionOutOfBounds { region: String, shape: String },

    /// Write attempted on a store opened read-only
    #[error("Volume store is read-only")]
    ReadOnly,

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot encode/decode failure
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl CanvasError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CanvasError::NoFeatureSourceSelected
            | CanvasError::UnknownFeatureSource { .. }
            | CanvasError::InvalidParameter { .. } => ErrorClass::Configuration,
            CanvasError::EmptyLabelSet { .. }
            | CanvasError::InsufficientLabels
            | CanvasError::InsufficientSamples { .. }
            | CanvasError::NoVariance
            | CanvasError::DimensionMismatch { .. }
            | CanvasError::DegeneratePolygon { .. } => ErrorClass::Data,
            CanvasError::NoModelAvailable | CanvasError::NoProjection => ErrorClass::State,
            CanvasError::Cancelled => ErrorClass::Cancelled,
            CanvasError::RegionOutOfBounds { .. }
            | CanvasError::ReadOnly
            | CanvasError::Io(_)
            | CanvasError::Snapshot(_) => ErrorClass::Storage,
        }
    }

    /// Expected steady states: skip the job, keep prior state, don't surface.
    pub fn is_expected(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Configuration | ErrorClass::Data | ErrorClass::Cancelled
        )
    }

    pub fn dimension_mismatch(expected: usize, got: usize, context: impl Into<String>) -> Self {
        CanvasError::DimensionMismatch {
            expected,
            got,
            context: context.into(),
        }
    }

    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl ToString,
        constraint: impl Into<String>,
    ) -> Self {
        CanvasError::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
            constraint: constraint.into(),
        }
    }

    pub fn unknown_source(name: impl Into<String>) -> Self {
        CanvasError::UnknownFeatureSource { name: name.into() }
    }
}
