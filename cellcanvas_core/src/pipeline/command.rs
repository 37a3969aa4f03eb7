//! Messages in and out of the pipeline.

use std::sync::Arc;

use cellcanvas_shared::{ClassDistribution, Polygon};

use crate::background::BackgroundEstimate;
use crate::embedding::Embedding;
use crate::features::{FeatureSelection, RegionPolicy};
use crate::jobs::{JobKind, JobOutcome};
use crate::learner::{ModelKind, ModelSummary};
use crate::selection::SelectionOutcome;
use crate::volume::Label;

/// Voxels painted by the user since the last event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaintEvent {
    pub strokes: Vec<([usize; 3], Label)>,
}

impl PaintEvent {
    pub fn new(strokes: Vec<([usize; 3], Label)>) -> Self {
        Self { strokes }
    }

    /// Paint every voxel in `voxels` with `label`.
    pub fn brush(voxels: impl IntoIterator<Item = [usize; 3]>, label: Label) -> Self {
        Self {
            strokes: voxels.into_iter().map(|voxel| (voxel, label)).collect(),
        }
    }
}

/// A background job reporting back to the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub kind: JobKind,
    pub generation: u64,
    pub outcome: JobOutcome,
}

/// Inputs of the control state machine.
#[derive(Debug, Clone)]
pub enum Command {
    Paint(PaintEvent),
    FitRequested,
    PredictRequested,
    BackgroundEstimateRequested,
    /// Lasso drawn in embedding space; paints the active label
    SelectionMade { polygon: Polygon },
    SetActiveLabel(Label),
    SetFeatureEnabled { source: String, enabled: bool },
    SetRegionPolicy(RegionPolicy),
    SetModelKind(ModelKind),
    SetLiveFit(bool),
    SetLivePrediction(bool),
    Completed(Completion),
}

/// Parameters captured when a fit is requested.
#[derive(Debug, Clone, PartialEq)]
pub struct FitRequest {
    pub kind: ModelKind,
    pub policy: RegionPolicy,
    pub selection: FeatureSelection,
}

/// Work the engine must carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ApplyPaint(PaintEvent),
    StartFit(FitRequest),
    StartPredict,
    StartBackgroundEstimate { selection: FeatureSelection },
    StartSelection { polygon: Polygon, label: Label },
    RebuildEmbedding { selection: FeatureSelection },
    RefreshStats,
}

/// Notifications for the rendering side.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ModelTrained {
        generation: u64,
        summary: ModelSummary,
    },
    PredictionWritten {
        generation: u64,
        distribution: ClassDistribution,
    },
    EmbeddingRebuilt {
        generation: u64,
        embedding: Arc<Embedding>,
    },
    SelectionPainted {
        generation: u64,
        outcome: SelectionOutcome,
    },
    BackgroundEstimated {
        generation: u64,
        estimate: BackgroundEstimate,
        painted: usize,
    },
    DistributionsRefreshed {
        labels: ClassDistribution,
        predictions: ClassDistribution,
    },
    JobSkipped {
        kind: JobKind,
        generation: u64,
        reason: String,
    },
    JobFailed {
        kind: JobKind,
        generation: u64,
        error: String,
    },
    JobDiscarded {
        kind: JobKind,
        generation: u64,
    },
}

impl PipelineEvent {
    /// The job kind this event reports on, if any.
    pub fn job_kind(&self) -> Option<JobKind> {
        match self {
            PipelineEvent::ModelTrained { .. } => Some(JobKind::Fit),
            PipelineEvent::PredictionWritten { .. } => Some(JobKind::Predict),
            PipelineEvent::EmbeddingRebuilt { .. } => Some(JobKind::Embedding),
            PipelineEvent::SelectionPainted { .. } => Some(JobKind::Selection),
            PipelineEvent::BackgroundEstimated { .. } => Some(JobKind::BackgroundEstimate),
            PipelineEvent::DistributionsRefreshed { .. } => None,
            PipelineEvent::JobSkipped { kind, .. }
            | PipelineEvent::JobFailed { kind, .. }
            | PipelineEvent::JobDiscarded { kind, .. } => Some(*kind),
        }
    }
}
