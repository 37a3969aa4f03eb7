//! Supervised 2D embedding of the feature volume
//!
//! A [`Projector`] fits a [`Projection`] on the labeled voxels; the
//! [`EmbeddingProjector`] then runs every voxel through it, so the resulting
//! [`Embedding`] holds one 2D point per voxel plus the point ↔ voxel ↔ label
//! pairing of the labeled ones. Embeddings are immutable and rebuilt
//! wholesale whenever labels change.

pub mod pls;

use std::fmt;
use std::sync::Arc;

use cellcanvas_shared::{BoundingBox, Point2};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::Serialize;

use crate::error::{CanvasError, CanvasResult};
use crate::features::{into_matrix, FeatureSelection, SampleExtractor};
use crate::volume::{FeatureSource, Label, Region, VolumeShape, VolumeStore};

pub use pls::{PlsProjection, PlsProjector};

/// Minimum labeled voxels needed to fit a projection.
pub const MIN_EMBEDDING_SAMPLES: usize = 2;

/// Forward-only transform from feature space to the embedding plane.
pub trait Projection: Send + Sync {
    /// (N × F) features to (N × components) scores.
    fn transform(&self, features: ArrayView2<'_, f32>) -> CanvasResult<Array2<f32>>;

    fn n_features(&self) -> usize;

    fn n_components(&self) -> usize;
}

/// Fits a [`Projection`] from labeled samples.
pub trait Projector: Send + Sync {
    fn fit(
        &self,
        features: ArrayView2<'_, f32>,
        labels: ArrayView1<'_, Label>,
    ) -> CanvasResult<Box<dyn Projection>>;
}

/// A labeled voxel as it appears in the embedding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LabeledPoint {
    pub point: Point2,
    pub voxel: [usize; 3],
    pub label: Label,
}

pub struct Embedding {
    projection: Arc<dyn Projection>,
    sources: Vec<FeatureSource>,
    shape: VolumeShape,
    /// One row per voxel, row-major (z, y, x) order
    points: Array2<f32>,
    labeled: Vec<LabeledPoint>,
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("shape", &self.shape)
            .field("points", &self.points.nrows())
            .field("labeled", &self.labeled.len())
            .finish()
    }
}

impl Embedding {
    pub fn projection(&self) -> &Arc<dyn Projection> {
        &self.projection
    }

    pub fn sources(&self) -> &[FeatureSource] {
        &self.sources
    }

    pub fn shape(&self) -> VolumeShape {
        self.shape
    }

    /// Whole-volume point cloud, one row per voxel.
    pub fn points(&self) -> ArrayView2<'_, f32> {
        self.points.view()
    }

    pub fn point(&self, voxel: usize) -> Point2 {
        Point2::new(self.points[[voxel, 0]], self.points[[voxel, 1]])
    }

    pub fn labeled(&self) -> &[LabeledPoint] {
        &self.labeled
    }

    pub fn labeled_bounds(&self) -> Option<BoundingBox> {
        BoundingBox::of(self.labeled.iter().map(|p| p.point))
    }

    /// Run new feature rows through the same projection.
    pub fn project(&self, features: ArrayView2<'_, f32>) -> CanvasResult<Array2<f32>> {
        self.projection.transform(features)
    }

    /// Voxel of the labeled point closest to `target`.
    pub fn nearest_voxel(&self, target: Point2) -> Option<[usize; 3]> {
        self.labeled
            .iter()
            .min_by(|a, b| {
                a.point
                    .distance_sq(&target)
                    .total_cmp(&b.point.distance_sq(&target))
            })
            .map(|p| p.voxel)
    }
}

/// Builds [`Embedding`]s for a store.
pub struct EmbeddingProjector<'a> {
    store: &'a dyn VolumeStore,
    projector: &'a dyn Projector,
}

impl<'a> EmbeddingProjector<'a> {
    pub fn new(store: &'a dyn VolumeStore, projector: &'a dyn Projector) -> Self {
        Self { store, projector }
    }

    /// Read the whole feature volume and a label snapshot, then fit.
    pub fn build(&self, selection: &FeatureSelection) -> CanvasResult<Embedding> {
        let sources = selection.resolve(self.store)?;
        let region = Region::whole(self.store.shape());
        let labels = self.store.read_labels(&region)?;
        check_labeled(labels.iter().filter(|&&l| l > 0).count())?;

        let features =
            into_matrix(SampleExtractor::new(self.store).read_sources(&sources, &region)?)?;
        let labels = labels.into_shape(region.voxels()).map_err(|_| {
            CanvasError::dimension_mismatch(region.voxels(), 0, "label snapshot")
        })?;
        self.fit(sources, features.view(), labels.view())
    }

    /// Fit on whole-volume `features` (one row per voxel) and flattened `labels`.
    pub fn fit(
        &self,
        sources: Vec<FeatureSource>,
        features: ArrayView2<'_, f32>,
        labels: ArrayView1<'_, Label>,
    ) -> CanvasResult<Embedding> {
        let shape = self.store.shape();
        if features.nrows() != shape.voxels() || labels.len() != shape.voxels() {
            return Err(CanvasError::dimension_mismatch(
                shape.voxels(),
                features.nrows().min(labels.len()),
                "embedding volume",
            ));
        }

        let rows: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label > 0)
            .map(|(row, _)| row)
            .collect();
        check_labeled(rows.len())?;

        let train = features.select(Axis(0), &rows);
        let train_labels = labels.select(Axis(0), &rows);
        let projection: Arc<dyn Projection> =
            Arc::from(self.projector.fit(train.view(), train_labels.view())?);

        let points = projection.transform(features)?;
        if points.ncols() < 2 {
            return Err(CanvasError::dimension_mismatch(
                2,
                points.ncols(),
                "embedding components",
            ));
        }

        let labeled = rows
            .iter()
            .map(|&row| LabeledPoint {
                point: Point2::new(points[[row, 0]], points[[row, 1]]),
                voxel: shape.unravel(row),
                label: labels[row],
            })
            .collect::<Vec<_>>();

        tracing::info!(
            points = points.nrows(),
            labeled = labeled.len(),
            "embedding rebuilt"
        );

        Ok(Embedding {
            projection,
            sources,
            shape,
            points,
            labeled,
        })
    }
}

fn check_labeled(found: usize) -> CanvasResult<()> {
    if found < MIN_EMBEDDING_SAMPLES {
        return Err(CanvasError::InsufficientSamples {
            required: MIN_EMBEDDING_SAMPLES,
            found,
        });
    }
    Ok(())
}
