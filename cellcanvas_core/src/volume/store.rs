//! The storage contract consumed by the pipeline.
//!
//! Label and prediction volumes are mutated through `&self`: a store is
//! shared between the control thread and every background job, so
//! implementations provide their own interior locking. Any read of the label
//! volume must return a consistent snapshot, never a half-written region.

use ndarray::{Array3, Array4, ArrayView3};
use serde::{Deserialize, Serialize};

use super::{Label, Region, VolumeShape};
use crate::error::CanvasResult;

/// How a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Image and feature reads only; label/prediction writes are refused.
    ReadOnly,
    /// Label and prediction volumes may be written and flushed.
    ReadWrite,
}

/// A named per-voxel feature volume with its concatenation precedence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSource {
    pub name: String,
    /// Lower ranks come first when sources are concatenated.
    pub rank: u32,
    /// Feature vector length contributed by this source.
    pub width: usize,
}

/// Addressable array backend shared by every pipeline component.
pub trait VolumeStore: Send + Sync {
    fn shape(&self) -> VolumeShape;

    /// Available feature volumes, sorted by precedence.
    fn feature_sources(&self) -> Vec<FeatureSource>;

    fn read_image(&self, region: &Region) -> CanvasResult<Array3<f32>>;

    /// Features of one source for `region`, shaped `(z, y, x, width)`.
    fn read_features(&self, source: &str, region: &Region) -> CanvasResult<Array4<f32>>;

    /// Consistent snapshot of the label volume inside `region`.
    fn read_labels(&self, region: &Region) -> CanvasResult<Array3<Label>>;

    fn write_labels(&self, region: &Region, labels: ArrayView3<'_, Label>) -> CanvasResult<()>;

    /// Assign `label` to every voxel where `mask` is set. The mask covers the
    /// whole volume. Returns the number of voxels written.
    fn write_label_mask(&self, mask: ArrayView3<'_, bool>, label: Label) -> CanvasResult<usize>;

    /// Apply sparse paint strokes. Returns the number of voxels written.
    fn paint(&self, strokes: &[([usize; 3], Label)]) -> CanvasResult<usize>;

    fn read_predictions(&self, region: &Region) -> CanvasResult<Array3<Label>>;

    fn write_predictions(
        &self,
        region: &Region,
        predictions: ArrayView3<'_, Label>,
    ) -> CanvasResult<()>;
}
