//! Lasso selection in embedding space, written back as voxel labels.
//!
//! The embedding already holds the projection of every voxel, so a lasso is
//! resolved by testing each projected point against the polygon, mapping flat
//! point indices back to `(z, y, x)` and writing the target label through a
//! single bulk mask write.

use cellcanvas_shared::{Point2, Polygon};
use ndarray::Array3;
use rayon::prelude::*;
use serde::Serialize;

use crate::embedding::Embedding;
use crate::error::{CanvasError, CanvasResult};
use crate::jobs::CancellationToken;
use crate::volume::{Label, VolumeStore};

/// Voxels picked by one lasso, not yet written.
#[derive(Debug, Clone)]
pub struct SelectionMask {
    pub mask: Array3<bool>,
    pub selected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SelectionOutcome {
    pub label: Label,
    /// Voxels whose point fell inside the lasso
    pub painted: usize,
}

pub struct InteractiveSelector<'a> {
    store: &'a dyn VolumeStore,
}

impl<'a> InteractiveSelector<'a> {
    pub fn new(store: &'a dyn VolumeStore) -> Self {
        Self { store }
    }

    /// Mask of every voxel whose projected point lies inside `polygon`
    /// (boundary included).
    pub fn mask(
        &self,
        embedding: Option<&Embedding>,
        polygon: &Polygon,
        token: &CancellationToken,
    ) -> CanvasResult<SelectionMask> {
        let embedding = embedding.ok_or(CanvasError::NoProjection)?;
        if !polygon.is_closed() {
            return Err(CanvasError::DegeneratePolygon {
                vertices: polygon.vertices().len(),
            });
        }

        let shape = self.store.shape();
        if embedding.shape() != shape {
            return Err(CanvasError::dimension_mismatch(
                shape.voxels(),
                embedding.shape().voxels(),
                "embedding points",
            ));
        }

        let bounds = polygon.bounding_box().ok_or(CanvasError::DegeneratePolygon {
            vertices: polygon.vertices().len(),
        })?;
        let points = embedding.points();

        let inside: Vec<bool> = (0..shape.voxels())
            .into_par_iter()
            .map(|voxel| {
                let point = Point2::new(points[[voxel, 0]], points[[voxel, 1]]);
                bounds.contains(point) && polygon.contains(point)
            })
            .collect();

        if token.is_cancelled() {
            return Err(CanvasError::Cancelled);
        }

        let selected = inside.iter().filter(|&&hit| hit).count();
        let mask = Array3::from_shape_vec(shape.dim(), inside).map_err(|_| {
            CanvasError::dimension_mismatch(shape.voxels(), 0, "selection mask")
        })?;

        tracing::debug!(selected, "lasso resolved");
        Ok(SelectionMask { mask, selected })
    }

    /// Write `label` into every masked voxel.
    pub fn apply(&self, selection: &SelectionMask, label: Label) -> CanvasResult<SelectionOutcome> {
        let painted = self.store.write_label_mask(selection.mask.view(), label)?;
        tracing::info!(label, painted, "selection painted");
        Ok(SelectionOutcome { label, painted })
    }

    /// [`mask`](Self::mask) followed by [`apply`](Self::apply).
    pub fn select(
        &self,
        embedding: Option<&Embedding>,
        polygon: &Polygon,
        label: Label,
        token: &CancellationToken,
    ) -> CanvasResult<SelectionOutcome> {
        let selection = self.mask(embedding, polygon, token)?;
        self.apply(&selection, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProjector, PlsProjector};
    use crate::features::FeatureSelection;
    use crate::volume::{MemoryStore, Region};
    use ndarray::Array4;

    fn store() -> MemoryStore {
        let features = Array4::from_shape_fn((2, 2, 5, 2), |(z, y, x, f)| {
            if f == 0 {
                x as f32
            } else {
                (y + 2 * z) as f32
            }
        });
        MemoryStore::new(Array3::zeros((2, 2, 5)))
            .with_feature_source("tomotwin", features)
            .unwrap()
    }

    fn embed(store: &MemoryStore) -> Embedding {
        EmbeddingProjector::new(store, &PlsProjector::default())
            .build(&FeatureSelection::from_names(["tomotwin"]))
            .unwrap()
    }

    #[test]
    fn without_embedding_is_state_error() {
        let store = store();
        let polygon = Polygon::from_pairs(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);
        let err = InteractiveSelector::new(&store)
            .select(None, &polygon, 2, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, CanvasError::NoProjection));
    }

    #[test]
    fn degenerate_lasso_is_rejected() {
        let store = store();
        store.paint(&[([0, 0, 0], 1), ([1, 1, 4], 2)]).unwrap();
        let embedding = embed(&store);
        let polygon = Polygon::from_pairs(&[[0.0, 0.0], [1.0, 1.0]]);
        let err = InteractiveSelector::new(&store)
            .select(Some(&embedding), &polygon, 2, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, CanvasError::DegeneratePolygon { vertices: 2 }));
    }

    #[test]
    fn lasso_around_one_point_paints_its_voxel() {
        let store = store();
        store.paint(&[([0, 0, 0], 1), ([1, 1, 4], 2)]).unwrap();
        let embedding = embed(&store);

        let target = embedding.point(store.shape().ravel([0, 0, 0]));
        let polygon = Polygon::from_pairs(&[
            [target.x - 1e-3, target.y - 1e-3],
            [target.x + 1e-3, target.y - 1e-3],
            [target.x + 1e-3, target.y + 1e-3],
            [target.x - 1e-3, target.y + 1e-3],
        ]);
        let outcome = InteractiveSelector::new(&store)
            .select(Some(&embedding), &polygon, 3, &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.painted, 1);
        let labels = store.read_labels(&Region::whole(store.shape())).unwrap();
        assert_eq!(labels[[0, 0, 0]], 3);
        assert_eq!(labels[[1, 1, 4]], 2);
    }

    #[test]
    fn cancelled_selection_writes_nothing() {
        let store = store();
        store.paint(&[([0, 0, 0], 1), ([1, 1, 4], 2)]).unwrap();
        let embedding = embed(&store);
        let bounds = cellcanvas_shared::BoundingBox::of(
            (0..store.shape().voxels()).map(|v| embedding.point(v)),
        )
        .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = InteractiveSelector::new(&store)
            .select(Some(&embedding), &Polygon::rectangle(bounds), 5, &token)
            .unwrap_err();
        assert!(matches!(err, CanvasError::Cancelled));
        let labels = store.read_labels(&Region::whole(store.shape())).unwrap();
        assert!(labels.iter().all(|&l| l != 5));
    }
}
