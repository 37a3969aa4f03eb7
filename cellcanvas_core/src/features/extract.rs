//! Builds `(features, labels)` batches from the volume store.
//!
//! Enabled feature sources are concatenated along the feature axis in the
//! store's precedence order, so the vector layout is identical across calls
//! no matter in which order sources were toggled on.

use std::collections::BTreeSet;

use ndarray::{concatenate, Array1, Array2, Array4, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{CanvasError, CanvasResult};
use crate::volume::{FeatureSource, Label, Region, VolumeShape, VolumeStore};

/// The set of enabled feature sources, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSelection {
    enabled: BTreeSet<String>,
}

impl FeatureSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        let name = name.into();
        if enabled {
            self.enabled.insert(name);
        } else {
            self.enabled.remove(&name);
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }

    /// Enabled sources in precedence order.
    pub fn resolve(&self, store: &dyn VolumeStore) -> CanvasResult<Vec<FeatureSource>> {
        if self.enabled.is_empty() {
            return Err(CanvasError::NoFeatureSourceSelected);
        }

        let available = store.feature_sources();
        if let Some(missing) = self
            .enabled
            .iter()
            .find(|name| !available.iter().any(|source| &source.name == *name))
        {
            return Err(CanvasError::unknown_source(missing.clone()));
        }

        let mut sources: Vec<FeatureSource> = available
            .into_iter()
            .filter(|source| self.enabled.contains(&source.name))
            .collect();
        sources.sort_by_key(|source| source.rank);
        Ok(sources)
    }
}

/// Which voxels a training batch is drawn from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionPolicy {
    #[default]
    WholeVolume,
    Viewport(Region),
}

impl RegionPolicy {
    pub fn region(&self, shape: VolumeShape) -> Region {
        match self {
            RegionPolicy::WholeVolume => Region::whole(shape),
            RegionPolicy::Viewport(region) => region.clone(),
        }
    }
}

/// Flattened samples of one region: one row per voxel, in row-major
/// `(z, y, x)` order, unlabeled voxels included.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub features: Array2<f32>,
    pub labels: Array1<Label>,
    pub region: Region,
    pub sources: Vec<FeatureSource>,
}

impl SampleBatch {
    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn labeled_count(&self) -> usize {
        self.labels.iter().filter(|&&label| label > 0).count()
    }
}

/// Reshape a `(z, y, x, f)` tensor into an `(z*y*x, f)` matrix.
pub fn into_matrix(features: Array4<f32>) -> CanvasResult<Array2<f32>> {
    let (z, y, x, width) = features.dim();
    let features = if features.is_standard_layout() {
        features
    } else {
        features.as_standard_layout().into_owned()
    };
    features
        .into_shape((z * y * x, width))
        .map_err(|_| CanvasError::dimension_mismatch(z * y * x * width, width, "feature matrix"))
}

pub struct SampleExtractor<'a> {
    store: &'a dyn VolumeStore,
}

impl<'a> SampleExtractor<'a> {
    pub fn new(store: &'a dyn VolumeStore) -> Self {
        Self { store }
    }

    /// Concatenated features of the enabled sources over `region`.
    pub fn read_features(
        &self,
        selection: &FeatureSelection,
        region: &Region,
    ) -> CanvasResult<(Array4<f32>, Vec<FeatureSource>)> {
        let sources = selection.resolve(self.store)?;
        self.read_sources(&sources, region)
            .map(|features| (features, sources))
    }

    /// Concatenated features of exactly `sources`, in the given order.
    pub fn read_sources(
        &self,
        sources: &[FeatureSource],
        region: &Region,
    ) -> CanvasResult<Array4<f32>> {
        if sources.is_empty() {
            return Err(CanvasError::NoFeatureSourceSelected);
        }

        let mut volumes = sources
            .iter()
            .map(|source| self.store.read_features(&source.name, region))
            .collect::<CanvasResult<Vec<_>>>()?;

        if volumes.len() == 1 {
            return Ok(volumes.remove(0));
        }

        let views: Vec<ArrayView4<'_, f32>> = volumes.iter().map(|v| v.view()).collect();
        concatenate(Axis(3), &views).map_err(|_| {
            CanvasError::dimension_mismatch(region.voxels(), 0, "feature concatenation")
        })
    }

    /// Feature matrix of `region` with its flattened label snapshot.
    ///
    /// Fails with `NoFeatureSourceSelected` before touching storage, and with
    /// `EmptyLabelSet` when no voxel in the region is labeled.
    pub fn extract(
        &self,
        policy: &RegionPolicy,
        selection: &FeatureSelection,
    ) -> CanvasResult<SampleBatch> {
        let sources = selection.resolve(self.store)?;
        let region = policy.region(self.store.shape());

        let labels = self.store.read_labels(&region)?;
        if !labels.iter().any(|&label| label > 0) {
            return Err(CanvasError::EmptyLabelSet {
                region: region.to_string(),
            });
        }

        let features = into_matrix(self.read_sources(&sources, &region)?)?;
        let labels = Array1::from_iter(labels.iter().copied());

        tracing::debug!(
            region = %region,
            samples = labels.len(),
            features = features.ncols(),
            "extracted sample batch"
        );

        Ok(SampleBatch {
            features,
            labels,
            region,
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::MemoryStore;
    use ndarray::Array3;

    fn store() -> MemoryStore {
        let image = Array3::zeros((4, 4, 4));
        let skimage = Array4::from_shape_fn((4, 4, 4, 2), |(z, _, _, f)| (z * 10 + f) as f32);
        let tomotwin = Array4::from_shape_fn((4, 4, 4, 1), |(_, _, x, _)| x as f32 + 100.0);
        MemoryStore::new(image)
            .with_feature_source("skimage", skimage)
            .unwrap()
            .with_feature_source("tomotwin", tomotwin)
            .unwrap()
    }

    #[test]
    fn two_labeled_voxels_yield_two_samples() {
        let store = store();
        store.paint(&[([0, 0, 0], 1), ([3, 3, 3], 2)]).unwrap();

        let selection = FeatureSelection::from_names(["tomotwin"]);
        let batch = SampleExtractor::new(&store)
            .extract(&RegionPolicy::WholeVolume, &selection)
            .unwrap();

        assert_eq!(batch.n_samples(), 64);
        assert_eq!(batch.labeled_count(), 2);
        assert_eq!(batch.labels[0], 1);
        assert_eq!(batch.labels[63], 2);
    }

    #[test]
    fn concatenation_follows_precedence_not_toggle_order() {
        let store = store();
        store.paint(&[([1, 0, 2], 1)]).unwrap();

        let mut selection = FeatureSelection::new();
        selection.set("tomotwin", true);
        selection.set("skimage", true);

        let batch = SampleExtractor::new(&store)
            .extract(&RegionPolicy::WholeVolume, &selection)
            .unwrap();
        assert_eq!(batch.n_features(), 3);
        assert_eq!(batch.sources[0].name, "skimage");

        let row = store.shape().ravel([1, 0, 2]);
        assert_eq!(batch.features[[row, 0]], 10.0);
        assert_eq!(batch.features[[row, 1]], 11.0);
        assert_eq!(batch.features[[row, 2]], 102.0);
    }

    #[test]
    fn no_source_selected() {
        let store = store();
        store.paint(&[([0, 0, 0], 1)]).unwrap();
        let err = SampleExtractor::new(&store)
            .extract(&RegionPolicy::WholeVolume, &FeatureSelection::new())
            .unwrap_err();
        assert!(matches!(err, CanvasError::NoFeatureSourceSelected));
    }

    #[test]
    fn unpainted_region_is_empty_label_set() {
        let store = store();
        store.paint(&[([3, 3, 3], 1)]).unwrap();
        let policy = RegionPolicy::Viewport(Region::viewport(0, [[0, 0, 0], [0, 4, 4]]));
        let err = SampleExtractor::new(&store)
            .extract(&policy, &FeatureSelection::from_names(["skimage"]))
            .unwrap_err();
        assert!(matches!(err, CanvasError::EmptyLabelSet { .. }));
    }

    #[test]
    fn viewport_batch_covers_one_slice() {
        let store = store();
        store.paint(&[([2, 1, 1], 4)]).unwrap();
        let policy = RegionPolicy::Viewport(Region::viewport(2, [[2, 0, 0], [2, 4, 4]]));
        let batch = SampleExtractor::new(&store)
            .extract(&policy, &FeatureSelection::from_names(["skimage"]))
            .unwrap();
        assert_eq!(batch.n_samples(), 16);
        assert_eq!(batch.labels[5], 4);
        assert!(batch.features.column(0).iter().all(|&v| v == 20.0));
    }

    #[test]
    fn unknown_source_is_configuration_error() {
        let store = store();
        let err = FeatureSelection::from_names(["cryo"])
            .resolve(&store)
            .unwrap_err();
        assert!(matches!(err, CanvasError::UnknownFeatureSource { .. }));
    }
}
