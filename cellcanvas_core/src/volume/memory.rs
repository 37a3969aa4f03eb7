//! In-memory volume store backed by `ndarray`.
//!
//! Image and feature volumes are immutable after construction. The label and
//! prediction volumes sit behind reader/writer locks: region reads clone
//! under a read guard, so a training or projection batch never observes a
//! label volume mutating mid-read.

use std::path::{Path, PathBuf};

use ndarray::{s, Array3, Array4, ArrayView3, Zip};
use parking_lot::RwLock;

use super::snapshot::{read_snapshot, write_snapshot, SnapshotRef, SNAPSHOT_VERSION};
use super::store::{FeatureSource, OpenMode, VolumeStore};
use super::{Label, Region, VolumeShape};
use crate::error::{CanvasError, CanvasResult};

pub struct MemoryStore {
    shape: VolumeShape,
    mode: OpenMode,
    path: Option<PathBuf>,
    image: Array3<f32>,
    features: Vec<(FeatureSource, Array4<f32>)>,
    labels: RwLock<Array3<Label>>,
    predictions: RwLock<Array3<Label>>,
}

impl MemoryStore {
    /// Create a writable store around `image` with empty label and
    /// prediction volumes.
    pub fn new(image: Array3<f32>) -> Self {
        let shape = VolumeShape::from_dim(image.dim());
        Self {
            shape,
            mode: OpenMode::ReadWrite,
            path: None,
            image,
            features: Vec::new(),
            labels: RwLock::new(Array3::zeros(shape.dim())),
            predictions: RwLock::new(Array3::zeros(shape.dim())),
        }
    }

    /// Add a feature source. Sources added earlier take precedence.
    pub fn with_feature_source(
        mut self,
        name: impl Into<String>,
        features: Array4<f32>,
    ) -> CanvasResult<Self> {
        let (z, y, x, width) = features.dim();
        if VolumeShape::new(z, y, x) != self.shape {
            return Err(CanvasError::dimension_mismatch(
                self.shape.voxels(),
                z * y * x,
                "feature source voxels",
            ));
        }
        let name = name.into();
        if self.features.iter().any(|(source, _)| source.name == name) {
            return Err(CanvasError::invalid_parameter(
                "feature source",
                &name,
                "unique source names",
            ));
        }

        let rank = self.features.len() as u32;
        self.features.push((FeatureSource { name, rank, width }, features));
        Ok(self)
    }

    /// Seed the label volume, e.g. from an earlier painting session.
    pub fn with_labels(self, labels: Array3<Label>) -> CanvasResult<Self> {
        if labels.dim() != self.shape.dim() {
            return Err(CanvasError::dimension_mismatch(
                self.shape.voxels(),
                labels.len(),
                "label volume",
            ));
        }
        *self.labels.write() = labels;
        Ok(self)
    }

    /// Load a store from a snapshot written by [`MemoryStore::save`].
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> CanvasResult<Self> {
        let snapshot = read_snapshot(&path)?;
        tracing::info!(
            path = %path.as_ref().display(),
            shape = %snapshot.shape,
            sources = snapshot.features.len(),
            "opened volume snapshot"
        );

        let mut features = snapshot.features;
        features.sort_by_key(|(source, _)| source.rank);

        Ok(Self {
            shape: snapshot.shape,
            mode,
            path: Some(path.as_ref().to_path_buf()),
            image: snapshot.image,
            features,
            labels: RwLock::new(snapshot.labels),
            predictions: RwLock::new(snapshot.predictions),
        })
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Write a full snapshot to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CanvasResult<()> {
        let labels = self.labels.read();
        let predictions = self.predictions.read();
        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            shape: self.shape,
            image: &self.image,
            features: self.features.iter().map(|(s, f)| (s, f)).collect(),
            labels: &labels,
            predictions: &predictions,
        };
        write_snapshot(&snapshot, path)?;
        Ok(())
    }

    /// Persist labels and predictions back to the file the store was opened
    /// from. Stores built in memory have nowhere to flush to and succeed
    /// without writing.
    pub fn flush(&self) -> CanvasResult<()> {
        self.ensure_writable()?;
        match &self.path {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }

    fn ensure_writable(&self) -> CanvasResult<()> {
        match self.mode {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(CanvasError::ReadOnly),
        }
    }

    fn feature_volume(&self, name: &str) -> CanvasResult<&Array4<f32>> {
        self.features
            .iter()
            .find(|(source, _)| source.name == name)
            .map(|(_, features)| features)
            .ok_or_else(|| CanvasError::unknown_source(name))
    }

    fn check_region_dim(&self, region: &Region, got: (usize, usize, usize)) -> CanvasResult<()> {
        region.check_within(self.shape)?;
        let expected = region.shape();
        if expected.dim() != got {
            return Err(CanvasError::dimension_mismatch(
                expected.voxels(),
                VolumeShape::from_dim(got).voxels(),
                format!("write to region {region}"),
            ));
        }
        Ok(())
    }
}

impl VolumeStore for MemoryStore {
    fn shape(&self) -> VolumeShape {
        self.shape
    }

    fn feature_sources(&self) -> Vec<FeatureSource> {
        self.features.iter().map(|(source, _)| source.clone()).collect()
    }

    fn read_image(&self, region: &Region) -> CanvasResult<Array3<f32>> {
        region.check_within(self.shape)?;
        Ok(self
            .image
            .slice(s![region.z.clone(), region.y.clone(), region.x.clone()])
            .to_owned())
    }

    fn read_features(&self, source: &str, region: &Region) -> CanvasResult<Array4<f32>> {
        region.check_within(self.shape)?;
        let features = self.feature_volume(source)?;
        Ok(features
            .slice(s![region.z.clone(), region.y.clone(), region.x.clone(), ..])
            .to_owned())
    }

    fn read_labels(&self, region: &Region) -> CanvasResult<Array3<Label>> {
        region.check_within(self.shape)?;
        let labels = self.labels.read();
        Ok(labels
            .slice(s![region.z.clone(), region.y.clone(), region.x.clone()])
            .to_owned())
    }

    fn write_labels(&self, region: &Region, labels: ArrayView3<'_, Label>) -> CanvasResult<()> {
        self.ensure_writable()?;
        self.check_region_dim(region, labels.dim())?;
        let mut volume = self.labels.write();
        volume
            .slice_mut(s![region.z.clone(), region.y.clone(), region.x.clone()])
            .assign(&labels);
        Ok(())
    }

    fn write_label_mask(&self, mask: ArrayView3<'_, bool>, label: Label) -> CanvasResult<usize> {
        self.ensure_writable()?;
        if mask.dim() != self.shape.dim() {
            return Err(CanvasError::dimension_mismatch(
                self.shape.voxels(),
                mask.len(),
                "label mask",
            ));
        }

        let mut written = 0usize;
        let mut volume = self.labels.write();
        Zip::from(&mut *volume).and(&mask).for_each(|voxel, &selected| {
            if selected {
                *voxel = label;
                written += 1;
            }
        });
        Ok(written)
    }

    fn paint(&self, strokes: &[([usize; 3], Label)]) -> CanvasResult<usize> {
        self.ensure_writable()?;
        if let Some((voxel, _)) = strokes.iter().find(|(voxel, _)| !self.shape.contains(*voxel)) {
            return Err(CanvasError::RegionOutOfBounds {
                region: format!("{voxel:?}"),
                shape: self.shape.to_string(),
            });
        }

        let mut volume = self.labels.write();
        for &([z, y, x], label) in strokes {
            volume[[z, y, x]] = label;
        }
        Ok(strokes.len())
    }

    fn read_predictions(&self, region: &Region) -> CanvasResult<Array3<Label>> {
        region.check_within(self.shape)?;
        let predictions = self.predictions.read();
        Ok(predictions
            .slice(s![region.z.clone(), region.y.clone(), region.x.clone()])
            .to_owned())
    }

    fn write_predictions(
        &self,
        region: &Region,
        predictions: ArrayView3<'_, Label>,
    ) -> CanvasResult<()> {
        self.ensure_writable()?;
        self.check_region_dim(region, predictions.dim())?;
        let mut volume = self.predictions.write();
        volume
            .slice_mut(s![region.z.clone(), region.y.clone(), region.x.clone()])
            .assign(&predictions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn small_store() -> MemoryStore {
        let image = Array::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 12 + y * 4 + x) as f32);
        let skimage = Array4::from_shape_fn((2, 3, 4, 2), |(z, y, x, f)| (z + y + x + f) as f32);
        let tomotwin = Array4::from_elem((2, 3, 4, 3), 0.5f32);
        MemoryStore::new(image)
            .with_feature_source("skimage", skimage)
            .unwrap()
            .with_feature_source("tomotwin", tomotwin)
            .unwrap()
    }

    #[test]
    fn sources_keep_insertion_precedence() {
        let store = small_store();
        let sources = store.feature_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "skimage");
        assert_eq!(sources[0].rank, 0);
        assert_eq!(sources[1].width, 3);
    }

    #[test]
    fn region_reads_slice_every_volume() {
        let store = small_store();
        let region = Region::new(1..2, 0..2, 1..3);
        let image = store.read_image(&region).unwrap();
        assert_eq!(image.dim(), (1, 2, 2));
        assert_eq!(image[[0, 0, 0]], 13.0);

        let features = store.read_features("skimage", &region).unwrap();
        assert_eq!(features.dim(), (1, 2, 2, 2));
        assert_eq!(features[[0, 1, 1, 1]], (1 + 1 + 2 + 1) as f32);

        assert!(matches!(
            store.read_features("missing", &region),
            Err(CanvasError::UnknownFeatureSource { .. })
        ));
    }

    #[test]
    fn mask_write_counts_voxels() {
        let store = small_store();
        let mut mask = Array3::from_elem((2, 3, 4), false);
        mask[[0, 0, 0]] = true;
        mask[[1, 2, 3]] = true;
        let written = store.write_label_mask(mask.view(), 4).unwrap();
        assert_eq!(written, 2);

        let labels = store.read_labels(&Region::whole(store.shape())).unwrap();
        assert_eq!(labels[[0, 0, 0]], 4);
        assert_eq!(labels[[1, 2, 3]], 4);
        assert_eq!(labels.iter().filter(|&&l| l > 0).count(), 2);
    }

    #[test]
    fn paint_rejects_out_of_bounds_strokes() {
        let store = small_store();
        assert_eq!(store.paint(&[([0, 1, 1], 2)]).unwrap(), 1);
        assert!(store.paint(&[([0, 1, 1], 2), ([5, 0, 0], 1)]).is_err());
        // the rejected batch wrote nothing
        let labels = store.read_labels(&Region::whole(store.shape())).unwrap();
        assert_eq!(labels.iter().filter(|&&l| l > 0).count(), 1);
    }

    #[test]
    fn snapshot_round_trip_and_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.canvas");

        let store = small_store();
        store.paint(&[([1, 1, 1], 3)]).unwrap();
        store.save(&path).unwrap();

        let reopened = MemoryStore::open(&path, OpenMode::ReadOnly).unwrap();
        assert_eq!(reopened.shape(), VolumeShape::new(2, 3, 4));
        assert_eq!(reopened.feature_sources(), store.feature_sources());
        let labels = reopened.read_labels(&Region::whole(reopened.shape())).unwrap();
        assert_eq!(labels[[1, 1, 1]], 3);

        assert!(matches!(
            reopened.paint(&[([0, 0, 0], 1)]),
            Err(CanvasError::ReadOnly)
        ));
        assert!(matches!(reopened.flush(), Err(CanvasError::ReadOnly)));
    }

    #[test]
    fn flush_persists_to_opened_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.canvas");
        small_store().save(&path).unwrap();

        let store = MemoryStore::open(&path, OpenMode::ReadWrite).unwrap();
        let predictions = Array3::from_elem((2, 3, 4), 2u32);
        store
            .write_predictions(&Region::whole(store.shape()), predictions.view())
            .unwrap();
        store.flush().unwrap();

        let reopened = MemoryStore::open(&path, OpenMode::ReadOnly).unwrap();
        let predictions = reopened
            .read_predictions(&Region::whole(reopened.shape()))
            .unwrap();
        assert!(predictions.iter().all(|&p| p == 2));
    }
}
