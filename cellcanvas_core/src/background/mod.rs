//! Automatic background labeling
//!
//! The per-dimension median feature vector stands in for "typical
//! background". Every voxel whose Euclidean distance to it is at or below the
//! chosen percentile of all distances receives the background label.

use ndarray::{Array1, Array3, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{CanvasError, CanvasResult};
use crate::features::{into_matrix, FeatureSelection, SampleExtractor};
use crate::jobs::CancellationToken;
use crate::volume::{Label, Region, VolumeShape, VolumeStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Distance percentile in `[0, 100]`
    pub percentile: f64,
    /// Label written to background voxels
    pub label: Label,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            percentile: 1.0,
            label: 1,
        }
    }
}

impl BackgroundConfig {
    pub fn validate(&self) -> CanvasResult<()> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(CanvasError::invalid_parameter(
                "background.percentile",
                self.percentile,
                "in [0, 100]",
            ));
        }
        if self.label == 0 {
            return Err(CanvasError::invalid_parameter(
                "background.label",
                self.label,
                "> 0",
            ));
        }
        Ok(())
    }
}

/// Statistics of one estimate, reported with the painted count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundEstimate {
    pub reference: Vec<f32>,
    pub threshold: f32,
    pub selected: usize,
    pub min_distance: f32,
    pub max_distance: f32,
    pub mean_distance: f32,
}

/// An estimate plus the voxel mask it would paint.
#[derive(Debug, Clone)]
pub struct BackgroundProposal {
    pub estimate: BackgroundEstimate,
    pub mask: Array3<bool>,
}

/// Median of each column; even counts average the two middle values.
pub fn median_per_dimension(features: ArrayView2<'_, f32>) -> Array1<f32> {
    let medians: Vec<f32> = (0..features.ncols())
        .into_par_iter()
        .map(|column| {
            let mut values = features.column(column).to_vec();
            median(&mut values)
        })
        .collect();
    Array1::from_vec(medians)
}

fn median(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 0 {
        return f32::NAN;
    }
    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let below = lower.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        below + (upper - below) / 2.0
    }
}

/// Linear-interpolation percentile: `rank = p / 100 * (n - 1)`.
pub fn percentile(values: &[f32], p: f64) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.par_sort_unstable_by(f32::total_cmp);

    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let fraction = (rank - lo as f64) as f32;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * fraction)
}

/// Euclidean distance of every row to `reference`.
pub fn distances(features: ArrayView2<'_, f32>, reference: &Array1<f32>) -> Vec<f32> {
    (0..features.nrows())
        .into_par_iter()
        .map(|row| {
            features
                .row(row)
                .iter()
                .zip(reference.iter())
                .map(|(v, m)| (v - m) * (v - m))
                .sum::<f32>()
                .sqrt()
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct BackgroundEstimator {
    config: BackgroundConfig,
}

impl BackgroundEstimator {
    pub fn new(config: BackgroundConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    /// Estimate on a whole-volume (voxels × F) feature matrix.
    pub fn estimate(
        &self,
        features: ArrayView2<'_, f32>,
        shape: VolumeShape,
    ) -> CanvasResult<BackgroundProposal> {
        self.config.validate()?;
        if features.nrows() != shape.voxels() {
            return Err(CanvasError::dimension_mismatch(
                shape.voxels(),
                features.nrows(),
                "background features",
            ));
        }
        if features.ncols() == 0 {
            return Err(CanvasError::NoFeatureSourceSelected);
        }

        let reference = median_per_dimension(features);
        let distances = distances(features, &reference);

        let max_distance = distances.iter().copied().fold(0.0f32, f32::max);
        if max_distance <= 0.0 {
            return Err(CanvasError::NoVariance);
        }
        let min_distance = distances.iter().copied().fold(f32::INFINITY, f32::min);
        let mean_distance = distances.iter().sum::<f32>() / distances.len() as f32;
        let threshold =
            percentile(&distances, self.config.percentile).ok_or(CanvasError::NoVariance)?;

        let inside: Vec<bool> = distances.par_iter().map(|&d| d <= threshold).collect();
        let selected = inside.iter().filter(|&&hit| hit).count();
        let mask = Array3::from_shape_vec(shape.dim(), inside).map_err(|_| {
            CanvasError::dimension_mismatch(shape.voxels(), 0, "background mask")
        })?;

        tracing::debug!(
            threshold,
            selected,
            min = min_distance,
            max = max_distance,
            mean = mean_distance,
            "background distance distribution"
        );

        Ok(BackgroundProposal {
            estimate: BackgroundEstimate {
                reference: reference.to_vec(),
                threshold,
                selected,
                min_distance,
                max_distance,
                mean_distance,
            },
            mask,
        })
    }

    /// Read the enabled feature sources of the whole volume and estimate.
    pub fn propose(
        &self,
        store: &dyn VolumeStore,
        selection: &FeatureSelection,
    ) -> CanvasResult<BackgroundProposal> {
        let region = Region::whole(store.shape());
        let (features, _) = SampleExtractor::new(store).read_features(selection, &region)?;
        self.estimate(into_matrix(features)?.view(), store.shape())
    }

    /// Write the background label into every proposed voxel.
    pub fn apply(
        &self,
        store: &dyn VolumeStore,
        proposal: &BackgroundProposal,
    ) -> CanvasResult<usize> {
        let painted = store.write_label_mask(proposal.mask.view(), self.config.label)?;
        tracing::info!(
            label = self.config.label,
            painted,
            threshold = proposal.estimate.threshold,
            "background painted"
        );
        Ok(painted)
    }

    /// Propose and apply unless cancelled in between.
    pub fn run(
        &self,
        store: &dyn VolumeStore,
        selection: &FeatureSelection,
        token: &CancellationToken,
    ) -> CanvasResult<(BackgroundEstimate, usize)> {
        let proposal = self.propose(store, selection)?;
        if token.is_cancelled() {
            return Err(CanvasError::Cancelled);
        }
        let painted = self.apply(store, &proposal)?;
        Ok((proposal.estimate, painted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::MemoryStore;
    use ndarray::{array, Array2, Array4};

    #[test]
    fn median_matches_even_and_odd_counts() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        let features = array![[1.0f32, 10.0], [3.0, 30.0], [2.0, 20.0], [4.0, 40.0]];
        assert_eq!(median_per_dimension(features.view()).to_vec(), vec![2.5, 25.0]);
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let values: Vec<f32> = (0..=10).map(|v| v as f32).collect();
        assert_eq!(percentile(&values, 0.0), Some(0.0));
        assert_eq!(percentile(&values, 100.0), Some(10.0));
        assert!((percentile(&values, 15.0).unwrap() - 1.5).abs() < 1e-6);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn zero_variance_is_rejected() {
        let features = Array2::from_elem((8, 3), 0.5f32);
        let err = BackgroundEstimator::default()
            .estimate(features.view(), VolumeShape::new(2, 2, 2))
            .unwrap_err();
        assert!(matches!(err, CanvasError::NoVariance));
    }

    #[test]
    fn voxels_at_the_median_are_background() {
        // nine voxels sit on the median, one far outlier
        let mut features = Array2::from_elem((10, 1), 1.0f32);
        features[[9, 0]] = 50.0;
        let proposal = BackgroundEstimator::default()
            .estimate(features.view(), VolumeShape::new(1, 2, 5))
            .unwrap();

        assert_eq!(proposal.estimate.threshold, 0.0);
        assert_eq!(proposal.estimate.selected, 9);
        assert!(!proposal.mask[[0, 1, 4]]);
    }

    #[test]
    fn run_writes_background_label_and_is_deterministic() {
        let shape = (2, 4, 4);
        let features = Array4::from_shape_fn((2, 4, 4, 2), |(z, y, x, f)| {
            ((z * 16 + y * 4 + x) as f32 * 0.37 + f as f32).sin()
        });
        let build = || {
            MemoryStore::new(Array3::zeros(shape))
                .with_feature_source("skimage", features.clone())
                .unwrap()
        };
        let selection = FeatureSelection::from_names(["skimage"]);
        let config = BackgroundConfig {
            percentile: 25.0,
            label: 7,
        };

        let first = build();
        let second = build();
        let estimator = BackgroundEstimator::new(config);
        let token = CancellationToken::new();
        let (a, painted) = estimator.run(&first, &selection, &token).unwrap();
        let (b, _) = estimator.run(&second, &selection, &token).unwrap();

        assert_eq!(a, b);
        assert!(painted >= 8);
        let whole = Region::whole(first.shape());
        assert_eq!(
            first.read_labels(&whole).unwrap(),
            second.read_labels(&whole).unwrap()
        );
        let labels = first.read_labels(&whole).unwrap();
        assert_eq!(labels.iter().filter(|&&l| l == 7).count(), painted);
    }

    #[test]
    fn invalid_percentile() {
        let config = BackgroundConfig {
            percentile: 120.0,
            ..BackgroundConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
