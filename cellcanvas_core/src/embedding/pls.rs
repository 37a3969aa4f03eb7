//! Partial least squares projection (single response, NIPALS).
//!
//! Features and the label response are centred and scaled to unit variance
//! (sample standard deviation; constant columns keep scale 1). Each component
//! takes the direction of maximal covariance with the residual response, then
//! deflates both blocks. New samples are projected with the rotation
//! `W (PᵀW)⁻¹`, which maps standardized features straight onto scores.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use super::{Projection, Projector};
use crate::error::{CanvasError, CanvasResult};
use crate::volume::Label;

const EPS: f64 = 1e-12;

/// Fits [`PlsProjection`]s.
#[derive(Debug, Clone)]
pub struct PlsProjector {
    pub n_components: usize,
}

impl Default for PlsProjector {
    fn default() -> Self {
        Self { n_components: 2 }
    }
}

/// Column mean and sample standard deviation, zero deviations replaced by 1.
fn standardize(data: &mut Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n = data.nrows() as f64;
    let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(data.ncols()));
    *data -= &mean;
    let std = data.map_axis(Axis(0), |column| {
        let var = column.iter().map(|v| v * v).sum::<f64>() / (n - 1.0).max(1.0);
        let std = var.sqrt();
        if std > EPS {
            std
        } else {
            1.0
        }
    });
    *data /= &std;
    (mean, std)
}

/// Inverse of a small square matrix by Gauss-Jordan elimination.
fn invert(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let n = matrix.nrows();
    let mut a = matrix.clone();
    let mut inv = Array2::<f64>::eye(n);
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < EPS {
            return None;
        }
        for k in 0..n {
            a.swap([col, k], [pivot, k]);
            inv.swap([col, k], [pivot, k]);
        }
        let scale = a[[col, col]];
        for k in 0..n {
            a[[col, k]] /= scale;
            inv[[col, k]] /= scale;
        }
        for row in 0..n {
            if row != col {
                let factor = a[[row, col]];
                for k in 0..n {
                    a[[row, k]] -= factor * a[[col, k]];
                    inv[[row, k]] -= factor * inv[[col, k]];
                }
            }
        }
    }
    Some(inv)
}

impl Projector for PlsProjector {
    fn fit(
        &self,
        features: ArrayView2<'_, f32>,
        labels: ArrayView1<'_, Label>,
    ) -> CanvasResult<Box<dyn Projection>> {
        let n = features.nrows();
        if n < 2 {
            return Err(CanvasError::InsufficientSamples {
                required: 2,
                found: n,
            });
        }
        if labels.len() != n {
            return Err(CanvasError::dimension_mismatch(n, labels.len(), "projection labels"));
        }
        if self.n_components == 0 {
            return Err(CanvasError::invalid_parameter("n_components", 0, "> 0"));
        }

        let n_features = features.ncols();
        let mut x = features.mapv(f64::from);
        let (x_mean, x_std) = standardize(&mut x);
        let mut y = labels.mapv(f64::from).insert_axis(Axis(1));
        standardize(&mut y);
        let mut y = y.index_axis_move(Axis(1), 0);

        let k = self.n_components;
        let mut weights = Array2::<f64>::zeros((n_features, k));
        let mut loadings = Array2::<f64>::zeros((n_features, k));
        let mut fitted = 0;

        for component in 0..k {
            if y.dot(&y) < EPS {
                break;
            }
            let mut w = x.t().dot(&y);
            let norm = w.dot(&w).sqrt();
            if norm < EPS {
                break;
            }
            w /= norm;

            let t = x.dot(&w);
            let tt = t.dot(&t);
            if tt < EPS {
                break;
            }
            let p = x.t().dot(&t) / tt;
            let q = y.dot(&t) / tt;

            for (mut row, &score) in x.outer_iter_mut().zip(t.iter()) {
                row.scaled_add(-score, &p);
            }
            y.scaled_add(-q, &t);

            weights.column_mut(component).assign(&w);
            loadings.column_mut(component).assign(&p);
            fitted += 1;
        }

        let rotations = if fitted == 0 {
            weights
        } else {
            let w = weights.slice(ndarray::s![.., ..fitted]).to_owned();
            let p = loadings.slice(ndarray::s![.., ..fitted]);
            let rotated = invert(&p.t().dot(&w)).map_or_else(|| w.clone(), |inv| w.dot(&inv));
            let mut rotations = Array2::<f64>::zeros((n_features, k));
            rotations
                .slice_mut(ndarray::s![.., ..fitted])
                .assign(&rotated);
            rotations
        };

        tracing::debug!(samples = n, features = n_features, components = fitted, "pls fit");

        Ok(Box::new(PlsProjection {
            mean: x_mean.mapv(|v| v as f32),
            scale: x_std.mapv(|v| v as f32),
            rotations: rotations.mapv(|v| v as f32),
        }))
    }
}

/// Fitted linear projection onto `n_components` scores.
#[derive(Debug, Clone)]
pub struct PlsProjection {
    mean: Array1<f32>,
    scale: Array1<f32>,
    /// n_features × n_components
    rotations: Array2<f32>,
}

impl Projection for PlsProjection {
    fn transform(&self, features: ArrayView2<'_, f32>) -> CanvasResult<Array2<f32>> {
        if features.ncols() != self.n_features() {
            return Err(CanvasError::dimension_mismatch(
                self.n_features(),
                features.ncols(),
                "projection features",
            ));
        }
        let standardized = (&features - &self.mean) / &self.scale;
        Ok(standardized.dot(&self.rotations))
    }

    fn n_features(&self) -> usize {
        self.rotations.nrows()
    }

    fn n_components(&self) -> usize {
        self.rotations.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardize_uses_sample_deviation() {
        let mut data = array![[1.0, 5.0], [3.0, 5.0]];
        let (mean, std) = standardize(&mut data);
        assert_eq!(mean.to_vec(), vec![2.0, 5.0]);
        assert!((std[0] - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(std[1], 1.0);
        assert!((data[[0, 0]] + 1.0 / 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn invert_two_by_two() {
        let m = array![[2.0, 1.0], [0.0, 1.0]];
        let inv = invert(&m).unwrap();
        let id = m.dot(&inv);
        assert!((id[[0, 0]] - 1.0).abs() < 1e-12 && id[[0, 1]].abs() < 1e-12);
        assert!(invert(&array![[1.0, 2.0], [2.0, 4.0]]).is_none());
    }

    #[test]
    fn first_component_orders_classes() {
        // feature 0 tracks the label, feature 1 does not
        let x = array![[0.0f32, 3.0], [0.2, 1.0], [1.0, 2.0], [1.2, 0.0]];
        let y = array![1u32, 1, 2, 2];
        let projection = PlsProjector::default().fit(x.view(), y.view()).unwrap();
        assert_eq!(projection.n_components(), 2);

        let scores = projection.transform(x.view()).unwrap();
        assert_eq!(scores.dim(), (4, 2));
        let class_one = scores[[0, 0]].max(scores[[1, 0]]);
        let class_two = scores[[2, 0]].min(scores[[3, 0]]);
        assert!(class_one < class_two);
    }

    #[test]
    fn single_feature_leaves_second_component_flat() {
        let x = array![[0.0f32], [1.0], [2.0]];
        let y = array![1u32, 2, 3];
        let projection = PlsProjector::default().fit(x.view(), y.view()).unwrap();
        let scores = projection.transform(x.view()).unwrap();
        assert!(scores.column(1).iter().all(|v| v.abs() < 1e-6));
        assert!(scores[[0, 0]] < scores[[2, 0]]);
    }

    #[test]
    fn too_few_samples() {
        let x = array![[0.0f32, 1.0]];
        let y = array![1u32];
        assert!(matches!(
            PlsProjector::default().fit(x.view(), y.view()),
            Err(CanvasError::InsufficientSamples { required: 2, found: 1 })
        ));
    }

    #[test]
    fn rejects_width_mismatch() {
        let x = array![[0.0f32, 1.0], [1.0, 0.0]];
        let y = array![1u32, 2];
        let projection = PlsProjector::default().fit(x.view(), y.view()).unwrap();
        assert!(projection.transform(array![[1.0f32]].view()).is_err());
    }
}
