//! Decision tree growth shared by both ensembles.
//!
//! Trees are stored as flat node vectors. A split sends a row left when
//! `row[feature] <= threshold`. What a leaf holds and how a split is scored
//! is decided by the [`SplitCriterion`].

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

const MIN_GAIN: f64 = 1e-9;

pub(crate) enum Node<T> {
    Leaf(T),
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

pub(crate) struct Tree<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Tree<T> {
    pub fn leaf(&self, row: ArrayView1<'_, f32>) -> &T {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        fn walk<T>(nodes: &[Node<T>], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Scores candidate splits and produces leaf payloads.
pub(crate) trait SplitCriterion: Sync {
    type Stats: Clone;
    type Leaf;

    fn empty(&self) -> Self::Stats;

    fn add(&self, stats: &mut Self::Stats, sample: usize);

    /// `parent - left`
    fn subtract(&self, parent: &Self::Stats, left: &Self::Stats) -> Self::Stats;

    /// Total weight (or hessian) mass, compared against the child minimum.
    fn weight(&self, stats: &Self::Stats) -> f64;

    fn gain(&self, parent: &Self::Stats, left: &Self::Stats, right: &Self::Stats) -> f64;

    fn leaf(&self, stats: &Self::Stats) -> Self::Leaf;
}

pub(crate) struct TreeBuilder<'a, 'c, C> {
    pub features: ArrayView2<'a, f32>,
    pub criterion: &'c C,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_child_weight: f64,
    /// Features examined per node before settling for the best split so far.
    pub max_features: usize,
}

struct SplitChoice {
    gain: f64,
    feature: usize,
    threshold: f32,
}

impl<'a, 'c, C: SplitCriterion> TreeBuilder<'a, 'c, C> {
    pub fn build(&self, mut indices: Vec<usize>, rng: &mut StdRng) -> Tree<C::Leaf> {
        let mut nodes = Vec::new();
        self.grow(&mut nodes, &mut indices, 0, rng);
        Tree { nodes }
    }

    fn grow(
        &self,
        nodes: &mut Vec<Node<C::Leaf>>,
        indices: &mut [usize],
        depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let mut stats = self.criterion.empty();
        for &sample in indices.iter() {
            self.criterion.add(&mut stats, sample);
        }

        let node = nodes.len();
        nodes.push(Node::Leaf(self.criterion.leaf(&stats)));

        if depth >= self.max_depth || indices.len() < self.min_samples_split {
            return node;
        }

        let Some(split) = self.best_split(indices, &stats, rng) else {
            return node;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&sample| self.features[[sample, split.feature]] <= split.threshold);
        let boundary = left_rows.len();
        indices[..boundary].copy_from_slice(&left_rows);
        indices[boundary..].copy_from_slice(&right_rows);

        let (left_indices, right_indices) = indices.split_at_mut(boundary);
        let left = self.grow(nodes, left_indices, depth + 1, rng);
        let right = self.grow(nodes, right_indices, depth + 1, rng);

        nodes[node] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node
    }

    fn best_split(
        &self,
        indices: &[usize],
        parent: &C::Stats,
        rng: &mut StdRng,
    ) -> Option<SplitChoice> {
        let n_features = self.features.ncols();
        let mut candidates: Vec<usize> = (0..n_features).collect();
        if self.max_features < n_features {
            candidates.shuffle(rng);
        }

        let mut best: Option<SplitChoice> = None;
        let mut order = indices.to_vec();

        for (visited, &feature) in candidates.iter().enumerate() {
            // keep looking past max_features until some valid split exists
            if visited >= self.max_features && best.is_some() {
                break;
            }

            order.sort_by(|&a, &b| {
                self.features[[a, feature]].total_cmp(&self.features[[b, feature]])
            });

            let mut left = self.criterion.empty();
            for k in 0..order.len().saturating_sub(1) {
                self.criterion.add(&mut left, order[k]);

                let value = self.features[[order[k], feature]];
                let next = self.features[[order[k + 1], feature]];
                if value >= next {
                    continue;
                }

                let right = self.criterion.subtract(parent, &left);
                if self.criterion.weight(&left) < self.min_child_weight
                    || self.criterion.weight(&right) < self.min_child_weight
                {
                    continue;
                }

                let gain = self.criterion.gain(parent, &left, &right);
                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mid = value + (next - value) / 2.0;
                    best = Some(SplitChoice {
                        gain,
                        feature,
                        threshold: if mid < next { mid } else { value },
                    });
                }
            }
        }

        best
    }
}

/// Weighted Gini impurity over class indices.
pub(crate) struct Gini<'a> {
    pub labels: &'a [usize],
    pub weights: &'a [f32],
    pub n_classes: usize,
}

fn gini_impurity(stats: &[f64]) -> f64 {
    let total: f64 = stats.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - stats.iter().map(|c| (c / total) * (c / total)).sum::<f64>()
}

impl SplitCriterion for Gini<'_> {
    type Stats = Vec<f64>;
    /// Class probabilities at the leaf.
    type Leaf = Vec<f32>;

    fn empty(&self) -> Vec<f64> {
        vec![0.0; self.n_classes]
    }

    fn add(&self, stats: &mut Vec<f64>, sample: usize) {
        stats[self.labels[sample]] += f64::from(self.weights[sample]);
    }

    fn subtract(&self, parent: &Vec<f64>, left: &Vec<f64>) -> Vec<f64> {
        parent.iter().zip(left).map(|(p, l)| (p - l).max(0.0)).collect()
    }

    fn weight(&self, stats: &Vec<f64>) -> f64 {
        stats.iter().sum()
    }

    fn gain(&self, parent: &Vec<f64>, left: &Vec<f64>, right: &Vec<f64>) -> f64 {
        self.weight(parent) * gini_impurity(parent)
            - self.weight(left) * gini_impurity(left)
            - self.weight(right) * gini_impurity(right)
    }

    fn leaf(&self, stats: &Vec<f64>) -> Vec<f32> {
        let total = self.weight(stats);
        if total <= 0.0 {
            return vec![1.0 / self.n_classes as f32; self.n_classes];
        }
        stats.iter().map(|&c| (c / total) as f32).collect()
    }
}

/// Second-order (gradient/hessian) regression criterion with L2 leaf penalty.
pub(crate) struct Newton<'a> {
    pub gradients: &'a [f64],
    pub hessians: &'a [f64],
    pub lambda: f64,
}

impl Newton<'_> {
    fn score(&self, (g, h): (f64, f64)) -> f64 {
        g * g / (h + self.lambda)
    }
}

impl SplitCriterion for Newton<'_> {
    type Stats = (f64, f64);
    /// Raw score increment.
    type Leaf = f32;

    fn empty(&self) -> (f64, f64) {
        (0.0, 0.0)
    }

    fn add(&self, stats: &mut (f64, f64), sample: usize) {
        stats.0 += self.gradients[sample];
        stats.1 += self.hessians[sample];
    }

    fn subtract(&self, parent: &(f64, f64), left: &(f64, f64)) -> (f64, f64) {
        (parent.0 - left.0, parent.1 - left.1)
    }

    fn weight(&self, stats: &(f64, f64)) -> f64 {
        stats.1
    }

    fn gain(&self, parent: &(f64, f64), left: &(f64, f64), right: &(f64, f64)) -> f64 {
        self.score(*left) + self.score(*right) - self.score(*parent)
    }

    fn leaf(&self, stats: &(f64, f64)) -> f32 {
        (-stats.0 / (stats.1 + self.lambda)) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn gini_tree_separates_on_informative_feature() {
        // feature 0 is noise, feature 1 separates the classes
        let x = array![[0.3, 0.0], [0.1, 1.0], [0.2, 2.0], [0.3, 7.0], [0.1, 8.0], [0.2, 9.0]];
        let labels = [0, 0, 0, 1, 1, 1];
        let weights = [1.0f32; 6];
        let criterion = Gini {
            labels: &labels,
            weights: &weights,
            n_classes: 2,
        };
        let builder = TreeBuilder {
            features: x.view(),
            criterion: &criterion,
            max_depth: 4,
            min_samples_split: 2,
            min_child_weight: 0.0,
            max_features: 1,
        };
        let tree = builder.build((0..6).collect(), &mut StdRng::seed_from_u64(3));

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.leaf(array![0.2, 4.0].view()), &vec![1.0, 0.0]);
        assert_eq!(tree.leaf(array![0.2, 4.6].view()), &vec![0.0, 1.0]);
    }

    #[test]
    fn max_depth_zero_is_a_single_leaf() {
        let x = array![[0.0], [1.0]];
        let labels = [0, 1];
        let weights = [3.0f32, 1.0];
        let criterion = Gini {
            labels: &labels,
            weights: &weights,
            n_classes: 2,
        };
        let builder = TreeBuilder {
            features: x.view(),
            criterion: &criterion,
            max_depth: 0,
            min_samples_split: 2,
            min_child_weight: 0.0,
            max_features: 1,
        };
        let tree = builder.build(vec![0, 1], &mut StdRng::seed_from_u64(0));
        assert_eq!(tree.leaf(array![5.0].view()), &vec![0.75, 0.25]);
    }

    #[test]
    fn newton_leaf_is_regularised_step() {
        let gradients = [1.0, 1.0];
        let hessians = [0.5, 0.5];
        let criterion = Newton {
            gradients: &gradients,
            hessians: &hessians,
            lambda: 1.0,
        };
        let mut stats = criterion.empty();
        criterion.add(&mut stats, 0);
        criterion.add(&mut stats, 1);
        assert!((criterion.leaf(&stats) + 1.0).abs() < 1e-6);
    }
}
