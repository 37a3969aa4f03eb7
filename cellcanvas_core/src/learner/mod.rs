//! Learner module - the classifier capability and the training step
//!
//! The pipeline only depends on the [`Classifier`] / [`Model`] contract:
//! - [`RandomForest`]: bagged ensemble of weighted CART trees
//! - [`GradientBoosting`]: softmax gradient-boosted regression trees
//!
//! [`training`] turns a raw sample batch into a weighted training set and
//! wraps the fitted model with the class table needed to map predictions back
//! to label space.

pub mod boost;
pub mod classifier;
pub mod forest;
pub mod training;
mod tree;

pub use boost::{BoostParams, GradientBoosting};
pub use classifier::{build_classifier, Classifier, ClassifierConfig, Model, ModelKind};
pub use forest::{ForestParams, RandomForest};
pub use training::{
    balanced_class_weights, fit_model, prepare_training_set, ModelSummary, TrainedModel,
    TrainingSet,
};
