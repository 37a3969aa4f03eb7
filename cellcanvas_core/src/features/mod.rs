//! Sample extraction: feature/label training pairs from a region policy.

pub mod extract;

pub use extract::{
    into_matrix, FeatureSelection, RegionPolicy, SampleBatch, SampleExtractor,
};
