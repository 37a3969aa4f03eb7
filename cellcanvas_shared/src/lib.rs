//! CellCanvas Shared Library
//!
//! Types that both the classification core and any viewer need, with no
//! dependency on a rendering surface.
//!
//! This library provides:
//! - Embedding-space geometry: points, lasso polygons and an inclusive
//!   point-in-polygon test
//! - Class distribution statistics for painted and predicted label volumes

pub mod geometry;
pub mod stats;

// Re-export commonly used types
pub use geometry::{BoundingBox, Point2, Polygon};
pub use stats::{ClassCount, ClassDistribution};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
