//! Volume addressing and storage.
//!
//! All volumes (image, feature, label, prediction) share one `(z, y, x)`
//! coordinate system and a stable shape.

pub mod memory;
pub mod snapshot;
pub mod store;

use std::fmt::{self, Display};
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{CanvasError, CanvasResult};

pub use memory::MemoryStore;
pub use snapshot::{SnapshotError, SNAPSHOT_VERSION};
pub use store::{FeatureSource, OpenMode, VolumeStore};

/// Integer class id; `0` is reserved for "unlabeled".
pub type Label = u32;

/// The reserved "unlabeled" value.
pub const UNLABELED: Label = 0;

/// Spatial extent of a volume, `(z, y, x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeShape {
    pub z: usize,
    pub y: usize,
    pub x: usize,
}

impl VolumeShape {
    pub const fn new(z: usize, y: usize, x: usize) -> Self {
        Self { z, y, x }
    }

    pub fn from_dim((z, y, x): (usize, usize, usize)) -> Self {
        Self { z, y, x }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        (self.z, self.y, self.x)
    }

    pub fn voxels(&self) -> usize {
        self.z * self.y * self.x
    }

    /// Map a row-major flat index back to `[z, y, x]`.
    pub fn unravel(&self, index: usize) -> [usize; 3] {
        let plane = self.y * self.x;
        [index / plane, (index % plane) / self.x, index % self.x]
    }

    /// Row-major flat index of `[z, y, x]`.
    pub fn ravel(&self, [z, y, x]: [usize; 3]) -> usize {
        (z * self.y + y) * self.x + x
    }

    pub fn contains(&self, [z, y, x]: [usize; 3]) -> bool {
        z < self.z && y < self.y && x < self.x
    }
}

impl Display for VolumeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.z, self.y, self.x)
    }
}

/// A box-shaped sub-region of a volume, half-open on every axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub z: Range<usize>,
    pub y: Range<usize>,
    pub x: Range<usize>,
}

impl Region {
    pub fn new(z: Range<usize>, y: Range<usize>, x: Range<usize>) -> Self {
        Self { z, y, x }
    }

    pub fn whole(shape: VolumeShape) -> Self {
        Self::new(0..shape.z, 0..shape.y, 0..shape.x)
    }

    /// The region a viewer currently displays: a single z slice at `z_step`,
    /// with y/x bounds taken from the two corner pixels `[[z, y, x]; 2]`.
    pub fn viewport(z_step: usize, corners: [[usize; 3]; 2]) -> Self {
        Self::new(
            z_step..z_step + 1,
            corners[0][1]..corners[1][1],
            corners[0][2]..corners[1][2],
        )
    }

    pub fn shape(&self) -> VolumeShape {
        VolumeShape::new(self.z.len(), self.y.len(), self.x.len())
    }

    pub fn voxels(&self) -> usize {
        self.shape().voxels()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels() == 0
    }

    pub fn is_whole(&self, shape: VolumeShape) -> bool {
        *self == Self::whole(shape)
    }

    /// Fail unless the region is non-empty and inside `shape`.
    pub fn check_within(&self, shape: VolumeShape) -> CanvasResult<()> {
        let fits = self.z.end <= shape.z && self.y.end <= shape.y && self.x.end <= shape.x;
        if !fits || self.is_empty() {
            return Err(CanvasError::RegionOutOfBounds {
                region: self.to_string(),
                shape: shape.to_string(),
            });
        }
        Ok(())
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}, {}..{}, {}..{}]",
            self.z.start, self.z.end, self.y.start, self.y.end, self.x.start, self.x.end
        )
    }
}
