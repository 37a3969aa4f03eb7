//! Versioned on-disk snapshots of a volume store.
//!
//! A snapshot holds the image, every feature source, and the label and
//! prediction volumes. Files carry a version header so incompatible layouts
//! are rejected on load instead of being misread.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::Options;
use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{FeatureSource, Label, VolumeShape};

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Errors that can occur while saving or loading snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Underlying I/O failure while reading or writing snapshot files.
    #[error("I/O error while accessing snapshot: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization error from the binary codec.
    #[error("Failed to (de)serialize snapshot payload: {0}")]
    Serialization(#[from] bincode::Error),
    /// The file was well formed but written by an incompatible version.
    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    /// The file decoded but its volumes disagree on shape.
    #[error("Snapshot file has invalid structure: {0}")]
    InvalidFormat(String),
}

/// Borrowed view written by [`write_snapshot`].
#[derive(Serialize)]
pub(crate) struct SnapshotRef<'a> {
    pub version: u32,
    pub shape: VolumeShape,
    pub image: &'a Array3<f32>,
    pub features: Vec<(&'a FeatureSource, &'a Array4<f32>)>,
    pub labels: &'a Array3<Label>,
    pub predictions: &'a Array3<Label>,
}

/// Owned snapshot produced by [`read_snapshot`].
#[derive(Deserialize)]
pub(crate) struct VolumeSnapshot {
    pub version: u32,
    pub shape: VolumeShape,
    pub image: Array3<f32>,
    pub features: Vec<(FeatureSource, Array4<f32>)>,
    pub labels: Array3<Label>,
    pub predictions: Array3<Label>,
}

impl VolumeSnapshot {
    fn validate(&self) -> Result<(), SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: self.version,
            });
        }

        let dim = self.shape.dim();
        if self.image.dim() != dim || self.labels.dim() != dim || self.predictions.dim() != dim {
            return Err(SnapshotError::InvalidFormat(format!(
                "volume shapes disagree with header {}",
                self.shape
            )));
        }

        for (source, features) in &self.features {
            let (z, y, x, width) = features.dim();
            if (z, y, x) != dim || width != source.width {
                return Err(SnapshotError::InvalidFormat(format!(
                    "feature source '{}' has shape ({z}, {y}, {x}, {width})",
                    source.name
                )));
            }
        }

        Ok(())
    }
}

/// Deterministic binary codec options shared by reads and writes.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_little_endian()
}

pub(crate) fn write_snapshot<P: AsRef<Path>>(
    snapshot: &SnapshotRef<'_>,
    path: P,
) -> Result<(), SnapshotError> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    codec().serialize_into(&mut writer, snapshot)?;
    writer.flush()?;
    Ok(())
}

pub(crate) fn read_snapshot<P: AsRef<Path>>(path: P) -> Result<VolumeSnapshot, SnapshotError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let snapshot: VolumeSnapshot = codec().deserialize_from(&mut reader)?;
    snapshot.validate()?;
    Ok(snapshot)
}
