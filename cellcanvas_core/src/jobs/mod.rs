//! Background job bookkeeping: kinds, single-flight slots, cancellation and
//! versioned publication.

pub mod slot;
pub mod versioned;

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

pub use slot::{CancellationToken, JobSlot, JobTicket};
pub use versioned::{Published, Versioned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Fit,
    Predict,
    BackgroundEstimate,
    Embedding,
    Selection,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Fit,
        JobKind::Predict,
        JobKind::BackgroundEstimate,
        JobKind::Embedding,
        JobKind::Selection,
    ];

    /// Whether a successful run of this kind rewrites the label volume.
    pub fn mutates_labels(&self) -> bool {
        matches!(self, JobKind::BackgroundEstimate | JobKind::Selection)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Fit => "fit",
            JobKind::Predict => "predict",
            JobKind::BackgroundEstimate => "background_estimate",
            JobKind::Embedding => "embedding",
            JobKind::Selection => "selection",
        }
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a finished job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Result published
    Published,
    /// Expected condition (configuration or data), prior state kept
    Skipped,
    /// Storage or state failure
    Failed,
    /// Superseded or cancelled before publishing
    Discarded,
}

/// One [`JobSlot`] per [`JobKind`].
#[derive(Debug)]
pub struct JobSlots {
    slots: [JobSlot; 5],
}

impl Default for JobSlots {
    fn default() -> Self {
        Self {
            slots: JobKind::ALL.map(JobSlot::new),
        }
    }
}

impl JobSlots {
    pub fn get(&self, kind: JobKind) -> &JobSlot {
        &self.slots[kind as usize]
    }

    pub fn cancel_all(&self) {
        for slot in &self.slots {
            slot.cancel();
        }
    }

    pub fn any_active(&self) -> bool {
        self.slots.iter().any(JobSlot::is_active)
    }
}
