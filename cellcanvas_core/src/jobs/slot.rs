//! Single-flight job slots with generation tagging.
//!
//! Starting a job cancels whatever the slot was running and bumps the
//! generation. A finished job may publish only through [`JobSlot::complete`],
//! which checks "not cancelled and still current" while holding the slot lock
//! and runs the publish step under that same lock. A result that loses the
//! race is dropped, so later requests always win regardless of which job
//! finishes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::JobKind;

/// Shared flag between the control thread and one background job.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Identity of one started job.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub kind: JobKind,
    pub generation: u64,
    pub token: CancellationToken,
}

impl JobTicket {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    active: Option<CancellationToken>,
}

#[derive(Debug)]
pub struct JobSlot {
    kind: JobKind,
    state: Mutex<SlotState>,
}

impl JobSlot {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            state: Mutex::new(SlotState::default()),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Start a new job, superseding the active one.
    pub fn begin(&self) -> JobTicket {
        let mut state = self.state.lock();
        if let Some(previous) = state.active.take() {
            previous.cancel();
        }
        state.generation += 1;
        let token = CancellationToken::new();
        state.active = Some(token.clone());
        JobTicket {
            kind: self.kind,
            generation: state.generation,
            token,
        }
    }

    /// Cancel the active job, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        match state.active.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active.is_some()
    }

    pub fn is_current(&self, ticket: &JobTicket) -> bool {
        let state = self.state.lock();
        !ticket.is_cancelled() && state.generation == ticket.generation
    }

    /// Run `publish` if `ticket` is still current, under the slot lock.
    ///
    /// Returns `None` (and does not call `publish`) for a stale or cancelled
    /// ticket. Either way a current ticket stops being active.
    pub fn complete<R>(&self, ticket: &JobTicket, publish: impl FnOnce() -> R) -> Option<R> {
        let mut state = self.state.lock();
        if ticket.is_cancelled() || state.generation != ticket.generation {
            return None;
        }
        let published = publish();
        state.active = None;
        Some(published)
    }

    /// Release a current ticket without publishing (failed or skipped job).
    pub fn release(&self, ticket: &JobTicket) {
        let mut state = self.state.lock();
        if state.generation == ticket.generation {
            state.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_supersedes_previous_job() {
        let slot = JobSlot::new(JobKind::Fit);
        let first = slot.begin();
        let second = slot.begin();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(second.generation, first.generation + 1);
        assert!(!slot.is_current(&first));
        assert!(slot.is_current(&second));
    }

    #[test]
    fn stale_completion_is_discarded() {
        let slot = JobSlot::new(JobKind::Fit);
        let a = slot.begin();
        let b = slot.begin();

        // b finishes first, then a arrives late
        assert_eq!(slot.complete(&b, || "b"), Some("b"));
        assert_eq!(slot.complete(&a, || "a"), None);
        assert!(!slot.is_active());
    }

    #[test]
    fn cancel_before_publish_blocks_completion() {
        let slot = JobSlot::new(JobKind::Predict);
        let ticket = slot.begin();
        assert!(slot.cancel());
        let mut published = false;
        assert!(slot.complete(&ticket, || published = true).is_none());
        assert!(!published);
        assert!(!slot.cancel());
    }

    #[test]
    fn release_only_clears_current_ticket() {
        let slot = JobSlot::new(JobKind::BackgroundEstimate);
        let old = slot.begin();
        let _current = slot.begin();
        slot.release(&old);
        assert!(slot.is_active());
    }
}
