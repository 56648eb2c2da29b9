//! Tracking of in-flight requests.
//!
//! # Design
//! One map, keyed by request id, backs every read and write: registration,
//! completion, cancellation and the in-flight count all consult the same
//! structure, so `len()` is always the true number of outstanding requests.
//! An id is present exactly while its outcome is unsettled.
//!
//! The lock is never held while calling back into a request: cancellation
//! removes the entry first and aborts afterwards, so an abort that completes
//! synchronously (and notifies listeners, who may call back in here) cannot
//! deadlock.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::handle::{RequestHandle, RequestId};

#[derive(Default)]
pub struct RequestRegistry {
    entries: Mutex<HashMap<RequestId, RequestHandle>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new request.
    ///
    /// # Panics
    /// If the id is already tracked. Ids come from a single monotonic
    /// counter, so this indicates a bug in the caller.
    pub fn register(&self, handle: RequestHandle) {
        let id = handle.id();
        let previous = self.entries.lock().insert(id, handle);
        assert!(previous.is_none(), "request {id} registered twice");
    }

    /// Stop tracking `id`. Returns whether it was tracked.
    pub fn complete(&self, id: RequestId) -> bool {
        self.take(id).is_some()
    }

    pub(crate) fn take(&self, id: RequestId) -> Option<RequestHandle> {
        self.entries.lock().remove(&id)
    }

    pub fn get(&self, id: RequestId) -> Option<RequestHandle> {
        self.entries.lock().get(&id).cloned()
    }

    /// Abort `id` and stop tracking it. Returns false if it had already
    /// finished or was never issued.
    pub fn cancel(&self, id: RequestId) -> bool {
        let Some(handle) = self.take(id) else {
            return false;
        };
        let lifecycle = handle.lifecycle().clone();
        lifecycle.abort(Some(handle))
    }

    /// Cancel everything in flight. Returns true if anything was cancelled.
    pub fn cancel_all(&self) -> bool {
        let ids = self.ids();
        let cancelled = ids.into_iter().filter(|id| self.cancel(*id)).count();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled in-flight requests");
        }
        cancelled > 0
    }

    /// Tracked ids in ascending order.
    pub fn ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn has_in_flight(&self) -> bool {
        !self.is_empty()
    }
}

impl fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("in_flight", &self.ids())
            .finish()
    }
}
