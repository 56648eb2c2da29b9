//! Per-request state machine.
//!
//! # Design
//! `Created → Sent → Finished`, with `Released` covering a transport that
//! dropped its `Exchange` before `send` returned. Every event for a request
//! passes through its `Lifecycle`, which drops anything that arrives after
//! the terminal event, removes the request from the registry and settles the
//! outcome exactly once.
//!
//! State changes happen under a short lock; listeners never run under it.
//! Each change instead appends steps (notifications, then the settlement) to
//! a per-request queue. Whichever thread finds the queue idle drains it, and
//! steps queued meanwhile, from this thread or another, are run by that same
//! drainer in order. A listener may therefore cancel its own request or any
//! other one from inside a callback: the abort is queued behind the event
//! being delivered.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::client::ClientInner;
use crate::error::{ClientError, Result};
use crate::events::{EventKind, RawEvent};
use crate::handle::{RequestHandle, RequestId};
use crate::http::RawOutcome;
use crate::transport::AbortSignal;

const RELEASED_WITHOUT_COMPLETION: &str = "transport released the request without completing it";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Released,
    Sent,
    Finished,
}

enum Step {
    Notify {
        kind: EventKind,
        handle: Option<RequestHandle>,
        raw: Option<RawEvent>,
    },
    Settle(Result<RawOutcome>),
}

struct State {
    phase: Phase,
    steps: VecDeque<Step>,
    draining: bool,
}

pub(crate) struct Lifecycle {
    id: RequestId,
    client: Weak<ClientInner>,
    state: Mutex<State>,
    settle: Mutex<Option<oneshot::Sender<Result<RawOutcome>>>>,
    abort: AbortSignal,
}

impl Lifecycle {
    /// Create the lifecycle for a new request and the handle that owns it.
    pub(crate) fn start(id: RequestId, client: Weak<ClientInner>) -> RequestHandle {
        let (tx, rx) = oneshot::channel();
        let lifecycle = Arc::new(Self {
            id,
            client,
            state: Mutex::new(State {
                phase: Phase::Created,
                steps: VecDeque::new(),
                draining: false,
            }),
            settle: Mutex::new(Some(tx)),
            abort: AbortSignal::new(),
        });
        let outcome = rx
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(ClientError::Network(
                        "request was dropped before completing".to_string(),
                    ))
                })
            })
            .boxed()
            .shared();
        RequestHandle::new(id, outcome, lifecycle)
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.lock().phase == Phase::Finished
    }

    /// The transport accepted the request.
    pub(crate) fn mark_sent(&self) {
        let released = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Created => {
                    state.phase = Phase::Sent;
                    false
                }
                Phase::Released => true,
                Phase::Sent | Phase::Finished => false,
            }
        };
        if released {
            self.fail_released();
        }
    }

    /// The transport dropped its `Exchange`.
    pub(crate) fn release(&self) {
        let sent = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Created => {
                    state.phase = Phase::Released;
                    false
                }
                Phase::Sent => true,
                Phase::Released | Phase::Finished => false,
            }
        };
        if sent {
            self.fail_released();
        }
    }

    fn fail_released(&self) {
        tracing::warn!(request = %self.id, "{RELEASED_WITHOUT_COMPLETION}");
        self.finish(
            EventKind::Error,
            Err(ClientError::Network(RELEASED_WITHOUT_COMPLETION.to_string())),
            Some(RawEvent::Failure(RELEASED_WITHOUT_COMPLETION.to_string())),
            None,
        );
    }

    /// Queue a non-terminal event.
    pub(crate) fn emit(&self, kind: EventKind, raw: Option<RawEvent>) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Finished {
                tracing::trace!(request = %self.id, %kind, "dropping event after terminal event");
                return;
            }
            let handle = client.registry.get(self.id);
            state.steps.push_back(Step::Notify { kind, handle, raw });
        }
        self.drain();
    }

    /// Reach a terminal state: leave the registry, queue `kind` then
    /// `loadend` and the settlement. Returns false if the request had
    /// already finished.
    pub(crate) fn finish(
        &self,
        kind: EventKind,
        outcome: Result<RawOutcome>,
        raw: Option<RawEvent>,
        removed: Option<RequestHandle>,
    ) -> bool {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Finished {
                return false;
            }
            state.phase = Phase::Finished;
            tracing::debug!(request = %self.id, %kind, "request finished");
            if let Some(client) = self.client.upgrade() {
                let handle = client.registry.take(self.id).or(removed);
                state.steps.push_back(Step::Notify {
                    kind,
                    handle: handle.clone(),
                    raw,
                });
                state.steps.push_back(Step::Notify {
                    kind: EventKind::LoadEnd,
                    handle,
                    raw: None,
                });
            }
            state.steps.push_back(Step::Settle(outcome));
        }
        self.drain();
        true
    }

    /// The exchange never started. Nothing is broadcast since the request
    /// never emitted `loadstart`.
    pub(crate) fn fail_send(&self, error: ClientError) {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Finished {
                return;
            }
            state.phase = Phase::Finished;
            if let Some(client) = self.client.upgrade() {
                client.registry.complete(self.id);
            }
            tracing::warn!(request = %self.id, %error, "request could not be sent");
            state.steps.push_back(Step::Settle(Err(error)));
        }
        self.drain();
    }

    /// Cancel through the owning client's registry.
    pub(crate) fn cancel(&self) -> bool {
        match self.client.upgrade() {
            Some(client) => client.registry.cancel(self.id),
            None => self.abort(None),
        }
    }

    /// Signal the transport to stop and fail the request as cancelled.
    pub(crate) fn abort(&self, removed: Option<RequestHandle>) -> bool {
        self.abort.trigger();
        let aborted = self.finish(EventKind::Abort, Err(ClientError::Cancelled), None, removed);
        if aborted {
            tracing::debug!(request = %self.id, "request cancelled");
        }
        aborted
    }

    /// Run queued steps unless another call is already doing so.
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let step = {
                let mut state = self.state.lock();
                match state.steps.pop_front() {
                    Some(step) => step,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            match step {
                Step::Notify { kind, handle, raw } => {
                    if let Some(client) = self.client.upgrade() {
                        client.dispatch(self.id, kind, handle, raw);
                    }
                }
                Step::Settle(outcome) => self.settle(outcome),
            }
        }
    }

    fn settle(&self, outcome: Result<RawOutcome>) {
        if let Some(tx) = self.settle.lock().take() {
            // The receiver lives in the shared outcome future; nobody may be
            // listening any more.
            let _ = tx.send(outcome);
        }
    }
}
