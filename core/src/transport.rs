//! The boundary between the client and whatever moves the bytes.
//!
//! # Design
//! A `Transport` receives a fully configured `HttpRequest` together with an
//! `Exchange`, the event sink for that one request. The transport reports
//! progress through the exchange and finishes it with exactly one of
//! `load`, `error` or `timeout`; those methods consume the exchange so a
//! second terminal report cannot be written. `loadend` follows
//! automatically. Cancellation is driven from the client side: the client
//! emits `abort` itself and raises the exchange's `AbortSignal`, which the
//! transport should honour by stopping its I/O.
//!
//! Dropping an exchange without finishing it fails the request with a
//! network error, so a misbehaving transport cannot leave callers waiting.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::ClientError;
use crate::events::{EventKind, RawEvent, ReadyState};
use crate::handle::RequestId;
use crate::http::{HttpRequest, HttpResponse, RawOutcome};
use crate::lifecycle::Lifecycle;

/// Executes requests on behalf of a `ServiceClient`.
pub trait Transport: Send + Sync + 'static {
    /// Begin the exchange and return without waiting for the response.
    ///
    /// An `Err` means nothing was sent; the request fails with
    /// `ClientError::Send`.
    fn send(&self, request: HttpRequest, exchange: Exchange) -> io::Result<()>;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, request: HttpRequest, exchange: Exchange) -> io::Result<()> {
        (**self).send(request, exchange)
    }
}

/// Event sink for one request, owned by the transport executing it.
pub struct Exchange {
    lifecycle: Arc<Lifecycle>,
}

impl Exchange {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn id(&self) -> RequestId {
        self.lifecycle.id()
    }

    /// Raised when the caller cancels the request.
    pub fn abort_signal(&self) -> AbortSignal {
        self.lifecycle.abort_signal().clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.lifecycle.abort_signal().is_aborted()
    }

    pub fn load_start(&self) {
        self.lifecycle.emit(EventKind::LoadStart, None);
    }

    pub fn ready_state_change(&self, state: ReadyState) {
        self.lifecycle
            .emit(EventKind::ReadyStateChange, Some(RawEvent::ReadyState(state)));
    }

    pub fn progress(&self, loaded: u64, total: Option<u64>) {
        self.lifecycle
            .emit(EventKind::Progress, Some(RawEvent::Progress { loaded, total }));
    }

    /// A response arrived, whatever its status.
    pub fn load(self, response: HttpResponse) {
        self.lifecycle.finish(
            EventKind::Load,
            Ok(RawOutcome::from_response(response)),
            None,
            None,
        );
    }

    /// The exchange failed before a response arrived.
    pub fn error(self, message: impl Into<String>) {
        let message = message.into();
        self.lifecycle.finish(
            EventKind::Error,
            Err(ClientError::Network(message.clone())),
            Some(RawEvent::Failure(message)),
            None,
        );
    }

    /// The request's deadline passed.
    pub fn timeout(self) {
        self.lifecycle
            .finish(EventKind::Timeout, Err(ClientError::Timeout), None, None);
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.lifecycle.release();
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Cancellation flag shared between the client and a transport.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortState>,
}

#[derive(Default)]
struct AbortState {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    pub(crate) fn trigger(&self) {
        if !self.inner.aborted.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Resolves once the request has been cancelled.
    pub async fn aborted(&self) {
        loop {
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
