//! Caller-facing handle to one in-flight request.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::Instrument;

use crate::error::Result;
use crate::http::RawOutcome;
use crate::lifecycle::Lifecycle;
use crate::pipeline::derive_result;

pub(crate) type SharedOutcome = Shared<BoxFuture<'static, Result<RawOutcome>>>;

/// Identifies a request for the lifetime of the client that issued it.
/// Ids start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned immediately by every verb method.
///
/// Clones refer to the same request. The handle stays usable after the
/// request has finished and left the client's registry: `outcome()` and
/// `result()` resolve from the same settled exchange, and `cancel()` simply
/// returns false.
#[derive(Clone)]
pub struct RequestHandle {
    id: RequestId,
    outcome: SharedOutcome,
    lifecycle: Arc<Lifecycle>,
}

impl RequestHandle {
    pub(crate) fn new(id: RequestId, outcome: SharedOutcome, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            id,
            outcome,
            lifecycle,
        }
    }

    pub(crate) fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// True until the request reaches a terminal event.
    pub fn is_pending(&self) -> bool {
        !self.lifecycle.is_finished()
    }

    /// Abort the request. Returns true if it was still in flight; its
    /// futures then fail with `ClientError::Cancelled`.
    pub fn cancel(&self) -> bool {
        self.lifecycle.cancel()
    }

    /// The raw exchange outcome. Resolves once; may be awaited from any
    /// number of clones.
    pub fn outcome(&self) -> impl Future<Output = Result<RawOutcome>> + Send + 'static {
        self.outcome.clone()
    }

    /// The response body as untyped JSON.
    pub fn result(&self) -> impl Future<Output = Result<Value>> + Send + 'static {
        self.result_with(|value| Ok::<_, Infallible>(value.clone()))
    }

    /// The response body deserialized into `T`. A body that parses as JSON
    /// but does not fit `T` is a conversion failure.
    pub fn result_as<T>(&self) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.result_with(|value| T::deserialize(value))
    }

    /// The response body passed through `converter`. Each call runs an
    /// independent derivation over the same outcome; the request is not
    /// re-issued.
    pub fn result_with<T, E, F>(
        &self,
        converter: F,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce(&Value) -> std::result::Result<T, E> + Send + 'static,
        E: fmt::Display + 'static,
        T: Send + 'static,
    {
        derive_result(self.outcome.clone(), converter)
            .instrument(tracing::debug_span!("result", request = %self.id))
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}
