//! Error types for the service client.
//!
//! # Design
//! Every way a request can go wrong surfaces through the same channel: the
//! future returned by `RequestHandle::outcome()` or `RequestHandle::result()`.
//! Nothing is raised synchronously out of a verb method. Variants are grouped
//! into a small `FailureKind` tag so callers can branch on the stage that
//! failed without matching every variant.
//!
//! `ClientError` is `Clone` because a single outcome is shared by every
//! `result()` derivation over the same request.

use thiserror::Error;

use crate::http::RawOutcome;

/// Errors produced while issuing a request or deriving its result.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The transport reported a network error before any response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// The transport gave up waiting for the response.
    #[error("request timed out")]
    Timeout,

    /// The caller cancelled the request before it completed.
    #[error("request was cancelled")]
    Cancelled,

    /// The exchange could not be started, e.g. the payload failed to
    /// serialize or the transport refused the request.
    #[error("failed to send request: {0}")]
    Send(String),

    /// A response arrived with a status outside [200, 400).
    #[error("request failed with HTTP status {}", .0.status())]
    Status(Box<RawOutcome>),

    /// The response body could not be read as text.
    #[error("failed to read response body: {0}")]
    BodyRead(String),

    /// The response body is not valid JSON.
    #[error("response body is not valid JSON: {message}")]
    Deserialization { text: String, message: String },

    /// The caller-supplied converter rejected the parsed body.
    #[error("failed to convert response: {message}")]
    Conversion {
        value: serde_json::Value,
        message: String,
    },
}

/// The pipeline stage a `ClientError` originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Transport,
    Send,
    Status,
    BodyRead,
    Deserialization,
    Conversion,
}

impl ClientError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network(_) | Self::Timeout | Self::Cancelled => FailureKind::Transport,
            Self::Send(_) => FailureKind::Send,
            Self::Status(_) => FailureKind::Status,
            Self::BodyRead(_) => FailureKind::BodyRead,
            Self::Deserialization { .. } => FailureKind::Deserialization,
            Self::Conversion { .. } => FailureKind::Conversion,
        }
    }

    /// True for network errors, timeouts and cancellation.
    pub fn is_transport(&self) -> bool {
        self.kind() == FailureKind::Transport
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// The response that carried a non-success status, if that is what failed.
    pub fn outcome(&self) -> Option<&RawOutcome> {
        match self {
            Self::Status(outcome) => Some(outcome.as_ref()),
            _ => None,
        }
    }

    /// HTTP status code of a `Status` failure.
    pub fn status(&self) -> Option<u16> {
        self.outcome().map(RawOutcome::status)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
