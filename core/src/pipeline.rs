//! Derivation of a typed value from a raw outcome.
//!
//! Stages, each failing through the same `Result`:
//! 1. the exchange itself (network error, timeout, cancellation, send failure)
//! 2. reading the body as text
//! 3. the status check
//! 4. JSON parsing
//! 5. the caller's converter

use std::fmt::Display;
use std::future::Future;

use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::http::RawOutcome;

pub async fn derive_result<T, E, F, Fut>(outcome: Fut, converter: F) -> Result<T>
where
    Fut: Future<Output = Result<RawOutcome>>,
    F: FnOnce(&Value) -> std::result::Result<T, E>,
    E: Display,
{
    let outcome = outcome.await?;
    let text = outcome.response_text()?;
    tracing::trace!(status = outcome.status(), body = text, "raw response");
    if !outcome.ok() {
        return Err(ClientError::Status(Box::new(outcome)));
    }
    let value: Value = serde_json::from_str(text).map_err(|e| ClientError::Deserialization {
        text: text.to_string(),
        message: e.to_string(),
    })?;
    tracing::trace!(json = %value, "parsed response");
    match converter(&value) {
        Ok(converted) => {
            tracing::trace!(
                converted = std::any::type_name::<T>(),
                "converted response"
            );
            Ok(converted)
        }
        Err(e) => Err(ClientError::Conversion {
            value,
            message: e.to_string(),
        }),
    }
}
