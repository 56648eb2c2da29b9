//! HTTP exchange types for the host-does-IO boundary.
//!
//! # Design
//! Requests and responses are plain data. The client builds an `HttpRequest`
//! and hands it to a `Transport`; the transport reports back an
//! `HttpResponse`, which the client freezes into a `RawOutcome`. Nothing in
//! here touches the network, so everything can be constructed in tests.
//!
//! All fields use owned types so values cross thread boundaries freely.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{ClientError, Result};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing HTTP request described as plain data.
///
/// Built by `ServiceClient` from a normalized query, then passed through
/// every registered request configurer before the transport sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    /// `None` leaves the deadline to the transport.
    pub timeout: Option<Duration>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            timeout: None,
            body: None,
        }
    }

    /// Set a header, replacing any existing value with the same
    /// (case-insensitive) name in place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        set_header(&mut self.headers, name.into(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let index = self
            .headers
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.headers.remove(index).1)
    }
}

/// Insert `name: value`, keeping the position of an existing entry.
pub(crate) fn set_header(headers: &mut Vec<(String, String)>, name: String, value: String) {
    match headers
        .iter_mut()
        .find(|(key, _)| key.eq_ignore_ascii_case(&name))
    {
        Some(entry) => entry.1 = value,
        None => headers.push((name, value)),
    }
}

/// An HTTP response as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The untyped, immutable result of a completed exchange.
///
/// Cheap to clone; the header block and body are shared.
#[derive(Debug, Clone)]
pub struct RawOutcome {
    status: u16,
    headers: Arc<str>,
    body: Arc<[u8]>,
}

impl RawOutcome {
    pub fn from_response(response: HttpResponse) -> Self {
        let headers: String = response
            .headers
            .iter()
            .map(|(name, value)| format!("{name}: {value}\r\n"))
            .collect();
        Self {
            status: response.status,
            headers: headers.into(),
            body: response.body.into(),
        }
    }

    /// True if the status is in [200, 400).
    pub fn ok(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// The response headers as one `name: value\r\n` block.
    pub fn headers(&self) -> &str {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body as text. Fails if the body is not UTF-8.
    pub fn response_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(|e| ClientError::BodyRead(e.to_string()))
    }

    /// Parse the body as JSON. An empty body yields `Ok(None)`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let text = self.response_text()?;
        if text.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(text)
            .map(Some)
            .map_err(|e| ClientError::Deserialization {
                text: text.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: u16, body: &[u8]) -> RawOutcome {
        RawOutcome::from_response(HttpResponse {
            status,
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("x-trace".to_string(), "abc".to_string()),
            ],
            body: body.to_vec(),
        })
    }

    #[test]
    fn ok_covers_success_and_redirect_range() {
        assert!(!outcome(199, b"").ok());
        assert!(outcome(200, b"").ok());
        assert!(outcome(304, b"").ok());
        assert!(outcome(399, b"").ok());
        assert!(!outcome(400, b"").ok());
        assert!(!outcome(500, b"").ok());
    }

    #[test]
    fn headers_render_as_text_block() {
        assert_eq!(
            outcome(200, b"").headers(),
            "content-type: application/json\r\nx-trace: abc\r\n"
        );
    }

    #[test]
    fn invalid_utf8_body_is_a_body_read_failure() {
        let err = outcome(200, &[0xff, 0xfe]).response_text().unwrap_err();
        assert!(matches!(err, ClientError::BodyRead(_)));
    }

    #[test]
    fn json_of_empty_body_is_none() {
        let parsed: Option<serde_json::Value> = outcome(200, b"").json().unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn json_parses_body() {
        let parsed: Option<Vec<u32>> = outcome(200, b"[1,2,3]").json().unwrap();
        assert_eq!(parsed, Some(vec![1, 2, 3]));
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut req = HttpRequest::new(HttpMethod::Get, "/x");
        req.set_header("Accept", "text/plain");
        req.set_header("X-One", "1");
        req.set_header("accept", "application/json");
        assert_eq!(
            req.headers,
            vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("X-One".to_string(), "1".to_string()),
            ]
        );
        assert_eq!(req.header("ACCEPT"), Some("application/json"));
        assert_eq!(req.remove_header("x-one").as_deref(), Some("1"));
        assert_eq!(req.header("x-one"), None);
    }

    #[test]
    fn method_names() {
        assert_eq!(HttpMethod::Options.to_string(), "OPTIONS");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
    }
}
