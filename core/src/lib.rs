//! Asynchronous request lifecycle core for generated service clients.
//!
//! # Overview
//! Generated client code describes each call as a `Query`, issues it through
//! one of `ServiceClient`'s verb methods and immediately gets back a
//! `RequestHandle`. The handle can be cancelled, and its `result()` futures
//! resolve to typed values once the transport finishes.
//!
//! # Design
//! - `query` merges caller intent with client defaults into the final URI
//!   and headers.
//! - `transport` is the boundary to whatever moves the bytes; requests and
//!   responses cross it as plain data (host-does-IO). `ureq_transport` is
//!   the default implementation.
//! - `registry` tracks in-flight requests by id; `events` broadcasts every
//!   lifecycle event to listeners; `lifecycle` ties the two to each
//!   request's outcome.
//! - `pipeline` turns a raw outcome into a typed value, with a distinct
//!   `ClientError` for each stage that can fail.
//!
//! ```ignore
//! use service_client::{Query, ServiceClient};
//!
//! let client = ServiceClient::builder().endpoint("http://localhost:3000").build();
//! let request = client.get(Query::new("/blogs").param("since", "2024-01-01"));
//! let blogs: Vec<Blog> = request.result_as().await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod http;
mod lifecycle;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod transport;
pub mod ureq_transport;

pub use client::{service_client, RequestConfigurer, ServiceClient, ServiceClientBuilder};
pub use config::ClientConfig;
pub use error::{ClientError, FailureKind, Result};
pub use events::{ClientEvent, EventKind, ListenerRegistration, RawEvent, ReadyState};
pub use handle::{RequestHandle, RequestId};
pub use http::{HttpMethod, HttpRequest, HttpResponse, RawOutcome};
pub use query::{normalize, NormalizedQuery, Query, QueryDefaults};
pub use transport::{AbortSignal, Exchange, Transport};
pub use ureq_transport::UreqTransport;
