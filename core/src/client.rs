//! The service client: verbs, request configuration and the default instance.
//!
//! # Design
//! `ServiceClient` is a cheap, cloneable handle to shared state: the id
//! counter, the registry of in-flight requests, the listener set and the
//! request configurers. Verb methods never block and never fail
//! synchronously. They normalize the query, build an `HttpRequest`, hand it
//! to the transport and return a `RequestHandle`; every failure arrives
//! through that handle's futures.
//!
//! Request configuration runs in a fixed order: user agent, then the
//! normalized query's headers, cache policy and timeout, then the JSON
//! content type for payloads, then every registered configurer in
//! registration order. Later steps overwrite earlier ones.
//!
//! Independent clients have independent ids and registries. `service_client()`
//! returns a process-wide default built once from the environment.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{ClientEvent, EventBroadcaster, EventKind, ListenerRegistration, RawEvent};
use crate::handle::{RequestHandle, RequestId};
use crate::http::{HttpMethod, HttpRequest};
use crate::lifecycle::Lifecycle;
use crate::query::{Query, QueryDefaults};
use crate::registry::RequestRegistry;
use crate::transport::{Exchange, Transport};
use crate::ureq_transport::UreqTransport;

/// Adjusts every outgoing request just before it is sent.
pub type RequestConfigurer = Arc<dyn Fn(&mut HttpRequest) + Send + Sync>;

const ENV_PREFIX: &str = "SERVICE_CLIENT";

pub(crate) struct ClientInner {
    counter: AtomicU64,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    configurers: RwLock<Vec<RequestConfigurer>>,
    pub(crate) registry: RequestRegistry,
    broadcaster: EventBroadcaster,
}

impl ClientInner {
    fn next_id(&self) -> RequestId {
        RequestId::new(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn dispatch(
        &self,
        id: RequestId,
        kind: EventKind,
        request: Option<RequestHandle>,
        raw: Option<RawEvent>,
    ) {
        let event = ClientEvent {
            request_id: id,
            kind,
            running: self.registry.len(),
            request,
            raw,
        };
        self.broadcaster.notify(&event);
    }
}

/// Issues requests and tracks them until they finish.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

impl Default for ServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceClient {
    /// A client with default configuration over the ureq transport.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder::new()
    }

    pub fn with_transport(transport: impl Transport) -> Self {
        Self::builder().transport(transport).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Observe lifecycle events of every request this client issues.
    pub fn listen<F>(&self, listener: F) -> ListenerRegistration
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.broadcaster.listen(listener)
    }

    pub fn has_in_flight_requests(&self) -> bool {
        self.inner.registry.has_in_flight()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.registry.len()
    }

    /// Run `configurer` against every request this client sends from now on,
    /// after the request's own configuration has been applied.
    pub fn configure_requests_with<F>(&self, configurer: F)
    where
        F: Fn(&mut HttpRequest) + Send + Sync + 'static,
    {
        self.inner.configurers.write().push(Arc::new(configurer));
    }

    /// Cancel a request by id. Returns false if it is no longer in flight.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.inner.registry.cancel(id)
    }

    /// Cancel every outstanding request. Returns true if there were any.
    pub fn cancel_all(&self) -> bool {
        self.inner.registry.cancel_all()
    }

    pub fn get(&self, query: impl Into<Query>) -> RequestHandle {
        self.request(HttpMethod::Get, query.into(), None)
    }

    pub fn del(&self, query: impl Into<Query>) -> RequestHandle {
        self.request(HttpMethod::Delete, query.into(), None)
    }

    pub fn options(&self, query: impl Into<Query>) -> RequestHandle {
        self.request(HttpMethod::Options, query.into(), None)
    }

    /// POST `payload` as JSON.
    pub fn post<P>(&self, query: impl Into<Query>, payload: &P) -> RequestHandle
    where
        P: Serialize + ?Sized,
    {
        self.request(HttpMethod::Post, query.into(), Some(serialize(payload)))
    }

    pub fn post_empty(&self, query: impl Into<Query>) -> RequestHandle {
        self.request(HttpMethod::Post, query.into(), None)
    }

    /// PUT `payload` as JSON.
    pub fn put<P>(&self, query: impl Into<Query>, payload: &P) -> RequestHandle
    where
        P: Serialize + ?Sized,
    {
        self.request(HttpMethod::Put, query.into(), Some(serialize(payload)))
    }

    pub fn put_empty(&self, query: impl Into<Query>) -> RequestHandle {
        self.request(HttpMethod::Put, query.into(), None)
    }

    fn request(
        &self,
        method: HttpMethod,
        query: Query,
        payload: Option<Result<String, ClientError>>,
    ) -> RequestHandle {
        let inner = &self.inner;
        let id = inner.next_id();
        let query = query.normalize(&inner.config.defaults);
        let uri = inner.config.resolve(&query.request_uri());
        tracing::debug!(request = %id, %method, %uri, "invoke");

        let handle = Lifecycle::start(id, Arc::downgrade(inner));
        let lifecycle = handle.lifecycle().clone();
        inner.registry.register(handle.clone());

        let body = match payload.transpose() {
            Ok(body) => body,
            Err(error) => {
                lifecycle.fail_send(error);
                return handle;
            }
        };

        let mut request = HttpRequest::new(method, uri);
        if let Some(user_agent) = &inner.config.user_agent {
            request.set_header("User-Agent", user_agent.clone());
        }
        query.configure(&mut request);
        if let Some(body) = body {
            tracing::trace!(request = %id, payload = %body, "send payload");
            request.set_header("Content-Type", "application/json");
            request.body = Some(body);
        }
        let configurers = inner.configurers.read().clone();
        for configurer in &configurers {
            configurer(&mut request);
        }

        match inner.transport.send(request, Exchange::new(lifecycle.clone())) {
            Ok(()) => lifecycle.mark_sent(),
            Err(error) => lifecycle.fail_send(ClientError::Send(error.to_string())),
        }
        handle
    }
}

fn serialize<P: Serialize + ?Sized>(payload: &P) -> Result<String, ClientError> {
    serde_json::to_string(payload)
        .map_err(|e| ClientError::Send(format!("could not serialize payload: {e}")))
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("broadcaster", &self.inner.broadcaster)
            .finish()
    }
}

/// The process-wide default client, configured from `SERVICE_CLIENT_*`
/// environment variables on first use.
pub fn service_client() -> &'static ServiceClient {
    static CLIENT: OnceLock<ServiceClient> = OnceLock::new();
    CLIENT.get_or_init(|| {
        ServiceClient::builder()
            .config(ClientConfig::from_env(ENV_PREFIX))
            .build()
    })
}

/// Builder for a `ServiceClient` with custom configuration or transport.
pub struct ServiceClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    configurers: Vec<RequestConfigurer>,
}

impl Default for ServiceClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            configurers: Vec::new(),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    pub fn defaults(mut self, defaults: QueryDefaults) -> Self {
        self.config.defaults = defaults;
        self
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn configure_requests_with<F>(mut self, configurer: F) -> Self
    where
        F: Fn(&mut HttpRequest) + Send + Sync + 'static,
    {
        self.configurers.push(Arc::new(configurer));
        self
    }

    pub fn build(self) -> ServiceClient {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(UreqTransport::new()));
        ServiceClient {
            inner: Arc::new(ClientInner {
                counter: AtomicU64::new(0),
                config: self.config,
                transport,
                configurers: RwLock::new(self.configurers),
                registry: RequestRegistry::new(),
                broadcaster: EventBroadcaster::new(),
            }),
        }
    }
}

impl fmt::Debug for ServiceClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClientBuilder")
            .field("config", &self.config)
            .field("configurers", &self.configurers.len())
            .finish()
    }
}
