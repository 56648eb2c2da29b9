//! Default transport: blocking `ureq` calls on a worker thread per request.
//!
//! # Design
//! The agent is configured with `http_status_as_error(false)` so 4xx/5xx
//! responses come back as data; status interpretation belongs to the result
//! pipeline. The body is read in fixed-size chunks, each reported as a
//! `progress` event. Cancellation is checked between chunks; a cancelled
//! worker simply stops and drops its exchange.
//!
//! A blocking ureq call cannot be interrupted. Cancelling settles the request
//! immediately, but its worker thread stays parked in the call until the
//! server answers or the request's timeout passes. With a zero default
//! timeout and a server that never answers, that thread is never released;
//! keep a finite timeout when requests may be cancelled against unreliable
//! servers.

use std::fmt;
use std::io::{self, Read};
use std::thread;

use ureq::http::Response;
use ureq::{Agent, Body};

use crate::events::ReadyState;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{Exchange, Transport};

const CHUNK_SIZE: usize = 8 * 1024;

/// Runs each request on its own thread with a shared ureq agent.
///
/// See the module docs for how cancellation interacts with a call that is
/// still waiting on the server.
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }

    /// Use a preconfigured agent. It should not treat HTTP error statuses as
    /// transport errors, or non-success responses surface as network errors.
    pub fn from_agent(agent: Agent) -> Self {
        Self { agent }
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: HttpRequest, exchange: Exchange) -> io::Result<()> {
        let agent = self.agent.clone();
        thread::Builder::new()
            .name(format!("service-client-{}", exchange.id()))
            .spawn(move || execute(&agent, request, exchange))?;
        Ok(())
    }
}

fn execute(agent: &Agent, request: HttpRequest, exchange: Exchange) {
    exchange.load_start();
    exchange.ready_state_change(ReadyState::Opened);
    let result = call(agent, request);
    if exchange.is_aborted() {
        return;
    }
    let mut response = match result {
        Ok(response) => response,
        Err(error) if is_timeout(&error) => return exchange.timeout(),
        Err(error) => return exchange.error(error.to_string()),
    };
    exchange.ready_state_change(ReadyState::HeadersReceived);

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let total = response
        .headers()
        .get("content-length")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let mut body = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut reader = response.body_mut().as_reader();
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => {
                if body.is_empty() {
                    exchange.ready_state_change(ReadyState::Loading);
                }
                body.extend_from_slice(&chunk[..read]);
                exchange.progress(body.len() as u64, total);
                if exchange.is_aborted() {
                    return;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) if error.kind() == io::ErrorKind::TimedOut => return exchange.timeout(),
            Err(error) => return exchange.error(error.to_string()),
        }
    }

    exchange.ready_state_change(ReadyState::Done);
    exchange.load(HttpResponse {
        status,
        headers,
        body,
    });
}

fn call(agent: &Agent, request: HttpRequest) -> Result<Response<Body>, ureq::Error> {
    let HttpRequest {
        method,
        uri,
        headers,
        timeout,
        body,
    } = request;

    // Typestates differ per method, so the shared setup is a macro.
    macro_rules! prepare {
        ($builder:expr) => {{
            let mut builder = $builder;
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if timeout.is_some() {
                builder = builder.config().timeout_global(timeout).build();
            }
            builder
        }};
    }

    match method {
        HttpMethod::Get => prepare!(agent.get(&uri)).call(),
        HttpMethod::Delete => prepare!(agent.delete(&uri)).call(),
        HttpMethod::Options => prepare!(agent.options(&uri)).call(),
        HttpMethod::Post => {
            let builder = prepare!(agent.post(&uri));
            match body {
                Some(body) => builder.send(body.as_bytes()),
                None => builder.send_empty(),
            }
        }
        HttpMethod::Put => {
            let builder = prepare!(agent.put(&uri));
            match body {
                Some(body) => builder.send(body.as_bytes()),
                None => builder.send_empty(),
            }
        }
    }
}

fn is_timeout(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::Timeout(_) => true,
        ureq::Error::Io(err) => err.kind() == io::ErrorKind::TimedOut,
        _ => false,
    }
}
