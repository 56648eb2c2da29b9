//! End-to-end tests against the live mock server.
//!
//! # Design
//! Starts the mock server once on a random port, then drives every
//! `ServiceClient` path over real HTTP through the default ureq transport:
//! typed results, status failures, body failures, timeouts, cancellation and
//! the headers the server actually receives.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use service_client::{
    ClientError, ClientEvent, EventKind, FailureKind, Query, RawEvent, ReadyState, ServiceClient,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn server() -> SocketAddr {
    static ADDR: OnceLock<SocketAddr> = OnceLock::new();
    *ADDR.get_or_init(|| {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                mock_server::run(listener).await
            })
            .unwrap();
        });
        addr
    })
}

fn client() -> ServiceClient {
    init_tracing();
    ServiceClient::builder()
        .endpoint(format!("http://{}", server()))
        .build()
}

/// Records every event the client broadcasts.
fn record(client: &ServiceClient) -> Arc<Mutex<Vec<ClientEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client.listen(move |event| sink.lock().push(event.clone()));
    events
}

fn kinds(events: &[ClientEvent]) -> Vec<EventKind> {
    events.iter().map(|event| event.kind).collect()
}

#[tokio::test]
async fn post_round_trips_payload() {
    let client = client();
    let payload = json!({"title": "Hello", "tags": ["a", "b"], "draft": false});

    let handle = client.post("/echo", &payload);
    assert_eq!(handle.id().get(), 1);
    assert_eq!(handle.result().await.unwrap(), payload);
    assert!(!client.has_in_flight_requests());
}

#[tokio::test]
async fn put_round_trips_typed_payload() {
    let client = client();
    let value: Vec<u32> = client.put("/echo", &[3, 1, 2]).result_as().await.unwrap();
    assert_eq!(value, vec![3, 1, 2]);
}

#[tokio::test]
async fn query_parameters_are_encoded() {
    let client = client();
    let query = Query::new("/echo").param("a b", "c&d").param("page", 2);

    let echo: mock_server::Echo = client.get(query).result_as().await.unwrap();
    assert_eq!(echo.method, "GET");
    assert_eq!(echo.query.as_deref(), Some("a%20b=c%26d&page=2"));
    assert_eq!(echo.params["a b"], "c&d");
    assert_eq!(echo.params["page"], "2");
}

#[tokio::test]
async fn delete_and_options_reach_the_server() {
    let client = client();
    let deleted: mock_server::Echo = client.del("/echo").result_as().await.unwrap();
    let options: mock_server::Echo = client.options("/echo").result_as().await.unwrap();
    assert_eq!(deleted.method, "DELETE");
    assert_eq!(options.method, "OPTIONS");
}

#[tokio::test]
async fn not_found_is_a_status_failure() {
    let client = client();
    let handle = client.get(Query::new("/status/404").param("msg", "nf"));

    let err = handle.result().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Status);
    assert_eq!(err.status(), Some(404));
    let outcome = err.outcome().unwrap();
    assert!(!outcome.ok());
    assert_eq!(outcome.json::<Value>().unwrap(), Some(json!({"msg": "nf"})));
    assert!(outcome.headers().to_ascii_lowercase().contains("content-type: application/json"));

    // The outcome itself is a successful exchange.
    assert_eq!(handle.outcome().await.unwrap().status(), 404);
}

#[tokio::test]
async fn redirect_range_status_is_ok() {
    let client = client();
    let outcome = client
        .post_empty(Query::new("/status/304"))
        .outcome()
        .await
        .unwrap();
    assert_eq!(outcome.status(), 304);
    assert!(outcome.ok());
}

#[tokio::test]
async fn non_json_body_is_a_deserialization_failure() {
    let client = client();
    let err = client.get("/text").result().await.unwrap_err();
    match err {
        ClientError::Deserialization { text, .. } => assert_eq!(text, "plain text, not json"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn invalid_utf8_body_is_a_body_read_failure() {
    let client = client();
    let handle = client.get("/bytes");
    let err = handle.result().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::BodyRead);

    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.body(), mock_server::INVALID_UTF8);
}

#[tokio::test]
async fn conversion_failure_keeps_parsed_value() {
    let client = client();
    let err = client
        .post("/echo", &json!({"n": "seven"}))
        .result_with(|value| {
            value["n"]
                .as_u64()
                .ok_or_else(|| format!("n is not a number: {}", value["n"]))
        })
        .await
        .unwrap_err();
    match err {
        ClientError::Conversion { value, message } => {
            assert_eq!(value, json!({"n": "seven"}));
            assert!(message.contains("seven"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn slow_response_times_out() {
    let client = client();
    let events = record(&client);
    let started = Instant::now();

    let handle = client.get(Query::new("/slow/3000").timeout(Duration::from_millis(200)));
    let err = handle.result().await.unwrap_err();

    assert!(err.is_timeout(), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
    let kinds = kinds(&events.lock());
    assert_eq!(
        &kinds[kinds.len() - 2..],
        &[EventKind::Timeout, EventKind::LoadEnd]
    );
}

#[tokio::test]
async fn cancelled_request_settles_immediately() {
    let client = client();
    let events = record(&client);
    let started = Instant::now();

    let handle = client.get("/slow/3000");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.has_in_flight_requests());
    assert!(handle.cancel());
    assert!(!handle.cancel());

    let err = handle.result().await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!client.has_in_flight_requests());

    let events = events.lock();
    let kinds = kinds(&events);
    assert_eq!(kinds.first(), Some(&EventKind::LoadStart));
    assert_eq!(
        &kinds[kinds.len() - 2..],
        &[EventKind::Abort, EventKind::LoadEnd]
    );
    assert!(events.iter().all(|event| event.request_id == handle.id()));
}

#[tokio::test]
async fn cancel_all_stops_every_slow_request() {
    let client = client();
    let handles: Vec<_> = (0..3).map(|_| client.get("/slow/3000")).collect();
    assert_eq!(client.in_flight(), 3);

    assert!(client.cancel_all());
    assert!(!client.cancel_all());
    for handle in handles {
        assert!(handle.outcome().await.unwrap_err().is_cancelled());
    }
}

#[tokio::test]
async fn default_and_configured_headers_reach_the_server() {
    init_tracing();
    let client = ServiceClient::builder()
        .endpoint(format!("http://{}/", server()))
        .user_agent("blog-client/1.0")
        .build();
    client.configure_requests_with(|request| request.set_header("X-Api-Key", "secret"));

    let headers: BTreeMap<String, String> =
        client.get("headers").result_as().await.unwrap();
    assert_eq!(headers["accept"], "application/json");
    assert_eq!(headers["user-agent"], "blog-client/1.0");
    assert_eq!(headers["x-api-key"], "secret");
    assert!(!headers.contains_key("cache-control"));

    let query = Query::new("/headers")
        .header("Accept", "text/plain")
        .no_cache(true);
    let headers: BTreeMap<String, String> = client.get(query).result_as().await.unwrap();
    assert_eq!(headers["accept"], "text/plain");
    assert_eq!(headers["cache-control"], "no-cache");
}

#[tokio::test]
async fn large_body_reports_progress() {
    let client = client();
    let events = record(&client);

    let items: Vec<usize> = client.get("/large/20000").result_as().await.unwrap();
    assert_eq!(items.len(), 20000);

    let events = events.lock();
    let kinds = kinds(&events);
    assert_eq!(kinds.first(), Some(&EventKind::LoadStart));
    assert_eq!(
        &kinds[kinds.len() - 2..],
        &[EventKind::Load, EventKind::LoadEnd]
    );

    let states: Vec<ReadyState> = events
        .iter()
        .filter_map(|event| match event.raw {
            Some(RawEvent::ReadyState(state)) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ReadyState::Opened,
            ReadyState::HeadersReceived,
            ReadyState::Loading,
            ReadyState::Done
        ]
    );

    let progress: Vec<(u64, Option<u64>)> = events
        .iter()
        .filter_map(|event| match event.raw {
            Some(RawEvent::Progress { loaded, total }) => Some((loaded, total)),
            _ => None,
        })
        .collect();
    assert!(progress.len() > 1, "{progress:?}");
    assert!(progress.windows(2).all(|pair| pair[0].0 < pair[1].0));
    let (loaded, total) = progress[progress.len() - 1];
    if let Some(total) = total {
        assert_eq!(loaded, total);
    }

    let load = &events[events.len() - 2];
    assert_eq!(load.running, 0);
    assert!(load.request.is_some());
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    init_tracing();
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = ServiceClient::builder()
        .endpoint(format!("http://{addr}"))
        .build();
    let events = record(&client);

    let err = client.get("/echo").result().await.unwrap_err();
    assert!(matches!(err, ClientError::Network(_)), "{err:?}");
    assert!(err.is_transport());

    let events = events.lock();
    let error = events
        .iter()
        .find(|event| event.kind == EventKind::Error)
        .unwrap();
    assert!(matches!(error.raw, Some(RawEvent::Failure(_))));
}
