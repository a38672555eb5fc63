//! End-to-end tests: two portals talking over a real socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use ws_portal::error::{CODE_BAD_REQUEST, CODE_INTERNAL, CODE_UNAUTHORIZED};
use ws_portal::middleware::{AuthMiddleware, MetricsMiddleware};
use ws_portal::{
    Context, Error, FunctionError, FunctionInput, FunctionOutput, Handler, ObjectSchema, Portal,
    PortalConfig,
};

// ============================================================================
// Fixtures
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}

fn server_portal() -> Portal {
    Portal::new(
        PortalConfig::new()
            .with_host("127.0.0.1")
            .with_port(free_port()),
    )
    .expect("server portal")
}

fn client_portal(config: PortalConfig) -> Portal {
    Portal::new(config.with_retry_delay(Duration::from_millis(10))).expect("client portal")
}

fn add_handler() -> Arc<dyn Handler> {
    Arc::new(|_ctx: Context, input: FunctionInput| async move {
        if input.get_str("operation") == Some("divide-by-zero") {
            return Err(Error::from(FunctionError::bad_request("division by zero")));
        }
        let a = input.get_f64("a").unwrap_or_default();
        let b = input.get_f64("b").unwrap_or_default();
        FunctionOutput::from_any(json!({ "result": a + b }))
    })
}

async fn register_add(server: &Portal) -> String {
    let address = server.generate_address("add").expect("address").to_string();
    server
        .apply(
            &address,
            Arc::new(ObjectSchema::new("add").require("a").require("b")),
            add_handler(),
        )
        .await
        .expect("apply");
    address
}

fn args(value: serde_json::Value) -> FunctionInput {
    FunctionInput::from_any(value).expect("object")
}

// ============================================================================
// Round Trip
// ============================================================================

#[tokio::test]
async fn test_add_round_trip() -> anyhow::Result<()> {
    init_tracing();
    let server = server_portal();
    let address = register_add(&server).await;
    let client = client_portal(PortalConfig::default());

    let add = client.resolve_function(&address)?;
    let output = add.call(&Context::new(), args(json!({ "a": 2, "b": 3 }))).await?;

    assert_eq!(output.value(), &json!({ "result": 5.0 }));
    assert!(client.is_connected(&address));

    client.close();
    server.close();
    Ok(())
}

#[tokio::test]
async fn test_remote_rejection_is_function_error() {
    init_tracing();
    let server = server_portal();
    let address = register_add(&server).await;
    let client = client_portal(PortalConfig::default());

    let err = client
        .call_function(
            &Context::new(),
            &address,
            args(json!({ "a": 2, "b": 3, "operation": "divide-by-zero" })),
        )
        .await
        .expect_err("handler rejects");

    let remote = err.as_function_error().expect("function error");
    assert_eq!(remote.code, CODE_BAD_REQUEST);
    assert_eq!(remote.message, "division by zero");
    assert!(!err.is_retryable());

    server.close();
}

#[tokio::test]
async fn test_schema_rejection_is_bad_request() {
    let server = server_portal();
    let address = register_add(&server).await;
    let client = client_portal(PortalConfig::default());

    let err = client
        .call_function(&Context::new(), &address, args(json!({ "a": 2 })))
        .await
        .expect_err("missing b");

    assert_eq!(err.as_function_error().map(|e| e.code), Some(CODE_BAD_REQUEST));
    server.close();
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn test_concurrent_calls_are_not_cross_delivered() {
    let server = server_portal();
    let address = server.generate_address("echo").expect("address").to_string();
    server
        .apply(
            &address,
            Arc::new(ObjectSchema::new("echo").require("n")),
            Arc::new(|_ctx: Context, input: FunctionInput| async move {
                let n = input.get_f64("n").unwrap_or_default();
                // Later calls finish first.
                tokio::time::sleep(Duration::from_millis(100u64.saturating_sub(n as u64))).await;
                FunctionOutput::from_any(json!({ "n": n }))
            }),
        )
        .await
        .expect("apply");

    let client = client_portal(PortalConfig::default());
    let echo = client.resolve_function(&address).expect("resolve");

    let calls = (0..50).map(|n| {
        let echo = echo.clone();
        tokio::spawn(async move {
            let output = echo
                .call(&Context::new(), FunctionInput::new().arg("n", n))
                .await
                .expect("call");
            (n, output.get("n").and_then(serde_json::Value::as_f64))
        })
    });

    for call in calls.collect::<Vec<_>>() {
        let (sent, received) = call.await.expect("task");
        assert_eq!(received, Some(f64::from(sent)));
    }
    server.close();
}

// ============================================================================
// Connection Lifecycle
// ============================================================================

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let server = server_portal();
    let address = register_add(&server).await;
    let client = client_portal(PortalConfig::default());

    assert!(!client.is_connected(&address));
    assert_ok!(client.disconnect_from(&address));

    assert_ok!(client.connect(&address).await);
    assert!(client.is_connected(&address));

    assert_ok!(client.disconnect_from(&address));
    assert_ok!(client.disconnect_from(&address));
    assert_err!(client.disconnect_from("not an address"));
    assert!(!client.is_connected(&address));

    // A later call dials again.
    client
        .call_function(&Context::new(), &address, args(json!({ "a": 1, "b": 1 })))
        .await
        .expect("redial");
    server.close();
}

#[tokio::test]
async fn test_cancelled_context_is_timeout() {
    let server = server_portal();
    let address = register_add(&server).await;
    let client = client_portal(PortalConfig::default());
    let ctx = Context::new();
    ctx.cancel();

    let err = client
        .call_function(&ctx, &address, args(json!({ "a": 1, "b": 1 })))
        .await
        .expect_err("cancelled");

    assert!(err.is_timeout());
    assert!(!client.is_connected(&address));
    server.close();
}

#[tokio::test]
async fn test_call_timeout_releases_slot() {
    let server = server_portal();
    let address = server.generate_address("slow").expect("address").to_string();
    server
        .apply(
            &address,
            Arc::new(ObjectSchema::new("slow")),
            Arc::new(|_ctx: Context, _input: FunctionInput| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(FunctionOutput::default())
            }),
        )
        .await
        .expect("apply");

    let client = client_portal(PortalConfig::default());
    let slow = client
        .resolve_function(&address)
        .expect("resolve")
        .with_timeout(Duration::from_millis(100));

    let err = slow
        .call(&Context::new(), FunctionInput::new())
        .await
        .expect_err("times out");
    assert!(matches!(err, Error::Timeout { timeout_ms: Some(100), .. }));

    // The connection is still usable for other calls.
    client.ping(&Context::new(), &address).await.expect("ping");
    server.close();
}

#[tokio::test]
async fn test_ping() {
    let server = server_portal();
    let address = register_add(&server).await;
    let client = client_portal(PortalConfig::default());

    let rtt = client
        .ping(&Context::with_timeout(Duration::from_secs(5)), &address)
        .await
        .expect("pong");
    assert!(rtt < Duration::from_secs(5));
    server.close();
}

#[tokio::test]
async fn test_server_close_fails_calls() {
    let server = server_portal();
    let address = register_add(&server).await;
    let client = client_portal(PortalConfig::default().with_max_retries(0));

    client.connect(&address).await.expect("connect");
    server.close();
    // Let the client observe the close frame.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_connected(&address));

    let err = client
        .call_function(&Context::new(), &address, args(json!({ "a": 1, "b": 1 })))
        .await
        .expect_err("server gone");
    assert!(err.is_connection_error(), "unexpected error: {err}");
}

// ============================================================================
// Middleware
// ============================================================================

#[tokio::test]
async fn test_bearer_auth_end_to_end() {
    let server = server_portal();
    server.use_middleware(AuthMiddleware::bearer("secret"));
    let address = register_add(&server).await;

    let anonymous = client_portal(PortalConfig::default());
    let err = anonymous
        .call_function(&Context::new(), &address, args(json!({ "a": 1, "b": 2 })))
        .await
        .expect_err("no token");
    assert_eq!(err.as_function_error().map(|e| e.code), Some(CODE_UNAUTHORIZED));

    let trusted = client_portal(PortalConfig::default().with_header("Authorization", "Bearer secret"));
    let output = trusted
        .call_function(&Context::new(), &address, args(json!({ "a": 1, "b": 2 })))
        .await
        .expect("authorized");
    assert_eq!(output.value(), &json!({ "result": 3.0 }));
    server.close();
}

#[tokio::test]
async fn test_client_metrics_record_latency() {
    let server = server_portal();
    let address = register_add(&server).await;

    let client = client_portal(PortalConfig::default());
    let metrics = Arc::new(MetricsMiddleware::new());
    client.use_shared_middleware(metrics.clone());

    client
        .call_function(&Context::new(), &address, args(json!({ "a": 1, "b": 2 })))
        .await
        .expect("call");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.connections_total, 1);
    assert_eq!(snapshot.latency_samples, 1);
    assert_eq!(metrics.in_flight(), 0);
    server.close();
}

#[tokio::test]
async fn test_server_metrics_match_every_call() {
    let server = server_portal();
    let metrics = Arc::new(MetricsMiddleware::new());
    server.use_shared_middleware(metrics.clone());
    let address = register_add(&server).await;

    let client = client_portal(PortalConfig::default());
    for n in 0..50 {
        client
            .call_function(&Context::new(), &address, args(json!({ "a": n, "b": 1 })))
            .await
            .expect("call");
    }

    let snapshot = metrics.snapshot();
    assert_eq!(metrics.in_flight(), 0);
    assert_eq!(snapshot.latency_samples, 50);
    assert_eq!(snapshot.messages_total, 100);
    assert_eq!(snapshot.active_connections, 1);
    server.close();
}

// ============================================================================
// Retry
// ============================================================================

fn counting_handler(counter: &Arc<AtomicU32>, code: i32) -> Arc<dyn Handler> {
    let counter = Arc::clone(counter);
    Arc::new(move |_ctx: Context, _input: FunctionInput| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<FunctionOutput, _>(Error::Function(FunctionError::new(code, "failing")))
        }
    })
}

#[tokio::test]
async fn test_retry_stops_on_client_error() {
    let server = server_portal();
    let counter = Arc::new(AtomicU32::new(0));
    let address = server.generate_address("bad").expect("address").to_string();
    server
        .apply(&address, Arc::new(ObjectSchema::new("bad")), counting_handler(&counter, CODE_BAD_REQUEST))
        .await
        .expect("apply");

    let client = client_portal(PortalConfig::default().with_max_retries(3));
    let err = client
        .call_with_retry(&Context::new(), &address, FunctionInput::new())
        .await
        .expect_err("terminal");

    assert_eq!(err.as_function_error().map(|e| e.code), Some(CODE_BAD_REQUEST));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    server.close();
}

#[tokio::test]
async fn test_retry_exhausts_on_server_error() {
    let server = server_portal();
    let counter = Arc::new(AtomicU32::new(0));
    let address = server.generate_address("flaky").expect("address").to_string();
    server
        .apply(&address, Arc::new(ObjectSchema::new("flaky")), counting_handler(&counter, CODE_INTERNAL))
        .await
        .expect("apply");

    let client = client_portal(PortalConfig::default().with_max_retries(2));
    let remote = client.resolve_function(&address).expect("resolve");
    let err = remote
        .call_with_retry(&Context::new(), FunctionInput::new())
        .await
        .expect_err("exhausted");

    assert_eq!(err.as_function_error().map(|e| e.code), Some(CODE_INTERNAL));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    server.close();
}
