//! HTTP-level fetcher tests against a scripted wiki server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use confqa::fetcher::{ConfluenceClient, FetchError, RetryPolicy, WikiSource};
use serde_json::json;
use tokio::net::TcpListener;

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

fn fast_policy(max_retries: usize) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: (0.7, 1.3),
    }
}

fn client(addr: SocketAddr, policy: RetryPolicy, page_limit: usize) -> ConfluenceClient {
    ConfluenceClient::new(
        &format!("http://{addr}/rest/api"),
        "bot@example.com".to_string(),
        "token".to_string(),
        policy,
        page_limit,
        Duration::from_secs(5),
    )
    .expect("client")
}

#[tokio::test]
async fn rate_limited_requests_are_retried_until_success() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/rest/api/content/:id",
            get(|State(attempts): State<Arc<AtomicUsize>>| async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response()
                } else {
                    Json(json!({"body": {"storage": {"value": "<p>recovered</p>"}}}))
                        .into_response()
                }
            }),
        )
        .with_state(Arc::clone(&attempts));
    let addr = serve(app).await;

    let client = client(addr, fast_policy(4), 50);
    let content = client.page_content("7").await.expect("content");
    assert_eq!(content, "<p>recovered</p>");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_server_errors_become_fatal_not_an_infinite_loop() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/rest/api/content/:id",
            get(|State(attempts): State<Arc<AtomicUsize>>| async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }),
        )
        .with_state(Arc::clone(&attempts));
    let addr = serve(app).await;

    let client = client(addr, fast_policy(2), 50);
    match client.page_content("7").await {
        Err(FetchError::Fatal { status, message }) => {
            assert_eq!(status, Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
            assert!(message.contains("retries exhausted"), "{message}");
        }
        other => panic!("expected fatal error, got {other:?}"),
    }
    // initial attempt + two retries
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_fail_immediately_without_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/rest/api/content/:id",
            get(|State(attempts): State<Arc<AtomicUsize>>| async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }),
        )
        .with_state(Arc::clone(&attempts));
    let addr = serve(app).await;

    let client = client(addr, fast_policy(4), 50);
    match client.page_content("7").await {
        Err(FetchError::Fatal { status, .. }) => {
            assert_eq!(status, Some(reqwest::StatusCode::NOT_FOUND));
        }
        other => panic!("expected fatal error, got {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_payloads_are_fatal() {
    let app = Router::new().route("/rest/api/content/:id", get(|| async { "not json" }));
    let addr = serve(app).await;

    let client = client(addr, fast_policy(4), 50);
    match client.page_content("7").await {
        Err(FetchError::Fatal { message, .. }) => {
            assert!(message.contains("malformed"), "{message}");
        }
        other => panic!("expected fatal error, got {other:?}"),
    }
}

async fn space_listing(
    State(requests): State<Arc<AtomicUsize>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    requests.fetch_add(1, Ordering::SeqCst);
    let start: usize = params["start"].parse().expect("start");
    let limit: usize = params["limit"].parse().expect("limit");
    assert_eq!(limit, 3);
    match start {
        // full page with an explicit next link
        0 => Json(json!({
            "results": [{"key": "ENG"}, {"key": "OPS"}, {"key": "HR"}],
            "_links": {"next": format!("/rest/api/space?start={limit}&limit={limit}")}
        }))
        .into_response(),
        // full page, but no next link: the walk must stop here
        3 => Json(json!({
            "results": [{"key": "IT"}, {"key": "SEC"}, {"key": "FIN"}],
            "_links": {}
        }))
        .into_response(),
        _ => panic!("walk overshot pagination, start={start}"),
    }
}

#[tokio::test]
async fn space_pagination_stops_when_next_link_is_absent() {
    let requests = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/rest/api/space", get(space_listing))
        .with_state(Arc::clone(&requests));
    let addr = serve(app).await;

    let client = client(addr, fast_policy(4), 3);
    let spaces = client.spaces().await.expect("spaces");
    assert_eq!(spaces, ["ENG", "OPS", "HR", "IT", "SEC", "FIN"]);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

async fn content_listing(
    State(requests): State<Arc<AtomicUsize>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    requests.fetch_add(1, Ordering::SeqCst);
    assert_eq!(params["spaceKey"], "ENG");
    let start: usize = params["start"].parse().expect("start");
    match start {
        // full page and no _links at all: the walk must continue
        0 => Json(json!({"results": [{"id": "1"}, {"id": "2"}, {"id": "3"}]})).into_response(),
        // short page terminates the walk
        3 => Json(json!({"results": [{"id": "4"}]})).into_response(),
        _ => panic!("walk overshot pagination, start={start}"),
    }
}

#[tokio::test]
async fn content_pagination_stops_on_short_page() {
    let requests = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/rest/api/content/", get(content_listing))
        .with_state(Arc::clone(&requests));
    let addr = serve(app).await;

    let client = client(addr, fast_policy(4), 3);
    let ids = client.page_ids("ENG").await.expect("page ids");
    assert_eq!(ids, ["1", "2", "3", "4"]);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}
