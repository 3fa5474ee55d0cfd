//! `HttpPeer` against a small axum server that fails on demand.

use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fbed_core::config::TransportConfig;
use fbed_core::protocol;
use fbed_core::{Entry, Envelope, FbedError, PushReceipt};
use fbed_sync::{HttpPeer, Peer, RetryPolicy, TokenIssuer};
use secrecy::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;

const SECRET: &str = "shared";

#[derive(Clone, Default)]
struct Fixture {
    /// Requests still to be answered with a 500
    failures_left: Arc<AtomicUsize>,
    auth: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Fixture {
    fn failing(n: usize) -> Self {
        let fixture = Fixture::default();
        fixture.failures_left.store(n, Ordering::SeqCst);
        fixture
    }

    /// Record the caller's token; true when this request should fail.
    fn hit(&self, headers: &HeaderMap) -> bool {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.auth.lock().unwrap().push(auth);
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn tokens(&self) -> Vec<String> {
        self.auth.lock().unwrap().clone()
    }
}

async fn complete_info(State(fx): State<Fixture>, headers: HeaderMap) -> Response {
    if fx.hit(&headers) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(Envelope::success(Entry::file("/x.txt", 3, "abc".into()))).into_response()
}

async fn receive(State(fx): State<Fixture>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    if fx.hit(&headers) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some(protocol::FIELD_FILE) {
            let data = field.bytes().await.unwrap();
            fx.bodies.lock().unwrap().push(data.to_vec());
        }
    }
    Json(Envelope::success(PushReceipt { written: true })).into_response()
}

async fn file(State(fx): State<Fixture>, headers: HeaderMap) -> Response {
    if fx.hit(&headers) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    vec![7u8; 200_000].into_response()
}

async fn spawn(fx: Fixture) -> String {
    let app = Router::new()
        .route(protocol::GET_FILE_COMPLETE_INFO, get(complete_info))
        .route(protocol::RECEIVE_PUSH_FILE, post(receive))
        .route("/file/big.bin", get(file))
        .with_state(fx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn peer(base: &str) -> HttpPeer {
    HttpPeer::new(
        base,
        SecretString::from(SECRET.to_string()),
        &TransportConfig::default(),
    )
    .unwrap()
    .with_retry(RetryPolicy {
        max_attempts: 3,
        base: Duration::from_millis(5),
        max_wait: Duration::from_millis(20),
    })
}

#[tokio::test]
async fn every_attempt_carries_a_fresh_token() {
    let fx = Fixture::failing(1);
    let base = spawn(fx.clone()).await;

    let entry = peer(&base).complete_info("/x.txt").await.unwrap().unwrap();
    assert_eq!(entry.md5.as_deref(), Some("abc"));

    let tokens = fx.tokens();
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1]);

    let issuer = TokenIssuer::new(&SecretString::from(SECRET.to_string()), Duration::from_secs(60));
    for t in &tokens {
        let bearer = t.strip_prefix("Bearer ").unwrap();
        issuer.verify(bearer).unwrap();
    }
}

#[tokio::test]
async fn exhausted_retries_surface_a_transport_error() {
    let fx = Fixture::failing(usize::MAX);
    let base = spawn(fx.clone()).await;

    let err = peer(&base).complete_info("/x.txt").await.unwrap_err();
    assert!(matches!(err, FbedError::Transport(_)));
    assert_eq!(fx.tokens().len(), 3);
}

#[tokio::test]
async fn push_reopens_the_source_for_each_attempt() {
    let fx = Fixture::failing(1);
    let base = spawn(fx.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("upload.bin");
    let content: Vec<u8> = (0..=255u8).cycle().take(300_000).collect();
    std::fs::write(&source, &content).unwrap();

    let receipt = peer(&base)
        .push_file("/dst/upload.bin", "ignored", &source)
        .await
        .unwrap();
    assert!(receipt.written);
    assert_eq!(fx.tokens().len(), 2);
    let bodies = fx.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0], content);
}

#[tokio::test]
async fn download_streams_the_body() {
    let fx = Fixture::failing(1);
    let base = spawn(fx.clone()).await;

    let mut body = peer(&base).download("/big.bin").await.unwrap();
    let mut buf = Vec::new();
    body.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf.len(), 200_000);
    assert!(buf.iter().all(|b| *b == 7));
}
