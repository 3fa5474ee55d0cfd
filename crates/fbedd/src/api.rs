//! HTTP API: user file operations, the peer protocol and operator sync
//! triggers.
//!
//! Every JSON response is an `Envelope`; failures are reported with the
//! failure code and HTTP 200, except missing or invalid bearer tokens which
//! get 401. `/file/{path}` serves raw bytes and needs no token.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fbed_core::config::TransportConfig;
use fbed_core::protocol::{
    self, AddUrlRequest, FrpPullRequest, LoginRequest, PathQuery, RemoveFileRequest, SyncRequest,
};
use fbed_core::{Entry, Envelope, FbedError, FbedResult, PushReceipt, SyncReport};
use fbed_store::FileService;
use fbed_sync::{FrpClient, HttpPeer, Reconciler, TokenIssuer};
use futures::TryStreamExt;
use secrecy::SecretString;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{info, warn};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FileService>,
    pub tokens: Arc<TokenIssuer>,
    pub transport: TransportConfig,
    pub metrics: Metrics,
}

type Reply<T> = Json<Envelope<T>>;

fn reply<T>(what: &str, result: FbedResult<T>) -> Reply<T> {
    match result {
        Ok(data) => Json(Envelope::success(data)),
        Err(e) => {
            warn!(op = what, error = %e, "request failed");
            Json(Envelope::failure(e.to_string()))
        }
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(protocol::LIST_FILE_SIMPLE_INFO, get(list_file_simple_info))
        .route(protocol::LIST_ALL_FILES, get(list_all_files))
        .route(protocol::GET_FILE_COMPLETE_INFO, get(get_file_complete_info))
        .route(protocol::LIST_LAST_FILE_INFO, get(list_last_file_info))
        .route(protocol::ADD_FILE, post(add_file))
        .route(protocol::ADD_URL, post(add_url))
        .route(protocol::REMOVE_FILE, post(remove_file))
        .route(protocol::RECEIVE_PUSH_FILE, post(receive_push_file))
        .route(protocol::PUSH_SYNC_FILE, post(push_sync_file))
        .route(protocol::PULL_SYNC_FILE, post(pull_sync_file))
        .route(protocol::FRP_PULL, post(frp_pull))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route(protocol::LOGIN, post(login))
        .route("/file/{*path}", get(serve_file))
        .merge(protected)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn require_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let verdict = match token {
        Some(t) => state.tokens.verify(t).map(|_| ()),
        None => Err(FbedError::Token("missing bearer token".into())),
    };
    match verdict {
        Ok(()) => next.run(req).await,
        Err(e) => {
            warn!(uri = %req.uri(), error = %e, "unauthorized");
            (
                StatusCode::UNAUTHORIZED,
                Json(Envelope::<()>::failure(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Reply<()> {
    reply(protocol::LOGIN, state.tokens.verify(&body.token).map(|_| ()))
}

async fn list_file_simple_info(
    State(state): State<AppState>,
    Query(q): Query<PathQuery>,
) -> Reply<Vec<Entry>> {
    reply(
        protocol::LIST_FILE_SIMPLE_INFO,
        state.service.list_children(&q.path).await,
    )
}

async fn list_all_files(State(state): State<AppState>) -> Reply<Vec<Entry>> {
    reply(protocol::LIST_ALL_FILES, state.service.list_all_files().await)
}

async fn get_file_complete_info(
    State(state): State<AppState>,
    Query(q): Query<PathQuery>,
) -> Reply<Option<Entry>> {
    reply(
        protocol::GET_FILE_COMPLETE_INFO,
        state.service.file_complete_info(&q.path).await,
    )
}

async fn list_last_file_info(State(state): State<AppState>) -> Reply<Vec<Entry>> {
    Json(Envelope::success(state.service.recent_files()))
}

/// What a multipart upload turned into
enum Upload {
    Added(Entry),
    Pushed(PushReceipt),
}

/// Read the text fields preceding the `file` part, then stream that part
/// into the store. A peer push must carry `md5`; a user upload may carry
/// `raw`.
async fn upload(service: &FileService, mut multipart: Multipart, push: bool) -> FbedResult<Upload> {
    let mut path: Option<String> = None;
    let mut md5: Option<String> = None;
    let mut raw = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FbedError::Transport(format!("multipart: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != protocol::FIELD_FILE {
            let value = field
                .text()
                .await
                .map_err(|e| FbedError::Transport(format!("multipart: {e}")))?;
            match name.as_str() {
                protocol::FIELD_PATH => path = Some(value),
                protocol::FIELD_MD5 => md5 = Some(value),
                protocol::FIELD_RAW => raw = matches!(value.trim(), "true" | "1"),
                _ => {}
            }
            continue;
        }

        let path = path.ok_or_else(|| missing_field(protocol::FIELD_PATH))?;
        let mut body = Box::pin(StreamReader::new(field.map_err(std::io::Error::other)));
        return if push {
            let md5 = md5.ok_or_else(|| missing_field(protocol::FIELD_MD5))?;
            service
                .receive_pushed_file(&path, &md5, &mut body)
                .await
                .map(Upload::Pushed)
        } else {
            service.add_file(&path, &mut body, raw).await.map(Upload::Added)
        };
    }
    Err(missing_field(protocol::FIELD_FILE))
}

fn missing_field(name: &str) -> FbedError {
    FbedError::NotFound(format!("multipart field `{name}`"))
}

async fn add_file(State(state): State<AppState>, multipart: Multipart) -> Reply<Entry> {
    let result = match upload(&state.service, multipart, false).await {
        Ok(Upload::Added(entry)) => {
            state.metrics.files_added.inc();
            Ok(entry)
        }
        Ok(Upload::Pushed(_)) => Err(FbedError::Other(anyhow::anyhow!("unexpected push receipt"))),
        Err(e) => Err(e),
    };
    reply(protocol::ADD_FILE, result)
}

async fn receive_push_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Reply<PushReceipt> {
    let result = match upload(&state.service, multipart, true).await {
        Ok(Upload::Pushed(receipt)) => {
            if receipt.written {
                state.metrics.files_added.inc();
            }
            Ok(receipt)
        }
        Ok(Upload::Added(_)) => Err(FbedError::Other(anyhow::anyhow!("unexpected add entry"))),
        Err(e) => Err(e),
    };
    reply(protocol::RECEIVE_PUSH_FILE, result)
}

async fn add_url(State(state): State<AppState>, Json(req): Json<AddUrlRequest>) -> Reply<Entry> {
    let result = state.service.add_url(&req.path, &req.url, req.raw).await;
    if result.is_ok() {
        state.metrics.files_added.inc();
    }
    reply(protocol::ADD_URL, result)
}

async fn remove_file(
    State(state): State<AppState>,
    Json(req): Json<RemoveFileRequest>,
) -> Reply<Entry> {
    let result = state.service.remove_file(&req.path).await;
    if result.is_ok() {
        state.metrics.files_removed.inc();
    }
    reply(protocol::REMOVE_FILE, result)
}

async fn push_sync_file(State(state): State<AppState>, Json(req): Json<SyncRequest>) -> Reply<SyncReport> {
    reply(protocol::PUSH_SYNC_FILE, sync(&state, req, Direction::Push).await)
}

async fn pull_sync_file(State(state): State<AppState>, Json(req): Json<SyncRequest>) -> Reply<SyncReport> {
    reply(protocol::PULL_SYNC_FILE, sync(&state, req, Direction::Pull).await)
}

async fn frp_pull(State(state): State<AppState>, Json(req): Json<FrpPullRequest>) -> Reply<SyncReport> {
    reply(protocol::FRP_PULL, pull_frp(&state, req).await)
}

async fn pull_frp(state: &AppState, req: FrpPullRequest) -> FbedResult<SyncReport> {
    let client = FrpClient::new(
        &req.address,
        &req.username,
        SecretString::from(req.password),
        &state.transport,
    )?;
    info!(url = %req.address, path = %req.path, remote = %req.remote_path, "frp pull starting");
    let report = client
        .pull(&state.service, &req.path, &req.remote_path)
        .await?;
    state.metrics.record_sync(&report);
    Ok(report)
}

#[derive(Debug, Clone, Copy)]
pub enum Direction {
    Push,
    Pull,
}

/// One reconciliation against `address`, shared by the API and the jobs.
pub async fn run_sync(
    service: Arc<FileService>,
    transport: &TransportConfig,
    address: &str,
    secret: SecretString,
    root: &str,
    direction: Direction,
) -> FbedResult<SyncReport> {
    let peer = HttpPeer::for_sync(address, secret, transport)?;
    let reconciler = Reconciler::new(service, peer);
    info!(peer = %address, root = %root, direction = ?direction, "sync starting");
    match direction {
        Direction::Push => reconciler.push(root, root).await,
        Direction::Pull => reconciler.pull(root, root).await,
    }
}

async fn sync(state: &AppState, req: SyncRequest, direction: Direction) -> FbedResult<SyncReport> {
    let report = run_sync(
        state.service.clone(),
        &state.transport,
        &req.address,
        SecretString::from(req.secret),
        &req.path,
        direction,
    )
    .await?;
    state.metrics.record_sync(&report);
    Ok(report)
}

async fn serve_file(State(state): State<AppState>, UrlPath(path): UrlPath<String>) -> Response {
    match state.service.open_file(&path).await {
        Ok(file) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Body::from_stream(ReaderStream::new(file)),
        )
            .into_response(),
        Err(e @ (FbedError::NotFound(_) | FbedError::NotAFile(_))) => {
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e @ FbedError::PathEscape(_)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e) => {
            warn!(path = %path, error = %e, "serving file failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbed_core::config::FbedConfig;
    use fbed_storage::LocalBackend;
    use fbed_sync::{Peer, RetryPolicy};
    use tokio::io::AsyncReadExt;

    const SECRET: &str = "test-secret";

    fn secret() -> SecretString {
        SecretString::from(SECRET.to_string())
    }

    /// Serve a fresh store on an ephemeral port.
    async fn spawn_server(dir: &std::path::Path) -> (String, Arc<FileService>) {
        let config = FbedConfig::default();
        let backend = Arc::new(LocalBackend::open(dir, 1 << 20).await.unwrap());
        let service = Arc::new(FileService::new(backend, &config).unwrap());
        let state = AppState {
            service: service.clone(),
            tokens: Arc::new(TokenIssuer::for_retries(&secret(), 3)),
            transport: config.transport.clone(),
            metrics: Metrics::default(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await });
        (format!("http://{addr}"), service)
    }

    fn peer(base: &str, secret: SecretString) -> HttpPeer {
        HttpPeer::new(base, secret, &TransportConfig::default())
            .unwrap()
            .with_retry(RetryPolicy::none())
    }

    fn bearer() -> String {
        format!("Bearer {}", TokenIssuer::for_retries(&secret(), 3).issue())
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_server(dir.path()).await;
        let resp = reqwest::get(format!("{base}{}", protocol::LIST_ALL_FILES))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_checks_secret() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_server(dir.path()).await;
        peer(&base, secret()).login().await.unwrap();
        let wrong = peer(&base, SecretString::from("nope".to_string()));
        assert!(matches!(
            wrong.login().await,
            Err(FbedError::RemoteProtocol { .. })
        ));
    }

    #[tokio::test]
    async fn upload_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_server(dir.path()).await;

        let form = reqwest::multipart::Form::new()
            .text(protocol::FIELD_PATH, "/docs/hello.txt")
            .text(protocol::FIELD_RAW, "true")
            .part(
                protocol::FIELD_FILE,
                reqwest::multipart::Part::bytes(b"hello world".to_vec()).file_name("hello.txt"),
            );
        let env: Envelope<Entry> = reqwest::Client::new()
            .post(format!("{base}{}", protocol::ADD_FILE))
            .header(header::AUTHORIZATION, bearer())
            .multipart(form)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let added = env.into_result().unwrap().unwrap();
        assert_eq!(added.path, "/docs/hello.txt");
        assert_eq!(added.size, 11);

        let p = peer(&base, secret());
        let info = p.complete_info("/docs/hello.txt").await.unwrap().unwrap();
        assert_eq!(info.md5, added.md5);
        let listing = p.list_children("/docs").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].url, "/file/docs/hello.txt");
        assert!(p.complete_info("/docs/missing.txt").await.unwrap().is_none());

        let mut body = p.download("/docs/hello.txt").await.unwrap();
        let mut downloaded = Vec::new();
        body.read_to_end(&mut downloaded).await.unwrap();
        assert_eq!(downloaded, b"hello world");

        let raw = reqwest::get(format!("{base}/file/docs/missing.txt"))
            .await
            .unwrap();
        assert_eq!(raw.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn push_dedupes_by_digest() {
        let dir = tempfile::tempdir().unwrap();
        let (base, service) = spawn_server(dir.path()).await;
        let p = peer(&base, secret());
        let md5 = fbed_storage::digest::md5_bytes(b"pushed");
        let scratch = tempfile::tempdir().unwrap();
        let source = scratch.path().join("p.bin");
        std::fs::write(&source, b"pushed").unwrap();

        let first = p.push_file("/in/p.bin", &md5, &source).await.unwrap();
        assert!(first.written);
        let second = p.push_file("/in/p.bin", &md5, &source).await.unwrap();
        assert!(!second.written);
        assert_eq!(service.recent_files().len(), 1);
    }

    #[tokio::test]
    async fn remove_reports_failure_in_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = spawn_server(dir.path()).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}{}", protocol::REMOVE_FILE))
            .header(header::AUTHORIZATION, bearer())
            .json(&RemoveFileRequest {
                path: "/ghost.txt".into(),
            })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let env: Envelope<Entry> = resp.json().await.unwrap();
        assert_eq!(env.code, fbed_core::types::FAIL_CODE);
        assert!(env.message.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn operator_push_converges_two_daemons() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let (base_a, a) = spawn_server(dir_a.path()).await;
        let (base_b, b) = spawn_server(dir_b.path()).await;

        for (p, data) in [
            ("/x/1.txt", &b"one"[..]),
            ("/x/y/2.txt", &b"two"[..]),
            ("/3.txt", &b"three"[..]),
        ] {
            a.add_file(p, &mut &data[..], true).await.unwrap();
        }
        b.add_file("/3.txt", &mut &b"three"[..], true).await.unwrap();

        let req = serde_json::json!({ "address": base_b, "secret": SECRET, "path": "/" });
        let env: Envelope<SyncReport> = reqwest::Client::new()
            .post(format!("{base_a}{}", protocol::PUSH_SYNC_FILE))
            .header(header::AUTHORIZATION, bearer())
            .json(&req)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let report = env.into_result().unwrap().unwrap();
        assert_eq!(report.transferred, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        let digests = |files: Vec<Entry>| {
            files
                .into_iter()
                .map(|e| (e.path, e.md5))
                .collect::<Vec<_>>()
        };
        assert_eq!(
            digests(a.list_all_files().await.unwrap()),
            digests(b.list_all_files().await.unwrap())
        );
    }

    #[tokio::test]
    async fn frp_pull_route_mirrors_listing() {
        let dir = tempfile::tempdir().unwrap();
        let (base, service) = spawn_server(dir.path()).await;

        let frp = Router::new().fallback(|uri: axum::http::Uri| async move {
            match uri.path() {
                "/" => "<pre>\n<a href=\"f.txt\">f.txt</a>\n</pre>".into_response(),
                "/f.txt" => "from frp".into_response(),
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let frp_addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, frp).await });

        let req = serde_json::json!({
            "address": format!("http://{frp_addr}"),
            "username": "admin",
            "password": "",
            "path": "/mirror",
            "remote_path": "/",
        });
        let env: Envelope<SyncReport> = reqwest::Client::new()
            .post(format!("{base}{}", protocol::FRP_PULL))
            .header(header::AUTHORIZATION, bearer())
            .json(&req)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let report = env.into_result().unwrap().unwrap();
        assert_eq!(report.transferred, 1);
        let entry = service.file_complete_info("/mirror/f.txt").await.unwrap().unwrap();
        assert_eq!(entry.size, 8);
    }
}
