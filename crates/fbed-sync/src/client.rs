//! HTTP client for another fbed daemon.
//!
//! Every call is retried per `RetryPolicy` and signs each attempt with a
//! freshly minted bearer token; a token from an earlier attempt may already
//! have expired by the time the backoff is over.

use fbed_core::config::TransportConfig;
use fbed_core::protocol::{self, LoginRequest};
use fbed_core::{path, Entry, Envelope, FbedError, FbedResult, PushReceipt};
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, RequestBuilder, StatusCode};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

use crate::peer::{Download, Peer};
use crate::retry::RetryPolicy;
use crate::token::TokenIssuer;

pub struct HttpPeer {
    base: String,
    client: reqwest::Client,
    tokens: TokenIssuer,
    retry: RetryPolicy,
}

impl HttpPeer {
    /// Client for ordinary API calls (short timeout).
    pub fn new(address: &str, secret: SecretString, transport: &TransportConfig) -> FbedResult<Self> {
        Self::build(address, secret, transport, transport.timeout())
    }

    /// Client for push/pull walks (long timeout).
    pub fn for_sync(
        address: &str,
        secret: SecretString,
        transport: &TransportConfig,
    ) -> FbedResult<Self> {
        Self::build(address, secret, transport, transport.sync_timeout())
    }

    fn build(
        address: &str,
        secret: SecretString,
        transport: &TransportConfig,
        timeout: std::time::Duration,
    ) -> FbedResult<Self> {
        let base = address.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(FbedError::Config(format!(
                "peer address must be an http(s) URL: {address}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FbedError::Config(format!("http client: {e}")))?;
        Ok(HttpPeer {
            base: base.to_string(),
            client,
            tokens: TokenIssuer::for_retries(&secret, transport.retry),
            retry: RetryPolicy::from_config(transport),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base)
    }

    fn signed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(self.tokens.issue())
    }

    /// Send one attempt and unwrap the JSON envelope.
    async fn call<T: DeserializeOwned>(req: RequestBuilder) -> FbedResult<Option<T>> {
        let resp = req
            .send()
            .await
            .map_err(|e| FbedError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FbedError::Transport(format!("HTTP {status}")));
        }
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| FbedError::Transport(format!("decoding response: {e}")))?;
        envelope.into_result()
    }

    async fn get_json<T: DeserializeOwned>(&self, route: &str, path: &str) -> FbedResult<Option<T>> {
        let url = self.url(route);
        self.retry
            .run(route, |_| {
                let req = self.signed(self.client.get(&url).query(&[("path", path)]));
                Self::call(req)
            })
            .await
    }
}

impl Peer for HttpPeer {
    async fn login(&self) -> FbedResult<()> {
        let url = self.url(protocol::LOGIN);
        self.retry
            .run(protocol::LOGIN, |_| {
                let body = LoginRequest {
                    token: self.tokens.issue(),
                };
                Self::call::<serde_json::Value>(self.client.post(&url).json(&body))
            })
            .await?;
        debug!(peer = %self.base, "logged in");
        Ok(())
    }

    async fn list_children(&self, path: &str) -> FbedResult<Vec<Entry>> {
        Ok(self
            .get_json(protocol::LIST_FILE_SIMPLE_INFO, path)
            .await?
            .unwrap_or_default())
    }

    async fn complete_info(&self, path: &str) -> FbedResult<Option<Entry>> {
        self.get_json(protocol::GET_FILE_COMPLETE_INFO, path).await
    }

    async fn push_file(&self, path: &str, md5: &str, source: &Path) -> FbedResult<PushReceipt> {
        let url = self.url(protocol::RECEIVE_PUSH_FILE);
        let url = url.as_str();
        let name = path::file_name(path).to_string();
        let receipt = self
            .retry
            .run(protocol::RECEIVE_PUSH_FILE, |_| {
                let name = name.clone();
                async move {
                    // a streamed body is consumed by send, reopen per attempt
                    let file = tokio::fs::File::open(source).await?;
                    let len = file.metadata().await?.len();
                    let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len)
                        .file_name(name);
                    let form = Form::new()
                        .text(protocol::FIELD_PATH, path.to_string())
                        .text(protocol::FIELD_MD5, md5.to_string())
                        .part(protocol::FIELD_FILE, part);
                    Self::call::<PushReceipt>(self.signed(self.client.post(url).multipart(form))).await
                }
            })
            .await?;
        receipt.ok_or_else(|| FbedError::RemoteProtocol {
            code: fbed_core::types::SUCCESS_CODE,
            message: "push receipt missing".into(),
        })
    }

    async fn download(&self, path: &str) -> FbedResult<Download> {
        let url = self.url(&path::file_url(path));
        let url = url.as_str();
        let resp = self
            .retry
            .run(protocol::FILE_PREFIX, |_| {
                let req = self.signed(self.client.get(url));
                async move {
                    let resp = req
                        .send()
                        .await
                        .map_err(|e| FbedError::Transport(e.to_string()))?;
                    match resp.status() {
                        StatusCode::OK => Ok(resp),
                        status => Err(FbedError::Transport(format!("HTTP {status}"))),
                    }
                }
            })
            .await?;
        let body = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}
