//! Pull a tree from an frp `static_file` server.
//!
//! frp serves folders as an HTML page whose single `<pre>` block holds one
//! `<a>` per child, behind HTTP basic auth. Small responses that parse as
//! such a page are walked as folders; everything else, and every response of
//! `LISTING_LIMIT` bytes or more, is stored as a file.

use fbed_core::config::TransportConfig;
use fbed_core::{path, FbedError, FbedResult, SyncReport};
use fbed_store::FileService;
use futures::TryStreamExt;
use scraper::{Html, Selector};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

/// Responses at least this large are never treated as listings.
pub const LISTING_LIMIT: usize = 1024 * 1024;

enum Fetched {
    File,
    Folder(Vec<String>),
}

pub struct FrpClient {
    base: String,
    username: String,
    password: SecretString,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl FrpClient {
    pub fn new(
        address: &str,
        username: &str,
        password: SecretString,
        transport: &TransportConfig,
    ) -> FbedResult<Self> {
        let base = address.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(FbedError::Config(format!(
                "frp address must be an http(s) URL: {address}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(transport.sync_timeout())
            .build()
            .map_err(|e| FbedError::Config(format!("http client: {e}")))?;
        Ok(FrpClient {
            base: base.to_string(),
            username: username.to_string(),
            password,
            client,
            retry: RetryPolicy::from_config(transport),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Copy the remote `remote_root` into `local_root` of `local`.
    ///
    /// Failing to fetch `remote_root` itself aborts the call; failures below
    /// it are counted in the report.
    pub async fn pull(
        &self,
        local: &FileService,
        local_root: &str,
        remote_root: &str,
    ) -> FbedResult<SyncReport> {
        let local_root =
            path::clean(local_root).ok_or_else(|| FbedError::PathEscape(local_root.to_string()))?;
        let remote_root = path::clean(remote_root)
            .ok_or_else(|| FbedError::PathEscape(remote_root.to_string()))?;

        let mut report = SyncReport::default();
        let mut stack = vec![(remote_root.clone(), local_root)];
        let mut top = true;

        while let Some((remote, target)) = stack.pop() {
            match self.pull_one(local, &remote, &target).await {
                Ok(Fetched::File) => report.transferred += 1,
                Ok(Fetched::Folder(names)) => {
                    for name in names.iter().rev() {
                        stack.push((path::join(&remote, name), path::join(&target, name)));
                    }
                }
                Err(e) if top => {
                    error!(url = %self.base, path = %remote, error = %e, "frp pull aborted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(path = %remote, error = %e, "frp pull: entry failed");
                    report.record_failure(&remote, &e);
                }
            }
            top = false;
        }

        info!(
            url = %self.base,
            root = %remote_root,
            transferred = report.transferred,
            failed = report.failed,
            "frp pull finished"
        );
        Ok(report)
    }

    async fn pull_one(&self, local: &FileService, remote: &str, target: &str) -> FbedResult<Fetched> {
        let url = format!("{}{remote}", self.base);
        let url = url.as_str();
        let resp = self
            .retry
            .run("frp", |_| {
                let req = self
                    .client
                    .get(url)
                    .basic_auth(&self.username, Some(self.password.expose_secret()));
                async move {
                    let resp = req
                        .send()
                        .await
                        .map_err(|e| FbedError::Transport(e.to_string()))?;
                    match resp.status() {
                        reqwest::StatusCode::OK => Ok(resp),
                        status => Err(FbedError::Transport(format!("GET {url}: HTTP {status}"))),
                    }
                }
            })
            .await?;

        let mut body = Box::pin(StreamReader::new(
            resp.bytes_stream().map_err(std::io::Error::other),
        ));
        let mut head = Vec::new();
        (&mut body)
            .take(LISTING_LIMIT as u64)
            .read_to_end(&mut head)
            .await?;

        if head.len() < LISTING_LIMIT {
            if let Some(names) = parse_listing(&head) {
                debug!(path = %remote, children = names.len(), "frp folder");
                // a folder replaces a file of the same name
                if let Some(st) = local.backend().stat(target).await? {
                    if st.is_file {
                        local.remove_file(target).await?;
                    }
                }
                return Ok(Fetched::Folder(names));
            }
        }

        let mut rest = head.as_slice().chain(body);
        local.add_file(target, &mut rest, true).await?;
        debug!(path = %remote, local = %target, "frp file stored");
        Ok(Fetched::File)
    }
}

/// Child names of an frp folder page, `None` when `data` is not one.
fn parse_listing(data: &[u8]) -> Option<Vec<String>> {
    let text = std::str::from_utf8(data).ok()?;
    let doc = Html::parse_document(text);
    let pre = Selector::parse("html > body > pre").ok()?;
    let anchor = Selector::parse("a").ok()?;

    let mut blocks = doc.select(&pre);
    let block = blocks.next()?;
    if blocks.next().is_some() {
        return None;
    }
    Some(
        block
            .select(&anchor)
            .filter_map(|a| listing_name(&a.text().collect::<String>()))
            .collect(),
    )
}

/// Folder links end in `/`; parent links and anything with a separator are
/// dropped.
fn listing_name(raw: &str) -> Option<String> {
    let name = raw.trim().trim_end_matches('/');
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frp_folder_page() {
        let page = br#"<!doctype html>
<meta name="viewport" content="width=device-width">
<pre>
<a href="../">../</a>
<a href="a%20b.txt">a b.txt</a>
<a href="sub/">sub/</a>
<a href="x&amp;y">x&amp;y</a>
</pre>
"#;
        assert_eq!(
            parse_listing(page).unwrap(),
            vec!["a b.txt".to_string(), "sub".into(), "x&y".into()]
        );
    }

    #[test]
    fn other_documents_are_files() {
        assert!(parse_listing(b"plain text").is_none());
        assert!(parse_listing(b"<pre>a</pre><pre>b</pre>").is_none());
        assert!(parse_listing(&[0xff, 0xfe, 0x00]).is_none());
    }

    #[test]
    fn empty_folder_page() {
        assert_eq!(parse_listing(b"<pre>\n</pre>").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn address_must_be_http() {
        let pw = || SecretString::from(String::new());
        let transport = TransportConfig::default();
        assert!(FrpClient::new("ftp://x", "admin", pw(), &transport).is_err());
        let client = FrpClient::new("http://10.0.0.5:7090/", "admin", pw(), &transport).unwrap();
        assert_eq!(client.base, "http://10.0.0.5:7090");
    }
}
