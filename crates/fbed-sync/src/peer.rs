use fbed_core::{Entry, FbedResult, PushReceipt};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Body of a downloaded file, read straight from the wire.
pub type Download = Pin<Box<dyn AsyncRead + Send>>;

/// The remote side of a reconciliation.
///
/// `HttpPeer` talks to another daemon; tests plug in an in-process store.
pub trait Peer: Send + Sync {
    /// Handshake that must succeed before any transfer.
    fn login(&self) -> impl Future<Output = FbedResult<()>> + Send;

    /// Simple entries of a remote folder's children.
    fn list_children(&self, path: &str) -> impl Future<Output = FbedResult<Vec<Entry>>> + Send;

    /// Complete info (with digest) of a remote path, `None` when absent.
    fn complete_info(&self, path: &str)
        -> impl Future<Output = FbedResult<Option<Entry>>> + Send;

    /// Upload the local file at `source` to `path`; the peer skips the write
    /// when its digest already matches. `source` is reopened for every
    /// attempt.
    fn push_file(
        &self,
        path: &str,
        md5: &str,
        source: &Path,
    ) -> impl Future<Output = FbedResult<PushReceipt>> + Send;

    /// Stream of a remote file's bytes.
    fn download(&self, path: &str) -> impl Future<Output = FbedResult<Download>> + Send;
}
