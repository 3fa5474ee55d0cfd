//! File service: the single entry point for reads and mutations of the store.

use fbed_core::config::FbedConfig;
use fbed_core::{path, Entry, FbedError, FbedResult, PushReceipt};
use fbed_storage::LocalBackend;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CachedValue, PathCache};
use crate::compress::{self, Compressor};
use crate::recent::RecentFiles;
use crate::trash::{SweepReport, Trash};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct FileService {
    backend: Arc<LocalBackend>,
    cache: Arc<PathCache>,
    recent: RecentFiles,
    trash: Trash,
    compressor: Option<Arc<dyn Compressor>>,
    save_format: String,
    retention: Duration,
    http: reqwest::Client,
}

impl FileService {
    pub fn new(backend: Arc<LocalBackend>, config: &FbedConfig) -> FbedResult<Self> {
        let cache = Arc::new(PathCache::new());
        let http = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(config.transport.timeout())
            .build()
            .map_err(|e| FbedError::Config(format!("http client: {e}")))?;

        Ok(FileService {
            trash: Trash::new(backend.clone(), cache.clone(), config.trash.enabled),
            recent: RecentFiles::new(config.storage.last_file_count),
            backend,
            cache,
            compressor: None,
            save_format: config.image.save_format.clone(),
            retention: config.trash.retention(),
            http,
        })
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn backend(&self) -> &Arc<LocalBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &PathCache {
        &self.cache
    }

    /// Store a stream at `logical`, displacing (through the trash) any file
    /// already there.
    ///
    /// With `raw = false` an image-like file is run through the compressor
    /// first; on success the stored path gets the save format appended.
    pub async fn add_file<R>(&self, logical: &str, reader: &mut R, raw: bool) -> FbedResult<Entry>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let cleaned = self.backend.clean(logical)?;
        if cleaned == path::ROOT {
            return Err(FbedError::IsAFolder(cleaned));
        }

        let in_trash = Trash::is_trashed(&cleaned);
        if let (false, false, Some(compressor)) = (raw, in_trash, &self.compressor) {
            if compress::is_image(&cleaned) {
                let mut original = Vec::new();
                reader.read_to_end(&mut original).await?;
                return match compressor.compress(&original) {
                    Ok(smaller) => {
                        let target = format!("{cleaned}.{}", self.save_format);
                        debug!(
                            path = %target,
                            before = original.len(),
                            after = smaller.len(),
                            "image recompressed"
                        );
                        self.store(&target, &mut smaller.as_slice()).await
                    }
                    Err(e) => {
                        warn!(path = %cleaned, error = %e, "image compression failed, storing original");
                        self.store(&cleaned, &mut original.as_slice()).await
                    }
                };
            }
        }
        self.store(&cleaned, reader).await
    }

    async fn store<R>(&self, cleaned: &str, reader: &mut R) -> FbedResult<Entry>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut changed = vec![cleaned.to_string()];
        let mut displaced = false;

        match self.backend.stat(cleaned).await? {
            Some(st) if !st.is_file => return Err(FbedError::IsAFolder(cleaned.to_string())),
            // files inside the trash are overwritten in place
            Some(_) if !Trash::is_trashed(cleaned) => {
                if let Some(moved) = self.trash.soft_delete(cleaned).await? {
                    changed.push(moved);
                }
                displaced = true;
            }
            _ => {}
        }

        let written = match self.backend.write(cleaned, reader).await {
            Ok(n) => n,
            Err(e) => {
                if displaced {
                    self.cache.invalidate_ancestors(&changed);
                }
                return Err(e);
            }
        };
        self.cache.invalidate_ancestors(&changed);

        let entry = self
            .backend
            .complete_info(cleaned)
            .await?
            .ok_or_else(|| FbedError::NotFound(cleaned.to_string()))?;
        self.recent.push(entry.clone());
        info!(path = %cleaned, bytes = written, displaced, "file added");
        Ok(entry)
    }

    /// Fetch `url` and store the body at `logical`.
    pub async fn add_url(&self, logical: &str, url: &str, raw: bool) -> FbedResult<Entry> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FbedError::Transport(format!("GET {url}: {e}")))?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(FbedError::Transport(format!("GET {url}: HTTP {status}")));
        }
        debug!(url, length = ?resp.content_length(), "url fetched");
        let mut body = Box::pin(StreamReader::new(
            resp.bytes_stream().map_err(std::io::Error::other),
        ));
        self.add_file(logical, &mut body, raw).await
    }

    /// Remove a file (folders are refused) and return its entry as it was.
    pub async fn remove_file(&self, logical: &str) -> FbedResult<Entry> {
        let cleaned = self.backend.clean(logical)?;
        let entry = self
            .backend
            .complete_info(&cleaned)
            .await?
            .ok_or_else(|| FbedError::NotFound(cleaned.clone()))?;
        if !entry.is_file {
            return Err(FbedError::NotAFile(cleaned));
        }

        let mut changed = vec![cleaned.clone()];
        if let Some(moved) = self.trash.soft_delete(&cleaned).await? {
            changed.push(moved);
        }
        self.cache.invalidate_ancestors(&changed);
        info!(path = %cleaned, "file removed");
        Ok(entry)
    }

    /// Accept a file pushed by a peer, skipping the write when the local
    /// digest already equals `md5`.
    pub async fn receive_pushed_file<R>(
        &self,
        logical: &str,
        md5: &str,
        reader: &mut R,
    ) -> FbedResult<PushReceipt>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let cleaned = self.backend.clean(logical)?;
        if let Some(st) = self.backend.stat(&cleaned).await? {
            if st.is_file && self.backend.digest(&cleaned).await? == md5 {
                debug!(path = %cleaned, "pushed file unchanged");
                return Ok(PushReceipt { written: false });
            }
        }
        self.add_file(&cleaned, reader, true).await?;
        Ok(PushReceipt { written: true })
    }

    pub async fn file_simple_info(&self, logical: &str) -> FbedResult<Option<Entry>> {
        self.backend.simple_info(logical).await
    }

    /// Complete info, served from the cache when possible.
    pub async fn file_complete_info(&self, logical: &str) -> FbedResult<Option<Entry>> {
        let cleaned = self.backend.clean(logical)?;
        let key = CacheKey::Info(cleaned.clone());
        if let Some(hit) = self.cache.get_entry(&key) {
            return Ok(Some(hit));
        }

        let epoch = self.cache.epoch();
        let entry = self.backend.complete_info(&cleaned).await?;
        if let Some(e) = &entry {
            self.cache
                .put_if_current(key, CachedValue::Entry(e.clone()), epoch);
        }
        Ok(entry)
    }

    /// Simple entries of a folder's children, served from the cache when
    /// possible.
    pub async fn list_children(&self, logical: &str) -> FbedResult<Vec<Entry>> {
        let cleaned = self.backend.clean(logical)?;
        let key = CacheKey::Listing(cleaned.clone());
        if let Some(hit) = self.cache.get_listing(&key) {
            return Ok(hit);
        }

        let epoch = self.cache.epoch();
        let listing = self.backend.list_children(&cleaned).await?;
        self.cache
            .put_if_current(key, CachedValue::Listing(listing.clone()), epoch);
        Ok(listing)
    }

    /// Complete info for every file in the store.
    pub async fn list_all_files(&self) -> FbedResult<Vec<Entry>> {
        if let Some(hit) = self.cache.get_listing(&CacheKey::AllFiles) {
            return Ok(hit);
        }

        let epoch = self.cache.epoch();
        let mut all = Vec::new();
        for file in self.backend.walk_files(path::ROOT).await? {
            match self.backend.complete_info(&file).await {
                Ok(Some(entry)) => all.push(entry),
                // removed between the walk and the stat
                Ok(None) | Err(FbedError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.cache
            .put_if_current(CacheKey::AllFiles, CachedValue::Listing(all.clone()), epoch);
        Ok(all)
    }

    pub fn recent_files(&self) -> Vec<Entry> {
        self.recent.snapshot()
    }

    /// Open a stored file for streaming.
    pub async fn open_file(&self, logical: &str) -> FbedResult<tokio::fs::File> {
        self.backend.read(logical).await
    }

    /// Run one trash sweep with the configured retention.
    pub async fn sweep_trash(&self) -> FbedResult<SweepReport> {
        self.trash.sweep(self.retention, SystemTime::now()).await
    }

    pub async fn sweep_trash_at(
        &self,
        retention: Duration,
        now: SystemTime,
    ) -> FbedResult<SweepReport> {
        self.trash.sweep(retention, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service(dir: &std::path::Path) -> FileService {
        let backend = Arc::new(LocalBackend::open(dir, 1 << 20).await.unwrap());
        FileService::new(backend, &FbedConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn remove_refuses_folders_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        svc.add_file("/a/b.txt", &mut &b"x"[..], true).await.unwrap();

        assert!(matches!(
            svc.remove_file("/a").await,
            Err(FbedError::NotAFile(_))
        ));
        assert!(matches!(
            svc.remove_file("/nope").await,
            Err(FbedError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn add_over_folder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        svc.add_file("/a/b.txt", &mut &b"x"[..], true).await.unwrap();
        let before = svc.cache().cascades();
        assert!(matches!(
            svc.add_file("/a", &mut &b"y"[..], true).await,
            Err(FbedError::IsAFolder(_))
        ));
        assert_eq!(svc.cache().cascades(), before);
    }

    #[tokio::test]
    async fn escape_is_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        assert!(matches!(
            svc.add_file("../../etc/passwd", &mut &b"x"[..], true).await,
            Err(FbedError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn pushed_file_with_same_digest_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        let entry = svc.add_file("/p.bin", &mut &b"same"[..], true).await.unwrap();
        let md5 = entry.md5.unwrap();

        let receipt = svc
            .receive_pushed_file("/p.bin", &md5, &mut &b"same"[..])
            .await
            .unwrap();
        assert!(!receipt.written);

        let receipt = svc
            .receive_pushed_file("/p.bin", "other", &mut &b"new"[..])
            .await
            .unwrap();
        assert!(receipt.written);
    }

    #[tokio::test]
    async fn removed_file_lands_in_trash() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        svc.add_file("/r/x.txt", &mut &b"x"[..], true).await.unwrap();
        let removed = svc.remove_file("/r/x.txt").await.unwrap();
        assert_eq!(removed.path, "/r/x.txt");
        assert!(svc.file_simple_info("/r/x.txt").await.unwrap().is_none());

        let trashed = svc.backend().walk_files(crate::TRASH_ROOT).await.unwrap();
        assert_eq!(trashed.len(), 1);
    }
}
