//! Local directory backend.
//!
//! Every logical path is cleaned and joined onto the store root; anything
//! that would land outside the root is rejected with `PathEscape`. Writes go
//! through a temp file and a rename so readers never see a partial file.
//! Deleting a file prunes the directories it leaves empty, stopping at the
//! first non-empty ancestor and never touching the root itself.

use fbed_core::{path, Entry, FbedError, FbedResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};

use crate::digest::{md5_file, DIGEST_SENTINEL};

const TMP_SUFFIX: &str = ".fbed_tmp";

/// Kind and size of a stored path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub is_file: bool,
    pub size: u64,
}

pub struct LocalBackend {
    root: PathBuf,
    max_hash_limit: u64,
}

impl LocalBackend {
    /// Create the root directory if needed and return a backend over it.
    pub async fn open(root: impl Into<PathBuf>, max_hash_limit: u64) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!(root = %root.display(), "storage root ready");
        Ok(LocalBackend {
            root,
            max_hash_limit,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_hash_limit(&self) -> u64 {
        self.max_hash_limit
    }

    /// Clean a logical path, rejecting traversal above the root.
    pub fn clean(&self, logical: &str) -> FbedResult<String> {
        path::clean(logical).ok_or_else(|| FbedError::PathEscape(logical.to_string()))
    }

    /// Map a logical path onto the physical path under the root.
    pub fn resolve(&self, logical: &str) -> FbedResult<PathBuf> {
        let cleaned = self.clean(logical)?;
        let physical = cleaned
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |acc, seg| acc.join(seg));
        if !physical.starts_with(&self.root) {
            return Err(FbedError::PathEscape(logical.to_string()));
        }
        Ok(physical)
    }

    /// Stat a logical path; `None` when nothing is stored there.
    pub async fn stat(&self, logical: &str) -> FbedResult<Option<Stat>> {
        let physical = self.resolve(logical)?;
        match fs::metadata(&physical).await {
            Ok(meta) => Ok(Some(Stat {
                is_file: meta.is_file(),
                size: if meta.is_file() { meta.len() } else { 0 },
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Open a stored file for reading.
    pub async fn read(&self, logical: &str) -> FbedResult<fs::File> {
        let physical = self.resolve(logical)?;
        match fs::metadata(&physical).await {
            Ok(meta) if meta.is_dir() => return Err(FbedError::NotAFile(logical.to_string())),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FbedError::NotFound(logical.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        Ok(fs::File::open(&physical).await?)
    }

    /// Write a stream to a logical path, creating parent folders.
    ///
    /// Returns the number of bytes written.
    pub async fn write<R>(&self, logical: &str, reader: &mut R) -> FbedResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let cleaned = self.clean(logical)?;
        if cleaned == path::ROOT {
            return Err(FbedError::IsAFolder(cleaned));
        }
        let physical = self.resolve(&cleaned)?;
        if let Ok(meta) = fs::metadata(&physical).await {
            if meta.is_dir() {
                return Err(FbedError::IsAFolder(cleaned));
            }
        }

        let parent = physical
            .parent()
            .ok_or_else(|| FbedError::PathEscape(cleaned.clone()))?;
        fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(
            ".{}.{}{TMP_SUFFIX}",
            path::file_name(&cleaned),
            uuid::Uuid::new_v4().simple()
        ));
        match copy_to(&tmp, reader).await {
            Ok(bytes) => {
                if let Err(e) = fs::rename(&tmp, &physical).await {
                    let _ = fs::remove_file(&tmp).await;
                    return Err(e.into());
                }
                debug!(path = %cleaned, bytes, "stored");
                Ok(bytes)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                Err(e.into())
            }
        }
    }

    /// Remove a stored file and prune the folders it leaves empty.
    pub async fn delete(&self, logical: &str) -> FbedResult<()> {
        let cleaned = self.clean(logical)?;
        let physical = self.resolve(&cleaned)?;
        match fs::metadata(&physical).await {
            Ok(meta) if meta.is_dir() => return Err(FbedError::NotAFile(cleaned)),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(FbedError::NotFound(cleaned)),
            Err(e) => return Err(e.into()),
        }
        fs::remove_file(&physical).await?;
        debug!(path = %cleaned, "deleted");

        if let Some(parent) = physical.parent() {
            self.prune_empty_dirs(parent).await?;
        }
        Ok(())
    }

    /// Rename a stored file to another logical path, creating destination
    /// folders and pruning the folders the source leaves empty.
    pub async fn move_file(&self, from: &str, to: &str) -> FbedResult<()> {
        let from_physical = self.resolve(from)?;
        let to_physical = self.resolve(to)?;
        match fs::metadata(&from_physical).await {
            Ok(meta) if meta.is_dir() => return Err(FbedError::NotAFile(from.to_string())),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FbedError::NotFound(from.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = to_physical.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from_physical, &to_physical).await?;
        debug!(from, to, "moved");

        if let Some(parent) = from_physical.parent() {
            self.prune_empty_dirs(parent).await?;
        }
        Ok(())
    }

    /// Walk upward from `dir`, removing each empty directory until one is
    /// non-empty or the root is reached. The root is never removed.
    async fn prune_empty_dirs(&self, dir: &Path) -> FbedResult<()> {
        let mut current = dir.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            };
            if entries.next_entry().await?.is_some() {
                break;
            }
            match fs::remove_dir(&current).await {
                Ok(()) => debug!(dir = %current.display(), "pruned empty folder"),
                // a concurrent writer may have just created something inside
                Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
        Ok(())
    }

    /// MD5 of a stored file, or the sentinel when it exceeds the hash ceiling.
    pub async fn digest(&self, logical: &str) -> FbedResult<String> {
        let physical = self.resolve(logical)?;
        let meta = match fs::metadata(&physical).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FbedError::NotFound(logical.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            return Err(FbedError::NotAFile(logical.to_string()));
        }
        if meta.len() > self.max_hash_limit {
            return Ok(DIGEST_SENTINEL.to_string());
        }
        Ok(md5_file(&physical).await?)
    }

    /// Simple entry for a logical path, `None` when absent.
    pub async fn simple_info(&self, logical: &str) -> FbedResult<Option<Entry>> {
        let cleaned = self.clean(logical)?;
        Ok(self
            .stat(&cleaned)
            .await?
            .map(|st| Entry::simple(&cleaned, st.is_file)))
    }

    /// Complete entry: digest for files, recursive size/count for folders.
    pub async fn complete_info(&self, logical: &str) -> FbedResult<Option<Entry>> {
        let cleaned = self.clean(logical)?;
        let Some(st) = self.stat(&cleaned).await? else {
            return Ok(None);
        };
        if st.is_file {
            let md5 = self.digest(&cleaned).await?;
            Ok(Some(Entry::file(&cleaned, st.size, md5)))
        } else {
            let (size, count) = self.aggregate(&cleaned).await?;
            Ok(Some(Entry::folder(&cleaned, size, count)))
        }
    }

    /// Simple entries for the children of a folder, sorted by name.
    ///
    /// A file path lists as itself.
    pub async fn list_children(&self, logical: &str) -> FbedResult<Vec<Entry>> {
        let cleaned = self.clean(logical)?;
        let physical = self.resolve(&cleaned)?;
        let meta = match fs::metadata(&physical).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(FbedError::NotFound(cleaned)),
            Err(e) => return Err(e.into()),
        };
        if meta.is_file() {
            return Ok(vec![Entry::simple(&cleaned, true)]);
        }

        let mut out = Vec::new();
        for (name, is_dir) in read_children(&physical).await? {
            out.push(Entry::simple(&path::join(&cleaned, &name), !is_dir));
        }
        Ok(out)
    }

    /// Total size and file count beneath a folder (a file counts itself).
    pub async fn aggregate(&self, logical: &str) -> FbedResult<(u64, u64)> {
        let cleaned = self.clean(logical)?;
        let physical = self.resolve(&cleaned)?;
        let meta = match fs::metadata(&physical).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(FbedError::NotFound(cleaned)),
            Err(e) => return Err(e.into()),
        };
        if meta.is_file() {
            return Ok((meta.len(), 1));
        }

        let mut size = 0u64;
        let mut count = 0u64;
        let mut stack = vec![physical];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // removed concurrently; skip like any other vanished child
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if is_temp(&entry.file_name().to_string_lossy()) {
                    continue;
                }
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                if meta.is_dir() {
                    stack.push(entry.path());
                } else {
                    size += meta.len();
                    count += 1;
                }
            }
        }
        Ok((size, count))
    }

    /// Logical paths of every file beneath `logical`, depth-first in name order.
    pub async fn walk_files(&self, logical: &str) -> FbedResult<Vec<String>> {
        let cleaned = self.clean(logical)?;
        let Some(st) = self.stat(&cleaned).await? else {
            return Ok(Vec::new());
        };
        if st.is_file {
            return Ok(vec![cleaned]);
        }

        let mut files = Vec::new();
        let mut stack = vec![cleaned];
        while let Some(dir) = stack.pop() {
            let physical = self.resolve(&dir)?;
            let children = match read_children(&physical).await {
                Ok(children) => children,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            // push folders in reverse so they pop in name order
            let mut folders = Vec::new();
            for (name, is_dir) in children {
                let child = path::join(&dir, &name);
                if is_dir {
                    folders.push(child);
                } else {
                    files.push(child);
                }
            }
            stack.extend(folders.into_iter().rev());
        }
        Ok(files)
    }
}

/// Sorted (name, is_dir) pairs of a physical directory, skipping temp files
/// and names that are not valid UTF-8.
async fn read_children(dir: &Path) -> std::io::Result<Vec<(String, bool)>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if is_temp(&name) {
            continue;
        }
        let Ok(ft) = entry.file_type().await else {
            continue;
        };
        out.push((name, ft.is_dir()));
    }
    out.sort();
    Ok(out)
}

fn is_temp(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TMP_SUFFIX)
}

async fn copy_to<R>(tmp: &Path, reader: &mut R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = fs::File::create(tmp).await?;
    let bytes = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    Ok(bytes)
}
