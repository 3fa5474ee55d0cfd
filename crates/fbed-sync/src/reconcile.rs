//! Push and pull reconciliation against a peer.
//!
//! Both directions walk a subtree folder by folder with an explicit stack,
//! one file at a time, and transfer only files whose digests differ. Every
//! folder is visited, the trash included. A failed login or a failed listing
//! of the starting folder aborts the call; anything that goes wrong deeper in
//! the walk is counted in the report and the walk moves on.
//!
//! Mirrored paths are built from the listed folder and each child's name, so
//! a listing can never place a file outside the subtree being reconciled.

use fbed_core::{path, Entry, FbedError, FbedResult, SyncReport};
use fbed_store::FileService;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::peer::Peer;

/// Outcome of reconciling a single file
enum Step {
    Transferred,
    Skipped,
}

pub struct Reconciler<P> {
    local: Arc<FileService>,
    peer: P,
}

impl<P: Peer> Reconciler<P> {
    pub fn new(local: Arc<FileService>, peer: P) -> Self {
        Reconciler { local, peer }
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    /// Make the peer's `remote_root` match the local `local_root`.
    pub async fn push(&self, local_root: &str, remote_root: &str) -> FbedResult<SyncReport> {
        let local_root = clean(local_root)?;
        let remote_root = clean(remote_root)?;
        if let Err(e) = self.peer.login().await {
            error!(error = %e, "push aborted: login failed");
            return Err(e);
        }

        let mut report = SyncReport::default();
        let mut stack = vec![(local_root.clone(), remote_root)];
        let mut top = true;

        while let Some((dir, remote_dir)) = stack.pop() {
            let children = match self.local.list_children(&dir).await {
                Ok(children) => children,
                Err(e) if top => {
                    error!(path = %dir, error = %e, "push aborted: listing failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(path = %dir, error = %e, "push: listing failed");
                    report.record_failure(&dir, &e);
                    continue;
                }
            };
            top = false;

            let mut folders = Vec::new();
            for child in children {
                let name = match child_name(&child) {
                    Ok(name) => name,
                    Err(e) => {
                        report.record_failure(&child.path, &e);
                        continue;
                    }
                };
                let local = path::join(&dir, name);
                let remote = path::join(&remote_dir, name);
                if !child.is_file {
                    folders.push((local, remote));
                    continue;
                }
                match self.push_one(&local, &remote).await {
                    Ok(Step::Transferred) => report.transferred += 1,
                    Ok(Step::Skipped) => report.skipped += 1,
                    Err(e) => {
                        warn!(path = %local, error = %e, "push: file failed");
                        report.record_failure(&local, &e);
                    }
                }
            }
            stack.extend(folders.into_iter().rev());
        }

        info!(
            root = %local_root,
            transferred = report.transferred,
            skipped = report.skipped,
            failed = report.failed,
            "push finished"
        );
        Ok(report)
    }

    async fn push_one(&self, local: &str, remote: &str) -> FbedResult<Step> {
        let ours = self
            .local
            .file_complete_info(local)
            .await?
            .ok_or_else(|| FbedError::NotFound(local.to_string()))?;
        let md5 = ours.md5.clone().unwrap_or_default();

        let theirs = self.peer.complete_info(remote).await?;
        if same_digest(Some(&ours), theirs.as_ref()) {
            debug!(path = %local, "push: unchanged");
            return Ok(Step::Skipped);
        }

        let source = self.local.backend().resolve(local)?;
        let receipt = self.peer.push_file(remote, &md5, &source).await?;
        if receipt.written {
            debug!(path = %local, remote = %remote, "push: uploaded");
            Ok(Step::Transferred)
        } else {
            Ok(Step::Skipped)
        }
    }

    /// Make the local `local_root` match the peer's `remote_root`.
    pub async fn pull(&self, local_root: &str, remote_root: &str) -> FbedResult<SyncReport> {
        let local_root = clean(local_root)?;
        let remote_root = clean(remote_root)?;
        if let Err(e) = self.peer.login().await {
            error!(error = %e, "pull aborted: login failed");
            return Err(e);
        }

        let mut report = SyncReport::default();
        let mut stack = vec![(remote_root.clone(), local_root)];
        let mut top = true;

        while let Some((dir, local_dir)) = stack.pop() {
            let children = match self.peer.list_children(&dir).await {
                Ok(children) => children,
                Err(e) if top => {
                    error!(path = %dir, error = %e, "pull aborted: remote listing failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(path = %dir, error = %e, "pull: remote listing failed");
                    report.record_failure(&dir, &e);
                    continue;
                }
            };
            top = false;

            let mut folders = Vec::new();
            for child in children {
                let name = match child_name(&child) {
                    Ok(name) => name,
                    Err(e) => {
                        warn!(folder = %dir, entry = %child.path, "pull: refusing listed name");
                        report.record_failure(&child.path, &e);
                        continue;
                    }
                };
                let remote = path::join(&dir, name);
                let local = path::join(&local_dir, name);
                if !child.is_file {
                    folders.push((remote, local));
                    continue;
                }
                match self.pull_one(&remote, &local).await {
                    Ok(Step::Transferred) => report.transferred += 1,
                    Ok(Step::Skipped) => report.skipped += 1,
                    Err(e) => {
                        warn!(path = %remote, error = %e, "pull: file failed");
                        report.record_failure(&remote, &e);
                    }
                }
            }
            stack.extend(folders.into_iter().rev());
        }

        info!(
            root = %remote_root,
            transferred = report.transferred,
            skipped = report.skipped,
            failed = report.failed,
            "pull finished"
        );
        Ok(report)
    }

    async fn pull_one(&self, remote: &str, local: &str) -> FbedResult<Step> {
        let theirs = self
            .peer
            .complete_info(remote)
            .await?
            .ok_or_else(|| FbedError::NotFound(remote.to_string()))?;
        let ours = self.local.file_complete_info(local).await?;
        if same_digest(ours.as_ref(), Some(&theirs)) {
            debug!(path = %local, "pull: unchanged");
            return Ok(Step::Skipped);
        }

        let mut body = self.peer.download(remote).await?;
        let stored = self.local.add_file(local, &mut body, true).await?;

        // the downloaded file stays in place even when it does not match
        let expected = theirs.md5.unwrap_or_default();
        let actual = stored.md5.unwrap_or_default();
        if expected != actual && !is_sentinel(&expected) && !is_sentinel(&actual) {
            return Err(FbedError::DigestMismatch {
                path: local.to_string(),
                expected,
                actual,
            });
        }
        debug!(path = %local, remote = %remote, "pull: downloaded");
        Ok(Step::Transferred)
    }
}

fn clean(raw: &str) -> FbedResult<String> {
    path::clean(raw).ok_or_else(|| FbedError::PathEscape(raw.to_string()))
}

/// Name of a listed child, refused when joining it could leave the folder.
fn child_name(entry: &Entry) -> FbedResult<&str> {
    let name = entry.name.as_str();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(FbedError::PathEscape(entry.path.clone()));
    }
    Ok(name)
}

/// Two files are the same when both exist as files with equal digests.
fn same_digest(a: Option<&Entry>, b: Option<&Entry>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) if a.is_file && b.is_file => match (&a.md5, &b.md5) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => false,
    }
}

fn is_sentinel(digest: &str) -> bool {
    digest == fbed_storage::DIGEST_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listed_names_must_stay_in_folder() {
        let named = |name: &str| Entry {
            name: name.to_string(),
            ..Entry::simple("/a/x", true)
        };
        assert_eq!(child_name(&named("x")).unwrap(), "x");
        assert_eq!(child_name(&named(".hidden")).unwrap(), ".hidden");
        for bad in ["", ".", "..", "b/c", "..\\up"] {
            assert!(matches!(
                child_name(&named(bad)),
                Err(FbedError::PathEscape(_))
            ));
        }
    }

    #[test]
    fn digest_comparison() {
        let a = Entry::file("/a", 1, "x".into());
        let b = Entry::file("/a", 1, "x".into());
        let c = Entry::file("/a", 1, "y".into());
        let folder = Entry::folder("/a", 1, 1);
        assert!(same_digest(Some(&a), Some(&b)));
        assert!(!same_digest(Some(&a), Some(&c)));
        assert!(!same_digest(Some(&a), None));
        assert!(!same_digest(Some(&a), Some(&folder)));
    }
}
