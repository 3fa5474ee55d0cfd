//! Storage health check

use anyhow::Result;

use crate::backend::LocalBackend;

/// Verify the store root is present and readable by listing it
pub async fn check_health(backend: &LocalBackend) -> Result<()> {
    tokio::fs::read_dir(backend.root())
        .await
        .map(|_| ())
        .map_err(|e| {
            anyhow::anyhow!(
                "storage health check failed for {}: {e}",
                backend.root().display()
            )
        })
}

/// Returns true if the store root is readable, false otherwise (non-panicking)
pub async fn is_healthy(backend: &LocalBackend) -> bool {
    check_health(backend).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthy_when_root_exists() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path(), 1024).await.unwrap();
        assert!(is_healthy(&backend).await);
    }

    #[tokio::test]
    async fn unhealthy_when_root_removed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bed");
        let backend = LocalBackend::open(&root, 1024).await.unwrap();
        std::fs::remove_dir_all(&root).unwrap();
        assert!(check_health(&backend).await.is_err());
    }
}
