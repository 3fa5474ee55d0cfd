//! MD5 content digests.
//!
//! The digest is a change detector for sync, not a security primitive.

use md5::{Digest, Md5};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Reported instead of a digest when a file exceeds the hashing ceiling
pub const DIGEST_SENTINEL: &str = "out_max_hash_limit";

/// Hex MD5 of an in-memory buffer
pub fn md5_bytes(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Hex MD5 of a file, streamed in 64 KiB reads
pub async fn md5_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(md5_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_bytes(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let data: Vec<u8> = (0u32..200_000).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(md5_file(&path).await.unwrap(), md5_bytes(&data));
    }
}
