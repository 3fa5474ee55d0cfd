use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level daemon configuration (loaded from fbed.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FbedConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub trash: TrashConfig,
    pub transport: TransportConfig,
    pub image: ImageConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address for the API (default: 0.0.0.0:8880)
    pub listen: String,
    /// Prometheus metrics endpoint (optional)
    pub metrics_addr: Option<String>,
    /// Log level or EnvFilter directive (default: info); `--log` overrides
    pub log_level: String,
    /// Log format: "json" or "text"; `--log-format` overrides
    pub log_format: String,
    /// Shared secret inbound tokens must be signed with
    #[serde(skip_serializing)]
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory every logical path is resolved under
    pub root: PathBuf,
    /// Files larger than this are not hashed (a sentinel digest is reported)
    pub max_hash_limit: u64,
    /// Capacity of the recently-added files list
    pub last_file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrashConfig {
    /// Move deleted and overwritten files to the trash instead of removing them
    pub enabled: bool,
    /// How long a trashed file is kept before the sweep purges it
    pub retention_secs: u64,
    /// Interval between trash sweeps (0 = never)
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Retries after the first attempt of a remote call (3 = up to 4 attempts)
    pub retry: u32,
    /// Timeout for ordinary API calls
    pub timeout_secs: u64,
    /// Timeout for calls made during a push/pull walk
    pub sync_timeout_secs: u64,
    /// Backoff base; attempt n waits sleep * 10^(n-1)
    pub sleep_ms: u64,
    /// Upper bound on a single backoff wait
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Recompress uploaded images (needs the daemon's `image` feature)
    pub compress: bool,
    /// Format images are re-encoded to; also appended to the stored name
    pub save_format: String,
    /// Size in bytes at which JPEG quality has dropped by one percent of its range
    pub target_size: f64,
    pub jpeg_min_quality: f64,
    pub jpeg_max_quality: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub pull: PeerJobConfig,
    pub push: PeerJobConfig,
}

/// A scheduled reconciliation against one peer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerJobConfig {
    /// Peer base URL, e.g. http://10.0.0.2:8880
    pub host: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Interval between runs (0 = disabled)
    pub interval_secs: u64,
    /// Subtree to reconcile (default: whole store)
    pub path: String,
}

impl PeerJobConfig {
    pub fn is_enabled(&self) -> bool {
        self.interval_secs > 0 && !self.host.is_empty()
    }
}

impl TrashConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8880".into(),
            metrics_addr: None,
            log_level: "info".into(),
            log_format: "text".into(),
            secret: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("file_bed"),
            max_hash_limit: 1024 * 1024 * 1024,
            last_file_count: 100,
        }
    }
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_secs: 7 * 24 * 3600,
            sweep_interval_secs: 3600,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry: 3,
            timeout_secs: 60,
            sync_timeout_secs: 3600,
            sleep_ms: 3000,
            max_wait_secs: 300,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            compress: true,
            save_format: "jpeg".into(),
            target_size: 200.0 * 1024.0,
            jpeg_min_quality: 20.0,
            jpeg_max_quality: 80.0,
        }
    }
}
