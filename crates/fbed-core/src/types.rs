use serde::{Deserialize, Serialize};

use crate::error::{FbedError, FbedResult};
use crate::path;

/// Envelope code for a successful call
pub const SUCCESS_CODE: i32 = 1;
/// Envelope code for a failed call
pub const FAIL_CODE: i32 = 2;

/// Metadata for one file or folder in the store.
///
/// Simple entries (listings) carry only path, name, kind and url. Complete
/// entries add size, count and the md5 digest; for folders size and count
/// aggregate every descendant file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    pub name: String,
    pub is_file: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default)]
    pub url: String,
}

impl Entry {
    /// Build a simple entry for a cleaned logical path.
    pub fn simple(path: &str, is_file: bool) -> Self {
        Entry {
            path: path.to_string(),
            name: path::file_name(path).to_string(),
            is_file,
            size: 0,
            count: 0,
            md5: None,
            url: path::file_url(path),
        }
    }

    /// Complete entry for a file.
    pub fn file(path: &str, size: u64, md5: String) -> Self {
        Entry {
            size,
            count: 1,
            md5: Some(md5),
            ..Entry::simple(path, true)
        }
    }

    /// Complete entry for a folder with aggregated statistics.
    pub fn folder(path: &str, size: u64, count: u64) -> Self {
        Entry {
            size,
            count,
            ..Entry::simple(path, false)
        }
    }

    /// Drop the complete-info fields.
    pub fn to_simple(&self) -> Self {
        Entry::simple(&self.path, self.is_file)
    }
}

/// JSON envelope shared by every API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i32,
    // absent fields decode as None without a `T: Default` bound
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Envelope {
            code: SUCCESS_CODE,
            message: None,
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Envelope {
            code: FAIL_CODE,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Unwrap the payload, mapping a failure code to `RemoteProtocol`.
    pub fn into_result(self) -> FbedResult<Option<T>> {
        if self.code == SUCCESS_CODE {
            Ok(self.data)
        } else {
            Err(FbedError::RemoteProtocol {
                code: self.code,
                message: self.message.unwrap_or_default(),
            })
        }
    }
}

/// Outcome of a `receivePushFile` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReceipt {
    /// false when the local digest already matched and the write was skipped
    pub written: bool,
}

/// Summary of one push or pull reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub transferred: usize,
    pub skipped: usize,
    pub failed: usize,
    pub first_error: Option<String>,
}

impl SyncReport {
    pub fn record_failure(&mut self, path: &str, err: &FbedError) {
        self.failed += 1;
        if self.first_error.is_none() {
            self.first_error = Some(format!("{path}: {err}"));
        }
    }
}
