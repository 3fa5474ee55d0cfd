//! HTTP routes and request bodies shared by the daemon API and the peer client.

use serde::{Deserialize, Serialize};

pub const LOGIN: &str = "/api/login";
pub const LIST_FILE_SIMPLE_INFO: &str = "/api/listFileSimpleInfo";
pub const LIST_ALL_FILES: &str = "/api/listAllFiles";
pub const GET_FILE_COMPLETE_INFO: &str = "/api/getFileCompleteInfo";
pub const LIST_LAST_FILE_INFO: &str = "/api/listLastFileInfo";
pub const ADD_FILE: &str = "/api/addFile";
pub const ADD_URL: &str = "/api/addUrl";
pub const REMOVE_FILE: &str = "/api/removeFile";
pub const RECEIVE_PUSH_FILE: &str = "/api/receivePushFile";
pub const PUSH_SYNC_FILE: &str = "/api/pushSyncFile";
pub const PULL_SYNC_FILE: &str = "/api/pullSyncFile";
pub const FRP_PULL: &str = "/api/frpPull";
pub const FILE_PREFIX: &str = "/file";

/// Multipart field names of `receivePushFile` and `addFile`
pub const FIELD_PATH: &str = "path";
pub const FIELD_MD5: &str = "md5";
pub const FIELD_RAW: &str = "raw";
pub const FIELD_FILE: &str = "file";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUrlRequest {
    pub path: String,
    pub url: String,
    #[serde(default)]
    pub raw: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveFileRequest {
    pub path: String,
}

/// Operator-triggered push or pull against another instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub address: String,
    #[serde(skip_serializing)]
    pub secret: String,
    #[serde(default)]
    pub path: String,
}

/// Operator-triggered pull from an frp static file server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrpPullRequest {
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Local folder (or file) to write into
    #[serde(default)]
    pub path: String,
    /// Path on the frp server
    #[serde(default)]
    pub remote_path: String,
}
