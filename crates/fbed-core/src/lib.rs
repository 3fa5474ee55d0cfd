pub mod config;
pub mod error;
pub mod path;
pub mod protocol;
pub mod types;

pub use error::{FbedError, FbedResult};
pub use types::{Entry, Envelope, PushReceipt, SyncReport};
