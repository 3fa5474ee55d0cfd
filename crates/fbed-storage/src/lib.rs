//! fbed-storage: maps logical paths onto a local directory and performs raw I/O

pub mod backend;
pub mod digest;
pub mod health;

pub use backend::{LocalBackend, Stat};
pub use digest::DIGEST_SENTINEL;
pub use health::check_health;
