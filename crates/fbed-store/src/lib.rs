//! fbed-store: the file service and the shared state it keeps consistent
//!
//! `FileService` composes the storage backend with a path-prefix cache, the
//! recently-added list and the trash lifecycle. Every mutation goes through
//! it so cached listings and folder aggregates never outlive a change.

pub mod cache;
pub mod compress;
pub mod recent;
pub mod service;
pub mod trash;

pub use cache::{CacheKey, PathCache};
pub use compress::Compressor;
#[cfg(feature = "image")]
pub use compress::ImageCompressor;
pub use recent::RecentFiles;
pub use service::FileService;
pub use trash::{SweepReport, Ticket, TicketClock, Trash, TrashPath, TRASH_ROOT};
