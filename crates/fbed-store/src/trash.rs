//! Soft delete into `/.trash` and the retention sweep that empties it.
//!
//! A trashed file keeps its folder layout under the trash root and carries a
//! ticket in its name, right before the extension:
//!
//! ```text
//! /photos/2024/cat.png  ->  /.trash/photos/2024/cat.<ticket>.png
//! /notes/README         ->  /.trash/notes/README.<ticket>
//! ```
//!
//! The ticket encodes the time of deletion; the sweep derives a file's age
//! from it. There is no restore: a trashed file leaves only through the sweep.

use fbed_core::{path, FbedResult};
use fbed_storage::LocalBackend;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::cache::PathCache;

pub const TRASH_ROOT: &str = "/.trash";

const SEQ_BITS: u32 = 16;

/// Deletion ticket: unix millis in the high bits, a sequence in the low 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(pub u64);

impl Ticket {
    pub fn from_time(t: SystemTime) -> Self {
        let millis = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ticket(millis << SEQ_BITS)
    }

    pub fn issued_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.0 >> SEQ_BITS)
    }

    /// Time since issue; zero for tickets from the future.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.issued_at()).unwrap_or_default()
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues strictly increasing tickets.
#[derive(Default)]
pub struct TicketClock {
    last: Mutex<u64>,
}

impl TicketClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Ticket {
        self.next_at(SystemTime::now())
    }

    pub fn next_at(&self, now: SystemTime) -> Ticket {
        let candidate = Ticket::from_time(now).0;
        let mut last = self.last.lock();
        *last = if candidate > *last {
            candidate
        } else {
            *last + 1
        };
        Ticket(*last)
    }
}

/// A trashed file as `{original, ticket}`; the name encoding lives only in
/// `to_trash_path` and `parse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashPath {
    pub original: String,
    pub ticket: Ticket,
}

impl TrashPath {
    pub fn new(original: &str, ticket: Ticket) -> Self {
        TrashPath {
            original: original.to_string(),
            ticket,
        }
    }

    pub fn to_trash_path(&self) -> String {
        let dir = path::parent(&self.original).unwrap_or(path::ROOT);
        let (stem, ext) = path::split_ext(path::file_name(&self.original));
        let name = format!("{stem}.{}{ext}", self.ticket);
        format!("{TRASH_ROOT}{}", path::join(dir, &name))
    }

    /// Recover the original path and ticket from a path under the trash root.
    ///
    /// Returns `None` when the path is outside the trash or carries no
    /// decodable ticket.
    pub fn parse(trash_path: &str) -> Option<Self> {
        let rel = trash_path.strip_prefix(TRASH_ROOT)?;
        if !rel.starts_with('/') {
            return None;
        }
        let dir = path::parent(rel).unwrap_or(path::ROOT);
        let (stem, ext) = path::split_ext(path::file_name(rel));

        // name.<ticket>.ext
        if let Some(i) = stem.rfind('.') {
            if let Ok(t) = stem[i + 1..].parse::<u64>() {
                let name = format!("{}{ext}", &stem[..i]);
                return Some(TrashPath {
                    original: path::join(dir, &name),
                    ticket: Ticket(t),
                });
            }
        }
        // name.<ticket> for files that had no extension
        let t = ext.strip_prefix('.')?.parse::<u64>().ok()?;
        if stem.is_empty() {
            return None;
        }
        Some(TrashPath {
            original: path::join(dir, stem),
            ticket: Ticket(t),
        })
    }
}

/// Result of one sweep over the trash root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub purged: usize,
    pub retained: usize,
    pub failed: usize,
}

pub struct Trash {
    backend: Arc<LocalBackend>,
    cache: Arc<PathCache>,
    clock: TicketClock,
    enabled: bool,
}

impl Trash {
    pub fn new(backend: Arc<LocalBackend>, cache: Arc<PathCache>, enabled: bool) -> Self {
        Trash {
            backend,
            cache,
            clock: TicketClock::new(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_trashed(logical: &str) -> bool {
        path::is_within(logical, TRASH_ROOT)
    }

    /// Move a file into the trash, or delete it outright when the trash is
    /// disabled or the file is already in it.
    ///
    /// Returns the trash path the file now lives at, if it was moved. The
    /// caller owns cache invalidation.
    pub async fn soft_delete(&self, logical: &str) -> FbedResult<Option<String>> {
        if !self.enabled || Self::is_trashed(logical) {
            self.backend.delete(logical).await?;
            debug!(path = %logical, "hard deleted");
            return Ok(None);
        }

        let target = TrashPath::new(logical, self.clock.next()).to_trash_path();
        match self.backend.move_file(logical, &target).await {
            Ok(()) => {
                info!(path = %logical, trash = %target, "moved to trash");
                Ok(Some(target))
            }
            Err(e) => {
                warn!(path = %logical, error = %e, "move to trash failed");
                let stranded = matches!(self.backend.stat(&target).await, Ok(Some(_)))
                    && matches!(self.backend.stat(logical).await, Ok(None));
                if stranded {
                    if let Err(back) = self.backend.move_file(&target, logical).await {
                        warn!(path = %logical, error = %back, "move back from trash failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// Purge trashed files older than `retention`. Files whose ticket cannot
    /// be decoded are purged regardless of age.
    pub async fn sweep(&self, retention: Duration, now: SystemTime) -> FbedResult<SweepReport> {
        let mut report = SweepReport::default();
        let files = self.backend.walk_files(TRASH_ROOT).await?;
        let mut purged = Vec::new();

        for file in files {
            report.scanned += 1;
            let expired = match TrashPath::parse(&file) {
                Some(tp) => tp.ticket.age(now) > retention,
                None => {
                    warn!(path = %file, "undecodable trash ticket, purging");
                    true
                }
            };
            if !expired {
                report.retained += 1;
                continue;
            }
            match self.backend.delete(&file).await {
                Ok(()) => {
                    report.purged += 1;
                    purged.push(file);
                }
                Err(e) => {
                    warn!(path = %file, error = %e, "trash purge failed");
                    report.failed += 1;
                }
            }
        }

        if !purged.is_empty() {
            self.cache.invalidate_ancestors(&purged);
        }
        info!(
            scanned = report.scanned,
            purged = report.purged,
            retained = report.retained,
            failed = report.failed,
            "trash sweep finished"
        );
        Ok(report)
    }
}
