//! Bounded newest-first list of recently stored files. Not persisted.

use fbed_core::Entry;
use parking_lot::Mutex;

pub struct RecentFiles {
    capacity: usize,
    entries: Mutex<Vec<Entry>>,
}

impl RecentFiles {
    pub fn new(capacity: usize) -> Self {
        RecentFiles {
            capacity,
            entries: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Put `entry` at the front, dropping the oldest once full.
    pub fn push(&self, entry: Entry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() < self.capacity {
            entries.insert(0, entry);
        } else {
            entries.rotate_right(1);
            entries[0] = entry;
        }
    }

    /// Copy of the current contents, newest first.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
