//! Bounded in-memory cache of per-frame result documents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mhr_core::mhr::ResultDocument;

/// Per-frame document cache keyed by file name.
///
/// Once the cap is reached, new entries are simply not inserted; nothing is
/// evicted. The cap bounds worst-case memory while a client scrubs through
/// a long video. A new job invalidates everything via [`clear`](Self::clear).
pub struct FrameCache {
    cap: usize,
    entries: Mutex<HashMap<String, Arc<ResultDocument>>>,
}

impl FrameCache {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, file_name: &str) -> Option<Arc<ResultDocument>> {
        self.entries
            .lock()
            .expect("frame cache lock poisoned")
            .get(file_name)
            .cloned()
    }

    /// Insert unless the cache is already at capacity.
    pub fn insert(&self, file_name: String, document: Arc<ResultDocument>) {
        let mut entries = self.entries.lock().expect("frame cache lock poisoned");
        if entries.len() < self.cap || entries.contains_key(&file_name) {
            entries.insert(file_name, document);
        }
    }

    /// Drop every entry. Called when a new job starts so stale frames from
    /// the previous result set can never be served.
    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("frame cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("frame cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
