//! Global set of identities already published by the crawl

use std::collections::HashSet;
use std::sync::Mutex;

/// Concurrency-safe, append-only set of dedup keys
///
/// Shared by every fetch worker. The check and the insert happen under one
/// lock so two workers racing on the same identity cannot both publish it.
#[derive(Debug, Default)]
pub struct SeenSet {
    keys: Mutex<HashSet<String>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `key` and returns true if it was not present before
    pub fn insert_if_new(&self, key: &str) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if keys.contains(key) {
            false
        } else {
            keys.insert(key.to_string())
        }
    }

    pub fn len(&self) -> usize {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
