//! In-memory key/value state machine.

use std::collections::HashMap;

use crate::message::Write;

/// The materialized store.
///
/// Populated only by applying committed log entries in log order. On the
/// wire a missing key reads as the empty string; callers decide how to
/// render `None`.
#[derive(Clone, Debug, Default)]
pub struct KvStore {
    data: HashMap<String, String>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed write. Last write wins per key.
    pub fn apply(&mut self, write: &Write) {
        self.data.insert(write.key.clone(), write.value.clone());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
