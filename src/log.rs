//! The replicated log.
//!
//! Entries are 1-indexed on the wire: an index of `n` names the prefix of
//! length `n`, so index 0 means "before the first entry". Internally the
//! log is a plain vector addressed by 0-based position.

use crate::message::Entry;
use crate::types::{ReplicaId, Term};

/// Ordered sequence of `(write, term)` entries.
#[derive(Clone, Debug, Default)]
pub struct Log {
    entries: Vec<Entry>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Term of the final entry, `None` when the log is empty.
    pub fn last_term(&self) -> Option<Term> {
        self.entries.last().map(|entry| entry.term)
    }

    pub fn get(&self, position: usize) -> Option<&Entry> {
        self.entries.get(position)
    }

    pub fn term_at(&self, position: usize) -> Option<Term> {
        self.entries.get(position).map(|entry| entry.term)
    }

    pub fn append(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Entries in `[from, to)`, clamped to the log's length.
    pub fn range(&self, from: usize, to: usize) -> Vec<Entry> {
        let to = to.min(self.entries.len());
        self.entries.get(from..to).unwrap_or_default().to_vec()
    }

    /// All entries from `from` onward.
    pub fn suffix(&self, from: usize) -> Vec<Entry> {
        self.range(from, self.entries.len())
    }

    /// Position of the entry carrying this client's request id, if present.
    pub fn find_write(&self, client: &ReplicaId, mid: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.write.client == *client && entry.write.mid == mid)
    }

    /// Merge a leader's suffix starting at the agreed prefix of length
    /// `expected_index`.
    ///
    /// Callers must have verified prefix agreement at `expected_index`. If
    /// the local log extends past that point and its overlap with `incoming`
    /// disagrees in term, the divergent local suffix is discarded; entries
    /// already present are kept and the remainder of `incoming` is appended.
    pub fn reconcile(&mut self, expected_index: usize, incoming: &[Entry]) {
        if self.entries.len() > expected_index && !incoming.is_empty() {
            // Compare terms at the last position both sides cover.
            let last_common = self.entries.len().min(expected_index + incoming.len()) - 1;
            if self.entries[last_common].term != incoming[last_common - expected_index].term {
                self.entries.truncate(expected_index);
            }
        }

        let already_present = self.entries.len().saturating_sub(expected_index);
        for entry in incoming.iter().skip(already_present) {
            self.entries.push(entry.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Write;

    fn entry(key: &str, term: u64) -> Entry {
        Entry {
            write: Write {
                key: key.to_owned(),
                value: format!("{key}-value"),
                client: ReplicaId::from("cafe"),
                mid: format!("mid-{key}-{term}"),
            },
            term: Term::from(term),
        }
    }

    fn log_of(entries: &[Entry]) -> Log {
        let mut log = Log::new();
        for e in entries {
            log.append(e.clone());
        }
        log
    }

    #[test]
    fn reconcile_extends_an_empty_log() {
        let mut log = Log::new();
        log.reconcile(0, &[entry("a", 1), entry("b", 1)]);

        assert_eq!(log.len(), 2);
        assert_eq!(log.term_at(1), Some(Term::from(1)));
    }

    #[test]
    fn reconcile_is_idempotent_for_entries_already_present() {
        let entries = [entry("a", 1), entry("b", 1)];
        let mut log = log_of(&entries);

        log.reconcile(0, &entries);

        assert_eq!(log.len(), 2);
        assert_eq!(log.get(0).unwrap().write.key, "a");
        assert_eq!(log.get(1).unwrap().write.key, "b");
    }

    #[test]
    fn reconcile_truncates_a_divergent_suffix() {
        // Local holds an uncommitted entry at position 2 from an old term.
        let mut log = log_of(&[entry("a", 1), entry("b", 1), entry("stale", 1)]);

        log.reconcile(2, &[entry("c", 2), entry("d", 2)]);

        assert_eq!(log.len(), 4);
        assert_eq!(log.get(2).unwrap().write.key, "c");
        assert_eq!(log.get(3).unwrap().write.key, "d");
        assert_eq!(log.term_at(2), Some(Term::from(2)));
    }

    #[test]
    fn reconcile_keeps_a_longer_matching_local_log() {
        // Follower is ahead of the batch the leader happened to send; the
        // matching overlap must not be cut back.
        let mut log = log_of(&[entry("a", 1), entry("b", 1), entry("c", 1)]);

        log.reconcile(0, &[entry("a", 1), entry("b", 1)]);

        assert_eq!(log.len(), 3);
        assert_eq!(log.get(2).unwrap().write.key, "c");
    }

    #[test]
    fn find_write_matches_client_and_mid() {
        let log = log_of(&[entry("a", 1), entry("b", 1)]);

        assert_eq!(log.find_write(&ReplicaId::from("cafe"), "mid-b-1"), Some(1));
        assert_eq!(log.find_write(&ReplicaId::from("cafe"), "unknown"), None);
        assert_eq!(log.find_write(&ReplicaId::from("beef"), "mid-b-1"), None);
    }

    #[test]
    fn range_clamps_to_length() {
        let log = log_of(&[entry("a", 1), entry("b", 1)]);

        assert_eq!(log.range(1, 10).len(), 1);
        assert!(log.range(5, 10).is_empty());
        assert_eq!(log.suffix(0).len(), 2);
    }
}
