//! Per-role volatile state.

use std::collections::HashMap;

use crate::types::ReplicaId;

/// Candidate state: the votes gathered so far, self-vote included.
///
/// Voter ids are recorded rather than counted so a duplicated datagram
/// cannot tally twice.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub votes_received: Vec<ReplicaId>,
}

impl Candidate {
    pub fn new(own_id: ReplicaId) -> Self {
        Self { votes_received: vec![own_id] }
    }

    /// Record a granted vote and return the tally.
    pub fn record_vote(&mut self, from: ReplicaId) -> usize {
        if !self.votes_received.contains(&from) {
            self.votes_received.push(from);
        }
        self.votes_received.len()
    }
}

/// Leader state: per-peer replication tables plus the reply registrations
/// for writes this leader accepted and has not yet committed.
#[derive(Clone, Debug)]
pub struct Leader {
    /// Length of the log prefix assumed already on each peer; the next
    /// AppendEntry for the peer starts here.
    pub next_index: HashMap<ReplicaId, usize>,
    /// Longest log prefix each peer has acknowledged.
    pub match_index: HashMap<ReplicaId, usize>,
    /// Log position of an accepted `put` -> the (client, MID) owed an `ok`
    /// once that position commits. Dropped wholesale on step-down.
    pub replies: HashMap<usize, (ReplicaId, String)>,
}

impl Leader {
    /// Fresh tables at election time: assume every peer already matches our
    /// log and let failed appends walk the assumption back.
    pub fn new(peers: &[ReplicaId], log_len: usize) -> Self {
        Self {
            next_index: peers.iter().map(|p| (p.clone(), log_len)).collect(),
            match_index: peers.iter().map(|p| (p.clone(), 0)).collect(),
            replies: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_votes_count_once() {
        let mut candidate = Candidate::new(ReplicaId::from("0000"));

        assert_eq!(candidate.record_vote(ReplicaId::from("0001")), 2);
        assert_eq!(candidate.record_vote(ReplicaId::from("0001")), 2);
        assert_eq!(candidate.record_vote(ReplicaId::from("0002")), 3);
    }

    #[test]
    fn leader_tables_start_optimistic() {
        let peers = vec![ReplicaId::from("0001"), ReplicaId::from("0002")];
        let leader = Leader::new(&peers, 4);

        assert_eq!(leader.next_index[&peers[0]], 4);
        assert_eq!(leader.match_index[&peers[0]], 0);
        assert!(leader.replies.is_empty());
    }
}
