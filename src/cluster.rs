//! Simulated cluster for tests.
//!
//! Replicas exchange envelopes through an in-memory queue with broadcast
//! fan-out, mirroring the control-plane router: `dst == "FFFF"` reaches
//! every replica except the sender, and anything addressed to a non-replica
//! id is captured as a client reply for assertions.

use std::collections::VecDeque;

use crate::effect::Effect;
use crate::message::{Body, Envelope};
use crate::replica::{Replica, Role};
use crate::types::ReplicaId;

pub struct Cluster {
    replicas: Vec<Replica>,
    in_flight: VecDeque<Envelope>,
    client_replies: Vec<Envelope>,
}

impl Cluster {
    /// Replica ids follow the control plane's zero-padded convention:
    /// `"0000"`, `"0001"`, ...
    pub fn new(size: usize) -> Self {
        let ids: Vec<ReplicaId> = (0..size).map(|i| ReplicaId::new(format!("{i:04}"))).collect();
        let replicas = ids
            .iter()
            .map(|id| {
                let peers = ids.iter().filter(|peer| *peer != id).cloned().collect();
                Replica::new(id.clone(), peers)
            })
            .collect();

        Self { replicas, in_flight: VecDeque::new(), client_replies: Vec::new() }
    }

    pub fn replica(&self, index: usize) -> &Replica {
        &self.replicas[index]
    }

    /// Fire the election timer on one replica.
    pub fn election_timeout(&mut self, index: usize) {
        let effects = self.replicas[index].election_timeout();
        self.queue(effects);
    }

    /// Fire the heartbeat timer on one replica.
    pub fn heartbeat(&mut self, index: usize) {
        let effects = self.replicas[index].heartbeat();
        self.queue(effects);
    }

    /// Time out one replica and let the election play out.
    pub fn elect(&mut self, index: usize) {
        self.election_timeout(index);
        self.deliver_all();
    }

    /// Inject a client request addressed to one replica.
    pub fn client_send(&mut self, client: &str, index: usize, body: Body) {
        self.in_flight.push_back(Envelope {
            src: ReplicaId::from(client),
            dst: self.replicas[index].id().clone(),
            leader: ReplicaId::broadcast(),
            body,
        });
    }

    /// Deliver queued messages until the network is quiet.
    pub fn deliver_all(&mut self) {
        self.deliver_all_except(&[]);
    }

    /// Deliver queued messages, dropping everything sent by or addressed to
    /// the replicas in `down` (including their share of broadcasts). This
    /// stands in for a partition.
    pub fn deliver_all_except(&mut self, down: &[usize]) {
        let down_ids: Vec<ReplicaId> =
            down.iter().map(|&index| self.replicas[index].id().clone()).collect();

        while let Some(envelope) = self.in_flight.pop_front() {
            if down_ids.contains(&envelope.src) {
                continue;
            }
            if envelope.dst.is_broadcast() {
                for index in 0..self.replicas.len() {
                    let id = self.replicas[index].id().clone();
                    if id != envelope.src && !down_ids.contains(&id) {
                        let effects = self.replicas[index].handle(envelope.clone());
                        self.queue(effects);
                    }
                }
            } else if down_ids.contains(&envelope.dst) {
                continue;
            } else if let Some(index) = self.index_of(&envelope.dst) {
                let effects = self.replicas[index].handle(envelope);
                self.queue(effects);
            } else {
                self.client_replies.push(envelope);
            }
        }
    }

    /// Index of the current leader, if exactly one replica leads.
    pub fn leader(&self) -> Option<usize> {
        self.replicas.iter().position(Replica::is_leader)
    }

    /// Count replicas in each role: (followers, candidates, leaders).
    pub fn role_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for replica in &self.replicas {
            match replica.role() {
                Role::Follower => counts.0 += 1,
                Role::Candidate(_) => counts.1 += 1,
                Role::Leader(_) => counts.2 += 1,
            }
        }
        counts
    }

    /// Replies captured for non-replica (client) destinations since the
    /// last call.
    pub fn take_client_replies(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.client_replies)
    }

    fn queue(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            if let Effect::Send(envelope) = effect {
                self.in_flight.push_back(envelope);
            }
        }
    }

    fn index_of(&self, id: &ReplicaId) -> Option<usize> {
        self.replicas.iter().position(|replica| replica.id() == id)
    }
}
