//! The Raft replica state machine.
//!
//! A pure state machine: inbound envelopes and timer events go in, outbound
//! envelopes and timer effects come out. No I/O happens here, which is what
//! lets [`crate::cluster`] run whole elections and commits without a socket.
//!
//! Based on "In Search of an Understandable Consensus Algorithm" (Ongaro &
//! Ousterhout); section references in comments point at the paper.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::effect::Effect;
use crate::kv::KvStore;
use crate::log::Log;
use crate::message::{Body, Entry, Envelope, Write};
use crate::state::{Candidate, Leader};
use crate::types::{ReplicaId, Term};

/// Most entries a single AppendEntry will carry. Peers further behind whose
/// prefix is still unconfirmed get an empty probe instead, so walk-back
/// traffic stays one datagram wide.
pub const MAX_BATCH: usize = 80;

/// Server role. Role-specific tables live in the variant payloads.
#[derive(Clone, Debug)]
pub enum Role {
    Follower,
    Candidate(Candidate),
    Leader(Leader),
}

/// A client request parked while no leader is known.
#[derive(Clone, Debug)]
struct PendingRequest {
    client: ReplicaId,
    mid: String,
}

/// One replica of the key/value store.
pub struct Replica {
    id: ReplicaId,
    peers: Vec<ReplicaId>,
    /// Election epoch; never decreases.
    term: Term,
    /// Candidate granted our vote this term, at most one per term.
    voted_for: Option<ReplicaId>,
    log: Log,
    kv: KvStore,
    /// Length of the committed, applied log prefix.
    commit_index: usize,
    /// Believed leader, broadcast when none is known.
    current_leader: ReplicaId,
    role: Role,
    /// Client requests held until a leader is known, drained as redirects.
    pending: VecDeque<PendingRequest>,
}

impl Replica {
    /// A fresh replica: follower at term 0, no known leader.
    pub fn new(id: ReplicaId, peers: Vec<ReplicaId>) -> Self {
        Self {
            id,
            peers,
            term: Term::ZERO,
            voted_for: None,
            log: Log::new(),
            kv: KvStore::new(),
            commit_index: 0,
            current_leader: ReplicaId::broadcast(),
            role: Role::Follower,
            pending: VecDeque::new(),
        }
    }

    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader(_))
    }

    pub fn current_leader(&self) -> &ReplicaId {
        &self.current_leader
    }

    pub fn commit_index(&self) -> usize {
        self.commit_index
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// Quorum size for this cluster, self included.
    fn majority(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    fn envelope(&self, dst: ReplicaId, body: Body) -> Envelope {
        Envelope {
            src: self.id.clone(),
            dst,
            leader: self.current_leader.clone(),
            body,
        }
    }

    /// The boot announcement, broadcast once at startup.
    pub fn hello(&self) -> Envelope {
        self.envelope(ReplicaId::broadcast(), Body::Hello)
    }

    /// Dispatch one inbound message.
    pub fn handle(&mut self, envelope: Envelope) -> Vec<Effect> {
        let Envelope { src, leader, body, .. } = envelope;
        match body {
            Body::Get { key, mid } => self.handle_get(src, key, mid),
            Body::Put { key, value, mid } => self.handle_put(src, key, value, mid),
            Body::Update { term, commitlength } => {
                self.handle_update(src, leader, term, commitlength)
            }
            Body::VoteRequest { newterm, votedfor, last_index, last_term } => {
                self.handle_vote_request(src, newterm, votedfor, last_index, last_term)
            }
            Body::VoteResponse { term, granted } => self.handle_vote_response(src, term, granted),
            Body::AppendEntry { term, commitlength, entries, last_index, last_term, .. } => {
                self.handle_append_entry(src, leader, term, commitlength, entries, last_index, last_term)
            }
            Body::AppendEntryResponse { term, success, loglength } => {
                self.handle_append_response(src, term, success, loglength)
            }
            Body::Hello | Body::Ok { .. } | Body::Redirect { .. } | Body::Fail { .. } => {
                debug!(from = %src, "ignoring stray message");
                Vec::new()
            }
        }
    }

    // ---- election (§5.2) ----

    /// The election timer fired. Leaders only re-arm it; everyone else
    /// campaigns.
    pub fn election_timeout(&mut self) -> Vec<Effect> {
        match self.role {
            Role::Leader(_) => vec![Effect::ResetElectionTimer],
            Role::Follower | Role::Candidate(_) => self.start_election(),
        }
    }

    fn start_election(&mut self) -> Vec<Effect> {
        self.term = self.term.increment();
        self.voted_for = Some(self.id.clone());
        // Campaigning implies the old leader has gone quiet; new client
        // requests queue until this election resolves.
        self.current_leader = ReplicaId::broadcast();
        self.role = Role::Candidate(Candidate::new(self.id.clone()));
        info!(term = %self.term, "election timeout, becoming candidate");

        let request = Body::VoteRequest {
            newterm: self.term,
            votedfor: self.id.clone(),
            last_index: self.log.len(),
            last_term: self.log.last_term(),
        };
        let mut effects = vec![
            Effect::Send(self.envelope(ReplicaId::broadcast(), request)),
            Effect::ResetElectionTimer,
        ];
        // A cluster of one wins on its own vote.
        if 1 >= self.majority() {
            effects.extend(self.become_leader());
        }
        effects
    }

    fn handle_vote_request(
        &mut self,
        src: ReplicaId,
        newterm: Term,
        candidate: ReplicaId,
        last_index: usize,
        last_term: Option<Term>,
    ) -> Vec<Effect> {
        let mut reset_timer = false;
        if newterm > self.term {
            self.step_down(newterm);
            reset_timer = true;
        }

        let granted = newterm == self.term
            && self.voted_for.as_ref().map_or(true, |voted| *voted == candidate)
            && self.log_up_to_date(last_index, last_term);
        if granted {
            self.voted_for = Some(candidate.clone());
            reset_timer = true;
            debug!(candidate = %candidate, term = %self.term, "vote granted");
        }

        let mut effects = Vec::new();
        if reset_timer {
            effects.push(Effect::ResetElectionTimer);
        }
        effects.push(Effect::Send(
            self.envelope(src, Body::VoteResponse { term: self.term, granted }),
        ));
        effects
    }

    /// Is a candidate log described by `(last_index, last_term)` at least as
    /// up to date as ours? (§5.4.1.)
    fn log_up_to_date(&self, last_index: usize, last_term: Option<Term>) -> bool {
        let ours = self.log.last_term().unwrap_or(Term::ZERO);
        let theirs = last_term.unwrap_or(Term::ZERO);
        theirs > ours || (theirs == ours && last_index >= self.log.len())
    }

    fn handle_vote_response(&mut self, src: ReplicaId, term: Term, granted: bool) -> Vec<Effect> {
        if term > self.term {
            self.step_down(term);
            return vec![Effect::ResetElectionTimer];
        }

        // Vote traffic counts as cluster activity either way.
        let mut effects = vec![Effect::ResetElectionTimer];
        if !granted || term != self.term {
            return effects;
        }
        let Role::Candidate(candidate) = &mut self.role else {
            return effects;
        };
        let votes = candidate.record_vote(src);
        if votes >= self.majority() {
            effects.extend(self.become_leader());
        }
        effects
    }

    fn become_leader(&mut self) -> Vec<Effect> {
        info!(term = %self.term, log = self.log.len(), "won election, becoming leader");
        self.current_leader = self.id.clone();
        self.role = Role::Leader(Leader::new(&self.peers, self.log.len()));

        let announce = Body::Update { term: self.term, commitlength: self.commit_index };
        let mut effects = vec![
            Effect::Send(self.envelope(ReplicaId::broadcast(), announce)),
            Effect::ResetHeartbeatTimer,
        ];
        // Requests queued during the election now have somewhere to go: us.
        effects.extend(self.drain_pending());
        effects
    }

    /// Observed a higher term: fall back to follower and forget the vote.
    fn step_down(&mut self, term: Term) {
        if self.is_leader() {
            info!(old_term = %self.term, new_term = %term, "stepping down");
        }
        self.term = term;
        self.voted_for = None;
        self.current_leader = ReplicaId::broadcast();
        self.role = Role::Follower;
    }

    // ---- replication, leader side (§5.3) ----

    /// Periodic heartbeat: assert leadership and advertise the commit
    /// frontier.
    pub fn heartbeat(&mut self) -> Vec<Effect> {
        if !self.is_leader() {
            return Vec::new();
        }
        let body = Body::Update { term: self.term, commitlength: self.commit_index };
        vec![
            Effect::Send(self.envelope(ReplicaId::broadcast(), body)),
            Effect::ResetHeartbeatTimer,
        ]
    }

    /// One AppendEntry per peer, each built from that peer's next_index.
    fn broadcast_append(&self) -> Vec<Effect> {
        let Role::Leader(leader) = &self.role else {
            return Vec::new();
        };
        self.peers
            .iter()
            .map(|peer| Effect::Send(self.append_for(leader, peer)))
            .collect()
    }

    /// Build the AppendEntry for one peer.
    ///
    /// Far-behind peers whose prefix is unconfirmed get an empty probe so a
    /// walk-back never ships entries it may have to ship again; once the
    /// prefix is confirmed the suffix streams in batches of [`MAX_BATCH`].
    fn append_for(&self, leader: &Leader, peer: &ReplicaId) -> Envelope {
        let next = leader.next_index.get(peer).copied().unwrap_or(0);
        let matched = leader.match_index.get(peer).copied().unwrap_or(0);
        let behind = self.log.len().saturating_sub(next);
        let entries = if behind > MAX_BATCH {
            if matched < next {
                Vec::new()
            } else {
                self.log.range(next, next + MAX_BATCH)
            }
        } else {
            self.log.suffix(next)
        };

        let body = Body::AppendEntry {
            term: self.term,
            commitlength: self.commit_index,
            entries,
            last_index: next,
            last_term: if next > 0 { self.log.term_at(next - 1) } else { None },
            kvstorelen: self.kv.len(),
        };
        self.envelope(peer.clone(), body)
    }

    fn handle_append_response(
        &mut self,
        src: ReplicaId,
        term: Term,
        success: bool,
        loglength: Option<usize>,
    ) -> Vec<Effect> {
        if term > self.term {
            self.step_down(term);
            return vec![Effect::ResetElectionTimer];
        }
        if !self.is_leader() || term != self.term {
            return Vec::new();
        }

        if success {
            let acked = loglength.unwrap_or(0);
            if let Role::Leader(leader) = &mut self.role {
                leader.match_index.insert(src.clone(), acked);
                leader.next_index.insert(src.clone(), acked);
            }
            let mut effects = self.commit_advance();
            // Capped batch or probe: keep feeding until the peer is caught up.
            if let Role::Leader(leader) = &self.role {
                if leader.next_index.get(&src).copied().unwrap_or(0) < self.log.len() {
                    effects.push(Effect::Send(self.append_for(leader, &src)));
                }
            }
            effects
        } else {
            // Prefix mismatch: walk one entry back and retry (§5.3).
            if let Role::Leader(leader) = &mut self.role {
                let next = leader.next_index.entry(src.clone()).or_insert(0);
                *next = next.saturating_sub(1);
            }
            let Role::Leader(leader) = &self.role else {
                return Vec::new();
            };
            vec![Effect::Send(self.append_for(leader, &src))]
        }
    }

    /// Advance the commit frontier to the furthest majority-replicated
    /// index, provided the frontier entry is from the current term (§5.4.2:
    /// earlier-term entries commit only underneath a current-term one).
    fn commit_advance(&mut self) -> Vec<Effect> {
        let majority = self.majority();
        let frontier = {
            let Role::Leader(leader) = &self.role else {
                return Vec::new();
            };
            let mut frontier = self.commit_index;
            while frontier < self.log.len() {
                // Holders of the entry at `frontier`: us plus every peer
                // whose acknowledged prefix covers it.
                let holders = 1 + self
                    .peers
                    .iter()
                    .filter(|peer| leader.match_index.get(*peer).copied().unwrap_or(0) > frontier)
                    .count();
                if holders < majority {
                    break;
                }
                frontier += 1;
            }
            frontier
        };

        if frontier == self.commit_index || self.log.term_at(frontier - 1) != Some(self.term) {
            return Vec::new();
        }

        let mut acks = Vec::new();
        while self.commit_index < frontier {
            let position = self.commit_index;
            if let Some(entry) = self.log.get(position) {
                self.kv.apply(&entry.write);
            }
            self.commit_index += 1;
            if let Role::Leader(leader) = &mut self.role {
                if let Some((client, mid)) = leader.replies.remove(&position) {
                    acks.push((client, mid));
                }
            }
        }
        debug!(commit = self.commit_index, "commit frontier advanced");

        acks.into_iter()
            .map(|(client, mid)| {
                Effect::Send(self.envelope(client, Body::Ok { mid, value: None }))
            })
            .collect()
    }

    // ---- replication, follower side (§5.3) ----

    #[allow(clippy::too_many_arguments)]
    fn handle_append_entry(
        &mut self,
        src: ReplicaId,
        leader_id: ReplicaId,
        term: Term,
        commitlength: usize,
        entries: Vec<Entry>,
        last_index: usize,
        last_term: Option<Term>,
    ) -> Vec<Effect> {
        if term < self.term {
            return vec![Effect::Send(self.reject_append(src))];
        }

        if term > self.term {
            self.step_down(term);
        }
        self.role = Role::Follower;
        let mut effects = vec![Effect::ResetElectionTimer];
        effects.extend(self.learn_leader(leader_id));

        // Prefix agreement: we must hold the leader's assumed prefix, and
        // its final entry must carry the expected term.
        let prefix_ok = self.log.len() >= last_index
            && (last_index == 0 || self.log.term_at(last_index - 1) == last_term);
        if !prefix_ok {
            debug!(
                last_index,
                log = self.log.len(),
                "append rejected, prefix mismatch"
            );
            effects.push(Effect::Send(self.reject_append(src)));
            return effects;
        }

        self.log.reconcile(last_index, &entries);
        self.apply_up_to(commitlength);

        effects.push(Effect::Send(self.envelope(
            src,
            Body::AppendEntryResponse {
                term: self.term,
                success: true,
                loglength: Some(self.log.len()),
            },
        )));
        effects
    }

    fn reject_append(&self, dst: ReplicaId) -> Envelope {
        self.envelope(
            dst,
            Body::AppendEntryResponse { term: self.term, success: false, loglength: None },
        )
    }

    fn handle_update(
        &mut self,
        src: ReplicaId,
        leader_id: ReplicaId,
        term: Term,
        commitlength: usize,
    ) -> Vec<Effect> {
        if term < self.term {
            // Stale leader: tell it about the newer term so it steps down.
            return vec![Effect::Send(self.reject_append(src))];
        }
        if term > self.term {
            self.step_down(term);
        } else if self.is_leader() {
            // A same-term update from another leader would break election
            // safety; nothing sane to do but drop it.
            return Vec::new();
        }
        self.role = Role::Follower;

        let mut effects = vec![Effect::ResetElectionTimer];
        effects.extend(self.learn_leader(leader_id));

        // Heartbeats let a quiet cluster finish committing, but only when
        // our tail provably came from this leader: a last entry in the
        // leader's term means our whole log is a prefix of its log.
        if self.log.last_term() == Some(term) {
            self.apply_up_to(commitlength);
        }
        effects
    }

    /// Advance the local commit frontier toward `target`, applying entries
    /// in log order, bounded by our own log length.
    fn apply_up_to(&mut self, target: usize) {
        while self.commit_index < target && self.commit_index < self.log.len() {
            if let Some(entry) = self.log.get(self.commit_index) {
                self.kv.apply(&entry.write);
            }
            self.commit_index += 1;
        }
    }

    /// Adopt a leader; any requests parked while none was known get their
    /// redirect now.
    fn learn_leader(&mut self, leader_id: ReplicaId) -> Vec<Effect> {
        if self.current_leader != leader_id && !leader_id.is_broadcast() {
            info!(leader = %leader_id, term = %self.term, "following leader");
        }
        self.current_leader = leader_id;
        if self.current_leader.is_broadcast() {
            Vec::new()
        } else {
            self.drain_pending()
        }
    }

    // ---- client interface ----

    fn handle_get(&mut self, client: ReplicaId, key: String, mid: String) -> Vec<Effect> {
        if self.is_leader() {
            // Leader-local read, no lease: a deposed leader that has not yet
            // seen the higher term can serve a stale value.
            let value = self.kv.get(&key).unwrap_or("").to_owned();
            return vec![Effect::Send(
                self.envelope(client, Body::Ok { mid, value: Some(value) }),
            )];
        }
        self.relay(client, mid)
    }

    fn handle_put(
        &mut self,
        client: ReplicaId,
        key: String,
        value: String,
        mid: String,
    ) -> Vec<Effect> {
        if !self.is_leader() {
            return self.relay(client, mid);
        }

        // Retransmission? The same (client, MID) must not occupy two slots.
        if let Some(position) = self.log.find_write(&client, &mid) {
            if position < self.commit_index {
                return vec![Effect::Send(self.envelope(client, Body::Ok { mid, value: None }))];
            }
            if let Role::Leader(leader) = &mut self.role {
                leader.replies.insert(position, (client, mid));
            }
            return self.broadcast_append();
        }

        let write = Write { key, value, client: client.clone(), mid: mid.clone() };
        self.log.append(Entry { write, term: self.term });
        let position = self.log.len() - 1;
        if let Role::Leader(leader) = &mut self.role {
            leader.replies.insert(position, (client, mid));
        }
        debug!(index = self.log.len(), term = %self.term, "accepted put");
        self.broadcast_append()
    }

    /// Non-leader handling shared by `get` and `put`: redirect when a leader
    /// is known, otherwise park the request until one is.
    fn relay(&mut self, client: ReplicaId, mid: String) -> Vec<Effect> {
        if self.current_leader.is_broadcast() {
            self.pending.push_back(PendingRequest { client, mid });
            Vec::new()
        } else {
            vec![Effect::Send(self.envelope(client, Body::Redirect { mid }))]
        }
    }

    fn drain_pending(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        while let Some(request) = self.pending.pop_front() {
            effects.push(Effect::Send(
                self.envelope(request.client, Body::Redirect { mid: request.mid }),
            ));
        }
        effects
    }
}
