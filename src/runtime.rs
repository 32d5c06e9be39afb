//! Timer management around the replica state machine.
//!
//! The runtime owns the two deadlines the event loop waits on and absorbs
//! the replica's timer effects; sends are passed back to the caller.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::effect::Effect;
use crate::message::Envelope;
use crate::replica::Replica;

/// Events that drive the runtime.
pub enum Event {
    ElectionTimeout,
    HeartbeatTimeout,
    Message(Envelope),
}

/// Timer configuration.
#[derive(Clone, Copy, Debug)]
pub struct TimerConfig {
    /// The election timeout is re-sampled uniformly from this range on each
    /// reset. The low end must stay well above the heartbeat interval.
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(100),
        }
    }
}

/// Wraps a [`Replica`] with deadline bookkeeping.
pub struct Runtime {
    replica: Replica,
    config: TimerConfig,
    election_deadline: Instant,
    heartbeat_deadline: Instant,
}

impl Runtime {
    pub fn new(replica: Replica, config: TimerConfig) -> Self {
        let now = Instant::now();
        let mut runtime = Self {
            replica,
            config,
            election_deadline: now,
            heartbeat_deadline: now + config.heartbeat_interval,
        };
        runtime.reset_election_timer();
        runtime
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Process one event. Timer effects are absorbed here; outbound
    /// envelopes are returned for the caller to put on the wire.
    pub fn handle(&mut self, event: Event) -> Vec<Envelope> {
        let effects = match event {
            Event::ElectionTimeout => self.replica.election_timeout(),
            Event::HeartbeatTimeout => self.replica.heartbeat(),
            Event::Message(envelope) => self.replica.handle(envelope),
        };

        let mut outbound = Vec::new();
        for effect in effects {
            match effect {
                Effect::Send(envelope) => outbound.push(envelope),
                Effect::ResetElectionTimer => self.reset_election_timer(),
                Effect::ResetHeartbeatTimer => {
                    self.heartbeat_deadline = Instant::now() + self.config.heartbeat_interval;
                }
            }
        }
        outbound
    }

    /// Which timer, if any, has fired. Leaders only tick heartbeats; their
    /// election deadline is left stale on purpose and re-armed at step-down.
    pub fn poll_timers(&self) -> Option<Event> {
        let now = Instant::now();
        if self.replica.is_leader() {
            if now >= self.heartbeat_deadline {
                return Some(Event::HeartbeatTimeout);
            }
        } else if now >= self.election_deadline {
            return Some(Event::ElectionTimeout);
        }
        None
    }

    /// The instant the event loop must wake at even if nothing arrives.
    pub fn next_deadline(&self) -> Instant {
        if self.replica.is_leader() {
            self.heartbeat_deadline
        } else {
            self.election_deadline
        }
    }

    /// Randomized per reset so contenders time out at different moments,
    /// which keeps split votes from repeating indefinitely (§5.2).
    fn reset_election_timer(&mut self) {
        let min = self.config.election_timeout_min.as_millis() as u64;
        let max = self.config.election_timeout_max.as_millis() as u64;
        let timeout = Duration::from_millis(rand::rng().random_range(min..=max));
        self.election_deadline = Instant::now() + timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;
    use crate::types::{ReplicaId, Term};

    fn runtime() -> Runtime {
        let peers = ["0001", "0002"].map(ReplicaId::from).to_vec();
        Runtime::new(Replica::new(ReplicaId::from("0000"), peers), TimerConfig::default())
    }

    #[test]
    fn election_timeout_emits_a_vote_request() {
        let mut rt = runtime();

        let outbound = rt.handle(Event::ElectionTimeout);

        assert_eq!(outbound.len(), 1);
        assert!(matches!(outbound[0].body, Body::VoteRequest { .. }));
        assert!(!rt.replica().is_leader());
    }

    #[test]
    fn election_deadline_moves_on_timeout() {
        let mut rt = runtime();
        let before = rt.election_deadline;

        std::thread::sleep(Duration::from_millis(5));
        rt.handle(Event::ElectionTimeout);

        assert!(rt.election_deadline > before);
        let lower = rt.config.election_timeout_min;
        assert!(rt.election_deadline >= Instant::now() + lower - Duration::from_millis(50));
    }

    #[test]
    fn leader_waits_on_the_heartbeat_deadline() {
        let mut rt = runtime();
        rt.handle(Event::ElectionTimeout);
        rt.handle(Event::Message(Envelope {
            src: ReplicaId::from("0001"),
            dst: ReplicaId::from("0000"),
            leader: ReplicaId::broadcast(),
            body: Body::VoteResponse { term: Term::from(1), granted: true },
        }));
        assert!(rt.replica().is_leader());

        assert_eq!(rt.next_deadline(), rt.heartbeat_deadline);
        // A fresh leader has no fired timer yet.
        assert!(rt.poll_timers().is_none());
    }

    #[test]
    fn heartbeat_timeout_broadcasts_an_update() {
        let mut rt = runtime();
        rt.handle(Event::ElectionTimeout);
        rt.handle(Event::Message(Envelope {
            src: ReplicaId::from("0001"),
            dst: ReplicaId::from("0000"),
            leader: ReplicaId::broadcast(),
            body: Body::VoteResponse { term: Term::from(1), granted: true },
        }));

        let outbound = rt.handle(Event::HeartbeatTimeout);

        assert_eq!(outbound.len(), 1);
        assert!(outbound[0].dst.is_broadcast());
        assert!(matches!(outbound[0].body, Body::Update { .. }));
    }
}
