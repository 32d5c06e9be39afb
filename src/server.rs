//! The replica process: one event loop over a UDP socket and two timers.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::message::Envelope;
use crate::replica::Replica;
use crate::runtime::{Event, Runtime, TimerConfig};
use crate::transport::{Transport, TransportError};
use crate::types::ReplicaId;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

pub struct Config {
    /// UDP port of the local control-plane router.
    pub port: u16,
    pub id: ReplicaId,
    pub peers: Vec<ReplicaId>,
}

/// A running replica: in-memory Raft state over UDP datagrams.
pub struct Server {
    runtime: Runtime,
    transport: Transport,
}

impl Server {
    /// Bind the socket and announce ourselves to the cluster.
    pub fn start(config: Config) -> Result<Self, ServerError> {
        let transport = Transport::bind(config.port)?;
        let replica = Replica::new(config.id.clone(), config.peers);
        let runtime = Runtime::new(replica, TimerConfig::default());

        info!(id = %config.id, router = config.port, "replica starting");
        transport.send(&runtime.replica().hello())?;

        Ok(Self { runtime, transport })
    }

    /// Run the event loop. Returns only on an unrecoverable socket error.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            // Drain fired timers before blocking so back-to-back timeouts
            // are not skipped.
            if let Some(event) = self.runtime.poll_timers() {
                let outbound = self.runtime.handle(event);
                self.dispatch(outbound);
                continue;
            }

            // Block until the next deadline or an inbound message,
            // whichever comes first.
            let wait = self
                .runtime
                .next_deadline()
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(1));

            if let Some(envelope) = self.transport.recv_timeout(wait)? {
                let outbound = self.runtime.handle(Event::Message(envelope));
                self.dispatch(outbound);
            }
        }
    }

    /// Put outbound envelopes on the wire. Failed sends are logged and
    /// dropped; Raft's retry loop owns eventual delivery.
    fn dispatch(&self, outbound: Vec<Envelope>) {
        for envelope in outbound {
            if let Err(error) = self.transport.send(&envelope) {
                warn!(%error, dst = %envelope.dst, "send failed");
            }
        }
    }
}
