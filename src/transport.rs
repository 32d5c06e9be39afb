//! UDP datagram transport.
//!
//! Every replica owns one socket bound to an ephemeral localhost port. All
//! traffic is sent to the control-plane router at `localhost:<port>`, which
//! routes on the envelope's `dst` field and fans `"FFFF"` out to everyone.
//! One datagram carries exactly one JSON envelope; loss, reordering, and
//! duplication are all possible and left to Raft's retries.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::warn;

use crate::message::Envelope;

/// Upper bound on one inbound datagram.
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One UDP socket speaking JSON envelopes to the local router.
pub struct Transport {
    socket: UdpSocket,
    router: SocketAddr,
}

impl Transport {
    /// Bind an ephemeral local socket whose traffic flows to the router at
    /// `localhost:<port>`.
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        let router = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        Ok(Self { socket, router })
    }

    /// Serialize and send one envelope. Failures surface to the caller,
    /// which logs and drops them; heartbeats and append retries own
    /// redelivery.
    pub fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(envelope)?;
        self.socket.send_to(&bytes, self.router)?;
        Ok(())
    }

    /// Wait up to `timeout` for one datagram. Returns `None` on timeout; a
    /// malformed datagram is logged, dropped, and also reported as `None`
    /// (the event loop comes straight back around).
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>, TransportError> {
        // A zero read timeout means "block forever" to the OS; clamp up.
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _)) => match serde_json::from_slice(&buf[..len]) {
                Ok(envelope) => Ok(Some(envelope)),
                Err(error) => {
                    warn!(%error, "dropping malformed datagram");
                    Ok(None)
                }
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;
    use crate::types::ReplicaId;

    fn hello(src: &str) -> Envelope {
        Envelope {
            src: ReplicaId::from(src),
            dst: ReplicaId::broadcast(),
            leader: ReplicaId::broadcast(),
            body: Body::Hello,
        }
    }

    /// A stand-in router socket plus a transport pointed at it.
    fn router_and_transport() -> (UdpSocket, Transport) {
        let router = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = router.local_addr().unwrap().port();
        (router, Transport::bind(port).unwrap())
    }

    #[test]
    fn send_reaches_the_router_as_one_json_datagram() {
        let (router, transport) = router_and_transport();
        router
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        transport.send(&hello("0000")).unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = router.recv_from(&mut buf).unwrap();
        let received: Envelope = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(received, hello("0000"));
    }

    #[test]
    fn recv_timeout_parses_an_inbound_datagram() {
        let (router, transport) = router_and_transport();
        let local = transport.local_addr().unwrap();

        let bytes = serde_json::to_vec(&hello("0001")).unwrap();
        router.send_to(&bytes, local).unwrap();

        let received = transport.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, Some(hello("0001")));
    }

    #[test]
    fn recv_timeout_returns_none_on_silence() {
        let (_router, transport) = router_and_transport();
        let received = transport.recv_timeout(Duration::from_millis(50)).unwrap();
        assert!(received.is_none());
    }

    #[test]
    fn malformed_datagrams_are_dropped() {
        let (router, transport) = router_and_transport();
        let local = transport.local_addr().unwrap();

        router.send_to(b"not json at all", local).unwrap();

        let received = transport.recv_timeout(Duration::from_millis(200)).unwrap();
        assert!(received.is_none());
    }
}
