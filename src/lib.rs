//! Replicated, strongly consistent key/value store on Raft consensus.
//!
//! A fixed cluster of replicas exchanges JSON datagrams over a local
//! control plane. Clients may address `get`/`put` at any replica; writes
//! are linearized through the leader's replicated log and reads are served
//! from the leader's committed state.
//!
//! Based on "In Search of an Understandable Consensus Algorithm"
//! (Ongaro & Ousterhout).

pub mod cluster;
pub mod effect;
pub mod kv;
pub mod log;
pub mod message;
pub mod replica;
pub mod runtime;
pub mod server;
pub mod state;
pub mod transport;
pub mod types;

pub use effect::Effect;
pub use kv::KvStore;
pub use log::Log;
pub use message::{Body, Entry, Envelope, Write};
pub use replica::{Replica, Role};
pub use server::{Config, Server};
pub use types::{ReplicaId, Term};
