//! Identifier and term primitives shared by the wire protocol and the
//! replica state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque replica identifier, e.g. `"0000"`.
///
/// The reserved id `"FFFF"` addresses every replica at once and doubles as
/// "no known leader" in the `leader` field of outbound messages.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub const BROADCAST_ID: &'static str = "FFFF";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The broadcast / no-known-leader id.
    pub fn broadcast() -> Self {
        Self(Self::BROADCAST_ID.to_owned())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ReplicaId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Monotonically increasing election epoch.
///
/// Terms act as logical clocks: any message carrying a newer term forces the
/// receiver back to follower state.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Term(u64);

impl Term {
    pub const ZERO: Self = Self(0);

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn increment(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl From<u64> for Term {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
