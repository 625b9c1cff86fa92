//! Server-assigned identities
//!
//! Participants, transports, consumptions and connections get random UUIDs.
//! Productions get a monotonically increasing number because other participants
//! reference them as discovery keys and they must never be reused.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Allocate a fresh random identity
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Participant identity
    ParticipantId
);
uuid_id!(
    /// Transport identity
    TransportId
);
uuid_id!(
    /// Consumption identity
    ConsumptionId
);
uuid_id!(
    /// Client connection identity (one per socket)
    ConnectionId
);
uuid_id!(
    /// Opaque handle for a resource living inside the media engine
    EngineHandle
);

/// Production identity, globally unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductionId(u64);

impl ProductionId {
    /// Wrap a raw value (for parsing wire input)
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProductionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic allocator for production identities
#[derive(Debug)]
pub struct ProductionIdAllocator {
    next: AtomicU64,
}

impl ProductionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next identity; never returns a value twice
    pub fn allocate(&self) -> ProductionId {
        ProductionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ProductionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
