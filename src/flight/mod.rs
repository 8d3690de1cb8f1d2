//! Single-flight result store
//!
//! Collapses concurrent requests for the same key into one computation:
//! the first caller to [`try_claim`](SingleFlightStore::try_claim) a key
//! computes it, everyone else blocks in [`get`](SingleFlightStore::get)
//! until the value is published. Publication establishes a happens-before
//! edge with every `get` that returns the value.
//!
//! Blocking is per key. Bounded waits ([`get_timeout`](SingleFlightStore::get_timeout))
//! and cooperative cancellation ([`CancellationToken`]) end a wait without
//! touching the entry, so other waiters and the eventual publication are
//! unaffected.

pub mod cancel;
pub mod store;

pub use cancel::CancellationToken;
pub use store::{
    Claim, ClaimGuard, FlightStats, FlightStatsSnapshot, SingleFlightStore,
    DEFAULT_CAPACITY_HINT,
};
