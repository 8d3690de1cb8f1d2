//! Blocking single-flight keyed store
//!
//! Each key owns a slot with its own mutex and condition variable, so
//! waiting on one key never holds a lock another key needs. The slot map
//! (a `DashMap`) is only locked long enough to find or create a slot.
//!
//! Slot lifecycle:
//!
//! ```text
//!   (absent) ──get──► Pending{claimed: false} ──try_claim──► Pending{claimed: true}
//!      │                                                     │          │
//!      └──────try_claim──────────────────────────────────────┘    fail / drop
//!                                                                 │          │
//!   Present(v) ◄──────────── put / publish ───────────────────────┘          ▼
//!   (terminal)                                                      Failed(err)
//!                                                           (re-claimable)
//! ```

use crate::error::FlightError;
use crate::flight::cancel::{CancellationToken, Wakeable};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default capacity hint when none is given
pub const DEFAULT_CAPACITY_HINT: usize = 16;

// ============================================================================
// Slot
// ============================================================================

enum SlotState<V> {
    /// No value yet; `claimed` is set while some caller computes it
    Pending { claimed: bool },
    /// Published value
    Present(V),
    /// The last claim ended without a value
    Failed(FlightError),
}

struct Slot<V> {
    state: Mutex<SlotState<V>>,
    ready: Condvar,
}

impl<V> Slot<V> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending { claimed: false }),
            ready: Condvar::new(),
        }
    }
}

impl<V: Send> Wakeable for Slot<V> {
    fn wake_all(&self) {
        // Taking the lock orders the wakeup after any waiter's flag check.
        let _state = self.state.lock();
        self.ready.notify_all();
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters describing store traffic
#[derive(Debug, Default)]
pub struct FlightStats {
    /// Reads answered without blocking
    pub hits: AtomicU64,
    /// Reads that had to block
    pub waits: AtomicU64,
    /// Successful claims
    pub claims: AtomicU64,
    /// Values published (via `put` or a claim)
    pub publications: AtomicU64,
    /// Claims that ended without a value
    pub failures: AtomicU64,
    /// Waits ended by cancellation
    pub cancellations: AtomicU64,
    /// Waits ended by timeout
    pub timeouts: AtomicU64,
}

/// Point-in-time copy of [`FlightStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlightStatsSnapshot {
    /// Reads answered without blocking
    pub hits: u64,
    /// Reads that had to block
    pub waits: u64,
    /// Successful claims
    pub claims: u64,
    /// Values published
    pub publications: u64,
    /// Claims that ended without a value
    pub failures: u64,
    /// Waits ended by cancellation
    pub cancellations: u64,
    /// Waits ended by timeout
    pub timeouts: u64,
}

impl FlightStats {
    /// Copy the current counter values
    pub fn snapshot(&self) -> FlightStatsSnapshot {
        FlightStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            claims: self.claims.load(Ordering::Relaxed),
            publications: self.publications.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Claim
// ============================================================================

/// Outcome of [`SingleFlightStore::try_claim`]
pub enum Claim<K, V> {
    /// A value is already published
    Present(V),
    /// The caller won the right to compute the value
    Claimed(ClaimGuard<K, V>),
    /// Another caller is computing the value; block with `get`
    InFlight,
}

impl<K, V> fmt::Debug for Claim<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Claim::Present(_) => write!(f, "Present"),
            Claim::Claimed(_) => write!(f, "Claimed"),
            Claim::InFlight => write!(f, "InFlight"),
        }
    }
}

/// Exclusive right to compute the value for one key
///
/// Resolve with [`publish`](Self::publish) or [`fail`](Self::fail). Dropping
/// the guard unresolved (including by unwinding) fails the key with
/// `ClaimAbandoned`, so waiters are never left pending.
pub struct ClaimGuard<K, V> {
    key: K,
    slot: Arc<Slot<V>>,
    stats: Arc<FlightStats>,
    resolved: bool,
}

impl<K, V> ClaimGuard<K, V> {
    /// Key this claim covers
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Publish the computed value and wake every waiter
    pub fn publish(mut self, value: V) {
        self.resolve(SlotState::Present(value));
    }

    /// Report failure; current waiters receive `UpstreamFailed(message)`
    pub fn fail(mut self, message: impl Into<Arc<str>>) {
        self.resolve(SlotState::Failed(FlightError::UpstreamFailed(message.into())));
    }

    fn resolve(&mut self, outcome: SlotState<V>) {
        let mut state = self.slot.state.lock();
        match outcome {
            SlotState::Present(_) => {
                self.stats.publications.fetch_add(1, Ordering::Relaxed);
                *state = outcome;
            }
            SlotState::Failed(_) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                // A value published by someone else in the meantime wins.
                if !matches!(*state, SlotState::Present(_)) {
                    *state = outcome;
                }
            }
            SlotState::Pending { .. } => *state = outcome,
        }
        self.resolved = true;
        self.slot.ready.notify_all();
    }
}

impl<K, V> Drop for ClaimGuard<K, V> {
    fn drop(&mut self) {
        if !self.resolved {
            warn!("Claim dropped without publication");
            self.resolve(SlotState::Failed(FlightError::ClaimAbandoned));
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for ClaimGuard<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimGuard")
            .field("key", &self.key)
            .field("resolved", &self.resolved)
            .finish()
    }
}

// ============================================================================
// Store
// ============================================================================

/// Concurrent keyed store whose reads block until a value is published
///
/// Entries only move forward: once present a key stays present (a later
/// `put` replaces the value, readers that already returned keep theirs).
/// There is no removal; eviction belongs to the layer above.
///
/// # Example
///
/// ```rust
/// use kuba_olap::flight::{Claim, SingleFlightStore};
/// use std::sync::Arc;
/// use std::thread;
///
/// let store: Arc<SingleFlightStore<u32, String>> = Arc::new(SingleFlightStore::new());
///
/// let reader = {
///     let store = Arc::clone(&store);
///     thread::spawn(move || store.get(&7))
/// };
///
/// if let Claim::Claimed(guard) = store.try_claim(&7) {
///     guard.publish("seven".to_string());
/// }
/// assert_eq!(reader.join().unwrap().unwrap(), "seven");
/// ```
pub struct SingleFlightStore<K, V> {
    slots: DashMap<K, Arc<Slot<V>>>,
    stats: Arc<FlightStats>,
}

impl<K, V> SingleFlightStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone + Send + 'static,
{
    /// Create a store with the default capacity hint
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_HINT)
    }

    /// Create a store sized for roughly `capacity_hint` keys
    ///
    /// The hint only presizes the map; any number of keys is accepted.
    pub fn with_capacity(capacity_hint: usize) -> Self {
        Self {
            slots: DashMap::with_capacity(capacity_hint),
            stats: Arc::new(FlightStats::default()),
        }
    }

    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        let entry = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::pending()));
        Arc::clone(entry.value())
    }

    /// Block until a value is published for `key` and return it
    ///
    /// Fails only when the computing caller failed or abandoned its claim.
    pub fn get(&self, key: &K) -> Result<V, FlightError> {
        self.wait(key, None, None)
    }

    /// Like [`get`](Self::get) but gives up after `timeout`
    pub fn get_timeout(&self, key: &K, timeout: Duration) -> Result<V, FlightError> {
        self.wait(key, Some(timeout), None)
    }

    /// Like [`get`](Self::get) but returns `Cancelled` once `token` fires
    pub fn get_cancellable(&self, key: &K, token: &CancellationToken) -> Result<V, FlightError> {
        self.wait(key, None, Some(token))
    }

    /// Wait with an optional timeout and an optional cancellation token
    pub fn get_with(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: Option<&CancellationToken>,
    ) -> Result<V, FlightError> {
        self.wait(key, timeout, token)
    }

    fn wait(
        &self,
        key: &K,
        timeout: Option<Duration>,
        token: Option<&CancellationToken>,
    ) -> Result<V, FlightError> {
        let slot = self.slot(key);
        let mut state = slot.state.lock();

        match &*state {
            SlotState::Present(v) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(v.clone());
            }
            SlotState::Failed(e) => return Err(e.clone()),
            SlotState::Pending { .. } => {}
        }

        self.stats.waits.fetch_add(1, Ordering::Relaxed);
        trace!(key = ?key, "Waiting for segment publication");

        // A timeout too large to express as an instant waits unbounded.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t).map(|d| (d, t)));
        let _registration = token.map(|t| {
            let weak: Weak<dyn Wakeable> = Arc::downgrade(&slot) as Weak<dyn Wakeable>;
            t.register(weak)
        });

        loop {
            match &*state {
                SlotState::Present(v) => return Ok(v.clone()),
                SlotState::Failed(e) => return Err(e.clone()),
                SlotState::Pending { .. } => {}
            }
            if token.is_some_and(CancellationToken::is_cancelled) {
                self.stats.cancellations.fetch_add(1, Ordering::Relaxed);
                return Err(FlightError::Cancelled);
            }
            match deadline {
                Some((deadline, timeout)) => {
                    if slot.ready.wait_until(&mut state, deadline).timed_out()
                        && matches!(*state, SlotState::Pending { .. })
                    {
                        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                        return Err(FlightError::TimedOut(timeout));
                    }
                }
                None => slot.ready.wait(&mut state),
            }
        }
    }

    /// Return the value if present, without blocking or creating an entry
    pub fn try_get(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        let state = slot.state.lock();
        match &*state {
            SlotState::Present(v) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            _ => None,
        }
    }

    /// Whether a value has been published for `key`
    pub fn contains(&self, key: &K) -> bool {
        self.slots
            .get(key)
            .map(|s| Arc::clone(s.value()))
            .is_some_and(|slot| matches!(*slot.state.lock(), SlotState::Present(_)))
    }

    /// Publish `value` for `key`, replacing any earlier value, and wake waiters
    pub fn put(&self, key: K, value: V) {
        let slot = self.slot(&key);
        let mut state = slot.state.lock();
        if matches!(*state, SlotState::Present(_)) {
            debug!(key = ?key, "Overwriting published value");
        }
        *state = SlotState::Present(value);
        self.stats.publications.fetch_add(1, Ordering::Relaxed);
        slot.ready.notify_all();
    }

    /// Atomically elect the caller that computes `key`
    ///
    /// Exactly one concurrent caller receives `Claimed` for an absent,
    /// unclaimed or failed key; the rest see `InFlight` or `Present`.
    pub fn try_claim(&self, key: &K) -> Claim<K, V> {
        let slot = self.slot(key);
        let mut state = slot.state.lock();
        let claimable = match &*state {
            SlotState::Present(v) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Claim::Present(v.clone());
            }
            SlotState::Pending { claimed } => !claimed,
            SlotState::Failed(_) => true,
        };
        if !claimable {
            return Claim::InFlight;
        }
        *state = SlotState::Pending { claimed: true };
        drop(state);

        self.stats.claims.fetch_add(1, Ordering::Relaxed);
        trace!(key = ?key, "Claimed key");
        Claim::Claimed(ClaimGuard {
            key: key.clone(),
            slot,
            stats: Arc::clone(&self.stats),
            resolved: false,
        })
    }

    /// Number of keys with an entry in any state
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no key has ever been touched
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of keys with a published value
    pub fn present_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(*entry.value().state.lock(), SlotState::Present(_)))
            .count()
    }

    /// Traffic counters
    pub fn stats(&self) -> &FlightStats {
        &self.stats
    }
}

impl<K, V> Default for SingleFlightStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
