//! The lifecycle contract shared by every cache variant.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::entry::{deadline_after, Entry};
use crate::error::Result;
use crate::gate::SweepGate;

/// The part of a cache the supervisor sees.
///
/// Object safe, so a registry can hold `Arc<dyn Sweep>` for caches of any
/// shape, key or value type.
pub trait Sweep: Send + Sync {
    /// Removes every entry that is expired at `now` through the eviction path.
    ///
    /// Expired locations are collected first and deleted afterwards; the live
    /// container is never mutated while it is being scanned. Returns the
    /// number of entries removed.
    fn sweep_at(&self, now: Instant) -> usize;

    /// The clock this cache computes deadlines against
    fn clock(&self) -> &dyn Clock;

    /// Signalled by the supervisor after each completed sweep of this cache
    fn swept(&self) -> &SweepGate;

    /// Number of stored entries, expired ones included
    fn len(&self) -> usize;

    /// Returns `true` if nothing is stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweeps against the cache's own clock
    fn sweep(&self) -> usize {
        self.sweep_at(self.clock().now())
    }
}

/// Deadline policy and deletion hooks common to map, set and sequence caches.
///
/// `Locator` is how an entry is addressed: a key for [`MapCache`](crate::MapCache),
/// the value itself for [`SetCache`](crate::SetCache), and an index for
/// [`SequenceCache`](crate::SequenceCache).
pub trait Cache: Sweep {
    /// How a single entry is addressed
    type Locator: ?Sized;
    /// The stored value type
    type Value;

    /// The lifetime policy of this cache
    fn config(&self) -> &CacheConfig;

    /// Wraps a value in an entry whose deadline is now + the configured lifetime
    fn make_entry(&self, value: Self::Value) -> Entry<Self::Value> {
        Entry::new(value, make_deadline(self.config(), self.clock().now()))
    }

    /// Read-path renewal: pushes the deadline to now + lifetime when
    /// `auto_renew` is on and a lifetime is configured, otherwise a no-op.
    fn renew_for_read(&self, at: &Self::Locator) -> Result<()>;

    /// Sets the deadline to now + `duration`, falling back to the configured
    /// lifetime and then to zero.
    fn renew(&self, at: &Self::Locator, duration: Option<Duration>) -> Result<()>;

    /// Overwrites the deadline unconditionally
    fn set_deadline(&self, at: &Self::Locator, deadline: Option<Instant>) -> Result<()>;

    /// Removes the entry and hands it to the on-dead hook
    fn delete(&self, at: &Self::Locator) -> Result<()>;

    /// Removes the entry without calling the on-dead hook
    fn delete_bypass(&self, at: &Self::Locator) -> Result<Self::Value>;
}

/// Deadline for an entry written at `now` under `config`
pub(crate) fn make_deadline(config: &CacheConfig, now: Instant) -> Option<Instant> {
    config.lifetime.map(|lifetime| deadline_after(now, lifetime))
}

/// State every variant carries besides its container
pub(crate) struct Lifecycle {
    pub(crate) config: CacheConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) swept: SweepGate,
}

impl Lifecycle {
    pub(crate) fn new(config: CacheConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            swept: SweepGate::every_second_sweep(),
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub(crate) fn make_entry<V>(&self, value: V) -> Entry<V> {
        Entry::new(value, make_deadline(&self.config, self.now()))
    }

    /// The duration a read renews by, if reads renew at all
    pub(crate) fn read_renewal(&self) -> Option<Duration> {
        if self.config.auto_renew {
            self.config.lifetime
        } else {
            None
        }
    }

    /// The duration an explicit renewal without an argument uses
    pub(crate) fn explicit_renewal(&self, duration: Option<Duration>) -> Duration {
        duration.or(self.config.lifetime).unwrap_or_default()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("lifetime", &self.config.lifetime)
            .field("auto_renew", &self.config.auto_renew)
            .field("swept", &self.swept.count())
            .finish()
    }
}
