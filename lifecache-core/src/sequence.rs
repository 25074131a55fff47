use parking_lot::Mutex;
use std::ops::{Bound, Range, RangeBounds};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{Cache, Lifecycle, Sweep};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::gate::SweepGate;

type OnDead<V> = Box<dyn Fn(V) + Send + Sync>;

/// Thread-safe ordered sequence whose elements expire after a lifetime.
///
/// Indices shift when elements are removed, including removals made by a
/// sweep, so an index is only meaningful until the next write or sweep.
///
/// # Example
///
/// ```rust
/// use lifecache_core::SequenceCache;
/// use std::time::Duration;
///
/// let recent = SequenceCache::new(Some(Duration::from_secs(60)));
/// recent.push("a");
/// recent.push("b");
/// recent.push("c");
///
/// assert_eq!(recent.get(1).unwrap(), "b");
/// let tail: Vec<_> = recent.slice(1..);
/// assert_eq!(tail, vec!["b", "c"]);
/// ```
pub struct SequenceCache<V> {
    data: Mutex<Vec<Entry<V>>>,
    lifecycle: Lifecycle,
    on_dead: Option<OnDead<V>>,
}

/// Resolves `range` against a sequence of `len` elements, clamping it to the
/// sequence the way slicing a shorter list yields fewer elements
fn clamp_range(range: impl RangeBounds<usize>, len: usize) -> Range<usize> {
    let start = match range.start_bound() {
        Bound::Included(&start) => start,
        Bound::Excluded(&start) => start.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&end) => end.saturating_add(1),
        Bound::Excluded(&end) => end,
        Bound::Unbounded => len,
    };
    let end = end.min(len);
    start.min(end)..end
}

impl<V> SequenceCache<V> {
    /// Creates a sequence whose elements live for `lifetime` (`None` = forever)
    pub fn new(lifetime: Option<Duration>) -> Self {
        Self::with_config(CacheConfig {
            lifetime,
            ..CacheConfig::default()
        })
    }

    /// Creates a sequence with an explicit lifetime policy
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            lifecycle: Lifecycle::new(config),
            on_dead: None,
        }
    }

    /// Computes deadlines against `clock` instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.lifecycle.clock = clock;
        self
    }

    /// Calls `on_dead` with every element removed through `delete`,
    /// `delete_range` or a sweep, after it has left the sequence
    pub fn with_on_dead(mut self, on_dead: impl Fn(V) + Send + Sync + 'static) -> Self {
        self.on_dead = Some(Box::new(on_dead));
        self
    }

    /// Appends an element with a fresh deadline
    pub fn push(&self, value: V) {
        let entry = self.lifecycle.make_entry(value);
        self.data.lock().push(entry);
    }

    /// Inserts an element at `index`, shifting later elements right.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingEntry` if `index > len`.
    pub fn insert(&self, index: usize, value: V) -> Result<()> {
        let entry = self.lifecycle.make_entry(value);
        let mut data = self.data.lock();
        if index > data.len() {
            return Err(Error::MissingEntry);
        }
        data.insert(index, entry);
        Ok(())
    }

    /// Replaces the element at `index` with a fresh entry
    pub fn set(&self, index: usize, value: V) -> Result<()> {
        let entry = self.lifecycle.make_entry(value);
        let mut data = self.data.lock();
        let slot = data.get_mut(index).ok_or(Error::MissingEntry)?;
        *slot = entry;
        Ok(())
    }

    /// Number of elements, expired ones included
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns `true` if the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Removes the element at `index` and hands it to the on-dead hook
    pub fn delete(&self, index: usize) -> Result<()> {
        let value = self.delete_bypass(index)?;
        self.on_dead(value);
        Ok(())
    }

    /// Removes every element in `range`, handing each to the on-dead hook.
    ///
    /// Returns the number of elements removed.
    pub fn delete_range(&self, range: impl RangeBounds<usize>) -> usize {
        let removed: Vec<Entry<V>> = {
            let mut data = self.data.lock();
            let range = clamp_range(range, data.len());
            data.drain(range).collect()
        };

        let count = removed.len();
        for entry in removed {
            self.on_dead(entry.into_body());
        }
        count
    }

    /// Removes the element at `index` without calling the on-dead hook
    pub fn delete_bypass(&self, index: usize) -> Result<V> {
        let mut data = self.data.lock();
        if index >= data.len() {
            return Err(Error::MissingEntry);
        }
        Ok(data.remove(index).into_body())
    }

    /// Sets the deadline of the element at `index` to now + `duration`,
    /// falling back to the configured lifetime and then to zero
    pub fn renew(&self, index: usize, duration: Option<Duration>) -> Result<()> {
        let duration = self.lifecycle.explicit_renewal(duration);
        let now = self.lifecycle.now();
        let mut data = self.data.lock();
        data.get_mut(index)
            .ok_or(Error::MissingEntry)?
            .renew_at(duration, now);
        Ok(())
    }

    /// Renews every element in `range`, returning how many were renewed
    pub fn renew_range(&self, range: impl RangeBounds<usize>, duration: Option<Duration>) -> usize {
        let duration = self.lifecycle.explicit_renewal(duration);
        let now = self.lifecycle.now();
        let mut data = self.data.lock();
        let range = clamp_range(range, data.len());
        let touched = &mut data[range];
        for entry in touched.iter_mut() {
            entry.renew_at(duration, now);
        }
        touched.len()
    }

    /// Overwrites the deadline of the element at `index`
    pub fn set_deadline(&self, index: usize, deadline: Option<Instant>) -> Result<()> {
        let mut data = self.data.lock();
        data.get_mut(index)
            .ok_or(Error::MissingEntry)?
            .set_deadline(deadline);
        Ok(())
    }

    /// Overwrites the deadline of every element in `range`
    pub fn set_deadline_range(&self, range: impl RangeBounds<usize>, deadline: Option<Instant>) -> usize {
        let mut data = self.data.lock();
        let range = clamp_range(range, data.len());
        let touched = &mut data[range];
        for entry in touched.iter_mut() {
            entry.set_deadline(deadline);
        }
        touched.len()
    }

    fn on_dead(&self, value: V) {
        if let Some(on_dead) = &self.on_dead {
            on_dead(value);
        }
    }
}

impl<V: Clone> SequenceCache<V> {
    /// Returns the element at `index`, renewing it when reads renew
    pub fn get(&self, index: usize) -> Result<V> {
        let renewal = self.lifecycle.read_renewal();
        let now = self.lifecycle.now();
        let mut data = self.data.lock();
        let entry = data.get_mut(index).ok_or(Error::MissingEntry)?;
        if let Some(lifetime) = renewal {
            entry.renew_at(lifetime, now);
        }
        Ok(entry.body().clone())
    }

    /// Returns the elements in `range` in order, renewing each touched element
    /// when reads renew. The range is clamped to the sequence.
    pub fn slice<B>(&self, range: impl RangeBounds<usize>) -> B
    where
        B: FromIterator<V>,
    {
        let renewal = self.lifecycle.read_renewal();
        let now = self.lifecycle.now();
        let mut data = self.data.lock();
        let range = clamp_range(range, data.len());
        data[range]
            .iter_mut()
            .map(|entry| {
                if let Some(lifetime) = renewal {
                    entry.renew_at(lifetime, now);
                }
                entry.body().clone()
            })
            .collect()
    }

    /// Returns all elements in order without renewing them
    pub fn values(&self) -> Vec<V> {
        self.data.lock().iter().map(|entry| entry.body().clone()).collect()
    }

    /// Returns a copy of the entry at `index` without renewing it
    pub fn get_raw(&self, index: usize) -> Result<Entry<V>> {
        self.data.lock().get(index).cloned().ok_or(Error::MissingEntry)
    }
}

impl<V: Send + Sync> Sweep for SequenceCache<V> {
    fn sweep_at(&self, now: Instant) -> usize {
        let expired: Vec<Entry<V>> = {
            let mut data = self.data.lock();
            if !data.iter().any(|entry| entry.is_expired_at(now)) {
                return 0;
            }
            let (expired, live) = std::mem::take(&mut *data)
                .into_iter()
                .partition(|entry| entry.is_expired_at(now));
            *data = live;
            expired
        };

        let removed = expired.len();
        for entry in expired {
            self.on_dead(entry.into_body());
        }

        tracing::debug!("Swept {} expired elements from sequence cache", removed);
        removed
    }

    fn clock(&self) -> &dyn Clock {
        self.lifecycle.clock.as_ref()
    }

    fn swept(&self) -> &SweepGate {
        &self.lifecycle.swept
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }
}

impl<V: Send + Sync> Cache for SequenceCache<V> {
    type Locator = usize;
    type Value = V;

    fn config(&self) -> &CacheConfig {
        &self.lifecycle.config
    }

    fn renew_for_read(&self, index: &usize) -> Result<()> {
        match self.lifecycle.read_renewal() {
            Some(lifetime) => SequenceCache::renew(self, *index, Some(lifetime)),
            None if *index < self.data.lock().len() => Ok(()),
            None => Err(Error::MissingEntry),
        }
    }

    fn renew(&self, index: &usize, duration: Option<Duration>) -> Result<()> {
        SequenceCache::renew(self, *index, duration)
    }

    fn set_deadline(&self, index: &usize, deadline: Option<Instant>) -> Result<()> {
        SequenceCache::set_deadline(self, *index, deadline)
    }

    fn delete(&self, index: &usize) -> Result<()> {
        SequenceCache::delete(self, *index)
    }

    fn delete_bypass(&self, index: &usize) -> Result<V> {
        SequenceCache::delete_bypass(self, *index)
    }
}

/// Compares raw storage: order, bodies and deadlines.
impl<V: PartialEq + Clone> PartialEq for SequenceCache<V> {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        // Never hold both locks at once
        let ours: Vec<Entry<V>> = self.data.lock().clone();
        *other.data.lock() == ours
    }
}

impl<V> std::fmt::Debug for SequenceCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceCache")
            .field("lifecycle", &self.lifecycle)
            .field("len", &self.data.lock().len())
            .finish()
    }
}
