use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{Cache, Lifecycle, Sweep};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::entry::{deadline_after, Entry};
use crate::error::{Error, Result};
use crate::gate::SweepGate;

type OnDead<K, V> = Box<dyn Fn(K, V) + Send + Sync>;
type DefaultFactory<V> = Box<dyn Fn() -> V + Send + Sync>;

/// Thread-safe key-value cache whose entries expire after a lifetime.
///
/// Uses `DashMap` for storage, so reads and writes on different keys do not
/// contend. Expired entries stay visible until a sweep removes them; sweeping
/// is driven by a [`Supervisor`](crate::Supervisor) or by calling
/// [`Sweep::sweep`] directly.
///
/// # Example
///
/// ```rust
/// use lifecache_core::MapCache;
/// use std::time::Duration;
///
/// let cache: MapCache<String, &str> = MapCache::new(Some(Duration::from_secs(60)));
/// cache.set("user:123", "John Doe");
///
/// assert_eq!(cache.get("user:123").unwrap(), "John Doe");
/// cache.delete("user:123").unwrap();
/// assert!(cache.get("user:123").is_err());
/// ```
pub struct MapCache<K, V> {
    data: DashMap<K, Entry<V>>,
    lifecycle: Lifecycle,
    on_dead: Option<OnDead<K, V>>,
    default: Option<DefaultFactory<V>>,
}

impl<K, V> MapCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a cache whose entries live for `lifetime` (`None` = forever)
    pub fn new(lifetime: Option<Duration>) -> Self {
        Self::with_config(CacheConfig {
            lifetime,
            ..CacheConfig::default()
        })
    }

    /// Creates a cache with an explicit lifetime policy
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            data: DashMap::new(),
            lifecycle: Lifecycle::new(config),
            on_dead: None,
            default: None,
        }
    }

    /// Computes deadlines against `clock` instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.lifecycle.clock = clock;
        self
    }

    /// Calls `on_dead` with every entry removed through the eviction path
    /// (`delete`, `clear` and sweeps). The entry has already left the cache
    /// when the hook runs, and no internal lock is held.
    pub fn with_on_dead(mut self, on_dead: impl Fn(K, V) + Send + Sync + 'static) -> Self {
        self.on_dead = Some(Box::new(on_dead));
        self
    }

    /// Populates missing keys read through [`get_or_default`](Self::get_or_default)
    pub fn with_default(mut self, default: impl Fn() -> V + Send + Sync + 'static) -> Self {
        self.default = Some(Box::new(default));
        self
    }

    /// Stores a value.
    ///
    /// An existing key keeps its entry: the body is replaced and the deadline
    /// follows the read-renewal policy. A new key gets a fresh deadline.
    pub fn set(&self, key: impl Into<K>, value: V) {
        let renewal = self.lifecycle.read_renewal();
        match self.data.entry(key.into()) {
            Slot::Occupied(mut slot) => {
                let entry = slot.get_mut();
                *entry.body_mut() = value;
                if let Some(lifetime) = renewal {
                    entry.renew_at(lifetime, self.lifecycle.now());
                }
            }
            Slot::Vacant(slot) => {
                slot.insert(self.lifecycle.make_entry(value));
            }
        }
    }

    /// Stores a value that expires after `lifetime` instead of the configured one
    pub fn set_with_lifetime(&self, key: impl Into<K>, value: V, lifetime: Duration) {
        let deadline = deadline_after(self.lifecycle.now(), lifetime);
        self.data.insert(key.into(), Entry::new(value, Some(deadline)));
    }

    /// Returns `true` if the key is stored, renewing it when it is
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.touch(key).is_ok()
    }

    /// Returns `true` if any entry holds `value`
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.data.iter().any(|entry| entry.value().body() == value)
    }

    /// Returns all stored keys
    pub fn keys(&self) -> Vec<K> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Removes the entry and hands it to the on-dead hook.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingEntry` if the key is not stored.
    pub fn delete<Q>(&self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (key, entry) = self.data.remove(key).ok_or(Error::MissingEntry)?;
        self.on_dead(key, entry.into_body());
        Ok(())
    }

    /// Removes the entry without calling the on-dead hook
    pub fn delete_bypass<Q>(&self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.data
            .remove(key)
            .map(|(_, entry)| entry.into_body())
            .ok_or(Error::MissingEntry)
    }

    /// Removes and returns a value. The on-dead hook is not called.
    pub fn pop<Q>(&self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.delete_bypass(key)
    }

    /// Removes and returns a value, or `default` if the key is not stored
    pub fn pop_or<Q>(&self, key: &Q, default: V) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.delete_bypass(key).unwrap_or(default)
    }

    /// Removes and returns an arbitrary entry. The on-dead hook is not called.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingEntry` if the cache is empty.
    pub fn pop_item(&self) -> Result<(K, V)> {
        loop {
            let key = self
                .data
                .iter()
                .next()
                .map(|entry| entry.key().clone())
                .ok_or(Error::MissingEntry)?;
            // Another thread may take the key first; pick again
            if let Some((key, entry)) = self.data.remove(&key) {
                return Ok((key, entry.into_body()));
            }
        }
    }

    /// Removes every entry through the eviction path.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        self.keys()
            .iter()
            .filter(|key| self.delete(*key).is_ok())
            .count()
    }

    /// Bulk update is not provided: merging deadlines is ambiguous.
    pub fn update<I>(&self, _items: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        Err(Error::unsupported("update"))
    }

    /// Not provided, see [`update`](Self::update).
    pub fn set_default(&self, _key: K, _value: V) -> Result<V> {
        Err(Error::unsupported("setdefault"))
    }

    /// Sets the deadline to now + `duration`, falling back to the configured
    /// lifetime and then to zero
    pub fn renew<Q>(&self, key: &Q, duration: Option<Duration>) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let duration = self.lifecycle.explicit_renewal(duration);
        let mut entry = self.data.get_mut(key).ok_or(Error::MissingEntry)?;
        entry.renew_at(duration, self.lifecycle.now());
        Ok(())
    }

    /// Overwrites the deadline of an entry
    pub fn set_deadline<Q>(&self, key: &Q, deadline: Option<Instant>) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut entry = self.data.get_mut(key).ok_or(Error::MissingEntry)?;
        entry.set_deadline(deadline);
        Ok(())
    }

    /// Read-path renewal of a single key
    fn touch<Q>(&self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.lifecycle.read_renewal() {
            Some(lifetime) => {
                let mut entry = self.data.get_mut(key).ok_or(Error::MissingEntry)?;
                entry.renew_at(lifetime, self.lifecycle.now());
                Ok(())
            }
            None if self.data.contains_key(key) => Ok(()),
            None => Err(Error::MissingEntry),
        }
    }

    fn on_dead(&self, key: K, value: V) {
        if let Some(on_dead) = &self.on_dead {
            on_dead(key, value);
        }
    }
}

impl<K, V> MapCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Returns the value, renewing its deadline when reads renew.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingEntry` if the key is not stored.
    pub fn get<Q>(&self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut entry = self.data.get_mut(key).ok_or(Error::MissingEntry)?;
        if let Some(lifetime) = self.lifecycle.read_renewal() {
            entry.renew_at(lifetime, self.lifecycle.now());
        }
        Ok(entry.body().clone())
    }

    /// Returns the value, or `default` if the key is not stored
    pub fn get_or<Q>(&self, key: &Q, default: V) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).unwrap_or(default)
    }

    /// Returns the value, first storing one from the default factory if the
    /// key is missing.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingEntry` if the key is missing and no factory was
    /// configured with [`with_default`](Self::with_default).
    pub fn get_or_default(&self, key: K) -> Result<V> {
        if let Some(default) = &self.default {
            if !self.data.contains_key(&key) {
                // Built before any shard lock is taken so the factory may use the cache
                let entry = self.lifecycle.make_entry(default());
                self.data.entry(key.clone()).or_insert(entry);
            }
        }
        self.get(&key)
    }

    /// Returns a copy of the stored entry without renewing it
    pub fn get_raw<Q>(&self, key: &Q) -> Result<Entry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.data
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or(Error::MissingEntry)
    }

    /// Returns all stored values
    pub fn values(&self) -> Vec<V> {
        self.data.iter().map(|entry| entry.value().body().clone()).collect()
    }

    /// Returns all stored key-value pairs
    pub fn items(&self) -> Vec<(K, V)> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().body().clone()))
            .collect()
    }
}

impl<K, V> Sweep for MapCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    fn sweep_at(&self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .data
            .iter()
            .filter(|entry| entry.value().is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            // Collected keys go even if renewed since the scan; only a key
            // already deleted by someone else is skipped
            if let Some((key, entry)) = self.data.remove(&key) {
                self.on_dead(key, entry.into_body());
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!("Swept {} expired entries from map cache", removed);
        }
        removed
    }

    fn clock(&self) -> &dyn Clock {
        self.lifecycle.clock.as_ref()
    }

    fn swept(&self) -> &SweepGate {
        &self.lifecycle.swept
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

impl<K, V> Cache for MapCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    type Locator = K;
    type Value = V;

    fn config(&self) -> &CacheConfig {
        &self.lifecycle.config
    }

    fn renew_for_read(&self, key: &K) -> Result<()> {
        self.touch(key)
    }

    fn renew(&self, key: &K, duration: Option<Duration>) -> Result<()> {
        MapCache::renew(self, key, duration)
    }

    fn set_deadline(&self, key: &K, deadline: Option<Instant>) -> Result<()> {
        MapCache::set_deadline(self, key, deadline)
    }

    fn delete(&self, key: &K) -> Result<()> {
        MapCache::delete(self, key)
    }

    fn delete_bypass(&self, key: &K) -> Result<V> {
        MapCache::delete_bypass(self, key)
    }
}

/// Compares raw storage: keys, bodies and deadlines.
impl<K, V> PartialEq for MapCache<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        // Never hold shards of both maps at once
        let ours: Vec<(K, Entry<V>)> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        ours.len() == other.data.len()
            && ours.iter().all(|(key, entry)| {
                other
                    .data
                    .get(key)
                    .is_some_and(|theirs| *theirs.value() == *entry)
            })
    }
}

impl<K: Eq + Hash, V> std::fmt::Debug for MapCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapCache")
            .field("lifecycle", &self.lifecycle)
            .field("len", &self.data.len())
            .finish()
    }
}
