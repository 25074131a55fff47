use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{Cache, Lifecycle, Sweep};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::gate::SweepGate;

type OnDead<V> = Box<dyn Fn(V) + Send + Sync>;

/// An entry hashed and compared by its body only
struct Member<V>(Entry<V>);

impl<V: Hash> Hash for Member<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.body().hash(state);
    }
}

impl<V: PartialEq> PartialEq for Member<V> {
    fn eq(&self, other: &Self) -> bool {
        self.0.body() == other.0.body()
    }
}

impl<V: Eq> Eq for Member<V> {}

impl<V> Borrow<V> for Member<V> {
    fn borrow(&self) -> &V {
        self.0.body()
    }
}

/// Thread-safe set whose members expire after a lifetime.
///
/// Binary set algebra and subset comparisons are not provided: members of two
/// sets carry independent deadlines, so the result of combining them has no
/// well-defined lifetime. Those methods return `Error::Unsupported`.
///
/// # Example
///
/// ```rust
/// use lifecache_core::SetCache;
/// use std::time::Duration;
///
/// let banned = SetCache::new(Some(Duration::from_secs(300)));
/// banned.add(42u64);
///
/// assert!(banned.contains(&42));
/// banned.discard(&42);
/// banned.discard(&42);
/// assert!(!banned.contains(&42));
/// ```
pub struct SetCache<V> {
    data: Mutex<HashSet<Member<V>>>,
    lifecycle: Lifecycle,
    on_dead: Option<OnDead<V>>,
}

impl<V> SetCache<V>
where
    V: Eq + Hash,
{
    /// Creates a set whose members live for `lifetime` (`None` = forever)
    pub fn new(lifetime: Option<Duration>) -> Self {
        Self::with_config(CacheConfig {
            lifetime,
            ..CacheConfig::default()
        })
    }

    /// Creates a set with an explicit lifetime policy
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            data: Mutex::new(HashSet::new()),
            lifecycle: Lifecycle::new(config),
            on_dead: None,
        }
    }

    /// Computes deadlines against `clock` instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.lifecycle.clock = clock;
        self
    }

    /// Calls `on_dead` with every member removed through `remove`, `discard`
    /// or a sweep, after it has left the set
    pub fn with_on_dead(mut self, on_dead: impl Fn(V) + Send + Sync + 'static) -> Self {
        self.on_dead = Some(Box::new(on_dead));
        self
    }

    /// Adds a member with a fresh deadline, replacing an equal member
    pub fn add(&self, value: V) {
        let member = Member(self.lifecycle.make_entry(value));
        self.data.lock().replace(member);
    }

    /// Returns `true` if the value is a member, renewing it when it is
    pub fn contains(&self, value: &V) -> bool {
        self.touch(value).is_ok()
    }

    /// Number of members, expired ones included
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns `true` if the set is empty
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Removes a member and hands it to the on-dead hook.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingEntry` if the value is not a member.
    pub fn remove(&self, value: &V) -> Result<()> {
        let member = self.data.lock().take(value).ok_or(Error::MissingEntry)?;
        self.on_dead(member.0.into_body());
        Ok(())
    }

    /// Like [`remove`](Self::remove), but an absent value is not an error.
    ///
    /// Returns `true` if a member was removed.
    pub fn discard(&self, value: &V) -> bool {
        self.remove(value).is_ok()
    }

    /// Removes a member without calling the on-dead hook
    pub fn delete_bypass(&self, value: &V) -> Result<V> {
        self.data
            .lock()
            .take(value)
            .map(|member| member.0.into_body())
            .ok_or(Error::MissingEntry)
    }

    /// Sets the deadline to now + `duration`, falling back to the configured
    /// lifetime and then to zero
    pub fn renew(&self, value: &V, duration: Option<Duration>) -> Result<()> {
        let duration = self.lifecycle.explicit_renewal(duration);
        self.modify(value, |entry, now| entry.renew_at(duration, now))
    }

    /// Overwrites the deadline of a member
    pub fn set_deadline(&self, value: &V, deadline: Option<Instant>) -> Result<()> {
        self.modify(value, |entry, _| entry.set_deadline(deadline))
    }

    /// Not provided.
    pub fn union(&self, _other: &Self) -> Result<Self> {
        Err(Error::unsupported("union"))
    }

    /// Not provided.
    pub fn intersection(&self, _other: &Self) -> Result<Self> {
        Err(Error::unsupported("intersection"))
    }

    /// Not provided.
    pub fn difference(&self, _other: &Self) -> Result<Self> {
        Err(Error::unsupported("difference"))
    }

    /// Not provided.
    pub fn symmetric_difference(&self, _other: &Self) -> Result<Self> {
        Err(Error::unsupported("symmetric_difference"))
    }

    /// Not provided.
    pub fn is_subset(&self, _other: &Self) -> Result<bool> {
        Err(Error::unsupported("is_subset"))
    }

    /// Not provided.
    pub fn is_superset(&self, _other: &Self) -> Result<bool> {
        Err(Error::unsupported("is_superset"))
    }

    /// Not provided.
    pub fn is_disjoint(&self, _other: &Self) -> Result<bool> {
        Err(Error::unsupported("is_disjoint"))
    }

    fn touch(&self, value: &V) -> Result<()> {
        match self.lifecycle.read_renewal() {
            Some(lifetime) => self.modify(value, |entry, now| entry.renew_at(lifetime, now)),
            None if self.data.lock().contains(value) => Ok(()),
            None => Err(Error::MissingEntry),
        }
    }

    /// Members are immutable inside a `HashSet`, so edits take the member
    /// out and put it back under the same lock
    fn modify(&self, value: &V, edit: impl FnOnce(&mut Entry<V>, Instant)) -> Result<()> {
        let now = self.lifecycle.now();
        let mut data = self.data.lock();
        let mut member = data.take(value).ok_or(Error::MissingEntry)?;
        edit(&mut member.0, now);
        data.insert(member);
        Ok(())
    }

    fn on_dead(&self, value: V) {
        if let Some(on_dead) = &self.on_dead {
            on_dead(value);
        }
    }
}

impl<V> SetCache<V>
where
    V: Eq + Hash + Clone,
{
    /// Returns all members
    pub fn values(&self) -> Vec<V> {
        self.data
            .lock()
            .iter()
            .map(|member| member.0.body().clone())
            .collect()
    }

    /// Returns a copy of the member's entry without renewing it
    pub fn get_raw(&self, value: &V) -> Result<Entry<V>> {
        self.data
            .lock()
            .get(value)
            .map(|member| member.0.clone())
            .ok_or(Error::MissingEntry)
    }

    fn snapshot(&self) -> Vec<Entry<V>> {
        self.data.lock().iter().map(|member| member.0.clone()).collect()
    }
}

impl<V> Sweep for SetCache<V>
where
    V: Eq + Hash + Send + Sync,
{
    fn sweep_at(&self, now: Instant) -> usize {
        let expired: HashSet<Member<V>> = {
            let mut data = self.data.lock();
            if !data.iter().any(|member| member.0.is_expired_at(now)) {
                return 0;
            }
            let (expired, live): (HashSet<_>, HashSet<_>) = std::mem::take(&mut *data)
                .into_iter()
                .partition(|member| member.0.is_expired_at(now));
            *data = live;
            expired
        };

        let removed = expired.len();
        for member in expired {
            self.on_dead(member.0.into_body());
        }

        tracing::debug!("Swept {} expired members from set cache", removed);
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

impl<V> Cache for SetCache<V>
where
    V: Eq + Hash + Send + Sync,
{
    type Locator = V;
    type Value = V;

    fn config(&self) -> &CacheConfig {
        &self.lifecycle.config
    }

    fn renew_for_read(&self, value: &V) -> Result<()> {
        self.touch(value)
    }

    fn renew(&self, value: &V, duration: Option<Duration>) -> Result<()> {
        SetCache::renew(self, value, duration)
    }

    fn set_deadline(&self, value: &V, deadline: Option<Instant>) -> Result<()> {
        SetCache::set_deadline(self, value, deadline)
    }

    fn delete(&self, value: &V) -> Result<()> {
        self.remove(value)
    }

    fn delete_bypass(&self, value: &V) -> Result<V> {
        SetCache::delete_bypass(self, value)
    }
}

/// Compares raw storage: members and their deadlines.
impl<V> PartialEq for SetCache<V>
where
    V: Eq + Hash + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        // Never hold both locks at once
        let ours = self.snapshot();
        let data = other.data.lock();
        ours.len() == data.len()
            && ours
                .iter()
                .all(|entry| data.get(entry.body()).is_some_and(|theirs| theirs.0 == *entry))
    }
}

impl<V> std::fmt::Debug for SetCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetCache")
            .field("lifecycle", &self.lifecycle)
            .field("len", &self.data.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const SECOND: Duration = Duration::from_secs(1);

    fn create_test_set(lifetime: Option<Duration>) -> (SetCache<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let set = SetCache::new(lifetime).with_clock(clock.clone());
        (set, clock)
    }

    #[test]
    fn test_add_and_contains() {
        let (set, _) = create_test_set(Some(10 * SECOND));
        set.add(1);
        set.add(2);

        assert!(set.contains(&1));
        assert!(set.contains(&2));
        assert!(!set.contains(&3));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_unbounded_members_never_swept() {
        let (set, clock) = create_test_set(None);
        set.add(5);

        clock.advance(10 * 365 * 24 * 60 * 60 * SECOND);
        assert_eq!(set.sweep(), 0);
        assert!(set.contains(&5));
    }

    #[test]
    fn test_sweep_removes_expired_members() {
        let dead = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&dead);
        let clock = Arc::new(ManualClock::new());
        let set = SetCache::new(Some(10 * SECOND))
            .with_clock(clock.clone())
            .with_on_dead(move |value| sink.lock().push(value));

        set.add(1);
        clock.advance(5 * SECOND);
        set.add(2);

        clock.advance(6 * SECOND);
        assert_eq!(set.sweep(), 1);
        assert_eq!(set.values(), vec![2]);
        assert_eq!(*dead.lock(), vec![1]);
    }

    #[test]
    fn test_remove_missing_value_fails() {
        let (set, _) = create_test_set(None);
        set.add(1);

        assert_eq!(set.remove(&1), Ok(()));
        assert_eq!(set.remove(&1), Err(Error::MissingEntry));
    }

    #[test]
    fn test_discard_is_idempotent() {
        let (set, _) = create_test_set(None);
        set.add(1);

        assert!(set.discard(&1));
        assert!(!set.discard(&1));
        assert!(!set.discard(&1));
        assert!(set.is_empty());
    }

    #[test]
    fn test_delete_bypass_skips_on_dead() {
        let dead = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&dead);
        let set = SetCache::new(None).with_on_dead(move |_: u32| *counter.lock() += 1);

        set.add(1);
        set.add(2);
        assert_eq!(set.delete_bypass(&1), Ok(1));
        assert_eq!(*dead.lock(), 0);

        set.remove(&2).unwrap();
        assert_eq!(*dead.lock(), 1);
    }

    #[test]
    fn test_add_existing_member_refreshes_deadline() {
        let (set, clock) = create_test_set(Some(10 * SECOND));
        set.add(1);

        clock.advance(4 * SECOND);
        set.add(1);

        assert_eq!(set.len(), 1);
        assert_eq!(set.get_raw(&1).unwrap().deadline(), Some(clock.now() + 10 * SECOND));
    }

    #[test]
    fn test_contains_renews_only_with_auto_renew() {
        let (renewing, clock) = create_test_set(Some(10 * SECOND));
        renewing.add(1);
        clock.advance(5 * SECOND);
        assert!(renewing.contains(&1));
        assert_eq!(renewing.get_raw(&1).unwrap().deadline(), Some(clock.now() + 10 * SECOND));

        let clock = Arc::new(ManualClock::new());
        let fixed = SetCache::with_config(CacheConfig::new().with_lifetime(10 * SECOND).with_auto_renew(false))
            .with_clock(clock.clone());
        let start = clock.now();
        fixed.add(1u32);
        clock.advance(5 * SECOND);
        assert!(fixed.contains(&1));
        assert_eq!(fixed.get_raw(&1).unwrap().deadline(), Some(start + 10 * SECOND));
    }

    #[test]
    fn test_explicit_renew_and_set_deadline() {
        let (set, clock) = create_test_set(Some(10 * SECOND));
        set.add(1);

        set.renew(&1, Some(30 * SECOND)).unwrap();
        clock.advance(20 * SECOND);
        assert_eq!(set.sweep(), 0);

        set.set_deadline(&1, Some(clock.now())).unwrap();
        assert_eq!(set.sweep(), 0);
        clock.advance(SECOND);
        assert_eq!(set.sweep(), 1);

        assert_eq!(set.renew(&1, None), Err(Error::MissingEntry));
    }

    #[test]
    fn test_set_algebra_unsupported() {
        let (a, _) = create_test_set(None);
        let (b, _) = create_test_set(None);

        assert!(matches!(a.union(&b), Err(Error::Unsupported { operation: "union" })));
        assert!(matches!(a.intersection(&b), Err(Error::Unsupported { .. })));
        assert!(matches!(a.difference(&b), Err(Error::Unsupported { .. })));
        assert!(matches!(a.symmetric_difference(&b), Err(Error::Unsupported { .. })));
        assert!(matches!(a.is_subset(&b), Err(Error::Unsupported { .. })));
        assert!(matches!(a.is_superset(&b), Err(Error::Unsupported { .. })));
        assert!(matches!(a.is_disjoint(&b), Err(Error::Unsupported { .. })));
    }

    #[test]
    fn test_equality_compares_deadlines() {
        let clock = Arc::new(ManualClock::new());
        let a = SetCache::new(Some(10 * SECOND)).with_clock(clock.clone());
        let b = SetCache::new(Some(10 * SECOND)).with_clock(clock.clone());

        a.add("x");
        b.add("x");
        assert!(a == b);

        b.renew(&"x", Some(SECOND)).unwrap();
        assert!(a != b);
    }
}
