use std::time::{Duration, Instant};

/// Longest lifetime applied to a deadline (~100 years).
///
/// Longer durations are capped to prevent overflow when adding to `Instant`.
pub const MAX_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A stored value with its optional expiration deadline.
///
/// A `None` deadline never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<V> {
    body: V,
    deadline: Option<Instant>,
}

impl<V> Entry<V> {
    /// Creates a new entry with the given value and deadline
    pub fn new(body: V, deadline: Option<Instant>) -> Self {
        Self { body, deadline }
    }

    /// Returns the stored value
    pub fn body(&self) -> &V {
        &self.body
    }

    /// Returns the stored value mutably, leaving the deadline untouched
    pub fn body_mut(&mut self) -> &mut V {
        &mut self.body
    }

    /// Consumes the entry and returns the stored value
    pub fn into_body(self) -> V {
        self.body
    }

    /// Returns the expiration deadline
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Overwrites the deadline unconditionally.
    ///
    /// A deadline in the past marks the entry expired immediately.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Sets the deadline to now + `duration`
    pub fn renew(&mut self, duration: Duration) {
        self.renew_at(duration, Instant::now());
    }

    /// Sets the deadline to `now` + `duration` (capped at [`MAX_LIFETIME`])
    pub fn renew_at(&mut self, duration: Duration, now: Instant) {
        self.deadline = Some(deadline_after(now, duration));
    }

    /// Checks if this entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Checks if this entry has expired at `now`.
    ///
    /// The comparison is strict: an entry is still alive at its deadline.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now > deadline)
    }
}

/// Computes `now + duration`, capping `duration` at [`MAX_LIFETIME`]
pub(crate) fn deadline_after(now: Instant, duration: Duration) -> Instant {
    now + duration.min(MAX_LIFETIME)
}
