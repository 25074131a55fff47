use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug)]
struct GateState {
    count: usize,
    /// Bumped on every release so waiters can tell a release from a spurious wakeup
    generation: u64,
}

/// A counter that releases its waiters on every Nth signal.
///
/// Each [`signal`](SweepGate::signal) increments the count. When the count
/// reaches `target`, all current waiters are released and the count resets to
/// `initial`. Caches own a gate with `initial = 0, target = 2`, signalled by
/// the supervisor after each sweep, so a waiter wakes only after it has seen a
/// full sweep pair rather than the tail of one already in progress.
///
/// # Example
///
/// ```rust
/// use lifecache_core::SweepGate;
///
/// let gate = SweepGate::new(0, 2).unwrap();
/// gate.signal();
/// assert_eq!(gate.count(), 1);
/// gate.signal();
/// assert_eq!(gate.count(), 0);
/// ```
#[derive(Debug)]
pub struct SweepGate {
    initial: usize,
    target: usize,
    state: Mutex<GateState>,
    released: Condvar,
}

impl SweepGate {
    /// Creates a gate that fires after `target - initial` signals.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `target <= initial`.
    pub fn new(initial: usize, target: usize) -> Result<Self> {
        if target <= initial {
            return Err(Error::InvalidArgument(format!(
                "gate target ({}) must be greater than its initial count ({})",
                target, initial
            )));
        }

        Ok(Self {
            initial,
            target,
            state: Mutex::new(GateState {
                count: initial,
                generation: 0,
            }),
            released: Condvar::new(),
        })
    }

    /// The gate every cache carries: fires on every second sweep
    pub(crate) fn every_second_sweep() -> Self {
        Self {
            initial: 0,
            target: 2,
            state: Mutex::new(GateState {
                count: 0,
                generation: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Counts one signal, releasing all waiters when the target is reached.
    ///
    /// Returns `true` if this signal released the gate.
    pub fn signal(&self) -> bool {
        let mut state = self.state.lock();
        state.count += 1;
        if state.count < self.target {
            return false;
        }

        state.count = self.initial;
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.released.notify_all();
        true
    }

    /// Returns the current count
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Blocks until the gate is next released
    pub fn wait(&self) {
        let mut state = self.state.lock();
        let seen = state.generation;
        while state.generation == seen {
            self.released.wait(&mut state);
        }
    }

    /// Blocks until the gate is next released or `timeout` elapses.
    ///
    /// Returns `true` if the gate was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let seen = state.generation;
        while state.generation == seen {
            if self.released.wait_until(&mut state, deadline).timed_out() {
                return state.generation != seen;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_target_must_exceed_initial() {
        assert!(matches!(SweepGate::new(2, 2), Err(Error::InvalidArgument(_))));
        assert!(matches!(SweepGate::new(3, 1), Err(Error::InvalidArgument(_))));
        assert!(SweepGate::new(0, 1).is_ok());
    }

    #[test]
    fn test_fires_every_second_signal() {
        let gate = SweepGate::new(0, 2).unwrap();

        assert!(!gate.signal());
        assert_eq!(gate.count(), 1);
        assert!(gate.signal());
        assert_eq!(gate.count(), 0);
        assert!(!gate.signal());
        assert!(gate.signal());
    }

    #[test]
    fn test_resets_to_initial_count() {
        let gate = SweepGate::new(3, 5).unwrap();
        assert_eq!(gate.count(), 3);

        gate.signal();
        gate.signal();
        assert_eq!(gate.count(), 3);
    }

    #[test]
    fn test_waiter_released_after_two_signals() {
        let gate = Arc::new(SweepGate::new(0, 2).unwrap());

        let waiter_gate = Arc::clone(&gate);
        let waiter = thread::spawn(move || waiter_gate.wait_timeout(Duration::from_secs(5)));

        // Give the waiter time to park
        thread::sleep(Duration::from_millis(50));
        gate.signal();
        assert!(!waiter.is_finished());
        gate.signal();

        assert!(waiter.join().expect("waiter panicked"));
        assert_eq!(gate.count(), 0);
    }

    #[test]
    fn test_wait_timeout_without_signals() {
        let gate = SweepGate::new(0, 2).unwrap();
        assert!(!gate.wait_timeout(Duration::from_millis(20)));

        gate.signal();
        assert!(!gate.wait_timeout(Duration::from_millis(20)));
        assert_eq!(gate.count(), 1);
    }

    #[test]
    fn test_release_wakes_every_waiter() {
        let gate = Arc::new(SweepGate::new(0, 1).unwrap());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.wait_timeout(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        gate.signal();

        for waiter in waiters {
            assert!(waiter.join().expect("waiter panicked"));
        }
    }
}
