use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

use crate::cache::Sweep;
use crate::config::SupervisorConfig;
use crate::error::{Error, Result};

type Registry = Arc<Mutex<Vec<Arc<dyn Sweep>>>>;

/// Background coordinator that periodically sweeps every registered cache.
///
/// The sweep loop runs on its own OS thread, named after
/// [`SupervisorConfig::name`], driving a single-threaded Tokio runtime of its
/// own. It never shares a thread with callers, so blocking on a cache's
/// [`SweepGate`](crate::SweepGate) is safe from any context.
///
/// The supervisor never reads or writes cache contents; each cycle it calls
/// [`Sweep::sweep`] on every registered cache in registration order, signals
/// the cache's gate, then sleeps for the sweep interval.
///
/// # Example
///
/// ```rust
/// use lifecache_core::{MapCache, Supervisor, SupervisorConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// fn main() -> lifecache_core::Result<()> {
///     let supervisor = Supervisor::with_config(
///         SupervisorConfig::default().with_sweep_interval(Duration::from_millis(100)),
///     );
///
///     let sessions = supervisor.register(Arc::new(
///         MapCache::<String, String>::new(Some(Duration::from_secs(30))),
///     ));
///     supervisor.start()?;
///
///     sessions.set("token", "alice".to_string());
///
///     supervisor.close();
///     Ok(())
/// }
/// ```
pub struct Supervisor {
    config: SupervisorConfig,
    registry: Registry,
    /// Sender to signal shutdown to the sweep thread
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Address of the cache behind a handle, ignoring vtables
fn identity<C: ?Sized>(cache: &Arc<C>) -> *const () {
    Arc::as_ptr(cache).cast::<()>()
}

impl Supervisor {
    /// Creates a supervisor with default configuration (500 ms interval)
    pub fn new() -> Self {
        Self::with_config(SupervisorConfig::default())
    }

    /// Creates a supervisor with custom configuration
    pub fn with_config(config: SupervisorConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            registry: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx,
            worker: Mutex::new(None),
        }
    }

    /// Returns the configuration this supervisor was built with
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Adds a cache to the registry and hands the same handle back.
    ///
    /// Registering a cache that is already registered here is a no-op.
    pub fn register<C>(&self, cache: Arc<C>) -> Arc<C>
    where
        C: Sweep + 'static,
    {
        let mut registry = self.registry.lock();
        if registry.iter().any(|registered| identity(registered) == identity(&cache)) {
            tracing::debug!("Cache already registered with {}", self.config.name);
            return cache;
        }

        let handle: Arc<dyn Sweep> = cache.clone();
        registry.push(handle);
        tracing::info!("Registered cache with {} ({} total)", self.config.name, registry.len());
        cache
    }

    /// Removes a cache from the registry. Its contents are left untouched.
    ///
    /// A sweep cycle already in flight may still visit the cache once.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotRegistered` if the cache is not in the registry.
    pub fn deregister<C>(&self, cache: &Arc<C>) -> Result<()>
    where
        C: Sweep + ?Sized,
    {
        let mut registry = self.registry.lock();
        let position = registry
            .iter()
            .position(|registered| identity(registered) == identity(cache))
            .ok_or(Error::NotRegistered)?;
        registry.remove(position);
        tracing::info!("Deregistered cache from {} ({} left)", self.config.name, registry.len());
        Ok(())
    }

    /// Number of registered caches
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    /// Returns `true` if no cache is registered
    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Spawns the sweep thread.
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyStarted` when the loop is already running
    /// - `Error::Closed` after [`close`](Self::close)
    /// - `Error::Spawn` when the thread or its runtime cannot be created
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if *self.shutdown_tx.borrow() {
            return Err(Error::Closed);
        }
        if worker.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| Error::Spawn(err.to_string()))?;
        let span = tracing::info_span!("supervisor", name = %self.config.name);
        let task = Self::sweep_loop(
            Arc::clone(&self.registry),
            self.config.sweep_interval,
            self.shutdown_tx.subscribe(),
        );

        let handle = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || runtime.block_on(task.instrument(span)))
            .map_err(|err| Error::Spawn(err.to_string()))?;
        *worker = Some(handle);

        tracing::info!(
            "Supervisor {} started (interval: {:?})",
            self.config.name,
            self.config.sweep_interval
        );
        Ok(())
    }

    /// Returns `true` while the sweep thread is running
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Asks the sweep loop to stop without waiting for it.
    ///
    /// The sweep of the current cache completes; the remaining caches of the
    /// cycle are skipped.
    pub fn request_close(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Stops the sweep loop and blocks until its thread exits.
    ///
    /// No sweep runs after this returns. Called from an eviction hook running
    /// on the sweep thread itself, it only requests the stop.
    pub fn close(&self) {
        self.request_close();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("Sweep thread of {} ended abnormally", self.config.name);
            }
        }

        tracing::info!("Supervisor {} closed", self.config.name);
    }

    /// Sweep loop driven by the supervisor thread's runtime
    async fn sweep_loop(
        registry: Registry,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        'cycles: loop {
            // Snapshot so no registry lock is held while a cache is locked
            let caches: Vec<Arc<dyn Sweep>> = registry.lock().clone();

            for cache in &caches {
                if *shutdown_rx.borrow() {
                    break 'cycles;
                }
                Self::sweep_one(cache.as_ref());
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        // Shutdown signal received
                        break;
                    }
                }
            }
        }

        tracing::debug!("Sweep loop stopped");
    }

    /// Sweeps one cache and signals its gate, even when the sweep panicked
    fn sweep_one(cache: &dyn Sweep) {
        match panic::catch_unwind(AssertUnwindSafe(|| cache.sweep())) {
            Ok(removed) => {
                if removed > 0 {
                    tracing::trace!("Removed {} expired entries", removed);
                }
            }
            Err(_) => {
                tracing::warn!("Cache sweep panicked; continuing with the next cache");
            }
        }
        cache.swept().signal();
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Signal the sweep thread to stop when the supervisor is dropped
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("caches", &self.registry.lock().len())
            .field("closing", &*self.shutdown_tx.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, SystemClock};
    use crate::gate::SweepGate;
    use crate::{MapCache, SequenceCache, SetCache};
    use std::sync::mpsc;
    use std::time::Instant;

    const SECOND: Duration = Duration::from_secs(1);

    fn fast_supervisor() -> Supervisor {
        Supervisor::with_config(
            SupervisorConfig::default()
                .with_sweep_interval(Duration::from_millis(10))
                .with_name("test-supervisor"),
        )
    }

    /// A map cache holding one entry that is already expired on its clock
    fn expired_map(clock: &Arc<ManualClock>) -> Arc<MapCache<String, u32>> {
        let cache = MapCache::new(Some(SECOND)).with_clock(clock.clone());
        cache.set("stale", 1);
        Arc::new(cache)
    }

    /// Blocks until `cache` has been swept two more times
    fn wait_for_sweeps<C: Sweep + ?Sized>(cache: &C) -> bool {
        cache.swept().wait_timeout(5 * SECOND)
    }

    /// A cache whose every sweep panics
    struct Exploding {
        clock: SystemClock,
        swept: SweepGate,
    }

    impl Sweep for Exploding {
        fn sweep_at(&self, _now: Instant) -> usize {
            panic!("sweep failed");
        }

        fn clock(&self) -> &dyn Clock {
            &self.clock
        }

        fn swept(&self) -> &SweepGate {
            &self.swept
        }

        fn len(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_register_returns_same_handle() {
        let supervisor = Supervisor::new();
        let cache = Arc::new(SetCache::<u32>::new(None));

        let registered = supervisor.register(Arc::clone(&cache));
        assert!(Arc::ptr_eq(&cache, &registered));
        assert_eq!(supervisor.len(), 1);

        supervisor.register(Arc::clone(&cache));
        assert_eq!(supervisor.len(), 1);
    }

    #[test]
    fn test_deregister_unknown_cache_fails() {
        let supervisor = Supervisor::new();
        let cache = supervisor.register(Arc::new(SequenceCache::<u32>::new(None)));

        assert_eq!(supervisor.deregister(&cache), Ok(()));
        assert!(supervisor.is_empty());
        assert_eq!(supervisor.deregister(&cache), Err(Error::NotRegistered));
    }

    #[test]
    fn test_deregister_through_trait_object() {
        let supervisor = Supervisor::new();
        let cache = supervisor.register(Arc::new(MapCache::<String, u32>::new(None)));

        let erased: Arc<dyn Sweep> = cache.clone();
        assert_eq!(supervisor.deregister(&erased), Ok(()));
        assert!(supervisor.is_empty());
    }

    #[test]
    fn test_start_twice_and_after_close() {
        let supervisor = fast_supervisor();
        assert!(!supervisor.is_running());
        supervisor.start().unwrap();
        assert!(supervisor.is_running());
        assert_eq!(supervisor.start(), Err(Error::AlreadyStarted));

        supervisor.close();
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.start(), Err(Error::Closed));
    }

    #[test]
    fn test_background_sweep_evicts_expired_entries() {
        let clock = Arc::new(ManualClock::new());
        let supervisor = fast_supervisor();
        let cache = supervisor.register(expired_map(&clock));
        cache.set_with_lifetime("fresh", 2, 60 * SECOND);
        clock.advance(2 * SECOND);

        supervisor.start().unwrap();
        assert!(wait_for_sweeps(&*cache));

        assert_eq!(cache.get("stale"), Err(Error::MissingEntry));
        assert_eq!(cache.get("fresh"), Ok(2));
        supervisor.close();
    }

    #[tokio::test]
    async fn test_sweeps_run_beside_a_current_thread_runtime() {
        let clock = Arc::new(ManualClock::new());
        let supervisor = fast_supervisor();
        let cache = supervisor.register(expired_map(&clock));
        clock.advance(2 * SECOND);

        supervisor.start().unwrap();
        // Blocks the only runtime thread; the sweeps must still happen
        assert!(cache.swept().wait_timeout(5 * SECOND));
        assert!(cache.is_empty());
        supervisor.close();
    }

    #[test]
    fn test_sweep_thread_is_named_after_supervisor() {
        let (name_tx, name_rx) = mpsc::channel();
        let name_tx = parking_lot::Mutex::new(name_tx);
        let clock = Arc::new(ManualClock::new());
        let cache = MapCache::new(Some(SECOND))
            .with_clock(clock.clone())
            .with_on_dead(move |_: String, _: u32| {
                let name = thread::current().name().map(str::to_owned);
                let _ = name_tx.lock().send(name);
            });
        cache.set("stale", 1);
        clock.advance(2 * SECOND);

        let supervisor = fast_supervisor();
        supervisor.register(Arc::new(cache));
        supervisor.start().unwrap();

        let name = name_rx.recv_timeout(5 * SECOND).expect("cache was never swept");
        assert_eq!(name.as_deref(), Some("test-supervisor"));
        supervisor.close();
    }

    #[test]
    fn test_deregistered_cache_is_not_swept() {
        let clock = Arc::new(ManualClock::new());
        let supervisor = fast_supervisor();
        let kept = supervisor.register(expired_map(&clock));
        let dropped = supervisor.register(expired_map(&clock));
        clock.advance(2 * SECOND);

        supervisor.deregister(&dropped).unwrap();
        supervisor.start().unwrap();
        assert!(wait_for_sweeps(&*kept));

        assert!(kept.is_empty());
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped.swept().count(), 0);
        supervisor.close();
    }

    #[test]
    fn test_panicking_cache_does_not_stop_the_cycle() {
        let clock = Arc::new(ManualClock::new());
        let supervisor = fast_supervisor();

        let faulty = MapCache::new(Some(SECOND))
            .with_clock(clock.clone())
            .with_on_dead(|_: String, _: u32| panic!("eviction hook failed"));
        faulty.set("stale", 1);
        let faulty = supervisor.register(Arc::new(faulty));
        let healthy = supervisor.register(expired_map(&clock));
        clock.advance(2 * SECOND);

        supervisor.start().unwrap();
        assert!(wait_for_sweeps(&*healthy));

        assert!(healthy.is_empty());
        assert!(faulty.is_empty());
        assert!(supervisor.is_running());
        supervisor.close();
    }

    #[test]
    fn test_panicking_sweep_still_releases_waiters() {
        let supervisor = fast_supervisor();
        let exploding = supervisor.register(Arc::new(Exploding {
            clock: SystemClock,
            swept: SweepGate::new(0, 2).unwrap(),
        }));

        supervisor.start().unwrap();
        assert!(wait_for_sweeps(&*exploding));
        assert!(supervisor.is_running());
        supervisor.close();
    }

    #[test]
    fn test_close_mid_sweep_skips_remaining_caches() {
        let clock = Arc::new(ManualClock::new());
        let supervisor = fast_supervisor();

        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = parking_lot::Mutex::new(entered_tx);
        let release_rx = parking_lot::Mutex::new(release_rx);

        // The first cache blocks inside its sweep until released
        let first = MapCache::new(Some(SECOND))
            .with_clock(clock.clone())
            .with_on_dead(move |_: String, _: u32| {
                let _ = entered_tx.lock().send(());
                let _ = release_rx.lock().recv();
            });
        first.set("stale", 1);
        let first = supervisor.register(Arc::new(first));
        let second = supervisor.register(expired_map(&clock));
        clock.advance(2 * SECOND);

        supervisor.start().unwrap();
        entered_rx
            .recv_timeout(5 * SECOND)
            .expect("first cache was never swept");

        supervisor.request_close();
        release_tx.send(()).unwrap();
        supervisor.close();

        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
        assert_eq!(second.swept().count(), 0);

        // Nothing sweeps after close returns
        thread::sleep(Duration::from_millis(50));
        assert_eq!(second.len(), 1);
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_every_cache_shape_is_swept() {
        let clock = Arc::new(ManualClock::new());
        let supervisor = fast_supervisor();

        let map = supervisor.register(expired_map(&clock));
        let set = supervisor.register(Arc::new(SetCache::new(Some(SECOND)).with_clock(clock.clone())));
        let forever = supervisor.register(Arc::new(SetCache::new(None).with_clock(clock.clone())));
        let sequence = supervisor.register(Arc::new(SequenceCache::new(Some(SECOND)).with_clock(clock.clone())));
        set.add(5u32);
        forever.add(5u32);
        sequence.push("x");
        clock.advance(2 * SECOND);

        supervisor.start().unwrap();
        assert!(wait_for_sweeps(&*sequence));

        assert!(map.is_empty());
        assert!(set.is_empty());
        assert!(sequence.is_empty());
        assert!(forever.contains(&5));
        supervisor.close();
    }
}
