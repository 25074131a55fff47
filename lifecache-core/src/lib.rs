//! # Lifecache Core
//!
//! Time-to-live cache containers with a background sweep supervisor.
//!
//! ## Features
//!
//! - Three container shapes: [`MapCache`] (key-value), [`SetCache`] (unique
//!   members) and [`SequenceCache`] (ordered, index-addressed)
//! - Per-cache lifetime policy with optional renewal on read
//! - Eviction hooks invoked for every entry removed by delete or by a sweep
//! - One lock per cache; no global lock across caches
//! - A [`Supervisor`] that sweeps every registered cache on a fixed interval
//!   from its own thread and shuts down gracefully
//!
//! Expired entries are removed by sweeps, not on read, so eviction latency is
//! bounded by the sweep interval.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lifecache_core::{MapCache, SetCache, Supervisor, Sweep};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> lifecache_core::Result<()> {
//!     // Supervisor with default config (500 ms sweep interval)
//!     let supervisor = Supervisor::new();
//!
//!     // Register caches before or after starting
//!     let users = supervisor.register(Arc::new(
//!         MapCache::<String, String>::new(Some(Duration::from_secs(60))),
//!     ));
//!     let banned = supervisor.register(Arc::new(SetCache::<u64>::new(None)));
//!     supervisor.start()?;
//!
//!     users.set("user:123", "John Doe".to_string());
//!     banned.add(42);
//!
//!     if let Ok(name) = users.get("user:123") {
//!         println!("User: {}", name);
//!     }
//!
//!     // Block until the supervisor has swept `users` twice more
//!     users.swept().wait_timeout(Duration::from_secs(2));
//!
//!     supervisor.close();
//!     Ok(())
//! }
//! ```

mod cache;
mod clock;
mod config;
mod entry;
mod error;
mod gate;
mod map;
mod sequence;
mod set;
mod supervisor;

pub use cache::{Cache, Sweep};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, SupervisorConfig};
pub use entry::Entry;
pub use error::{Error, Result};
pub use gate::SweepGate;
pub use map::MapCache;
pub use sequence::SequenceCache;
pub use set::SetCache;
pub use supervisor::Supervisor;

// Re-export defaults for consumers building their own configuration layer
pub use config::{DEFAULT_SUPERVISOR_NAME, DEFAULT_SWEEP_INTERVAL};
pub use entry::MAX_LIFETIME;
