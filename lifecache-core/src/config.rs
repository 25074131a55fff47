use std::time::Duration;

/// Default interval between supervisor sweep cycles
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Default name of the supervisor's sweep task
pub const DEFAULT_SUPERVISOR_NAME: &str = "cache-supervisor";

/// Lifetime policy shared by every cache variant
///
/// # Example
///
/// ```rust
/// use lifecache_core::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::new()
///     .with_lifetime(Duration::from_secs(30))
///     .with_auto_renew(false);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Lifetime applied to new and renewed entries (`None` = never expire)
    pub lifetime: Option<Duration>,
    /// Whether reads push an entry's deadline forward (default: true)
    pub auto_renew: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lifetime: None,
            auto_renew: true,
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lifetime of new entries
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Removes the lifetime, so entries never expire
    pub fn without_lifetime(mut self) -> Self {
        self.lifetime = None;
        self
    }

    /// Sets whether reads renew deadlines
    pub fn with_auto_renew(mut self, auto_renew: bool) -> Self {
        self.auto_renew = auto_renew;
        self
    }
}

/// Configuration for the supervisor's background sweep task
///
/// # Example
///
/// ```rust
/// use lifecache_core::SupervisorConfig;
/// use std::time::Duration;
///
/// let config = SupervisorConfig::default()
///     .with_sweep_interval(Duration::from_millis(100))
///     .with_name("session-sweeper");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Pause between sweep cycles (default: 500 milliseconds)
    pub sweep_interval: Duration,
    /// Name attached to the sweep task's tracing span
    pub name: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            name: DEFAULT_SUPERVISOR_NAME.to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sweep interval
    ///
    /// This determines how long the supervisor sleeps after visiting every
    /// registered cache.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the name used for the sweep task's span
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Create configuration from environment variables.
    ///
    /// Reads:
    /// - `LIFECACHE_SWEEP_INTERVAL_MS` - Sweep interval in milliseconds (defaults to 500)
    /// - `LIFECACHE_SUPERVISOR_NAME` - Task name (defaults to "cache-supervisor")
    pub fn from_env() -> Self {
        let sweep_interval = std::env::var("LIFECACHE_SWEEP_INTERVAL_MS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL);
        let name = std::env::var("LIFECACHE_SUPERVISOR_NAME")
            .unwrap_or_else(|_| DEFAULT_SUPERVISOR_NAME.to_string());

        Self {
            sweep_interval,
            name,
        }
    }
}
