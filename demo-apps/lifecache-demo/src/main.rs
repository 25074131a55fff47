use anyhow::{ensure, Result};
use futures::future::join_all;
use lifecache_core::{
    CacheConfig, MapCache, SequenceCache, SetCache, Supervisor, SupervisorConfig, Sweep, SweepGate,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LIFETIME_MS: u64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lifecache_demo=info,lifecache_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let lifetime = std::env::var("LIFECACHE_DEMO_LIFETIME_MS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(DEFAULT_LIFETIME_MS));

    let config = SupervisorConfig::from_env();
    tracing::info!("🧪 Lifecache Demo");
    tracing::info!("   Sweep interval: {:?}", config.sweep_interval);
    tracing::info!("   Entry lifetime: {:?}", lifetime);
    println!();

    let supervisor = Supervisor::with_config(config.clone());
    supervisor.start()?;

    // Run all scenarios
    demo_expiration(&supervisor, lifetime).await?;
    demo_renewal(&supervisor, lifetime).await?;
    demo_unbounded_set(&supervisor).await?;
    demo_sweep_gate().await?;
    demo_sequence(&supervisor, lifetime).await?;
    demo_parallel_access(&supervisor, lifetime).await?;

    tokio::task::block_in_place(|| supervisor.close());

    demo_close_mid_sweep(config).await?;

    println!();
    tracing::info!("✅ All scenarios passed!");

    Ok(())
}

/// Blocks (off the async workers) until the supervisor has swept `cache` twice
async fn wait_for_sweeps<C: Sweep + 'static>(cache: &Arc<C>, timeout: Duration) -> Result<()> {
    let cache = Arc::clone(cache);
    let released = tokio::task::spawn_blocking(move || cache.swept().wait_timeout(timeout)).await?;
    ensure!(released, "cache was not swept within {:?}", timeout);
    Ok(())
}

/// An entry is readable before its lifetime and gone after a sweep
async fn demo_expiration(supervisor: &Supervisor, lifetime: Duration) -> Result<()> {
    tracing::info!("Scenario: Expiration");

    let evicted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evicted);
    let cache = supervisor.register(Arc::new(
        MapCache::<String, String>::with_config(
            CacheConfig::new()
                .with_lifetime(lifetime)
                .with_auto_renew(false),
        )
        .with_on_dead(move |key, _| {
            tracing::debug!("evicted {}", key);
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    ));

    cache.set("session", "temporary".to_string());
    ensure!(cache.get("session")? == "temporary", "value should be readable immediately");

    tracing::info!("   Waiting {:?} for expiration...", lifetime * 2);
    tokio::time::sleep(lifetime * 2).await;
    wait_for_sweeps(&cache, Duration::from_secs(5)).await?;

    ensure!(
        cache.get("session").is_err(),
        "entry should be swept after its lifetime"
    );
    ensure!(evicted.load(Ordering::SeqCst) == 1, "on-dead hook should run once");

    supervisor.deregister(&cache)?;
    tracing::info!("   ✓ Expired entry swept and hook invoked");
    Ok(())
}

/// Reads keep a hot key alive past its first deadline
async fn demo_renewal(supervisor: &Supervisor, lifetime: Duration) -> Result<()> {
    tracing::info!("Scenario: Read renewal");

    let cache = supervisor.register(Arc::new(MapCache::<String, u64>::new(Some(lifetime))));
    cache.set("hot", 1);
    cache.set("cold", 2);

    let start = Instant::now();
    let reader = {
        let cache = Arc::clone(&cache);
        // Stops only if the hot key disappears
        tokio::spawn(async move {
            while cache.get("hot").is_ok() {
                tokio::time::sleep(lifetime / 4).await;
            }
        })
    };

    tokio::time::sleep(lifetime * 3).await;
    wait_for_sweeps(&cache, Duration::from_secs(5)).await?;

    ensure!(!reader.is_finished(), "hot key expired while being read");
    ensure!(cache.contains_key("hot"), "hot key should survive");
    ensure!(!cache.contains_key("cold"), "cold key should be swept");
    reader.abort();

    supervisor.deregister(&cache)?;
    tracing::info!("   ✓ Renewed key survived {:?}", start.elapsed());
    Ok(())
}

/// Members of a set without a lifetime are never swept
async fn demo_unbounded_set(supervisor: &Supervisor) -> Result<()> {
    tracing::info!("Scenario: Unbounded set");

    let cache = supervisor.register(Arc::new(SetCache::<u32>::new(None)));
    cache.add(5);

    wait_for_sweeps(&cache, Duration::from_secs(5)).await?;
    wait_for_sweeps(&cache, Duration::from_secs(5)).await?;
    ensure!(cache.contains(&5), "unbounded member should never be swept");

    ensure!(cache.discard(&5), "first discard removes the member");
    ensure!(!cache.discard(&5), "second discard is a no-op");

    supervisor.deregister(&cache)?;
    tracing::info!("   ✓ Unbounded member survived sweeps");
    Ok(())
}

/// A gate waiter wakes after exactly two signals and the count resets
async fn demo_sweep_gate() -> Result<()> {
    tracing::info!("Scenario: Sweep gate");

    let gate = Arc::new(SweepGate::new(0, 2)?);
    let waiter = {
        let gate = Arc::clone(&gate);
        tokio::task::spawn_blocking(move || gate.wait_timeout(Duration::from_secs(5)))
    };

    // Let the waiter park before signalling
    tokio::time::sleep(Duration::from_millis(50)).await;
    ensure!(!gate.signal(), "first signal should not release the gate");
    ensure!(gate.count() == 1, "count should be 1 after one signal");
    ensure!(!waiter.is_finished(), "waiter should still be blocked");
    ensure!(gate.signal(), "second signal should release the gate");

    ensure!(waiter.await?, "waiter was not released");
    ensure!(gate.count() == 0, "count should reset to 0");

    tracing::info!("   ✓ Waiter released after two signals, count reset");
    Ok(())
}

/// Closing during a sweep finishes that cache and skips the rest of the cycle
async fn demo_close_mid_sweep(config: SupervisorConfig) -> Result<()> {
    tracing::info!("Scenario: Close mid-sweep");

    let supervisor = Supervisor::with_config(config.with_name("closing-supervisor"));
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);

    // The first cache holds its sweep open until released
    let first = supervisor.register(Arc::new(
        MapCache::<String, u32>::new(Some(Duration::from_millis(1))).with_on_dead(move |key, _| {
            tracing::debug!("holding sweep open on {}", key);
            let _ = entered_tx.lock().send(());
            let _ = release_rx.lock().recv();
        }),
    ));
    let second = supervisor.register(Arc::new(MapCache::<String, u32>::new(Some(
        Duration::from_millis(1),
    ))));
    first.set("stale", 1);
    second.set("stale", 2);
    tokio::time::sleep(Duration::from_millis(10)).await;

    supervisor.start()?;
    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5))).await??;

    supervisor.request_close();
    release_tx.send(())?;
    tokio::task::block_in_place(|| supervisor.close());

    ensure!(first.is_empty(), "in-flight sweep should complete");
    ensure!(second.len() == 1, "second cache should be skipped");

    tokio::time::sleep(Duration::from_millis(50)).await;
    ensure!(second.len() == 1, "no sweep may run after close");

    tracing::info!("   ✓ In-flight sweep finished, remaining cache skipped");
    Ok(())
}

/// Sweeps drop expired elements and keep the order of the rest
async fn demo_sequence(supervisor: &Supervisor, lifetime: Duration) -> Result<()> {
    tracing::info!("Scenario: Sequence");

    let cache = supervisor.register(Arc::new(SequenceCache::<String>::with_config(
        CacheConfig::new()
            .with_lifetime(lifetime)
            .with_auto_renew(false),
    )));
    for i in 0..6 {
        cache.push(format!("event-{}", i));
    }
    // Keep the odd events around for longer
    for index in [1, 3, 5] {
        cache.renew(index, Some(lifetime * 100))?;
    }

    tokio::time::sleep(lifetime * 2).await;
    wait_for_sweeps(&cache, Duration::from_secs(5)).await?;

    let survivors: Vec<String> = cache.slice(..);
    ensure!(
        survivors == ["event-1", "event-3", "event-5"],
        "unexpected survivors: {:?}",
        survivors
    );

    supervisor.deregister(&cache)?;
    tracing::info!("   ✓ Survivors kept their order: {:?}", survivors);
    Ok(())
}

/// Concurrent writers and readers on one cache while the supervisor sweeps it
async fn demo_parallel_access(supervisor: &Supervisor, lifetime: Duration) -> Result<()> {
    tracing::info!("Scenario: Parallel access (500 concurrent operations)");

    let num_operations = 500;
    let cache = supervisor.register(Arc::new(MapCache::<String, String>::new(Some(
        lifetime * 100,
    ))));
    let start = Instant::now();

    let set_futures: Vec<_> = (0..num_operations)
        .map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache.set(format!("parallel-{}", i), format!("value-{}", i));
            })
        })
        .collect();

    for result in join_all(set_futures).await {
        result?;
    }
    let set_elapsed = start.elapsed();

    let errors = Arc::new(AtomicUsize::new(0));
    let get_futures: Vec<_> = (0..num_operations)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let errors = Arc::clone(&errors);
            tokio::spawn(async move {
                match cache.get(&format!("parallel-{}", i)) {
                    Ok(value) if value == format!("value-{}", i) => {}
                    other => {
                        tracing::error!("Value mismatch for parallel-{}: {:?}", i, other);
                        errors.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for result in join_all(get_futures).await {
        result?;
    }
    let get_elapsed = start.elapsed() - set_elapsed;

    tracing::info!("   SET {} keys in {:?}", num_operations, set_elapsed);
    tracing::info!("   GET {} keys in {:?}", num_operations, get_elapsed);

    let error_count = errors.load(Ordering::SeqCst);
    ensure!(error_count == 0, "{} values did not match", error_count);

    supervisor.deregister(&cache)?;
    tracing::info!("   ✓ All {} values verified correctly", num_operations);
    Ok(())
}
