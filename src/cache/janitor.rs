use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::memory::MemoryTier;
use crate::cache::persistent::{bounded, DurableStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JanitorState {
    Stopped,
    Running,
}

/// What one tick removed. `durable_removed` reports the previous durable purge,
/// since purges run detached from the tick that issued them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub memory_removed: usize,
    pub durable_removed: u64,
    pub ticks: u64,
}

struct Shared {
    memory: Arc<MemoryTier>,
    durable: Option<Arc<dyn DurableStore>>,
    timeout: Duration,
    purge_in_flight: AtomicBool,
    report: Mutex<SweepReport>,
}

/// Periodic purge of expired entries from both tiers.
///
/// Ticks run on one task, so memory sweeps never overlap; ticks missed while a
/// sweep runs are skipped. The durable purge is detached and at most one is in
/// flight at a time.
pub struct Janitor {
    shared: Arc<Shared>,
    interval: Duration,
    running: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl Janitor {
    pub fn new(
        memory: Arc<MemoryTier>,
        durable: Option<Arc<dyn DurableStore>>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                memory,
                durable,
                timeout,
                purge_in_flight: AtomicBool::new(false),
                report: Mutex::new(SweepReport::default()),
            }),
            interval,
            running: None,
        }
    }

    pub fn state(&self) -> JanitorState {
        match &self.running {
            Some((_, handle)) if !handle.is_finished() => JanitorState::Running,
            _ => JanitorState::Stopped,
        }
    }

    pub fn last_report(&self) -> SweepReport {
        *self.shared.report.lock()
    }

    /// Starts ticking; must run inside a Tokio runtime. Starting a running janitor
    /// is a no-op.
    pub fn start(&mut self) {
        if self.state() == JanitorState::Running {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let period = self.interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => sweep(&shared),
                }
            }
            debug!("Janitor loop exited");
        });

        info!(interval_ms = period.as_millis() as u64, "Janitor started");
        self.running = Some((stop_tx, handle));
    }

    /// Stops ticking; no tick starts after this returns.
    pub async fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.running.take() {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Janitor task ended abnormally");
            }
            info!("Janitor stopped");
        }
    }

    /// Runs one sweep of both tiers on the caller's task, awaiting the durable
    /// purge instead of detaching it.
    pub async fn sweep_now(&self) -> SweepReport {
        sweep_memory(&self.shared);
        if let Some(durable) = claim_purge(&self.shared) {
            purge(&self.shared, durable).await;
        }
        self.last_report()
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        if let Some((stop_tx, handle)) = self.running.take() {
            let _ = stop_tx.send(true);
            handle.abort();
        }
    }
}

fn sweep(shared: &Arc<Shared>) {
    sweep_memory(shared);
    if let Some(durable) = claim_purge(shared) {
        let shared = Arc::clone(shared);
        tokio::spawn(async move { purge(&shared, durable).await });
    }
}

fn sweep_memory(shared: &Shared) {
    let memory_removed = shared.memory.sweep_expired();
    {
        let mut report = shared.report.lock();
        report.memory_removed = memory_removed;
        report.ticks += 1;
    }
    debug!(memory_removed, "Janitor swept memory tier");
}

/// Marks a durable purge as in flight, or returns `None` if one already is.
fn claim_purge(shared: &Shared) -> Option<Arc<dyn DurableStore>> {
    let durable = shared.durable.clone()?;
    if shared.purge_in_flight.swap(true, Ordering::AcqRel) {
        debug!("Previous durable purge still running, skipping");
        return None;
    }
    Some(durable)
}

async fn purge(shared: &Shared, durable: Arc<dyn DurableStore>) {
    let result = bounded(
        "purge expired entries",
        shared.timeout,
        durable.delete_expired(Utc::now()),
    )
    .await;

    match result {
        Ok(removed) => {
            shared.report.lock().durable_removed = removed;
            if removed > 0 {
                debug!(removed, tier = durable.name(), "Janitor purged durable tier");
            }
        }
        Err(e) => warn!(error = %e, "Durable purge failed"),
    }
    shared.purge_in_flight.store(false, Ordering::Release);
}
