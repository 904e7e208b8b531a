use chrono::{NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::entry::namespace_of;
use crate::cache::persistent::{bounded, DurableStore, StatRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Hit,
    Miss,
}

#[derive(Debug, Clone)]
struct StatEvent {
    day: NaiveDate,
    namespace: String,
    kind: StatKind,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Aggregate over a range of day buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate: f64,
}

impl StatsSummary {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a StatRecord>,
    {
        let (hits, misses) = records
            .into_iter()
            .fold((0, 0), |(h, m), record| (h + record.hits, m + record.misses));
        Self {
            total_hits: hits,
            total_misses: misses,
            hit_rate: hit_rate(hits, misses),
        }
    }
}

/// `hits / (hits + misses)`, or 0 when nothing was recorded.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

type BucketKey = (NaiveDate, String);

/// Hit/miss counters keyed by day and namespace.
///
/// Recording never blocks: events go into a bounded broadcast queue that drops
/// the oldest events on overflow, and a single writer task folds them into the
/// durable stats store. A process-local atomic view is kept alongside so
/// summaries still work while the durable tier is unreachable.
pub struct StatsRecorder {
    sender: broadcast::Sender<StatEvent>,
    local: RwLock<HashMap<BucketKey, Arc<Counters>>>,
    store: Arc<dyn DurableStore>,
    timeout: Duration,
    shutdown: watch::Sender<bool>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl StatsRecorder {
    /// Creates the recorder and spawns its writer task; must run inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn DurableStore>, capacity: usize, timeout: Duration) -> Self {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let writer = tokio::spawn(run_writer(
            Arc::clone(&store),
            receiver,
            shutdown_rx,
            timeout,
        ));

        Self {
            sender,
            local: RwLock::new(HashMap::new()),
            store,
            timeout,
            shutdown,
            writer: Mutex::new(Some(writer)),
        }
    }

    pub fn record_hit(&self, namespace: &str) {
        self.record(namespace, StatKind::Hit);
    }

    pub fn record_miss(&self, namespace: &str) {
        self.record(namespace, StatKind::Miss);
    }

    /// Records against the namespace prefix of `key`.
    pub fn record_for_key(&self, key: &str, kind: StatKind) {
        self.record(namespace_of(key), kind);
    }

    fn record(&self, namespace: &str, kind: StatKind) {
        let day = Utc::now().date_naive();
        let counters = self.counters(day, namespace);
        match kind {
            StatKind::Hit => counters.hits.fetch_add(1, Ordering::Relaxed),
            StatKind::Miss => counters.misses.fetch_add(1, Ordering::Relaxed),
        };

        // No receiver means the writer has stopped; the stat is simply dropped.
        let _ = self.sender.send(StatEvent {
            day,
            namespace: namespace.to_string(),
            kind,
        });
    }

    fn counters(&self, day: NaiveDate, namespace: &str) -> Arc<Counters> {
        let key = (day, namespace.to_string());
        if let Some(counters) = self.local.read().get(&key) {
            return Arc::clone(counters);
        }
        Arc::clone(self.local.write().entry(key).or_default())
    }

    /// Totals across `from..=to` from the durable store, falling back to local counters.
    pub async fn summarize(&self, from: NaiveDate, to: NaiveDate) -> StatsSummary {
        match bounded("read stats", self.timeout, self.store.records(from, to)).await {
            Ok(records) => StatsSummary::from_records(&records),
            Err(e) => {
                warn!(error = %e, "Durable stats unavailable, summarising local counters");
                let local: Vec<StatRecord> = self
                    .local_snapshot()
                    .into_iter()
                    .filter(|record| record.day >= from && record.day <= to)
                    .collect();
                StatsSummary::from_records(&local)
            }
        }
    }

    pub async fn summarize_today(&self) -> StatsSummary {
        let today = Utc::now().date_naive();
        self.summarize(today, today).await
    }

    /// Counters observed by this process only.
    pub fn local_snapshot(&self) -> Vec<StatRecord> {
        let mut records: Vec<StatRecord> = self
            .local
            .read()
            .iter()
            .map(|((day, namespace), counters)| StatRecord {
                day: *day,
                namespace: namespace.clone(),
                hits: counters.hits.load(Ordering::Relaxed),
                misses: counters.misses.load(Ordering::Relaxed),
            })
            .collect();
        records.sort_by(|a, b| (a.day, &a.namespace).cmp(&(b.day, &b.namespace)));
        records
    }

    /// Stops the writer after it has flushed whatever is still queued.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Stats writer task failed");
            }
        }
    }
}

impl Drop for StatsRecorder {
    fn drop(&mut self) {
        if let Some(handle) = self.writer.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_writer(
    store: Arc<dyn DurableStore>,
    mut receiver: broadcast::Receiver<StatEvent>,
    mut shutdown: watch::Receiver<bool>,
    timeout: Duration,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                let pending = drain(&mut receiver, HashMap::new());
                flush(&store, pending, timeout).await;
                debug!("Stats writer stopped");
                return;
            }
            event = receiver.recv() => event,
        };

        match first {
            Ok(event) => {
                let mut pending = HashMap::new();
                fold(&mut pending, event);
                let pending = drain(&mut receiver, pending);
                flush(&store, pending, timeout).await;
            }
            Err(broadcast::error::RecvError::Lagged(dropped)) => {
                warn!(dropped, "Stats queue overflowed, oldest events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn fold(pending: &mut HashMap<BucketKey, (u64, u64)>, event: StatEvent) {
    let bucket = pending.entry((event.day, event.namespace)).or_insert((0, 0));
    match event.kind {
        StatKind::Hit => bucket.0 += 1,
        StatKind::Miss => bucket.1 += 1,
    }
}

fn drain(
    receiver: &mut broadcast::Receiver<StatEvent>,
    mut pending: HashMap<BucketKey, (u64, u64)>,
) -> HashMap<BucketKey, (u64, u64)> {
    loop {
        match receiver.try_recv() {
            Ok(event) => fold(&mut pending, event),
            Err(broadcast::error::TryRecvError::Lagged(dropped)) => {
                warn!(dropped, "Stats queue overflowed, oldest events dropped");
            }
            Err(_) => return pending,
        }
    }
}

async fn flush(
    store: &Arc<dyn DurableStore>,
    pending: HashMap<BucketKey, (u64, u64)>,
    timeout: Duration,
) {
    for ((day, namespace), (hits, misses)) in pending {
        let result = bounded(
            "write stats",
            timeout,
            store.increment(day, &namespace, hits, misses),
        )
        .await;
        if let Err(e) = result {
            warn!(namespace = %namespace, error = %e, "Dropping stats update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InProcessStore;

    #[test]
    fn test_hit_rate() {
        assert_eq!(hit_rate(0, 0), 0.0);
        assert_eq!(hit_rate(1, 1), 0.5);
        assert_eq!(hit_rate(3, 0), 1.0);
    }

    #[tokio::test]
    async fn test_local_counters_are_immediate() {
        let recorder = StatsRecorder::spawn(Arc::new(InProcessStore::new()), 16, Duration::from_secs(1));
        recorder.record_hit("products");
        recorder.record_hit("products");
        recorder.record_miss("factories");

        let snapshot = recorder.local_snapshot();
        assert_eq!(snapshot.len(), 2);
        let products = snapshot.iter().find(|r| r.namespace == "products").unwrap();
        assert_eq!((products.hits, products.misses), (2, 0));
        recorder.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_to_store() {
        let store = Arc::new(InProcessStore::new());
        let recorder = StatsRecorder::spawn(store.clone(), 64, Duration::from_secs(1));
        recorder.record_for_key("products:1", StatKind::Hit);
        recorder.record_for_key("products:2", StatKind::Miss);
        recorder.record_for_key("orphan", StatKind::Miss);
        recorder.shutdown().await;

        let summary = recorder.summarize_today().await;
        assert_eq!(summary.total_hits, 1);
        assert_eq!(summary.total_misses, 2);
        assert!((summary.hit_rate - 1.0 / 3.0).abs() < 1e-9);

        // Recording after shutdown is accepted and dropped.
        recorder.record_hit("products");
    }

    #[tokio::test]
    async fn test_summarize_covers_inclusive_day_range() {
        use crate::cache::persistent::StatsStore;

        let store = Arc::new(InProcessStore::new());
        let day = |d: u32| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        store.increment(day(1), "products", 100, 100).await.unwrap();
        store.increment(day(2), "products", 3, 1).await.unwrap();
        store.increment(day(3), "factories", 1, 1).await.unwrap();
        store.increment(day(4), "products", 2, 0).await.unwrap();
        store.increment(day(5), "products", 100, 100).await.unwrap();

        let recorder = StatsRecorder::spawn(store, 16, Duration::from_secs(1));

        let summary = recorder.summarize(day(2), day(4)).await;
        assert_eq!(summary.total_hits, 6);
        assert_eq!(summary.total_misses, 2);
        assert!((summary.hit_rate - 0.75).abs() < 1e-9);

        let single = recorder.summarize(day(3), day(3)).await;
        assert_eq!((single.total_hits, single.total_misses), (1, 1));

        let empty = recorder.summarize(day(10), day(20)).await;
        assert_eq!(empty, StatsSummary::default());
        recorder.shutdown().await;
    }
}
