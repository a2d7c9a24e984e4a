//! Bounded in-memory queues for events and metrics with optional write-behind
//! persistence and a periodic flush-readiness check.
//!
//! The buffer never talks to the network. It decides *when* a flush is due and raises
//! [`EventBuffer::flush_ready`]; draining and shipping belong to the agent.

mod persist;

pub use persist::{EVENTS_NAMESPACE, METRICS_NAMESPACE};

use crate::config::AgentConfig;
use crate::models::{SecurityEvent, SecurityMetric};
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use persist::Persisted;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Fill ratio at which a flush is due regardless of elapsed time.
pub const FLUSH_TRIGGER_RATIO: f64 = 0.8;

#[derive(Default)]
struct Queues {
    events: VecDeque<SecurityEvent>,
    metrics: VecDeque<SecurityMetric>,
    last_flush: Option<Instant>,
    last_flush_at: Option<DateTime<Utc>>,
}

struct AutoFlush {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    pub events_buffered: u64,
    pub metrics_buffered: u64,
    pub events_flushed: u64,
    pub metrics_flushed: u64,
    pub current_event_buffer_size: usize,
    pub current_metric_buffer_size: usize,
    pub last_flush_time: Option<DateTime<Utc>>,
    pub auto_flush_running: bool,
}

pub struct EventBuffer {
    capacity: usize,
    flush_interval: Duration,
    persistence_ttl: Duration,
    queues: Mutex<Queues>,
    store: RwLock<Option<Arc<dyn KeyValueStore>>>,

    events_buffered: AtomicU64,
    metrics_buffered: AtomicU64,
    events_flushed: AtomicU64,
    metrics_flushed: AtomicU64,
    /// Last persistence key issued (µs since epoch); keys strictly increase
    key_clock: AtomicU64,

    running: AtomicBool,
    auto_flush: Mutex<Option<AutoFlush>>,
    /// Raised when a queue hits capacity; wakes the auto-flush loop early
    check_requested: Notify,
    /// Raised when a flush is due
    flush_ready: Notify,
}

impl EventBuffer {
    /// A zero `buffer_size` is raised to one; each queue always keeps its newest item.
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            capacity: config.buffer_size.max(1),
            flush_interval: config.flush_interval(),
            persistence_ttl: config.persistence_ttl(),
            queues: Mutex::new(Queues::default()),
            store: RwLock::new(None),
            events_buffered: AtomicU64::new(0),
            metrics_buffered: AtomicU64::new(0),
            events_flushed: AtomicU64::new(0),
            metrics_flushed: AtomicU64::new(0),
            key_clock: AtomicU64::new(0),
            running: AtomicBool::new(false),
            auto_flush: Mutex::new(None),
            check_requested: Notify::new(),
            flush_ready: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn queues(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self) -> Option<Arc<dyn KeyValueStore>> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attach an external store and recover anything it still holds into memory.
    pub async fn attach_store(&self, store: Arc<dyn KeyValueStore>) {
        *self.store.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&store));

        let events = persist::recover::<SecurityEvent>(store.as_ref()).await;
        let metrics = persist::recover::<SecurityMetric>(store.as_ref()).await;
        if events.is_empty() && metrics.is_empty() {
            return;
        }
        let (n_events, n_metrics) = (events.len(), metrics.len());
        {
            let mut q = self.queues();
            for event in events {
                push_bounded(&mut q.events, event, self.capacity);
            }
            for metric in metrics {
                push_bounded(&mut q.metrics, metric, self.capacity);
            }
        }
        self.events_buffered.fetch_add(n_events as u64, Ordering::Relaxed);
        self.metrics_buffered.fetch_add(n_metrics as u64, Ordering::Relaxed);
        info!(events = n_events, metrics = n_metrics, "loaded buffered items from store");
    }

    pub async fn add_event(&self, event: SecurityEvent) {
        let key = self.next_key::<SecurityEvent>();
        let persisted = self.store().map(|store| (store, event.clone()));
        let len = {
            let mut q = self.queues();
            push_bounded(&mut q.events, event, self.capacity);
            q.events.len()
        };
        self.events_buffered.fetch_add(1, Ordering::Relaxed);

        if let Some((store, event)) = persisted {
            persist::persist(store.as_ref(), &key, &event, self.persistence_ttl).await;
        }
        if len >= self.capacity {
            self.check_requested.notify_one();
        }
    }

    pub async fn add_metric(&self, metric: SecurityMetric) {
        let key = self.next_key::<SecurityMetric>();
        let persisted = self.store().map(|store| (store, metric.clone()));
        let len = {
            let mut q = self.queues();
            push_bounded(&mut q.metrics, metric, self.capacity);
            q.metrics.len()
        };
        self.metrics_buffered.fetch_add(1, Ordering::Relaxed);

        if let Some((store, metric)) = persisted {
            persist::persist(store.as_ref(), &key, &metric, self.persistence_ttl).await;
        }
        if len >= self.capacity {
            self.check_requested.notify_one();
        }
    }

    /// Drain and return every buffered event.
    pub async fn flush_events(&self) -> Vec<SecurityEvent> {
        let events: Vec<_> = {
            let mut q = self.queues();
            let drained = std::mem::take(&mut q.events);
            q.last_flush = Some(Instant::now());
            q.last_flush_at = Some(Utc::now());
            drained.into()
        };
        self.events_flushed
            .fetch_add(events.len() as u64, Ordering::Relaxed);

        if !events.is_empty() {
            if let Some(store) = self.store() {
                persist::remove_oldest::<SecurityEvent>(store.as_ref(), events.len()).await;
            }
        }
        events
    }

    /// Drain and return every buffered metric.
    pub async fn flush_metrics(&self) -> Vec<SecurityMetric> {
        let metrics: Vec<_> = {
            let mut q = self.queues();
            let drained = std::mem::take(&mut q.metrics);
            q.last_flush = Some(Instant::now());
            q.last_flush_at = Some(Utc::now());
            drained.into()
        };
        self.metrics_flushed
            .fetch_add(metrics.len() as u64, Ordering::Relaxed);

        if !metrics.is_empty() {
            if let Some(store) = self.store() {
                persist::remove_oldest::<SecurityMetric>(store.as_ref(), metrics.len()).await;
            }
        }
        metrics
    }

    /// Events plus metrics currently held.
    pub fn buffer_size(&self) -> usize {
        let q = self.queues();
        q.events.len() + q.metrics.len()
    }

    pub fn last_flush_time(&self) -> Option<DateTime<Utc>> {
        self.queues().last_flush_at
    }

    /// Drop everything, in memory and in the store.
    pub async fn clear(&self) {
        {
            let mut q = self.queues();
            q.events.clear();
            q.metrics.clear();
        }
        if let Some(store) = self.store() {
            persist::remove_all::<SecurityEvent>(store.as_ref()).await;
            persist::remove_all::<SecurityMetric>(store.as_ref()).await;
            info!("cleared all stored buffers");
        }
    }

    /// Start the periodic flush check. No-op if it is already running.
    pub fn start_auto_flush(self: &Arc<Self>) {
        let mut slot = self.auto_flush.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).auto_flush_loop(cancel.clone()));
        *slot = Some(AutoFlush { cancel, handle });
    }

    /// Stop the periodic flush check and wait for the loop to exit. No-op if not running.
    pub async fn stop_auto_flush(&self) {
        self.running.store(false, Ordering::SeqCst);
        let task = self
            .auto_flush
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                if e.is_panic() {
                    error!(error = %e, "auto flush loop panicked");
                }
            }
        }
    }

    async fn auto_flush_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.flush_interval) => {}
                _ = self.check_requested.notified() => {}
            }
            if cancel.is_cancelled() || !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.flush_if_needed();
        }
        debug!("auto flush loop stopped");
    }

    /// Whether a flush is due: the buffer is non-empty and either holds at least 80% of
    /// capacity or a full flush interval has passed since the last flush. Raises
    /// [`flush_ready`](Self::flush_ready) when it is.
    pub fn flush_if_needed(&self) -> bool {
        let (size, since_last_flush) = {
            let q = self.queues();
            (
                q.events.len() + q.metrics.len(),
                q.last_flush.map(|t| t.elapsed()),
            )
        };
        let due_by_time = since_last_flush.map_or(true, |elapsed| elapsed >= self.flush_interval);
        let due_by_size = size as f64 >= self.capacity as f64 * FLUSH_TRIGGER_RATIO;

        if (due_by_size || due_by_time) && size > 0 {
            debug!(buffer_size = size, "Triggering buffer flush");
            self.flush_ready.notify_one();
            true
        } else {
            false
        }
    }

    /// Resolves once a flush has been signalled as due.
    pub async fn flush_ready(&self) {
        self.flush_ready.notified().await;
    }

    pub fn stats(&self) -> BufferStats {
        let q = self.queues();
        BufferStats {
            events_buffered: self.events_buffered.load(Ordering::Relaxed),
            metrics_buffered: self.metrics_buffered.load(Ordering::Relaxed),
            events_flushed: self.events_flushed.load(Ordering::Relaxed),
            metrics_flushed: self.metrics_flushed.load(Ordering::Relaxed),
            current_event_buffer_size: q.events.len(),
            current_metric_buffer_size: q.metrics.len(),
            last_flush_time: q.last_flush_at,
            auto_flush_running: self.running.load(Ordering::SeqCst),
        }
    }

    /// Strictly increasing, zero-padded so lexicographic order is insertion order.
    fn next_key<T: Persisted>(&self) -> String {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let prev = self
            .key_clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|prev| prev);
        format!("{}_{:020}", T::KEY_PREFIX, now.max(prev + 1))
    }
}

/// Append, evicting from the front once `capacity` is reached.
fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    while !queue.is_empty() && queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(item);
}
