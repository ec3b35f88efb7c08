//! A batching metric recorder. Data points are enqueued into a bounded,
//! evicting queue and delivered to an opaque backend in batches, either
//! inline or on background tasks.

use config::{ConfigError, Resolver};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Count,
    Milliseconds,
    Bytes,
    None,
}

/// One recorded data point.
#[derive(Debug, Clone, PartialEq)]
pub struct Datum {
    pub name: String,
    pub unit: Unit,
    pub value: f64,
    pub dimensions: Vec<(String, String)>,
}

/// Dimensioned counter/timer recording. Shared process-wide; `record`
/// must be safe for concurrent callers.
#[async_trait::async_trait]
pub trait MetricSink: Send + Sync {
    fn record(&self, name: &str, unit: Unit, value: f64, dimensions: &[(&str, &str)]);

    /// Deliver queued data if the flush conditions hold, or
    /// unconditionally when `force` is set. Skips if another flush is
    /// already in progress.
    async fn flush(&self, force: bool);

    /// Final flush plus a bounded join of any in-flight deliveries.
    async fn shutdown(&self);
}

/// Delivery of one batch to the concrete monitoring backend.
#[async_trait::async_trait]
pub trait MetricBackend: Send + Sync {
    async fn deliver(&self, batch: Vec<Datum>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Deliver inline on the flushing task.
    Sync,
    /// Deliver on spawned tasks, joined at shutdown.
    Async,
}

#[derive(Debug, Clone)]
pub struct BatchingConfig {
    /// Queue capacity. When full, the oldest datum is evicted.
    pub queue_limit: usize,
    /// Deliver in batches of at most this many data points.
    pub batch_size: usize,
    /// A non-empty queue older than this is due for flushing.
    pub queue_timeout: Duration,
    pub delivery: DeliveryMode,
    /// Upper bound on waiting for in-flight deliveries at shutdown.
    pub shutdown_wait: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            queue_limit: 5000,
            batch_size: 20,
            queue_timeout: Duration::from_secs(10),
            delivery: DeliveryMode::Sync,
            shutdown_wait: Duration::from_secs(30),
        }
    }
}

impl BatchingConfig {
    pub fn from_config(cfg: &Resolver, connector: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            queue_limit: cfg.get_usize_or(connector, "metrics_queue_limit", defaults.queue_limit)?,
            batch_size: cfg.get_usize_or(connector, "metrics_batch_size", defaults.batch_size)?,
            queue_timeout: Duration::from_millis(cfg.get_u64_or(
                connector,
                "metrics_queue_timeout_millis",
                defaults.queue_timeout.as_millis() as u64,
            )?),
            delivery: if cfg.get_bool_or(connector, "metrics_async", false)? {
                DeliveryMode::Async
            } else {
                DeliveryMode::Sync
            },
            shutdown_wait: Duration::from_millis(cfg.get_u64_or(
                connector,
                "metrics_shutdown_wait_millis",
                defaults.shutdown_wait.as_millis() as u64,
            )?),
        })
    }
}

struct QueueState {
    data: VecDeque<Datum>,
    /// Enqueue time of the oldest datum, None when empty.
    oldest: Option<Instant>,
    evicted: u64,
}

struct Inner {
    backend: Arc<dyn MetricBackend>,
    cfg: BatchingConfig,
    queue: Mutex<QueueState>,
    // Single-holder flush lock: a flush observing the flag set skips.
    flushing: AtomicBool,
    in_flight: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// The standard `MetricSink`: a bounded evicting queue in front of a
/// batching delivery worker.
#[derive(Clone)]
pub struct BatchingSink {
    inner: Arc<Inner>,
}

impl BatchingSink {
    pub fn new(cfg: BatchingConfig, backend: Arc<dyn MetricBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                cfg,
                queue: Mutex::new(QueueState {
                    data: VecDeque::new(),
                    oldest: None,
                    evicted: 0,
                }),
                flushing: AtomicBool::new(false),
                in_flight: Mutex::new(Vec::new()),
            }),
        }
    }

    fn next_batch(&self) -> Vec<Datum> {
        let mut queue = self.inner.queue.lock().expect("metric queue is never poisoned");
        let take = queue.data.len().min(self.inner.cfg.batch_size);
        let batch: Vec<Datum> = queue.data.drain(..take).collect();
        if queue.data.is_empty() {
            queue.oldest = None;
        } else {
            queue.oldest = Some(Instant::now());
        }
        batch
    }

    fn is_due(&self) -> bool {
        let queue = self.inner.queue.lock().expect("metric queue is never poisoned");
        if queue.data.is_empty() {
            return false;
        }
        queue.data.len() >= self.inner.cfg.batch_size
            || queue
                .oldest
                .map(|at| at.elapsed() >= self.inner.cfg.queue_timeout)
                .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl MetricSink for BatchingSink {
    fn record(&self, name: &str, unit: Unit, value: f64, dimensions: &[(&str, &str)]) {
        let datum = Datum {
            name: name.to_string(),
            unit,
            value,
            dimensions: dimensions
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };

        let mut queue = self.inner.queue.lock().expect("metric queue is never poisoned");
        if queue.data.len() >= self.inner.cfg.queue_limit {
            queue.data.pop_front();
            queue.evicted += 1;
            if queue.evicted % 1000 == 1 {
                tracing::warn!(evicted = queue.evicted, "metric queue full, dropping oldest");
            }
        }
        if queue.data.is_empty() {
            queue.oldest = Some(Instant::now());
        }
        queue.data.push_back(datum);
    }

    async fn flush(&self, force: bool) {
        if !force && !self.is_due() {
            return;
        }
        if self
            .inner
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another flush holds the lock; it will drain what we queued.
            return;
        }

        loop {
            let batch = self.next_batch();
            if batch.is_empty() {
                break;
            }
            match self.inner.cfg.delivery {
                DeliveryMode::Sync => {
                    if let Err(err) = self.inner.backend.deliver(batch).await {
                        tracing::warn!(error = %err, "metric delivery failed");
                    }
                }
                DeliveryMode::Async => {
                    let backend = self.inner.backend.clone();
                    let task = tokio::spawn(async move {
                        if let Err(err) = backend.deliver(batch).await {
                            tracing::warn!(error = %err, "metric delivery failed");
                        }
                    });
                    let mut in_flight = self
                        .inner
                        .in_flight
                        .lock()
                        .expect("in-flight list is never poisoned");
                    in_flight.retain(|t| !t.is_finished());
                    in_flight.push(task);
                }
            }
        }

        self.inner.flushing.store(false, Ordering::Release);
    }

    async fn shutdown(&self) {
        self.flush(true).await;

        let pending: Vec<_> = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .expect("in-flight list is never poisoned");
            in_flight.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }

        let wait = self.inner.cfg.shutdown_wait;
        if tokio::time::timeout(wait, futures::future::join_all(pending))
            .await
            .is_err()
        {
            tracing::warn!(
                wait_millis = wait.as_millis() as u64,
                "metric deliveries still in flight at shutdown"
            );
        }
    }
}

/// A sink that drops everything. Useful for wiring and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait::async_trait]
impl MetricSink for NoopSink {
    fn record(&self, _name: &str, _unit: Unit, _value: f64, _dimensions: &[(&str, &str)]) {}
    async fn flush(&self, _force: bool) {}
    async fn shutdown(&self) {}
}
