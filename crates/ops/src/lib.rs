//! Operational plumbing shared across the pipeline: the batching metric
//! sink, the process health flag, and logging setup.

pub mod logging;
pub mod metrics;

pub use metrics::{
    BatchingConfig, BatchingSink, Datum, DeliveryMode, MetricBackend, MetricSink, NoopSink, Unit,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared process-health capability. The HTTP surface reads it; the
/// processing core and the maintenance tasks write it.
#[derive(Debug, Clone)]
pub struct HealthFlag(Arc<AtomicBool>);

impl HealthFlag {
    pub fn new_healthy() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn set_healthy(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn set_unhealthy(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for HealthFlag {
    fn default() -> Self {
        Self::new_healthy()
    }
}
