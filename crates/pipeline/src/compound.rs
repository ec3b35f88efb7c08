use crate::connectors::Checkpointer;
use crate::processor::{Processor, ShutdownReason};
use crate::StreamRecord;
use std::collections::BTreeMap;

/// Multiplexes one input record stream through an ordered sequence of
/// child processors. Used to co-run the event and error-handler
/// processors on a single worker.
#[derive(Default)]
pub struct CompoundProcessor {
    children: Vec<Box<dyn Processor>>,
}

impl CompoundProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a child. Additions are idempotent: a child whose name is
    /// already present is dropped, and `false` is returned.
    pub fn add(&mut self, child: Box<dyn Processor>) -> bool {
        if self.children.iter().any(|c| c.name() == child.name()) {
            tracing::debug!(name = child.name(), "ignoring duplicate child processor");
            return false;
        }
        self.children.push(child);
        true
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[async_trait::async_trait]
impl Processor for CompoundProcessor {
    fn name(&self) -> &str {
        "compound"
    }

    async fn initialize(&mut self, shard_id: &str, starting_sequence: Option<&str>) {
        for child in &mut self.children {
            child.initialize(shard_id, starting_sequence).await;
        }
    }

    async fn process_batch(
        &mut self,
        records: &[StreamRecord],
        ms_behind: i64,
        checkpointer: &mut dyn Checkpointer,
    ) {
        for child in &mut self.children {
            child.process_batch(records, ms_behind, checkpointer).await;
        }
    }

    async fn shutdown(&mut self, reason: ShutdownReason, checkpointer: &mut dyn Checkpointer) {
        for child in &mut self.children {
            child.shutdown(reason, checkpointer).await;
        }
    }
}

type Constructor = Box<dyn Fn() -> anyhow::Result<Box<dyn Processor>> + Send + Sync>;

/// An explicit `name → constructor` registry for record processors,
/// supplied at startup. Names outside the registry are a configuration
/// error, not a lookup to attempt.
#[derive(Default)]
pub struct ProcessorRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> anyhow::Result<Box<dyn Processor>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn build(&self, name: &str) -> anyhow::Result<Box<dyn Processor>> {
        match self.constructors.get(name) {
            Some(constructor) => constructor(),
            None => anyhow::bail!(
                "unknown record processor '{name}'; registered: {:?}",
                self.names()
            ),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProcessor {
        name: String,
        batches: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Processor for CountingProcessor {
        fn name(&self) -> &str {
            &self.name
        }
        async fn initialize(&mut self, _shard_id: &str, _starting_sequence: Option<&str>) {}
        async fn process_batch(
            &mut self,
            _records: &[StreamRecord],
            _ms_behind: i64,
            _checkpointer: &mut dyn Checkpointer,
        ) {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }
        async fn shutdown(&mut self, _reason: ShutdownReason, _checkpointer: &mut dyn Checkpointer) {}
    }

    struct NoopCheckpointer;

    #[async_trait::async_trait]
    impl Checkpointer for NoopCheckpointer {
        async fn checkpoint(&mut self, _sequence_number: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_children_are_dropped_and_batches_fan_out() {
        let batches = Arc::new(AtomicUsize::new(0));
        let mut compound = CompoundProcessor::new();

        assert!(compound.add(Box::new(CountingProcessor {
            name: "events".to_string(),
            batches: batches.clone(),
        })));
        assert!(compound.add(Box::new(CountingProcessor {
            name: "errors".to_string(),
            batches: batches.clone(),
        })));
        assert!(!compound.add(Box::new(CountingProcessor {
            name: "events".to_string(),
            batches: batches.clone(),
        })));
        assert_eq!(compound.len(), 2);

        let mut checkpointer = NoopCheckpointer;
        compound.process_batch(&[], 0, &mut checkpointer).await;
        assert_eq!(batches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn registry_rejects_unknown_names() {
        let mut registry = ProcessorRegistry::new();
        registry.register("events", || {
            anyhow::bail!("not under test")
        });
        assert!(registry.build("events").is_err());
        let err = match registry.build("bogus") {
            Err(err) => err,
            Ok(_) => panic!("expected build(\"bogus\") to fail"),
        };
        assert!(err.to_string().contains("unknown record processor"));
    }
}
