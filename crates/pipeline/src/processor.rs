use crate::buffer::Buffer;
use crate::connectors::Checkpointer;
use crate::decoders::{DecodeClass, Disposition, RecordDecoder};
use crate::emitter::Emitter;
use crate::retry::RetryPolicy;
use crate::StreamRecord;
use bytes::Bytes;
use config::{ConfigError, Resolver};
use ops::{HealthFlag, MetricSink, Unit};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why the coordinator is shutting this shard's processor down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The shard is closing; drain and checkpoint one final time.
    Terminate,
    /// Another worker owns the shard now; emit or checkpoint nothing.
    Zombie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Init,
    Running,
    Draining,
    Terminated,
    Abandoned,
}

/// A shard-scoped processor driven by the stream coordinator. One
/// instance per owned shard; never shared across shards.
#[async_trait::async_trait]
pub trait Processor: Send {
    /// A stable identity, used by the compound processor to
    /// de-duplicate child additions.
    fn name(&self) -> &str;

    async fn initialize(&mut self, shard_id: &str, starting_sequence: Option<&str>);

    async fn process_batch(
        &mut self,
        records: &[StreamRecord],
        ms_behind: i64,
        checkpointer: &mut dyn Checkpointer,
    );

    async fn shutdown(&mut self, reason: ShutdownReason, checkpointer: &mut dyn Checkpointer);
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub emit_retry_limit: u32,
    pub checkpoint_retry_limit: u32,
    /// Tag per-batch metrics with the shard id.
    pub shard_level_metrics: bool,
    /// Base delay of the retry backoff. 100ms in production; tests
    /// shrink it.
    pub backoff_base: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            emit_retry_limit: 3,
            checkpoint_retry_limit: 3,
            shard_level_metrics: false,
            backoff_base: Duration::from_millis(100),
        }
    }
}

impl ProcessorConfig {
    pub fn from_config(cfg: &Resolver, connector: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            emit_retry_limit: cfg.get_u32_or(connector, "emit_retry_limit", defaults.emit_retry_limit)?,
            checkpoint_retry_limit: cfg.get_u32_or(
                connector,
                "checkpoint_retry_limit",
                defaults.checkpoint_retry_limit,
            )?,
            shard_level_metrics: cfg.get_bool_or(connector, "emit_shard_level_metrics", false)?,
            backoff_base: defaults.backoff_base,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BatchCounts {
    valid: u64,
    sanitized: u64,
    parse_failures: u64,
    validation_failures: u64,
    serialization_failures: u64,
    unexpected: u64,
    buffered: u64,
}

impl BatchCounts {
    fn bump(&mut self, class: DecodeClass) {
        match class {
            DecodeClass::Valid => self.valid += 1,
            DecodeClass::Sanitized => self.sanitized += 1,
            DecodeClass::ParseFailure => self.parse_failures += 1,
            DecodeClass::ValidationFailure => self.validation_failures += 1,
            DecodeClass::SerializationFailure => self.serialization_failures += 1,
        }
    }
}

/// The per-shard record processing loop: decode each record, buffer
/// what the decoder keeps, flush when the buffer says so, and advance
/// the shard checkpoint.
pub struct RecordProcessor {
    name: String,
    decoder: Box<dyn RecordDecoder>,
    buffer: Buffer<Bytes>,
    emitter: Box<dyn Emitter<Bytes>>,
    metrics: Arc<dyn MetricSink>,
    cfg: ProcessorConfig,
    health: HealthFlag,
    shard_id: String,
    state: ProcessorState,
}

impl RecordProcessor {
    pub fn new(
        name: impl Into<String>,
        decoder: Box<dyn RecordDecoder>,
        buffer: Buffer<Bytes>,
        emitter: Box<dyn Emitter<Bytes>>,
        metrics: Arc<dyn MetricSink>,
        cfg: ProcessorConfig,
        health: HealthFlag,
    ) -> Self {
        Self {
            name: name.into(),
            decoder,
            buffer,
            emitter,
            metrics,
            cfg,
            health,
            shard_id: String::new(),
            state: ProcessorState::Init,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    fn submit(&self, name: &str, unit: Unit, value: f64) {
        if self.cfg.shard_level_metrics {
            self.metrics.record(
                name,
                unit,
                value,
                &[("Operation", "ProcessRecords"), ("ShardId", &self.shard_id)],
            );
        } else {
            self.metrics
                .record(name, unit, value, &[("Operation", "ProcessRecords")]);
        }
    }

    fn submit_batch(&self, counts: &BatchCounts, ms_behind: i64, elapsed: Duration) {
        self.submit("RecordsBuffered", Unit::Count, counts.buffered as f64);
        self.submit("ValidEvents", Unit::Count, counts.valid as f64);
        self.submit("SanitizedEvents", Unit::Count, counts.sanitized as f64);
        self.submit("ParseFailures", Unit::Count, counts.parse_failures as f64);
        self.submit(
            "ValidationFailures",
            Unit::Count,
            counts.validation_failures as f64,
        );
        self.submit(
            "SerializationFailures",
            Unit::Count,
            counts.serialization_failures as f64,
        );
        self.submit("UnexpectedFailures", Unit::Count, counts.unexpected as f64);
        self.submit("MillisBehindLatest", Unit::Milliseconds, ms_behind as f64);
        self.submit(
            "ProcessBatchTime",
            Unit::Milliseconds,
            elapsed.as_millis() as f64,
        );
    }

    /// Emit the buffered batch with bounded retries, then advance the
    /// shard checkpoint. The checkpoint advances even when records
    /// remain failed after retries: delivery is at-least-once, and a
    /// stuck checkpoint would stall the whole shard.
    async fn flush_and_checkpoint(&mut self, checkpointer: &mut dyn Checkpointer) {
        let last_sequence = self.buffer.last_sequence_number().map(str::to_owned);

        if !self.buffer.is_empty() {
            let mut policy = RetryPolicy::new(self.cfg.emit_retry_limit, self.cfg.backoff_base);
            let residual = loop {
                let batch = self.buffer.snapshot();
                let failed = match self.emitter.emit(&batch).await {
                    Ok(failed) if failed.is_empty() => break Vec::new(),
                    Ok(failed) => {
                        tracing::warn!(
                            shard = %self.shard_id,
                            failed = failed.len(),
                            attempt = policy.attempts() + 1,
                            "emit left failed records"
                        );
                        failed
                    }
                    Err(err) => {
                        tracing::warn!(
                            shard = %self.shard_id,
                            error = %err,
                            attempt = policy.attempts() + 1,
                            "emit failed"
                        );
                        batch.records.to_vec()
                    }
                };
                match policy.next_backoff() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => break failed,
                }
            };

            if !residual.is_empty() {
                tracing::error!(
                    shard = %self.shard_id,
                    dropped = residual.len(),
                    "emit retries exhausted"
                );
                self.emitter.fail(residual).await;
            }
        }

        self.buffer.clear();

        let Some(sequence) = last_sequence else {
            return;
        };
        let mut policy = RetryPolicy::new(self.cfg.checkpoint_retry_limit, self.cfg.backoff_base);
        loop {
            match checkpointer.checkpoint(&sequence).await {
                Ok(()) => {
                    self.submit("CheckpointAvailability", Unit::Count, 1.0);
                    self.health.set_healthy();
                    return;
                }
                Err(err) => {
                    self.submit("CheckpointAvailability", Unit::Count, 0.0);
                    tracing::warn!(
                        shard = %self.shard_id,
                        error = %err,
                        %sequence,
                        "checkpoint failed"
                    );
                    match policy.next_backoff() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            tracing::error!(
                                shard = %self.shard_id,
                                %sequence,
                                "checkpoint retries exhausted"
                            );
                            self.health.set_unhealthy();
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Processor for RecordProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self, shard_id: &str, starting_sequence: Option<&str>) {
        self.shard_id = shard_id.to_string();
        self.state = ProcessorState::Running;
        tracing::info!(
            processor = %self.name,
            shard = shard_id,
            starting_sequence = starting_sequence.unwrap_or("<none>"),
            "initialized shard processor"
        );
    }

    async fn process_batch(
        &mut self,
        records: &[StreamRecord],
        ms_behind: i64,
        checkpointer: &mut dyn Checkpointer,
    ) {
        match self.state {
            ProcessorState::Terminated | ProcessorState::Abandoned => {
                tracing::warn!(
                    processor = %self.name,
                    shard = %self.shard_id,
                    state = ?self.state,
                    "dropping batch handed to a finished processor"
                );
                return;
            }
            ProcessorState::Init => {
                tracing::warn!(processor = %self.name, "processing a batch before initialize");
            }
            _ => {}
        }

        let started = Instant::now();
        let mut counts = BatchCounts::default();

        for record in records {
            match self.decoder.decode(&self.shard_id, record) {
                Ok(Disposition::Append {
                    data,
                    class,
                    event_timestamp,
                }) => {
                    counts.bump(class);
                    counts.buffered += 1;
                    let byte_len = data.len();
                    self.buffer.append(
                        data,
                        byte_len,
                        &record.sequence_number,
                        event_timestamp,
                        record.arrival,
                    );
                }
                Ok(Disposition::Skip { class }) => counts.bump(class),
                Err(err) => {
                    counts.unexpected += 1;
                    tracing::error!(
                        shard = %self.shard_id,
                        sequence = %record.sequence_number,
                        error = %err,
                        "unexpected decode failure"
                    );
                }
            }
        }

        self.submit_batch(&counts, ms_behind, started.elapsed());

        if self.buffer.should_flush() {
            self.flush_and_checkpoint(checkpointer).await;
        }
        self.metrics.flush(false).await;
    }

    async fn shutdown(&mut self, reason: ShutdownReason, checkpointer: &mut dyn Checkpointer) {
        tracing::info!(
            processor = %self.name,
            shard = %self.shard_id,
            ?reason,
            "shutting down shard processor"
        );
        match reason {
            ShutdownReason::Terminate => {
                self.state = ProcessorState::Draining;
                self.flush_and_checkpoint(checkpointer).await;
                self.state = ProcessorState::Terminated;
            }
            ShutdownReason::Zombie => {
                self.state = ProcessorState::Abandoned;
            }
        }
        self.emitter.shutdown().await;
        self.metrics.shutdown().await;
    }
}
