use crate::buffer::BufferSnapshot;
use crate::connectors::ObjectStore;
use crate::emitter::{EmitError, Emitter};
use bytes::Bytes;
use chrono::{Datelike, Timelike, Utc};
use config::{ConfigError, Resolver};
use flate2::write::GzEncoder;
use flate2::Compression;
use ops::{MetricSink, Unit};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

/// Derive the archival object key for a batch:
/// `<prefix>/YYYY/MM/DD/HH/<firstSeq>-<lastSeq>.(gzip|json)`, with the
/// time partition taken from the batch's first arrival timestamp (UTC),
/// or the current time for a batch with no timestamp. Sequence numbers
/// are monotone per shard, so keys never collide within a prefix.
pub fn object_key<T>(prefix: &str, gzip: bool, batch: &BufferSnapshot<'_, T>) -> String {
    let ts = batch.first_timestamp.unwrap_or_else(Utc::now);
    let first = batch.first_sequence_number.unwrap_or("0");
    let last = batch.last_sequence_number.unwrap_or("0");
    let ext = if gzip { "gzip" } else { "json" };
    format!(
        "{prefix}/{:04}/{:02}/{:02}/{:02}/{first}-{last}.{ext}",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour()
    )
}

/// Writes each batch as one object: the ordered concatenation of the
/// buffered records, gzip-wrapped when configured. All-or-nothing: any
/// failure fails the entire batch, and a retried batch overwrites the
/// same key.
pub struct ArchivalEmitter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    gzip: bool,
    metrics: Arc<dyn MetricSink>,
}

impl ArchivalEmitter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        gzip: bool,
        metrics: Arc<dyn MetricSink>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
            gzip,
            metrics,
        }
    }

    /// Resolve an emitter from configuration. `bucket_key` selects the
    /// destination bucket (`s3_telemetry_bucket` for the event path,
    /// `s3_error_bucket` for the error path).
    pub fn from_config(
        cfg: &Resolver,
        connector: Option<&str>,
        bucket_key: &str,
        store: Arc<dyn ObjectStore>,
        metrics: Arc<dyn MetricSink>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            store,
            cfg.get_string(connector, bucket_key)?,
            cfg.get_string_or(connector, "s3_event_path_prefix", "events"),
            cfg.get_bool_or(connector, "s3_compress_data", true)?,
            metrics,
        ))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object_key(&self, batch: &BufferSnapshot<'_, Bytes>) -> String {
        object_key(&self.prefix, self.gzip, batch)
    }

    fn body(&self, batch: &BufferSnapshot<'_, Bytes>) -> Result<Vec<u8>, EmitError> {
        let total: usize = batch.records.iter().map(|r| r.len()).sum();
        if !self.gzip {
            let mut body = Vec::with_capacity(total);
            for record in batch.records {
                body.extend_from_slice(record);
            }
            return Ok(body);
        }

        let mut encoder = GzEncoder::new(Vec::with_capacity(total / 4), Compression::default());
        for record in batch.records {
            encoder.write_all(record).map_err(EmitError::Compress)?;
        }
        encoder.finish().map_err(EmitError::Compress)
    }

    async fn upload(&mut self, batch: &BufferSnapshot<'_, Bytes>) -> Result<(), EmitError> {
        let key = self.object_key(batch);

        let started = Instant::now();
        let body = self.body(batch)?;
        self.metrics.record(
            "FileCompressTime",
            Unit::Milliseconds,
            started.elapsed().as_millis() as f64,
            &[],
        );

        let started = Instant::now();
        let put = self.store.put(&self.bucket, &key, Bytes::from(body)).await;
        self.metrics.record(
            "S3FileUploadTime",
            Unit::Milliseconds,
            started.elapsed().as_millis() as f64,
            &[],
        );
        self.metrics.record(
            "S3UploadAvailability",
            Unit::Count,
            if put.is_ok() { 1.0 } else { 0.0 },
            &[],
        );

        match put {
            Ok(()) => {
                tracing::info!(bucket = %self.bucket, %key, records = batch.records.len(), "archived batch");
                Ok(())
            }
            Err(source) => Err(EmitError::Upload { key, source }),
        }
    }
}

#[async_trait::async_trait]
impl Emitter<Bytes> for ArchivalEmitter {
    async fn emit(&mut self, batch: &BufferSnapshot<'_, Bytes>) -> Result<Vec<Bytes>, EmitError> {
        if batch.records.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.upload(batch).await;
        self.metrics.record(
            "EmitAvailability",
            Unit::Count,
            if result.is_ok() { 1.0 } else { 0.0 },
            &[],
        );
        result.map(|()| Vec::new())
    }

    async fn fail(&mut self, records: Vec<Bytes>) {
        tracing::error!(
            bucket = %self.bucket,
            count = records.len(),
            "records could not be archived and are being dropped"
        );
    }

    async fn shutdown(&mut self) {
        self.metrics.flush(true).await;
    }
}
