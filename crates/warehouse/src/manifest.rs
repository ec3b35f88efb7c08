use crate::connector::WarehouseConnector;
use crate::months::YearMonth;
use crate::templates::SqlTemplates;
use crate::{CredentialSource, SessionFactory, WarehouseError};
use bytes::Bytes;
use config::{ConfigError, Resolver};
use ops::{MetricSink, Unit};
use pipeline::{BufferSnapshot, EmitError, Emitter, ObjectStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub url: String,
    pub mandatory: bool,
}

/// The manifest consumed atomically by the warehouse COPY: one entry
/// per archival object of the batch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(scheme: &str, bucket: &str, keys: &[String], mandatory: bool) -> Self {
        Self {
            entries: keys
                .iter()
                .map(|key| ManifestEntry {
                    url: format!("{scheme}://{bucket}/{key}"),
                    mandatory,
                })
                .collect(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

#[derive(Debug, Clone)]
pub struct ManifestEmitterConfig {
    /// The archival bucket holding both the pointed-to objects and the
    /// manifests.
    pub bucket: String,
    pub manifest_prefix: String,
    pub store_scheme: String,
    pub mandatory: bool,
    pub schema: String,
    pub events_prefix: String,
    pub load_staging_table: String,
    pub dedupe_prefix: String,
    pub retention_months: i32,
    /// Full object URL of the COPY jsonpaths file.
    pub jsonpaths_url: String,
}

impl ManifestEmitterConfig {
    pub fn from_config(cfg: &Resolver) -> Result<Self, ConfigError> {
        let s3 = Some("s3");
        let redshift = Some("redshift");
        let config_bucket = cfg.get_string(s3, "s3_config_bucket")?;
        let jsonpaths = cfg.get_string(redshift, "jsonpath_filename")?;
        Ok(Self {
            bucket: cfg.get_string(s3, "s3_telemetry_bucket")?,
            manifest_prefix: cfg.get_string_or(s3, "s3_manifest_path_prefix", "manifests"),
            store_scheme: cfg.get_string_or(s3, "s3_store_scheme", "s3"),
            mandatory: cfg.get_bool_or(redshift, "copy_mandatory", true)?,
            schema: cfg.get_string(redshift, "redshift_schema")?,
            events_prefix: cfg.get_string_or(redshift, "events_table_prefix", "events"),
            load_staging_table: cfg.get_string_or(redshift, "load_staging_table", "load_staging"),
            dedupe_prefix: cfg.get_string_or(
                redshift,
                "dedupe_staging_table_prefix",
                "dedupe_staging",
            ),
            retention_months: cfg.get_i32_or(redshift, "warm_data_lifetime_months", 6)?,
            jsonpaths_url: format!("s3://{config_bucket}/{jsonpaths}"),
        })
    }
}

/// Loads batches of archival object pointers into the warehouse: write
/// a manifest, COPY into a load-staging table, then upsert each
/// in-window month through an ephemeral dedupe-staging table.
///
/// Statements autocommit individually, so a mid-upsert failure leaves
/// rows behind in the staging tables; the next attempt drops and
/// recreates them, and the dedupe join absorbs any rows that did land.
pub struct ManifestEmitter {
    store: Arc<dyn ObjectStore>,
    factory: Arc<dyn SessionFactory>,
    credentials: Arc<dyn CredentialSource>,
    templates: SqlTemplates,
    cfg: ManifestEmitterConfig,
    metrics: Arc<dyn MetricSink>,
    now: fn() -> YearMonth,
}

impl ManifestEmitter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        factory: Arc<dyn SessionFactory>,
        credentials: Arc<dyn CredentialSource>,
        templates: SqlTemplates,
        cfg: ManifestEmitterConfig,
        metrics: Arc<dyn MetricSink>,
    ) -> Self {
        Self {
            store,
            factory,
            credentials,
            templates,
            cfg,
            metrics,
            now: YearMonth::now_utc,
        }
    }

    /// Test seam: pin the clock that anchors the retention window.
    #[doc(hidden)]
    pub fn with_clock(mut self, now: fn() -> YearMonth) -> Self {
        self.now = now;
        self
    }

    /// The manifest object key: `<prefix>/<firstBase>-<lastBase>`,
    /// where the basenames come from the first and last pointer of the
    /// batch. Like archival keys, this is derived from sequence-ordered
    /// input, so retries overwrite the same manifest.
    fn manifest_key(&self, pointers: &[String]) -> String {
        let first = basename(pointers.first().map(String::as_str).unwrap_or("0"));
        let last = basename(pointers.last().map(String::as_str).unwrap_or("0"));
        format!("{}/{first}-{last}", self.cfg.manifest_prefix)
    }

    async fn load(&self, pointers: &[String]) -> Result<(), WarehouseError> {
        let manifest = Manifest::new(
            &self.cfg.store_scheme,
            &self.cfg.bucket,
            pointers,
            self.cfg.mandatory,
        );
        let manifest_key = self.manifest_key(pointers);
        self.store
            .put(&self.cfg.bucket, &manifest_key, manifest.to_bytes()?)
            .await
            .map_err(|source| WarehouseError::ManifestUpload {
                key: manifest_key.clone(),
                source,
            })?;
        let manifest_url = format!(
            "{}://{}/{}",
            self.cfg.store_scheme, self.cfg.bucket, manifest_key
        );

        let mut connector = WarehouseConnector::open(
            &*self.factory,
            self.templates.clone(),
            self.cfg.schema.clone(),
            self.cfg.events_prefix.clone(),
        )
        .await?;

        let result = self.upsert(&mut connector, &manifest_url).await;
        if result.is_err() {
            connector.rollback().await;
        }
        if let Err(err) = connector.close().await {
            tracing::warn!(error = %err, "closing warehouse session failed");
        }
        result
    }

    async fn upsert(
        &self,
        connector: &mut WarehouseConnector,
        manifest_url: &str,
    ) -> Result<(), WarehouseError> {
        let copy_credentials = self
            .credentials
            .copy_credentials()
            .await
            .map_err(WarehouseError::Credentials)?;

        let staging = &self.cfg.load_staging_table;
        connector.drop_table(staging).await?;
        connector.create_staging_table(staging).await?;

        let started = Instant::now();
        connector
            .copy_from_object_store(staging, manifest_url, &copy_credentials, &self.cfg.jsonpaths_url)
            .await?;
        self.metrics.record(
            "RedshiftCopyTime",
            Unit::Milliseconds,
            started.elapsed().as_millis() as f64,
            &[],
        );
        self.metrics.record(
            "LoadErrorCount",
            Unit::Count,
            connector.get_last_load_error_count().await as f64,
            &[],
        );
        self.metrics.record(
            "CopyCount",
            Unit::Count,
            connector.get_copy_count().await as f64,
            &[],
        );

        let months = connector.unique_year_month_pairs(staging).await?;
        let now = (self.now)();
        let oldest = now.plus_months(-self.cfg.retention_months);

        for month in months {
            if month < oldest || month > now {
                tracing::warn!(
                    %month,
                    window_oldest = %oldest,
                    window_newest = %now,
                    "skipping out-of-window month in staging table"
                );
                continue;
            }

            let dedupe = month.table_name(&self.cfg.dedupe_prefix);
            connector.drop_table(&dedupe).await?;
            connector.create_staging_table(&dedupe).await?;
            connector.dedupe_insert(staging, &dedupe, month).await?;
            let inserted = connector.final_insert(&dedupe, month).await?;
            self.metrics.record(
                "InsertCount",
                Unit::Count,
                connector.get_insert_count().await as f64,
                &[],
            );
            tracing::info!(%month, inserted, "upserted month into event table");
            connector.drop_table(&dedupe).await?;
        }

        connector.drop_table(staging).await?;
        connector.commit().await?;
        Ok(())
    }
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[async_trait::async_trait]
impl Emitter<Bytes> for ManifestEmitter {
    async fn emit(&mut self, batch: &BufferSnapshot<'_, Bytes>) -> Result<Vec<Bytes>, EmitError> {
        let pointers: Vec<String> = batch
            .records
            .iter()
            .map(|record| String::from_utf8_lossy(record).trim().to_string())
            .filter(|pointer| !pointer.is_empty())
            .collect();
        if pointers.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let result = self.load(&pointers).await;
        self.metrics.record(
            "RedshiftEmitTime",
            Unit::Milliseconds,
            started.elapsed().as_millis() as f64,
            &[],
        );
        self.metrics.record(
            "EmitAvailability",
            Unit::Count,
            if result.is_ok() { 1.0 } else { 0.0 },
            &[],
        );

        match result {
            Ok(()) => Ok(Vec::new()),
            Err(err) => {
                tracing::error!(error = %err, pointers = pointers.len(), "warehouse load failed");
                Err(EmitError::Other(err.into()))
            }
        }
    }

    async fn fail(&mut self, records: Vec<Bytes>) {
        for record in &records {
            tracing::error!(
                pointer = %String::from_utf8_lossy(record),
                "dropping archival pointer after exhausted retries"
            );
        }
    }

    async fn shutdown(&mut self) {
        self.metrics.flush(true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_lists_every_pointer_under_the_bucket() {
        let manifest = Manifest::new(
            "s3",
            "telemetry",
            &[
                "events/2017/10/24/18/S1-S2.gzip".to_string(),
                "events/2017/10/24/19/S3-S4.gzip".to_string(),
            ],
            true,
        );
        let json = String::from_utf8(manifest.to_bytes().unwrap().to_vec()).unwrap();
        assert_eq!(
            json,
            r#"{"entries":[{"url":"s3://telemetry/events/2017/10/24/18/S1-S2.gzip","mandatory":true},{"url":"s3://telemetry/events/2017/10/24/19/S3-S4.gzip","mandatory":true}]}"#
        );
    }

    #[test]
    fn manifest_key_joins_first_and_last_basenames() {
        let cfg = ManifestEmitterConfig {
            bucket: "telemetry".to_string(),
            manifest_prefix: "manifests".to_string(),
            store_scheme: "s3".to_string(),
            mandatory: true,
            schema: "analytics".to_string(),
            events_prefix: "events".to_string(),
            load_staging_table: "load_staging".to_string(),
            dedupe_prefix: "dedupe_staging".to_string(),
            retention_months: 6,
            jsonpaths_url: "s3://config/jsonpaths.json".to_string(),
        };
        let emitter = ManifestEmitter::new(
            Arc::new(NoStore),
            Arc::new(NoFactory),
            Arc::new(NoCredentials),
            SqlTemplates::default(),
            cfg,
            Arc::new(ops::NoopSink),
        );
        let key = emitter.manifest_key(&[
            "events/2017/10/24/18/S1-S2.gzip".to_string(),
            "events/2017/10/24/19/S3-S4.gzip".to_string(),
        ]);
        assert_eq!(key, "manifests/S1-S2.gzip-S3-S4.gzip");
    }

    struct NoStore;
    #[async_trait::async_trait]
    impl ObjectStore for NoStore {
        async fn put(&self, _: &str, _: &str, _: Bytes) -> anyhow::Result<()> {
            anyhow::bail!("not under test")
        }
    }

    struct NoFactory;
    #[async_trait::async_trait]
    impl SessionFactory for NoFactory {
        async fn open(&self) -> Result<Box<dyn crate::SqlSession>, WarehouseError> {
            Err(WarehouseError::Session("not under test".to_string()))
        }
    }

    struct NoCredentials;
    #[async_trait::async_trait]
    impl CredentialSource for NoCredentials {
        async fn cluster_credentials(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> anyhow::Result<crate::ClusterCredentials> {
            anyhow::bail!("not under test")
        }
        async fn copy_credentials(&self) -> anyhow::Result<crate::CopyCredentials> {
            anyhow::bail!("not under test")
        }
    }
}
