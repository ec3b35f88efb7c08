use crate::connector::WarehouseConnector;
use crate::months::YearMonth;
use crate::templates::SqlTemplates;
use crate::SessionFactory;
use config::{ConfigError, Resolver};
use ops::{HealthFlag, MetricSink, Unit};
use std::sync::Arc;
use std::time::Instant;

/// Cron-driven lifecycle of the per-month event tables: rollover,
/// statistics and compaction, and the boot-time catch-up. Each
/// operation is idempotent, opens its own warehouse session, and flips
/// the shared health flag on success or failure.
pub struct MaintenanceController {
    factory: Arc<dyn SessionFactory>,
    templates: SqlTemplates,
    schema: String,
    events_prefix: String,
    view_name: String,
    retention_months: i32,
    vacuum_reindex: bool,
    health: HealthFlag,
    metrics: Arc<dyn MetricSink>,
}

impl MaintenanceController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        templates: SqlTemplates,
        schema: impl Into<String>,
        events_prefix: impl Into<String>,
        view_name: impl Into<String>,
        retention_months: i32,
        health: HealthFlag,
        metrics: Arc<dyn MetricSink>,
    ) -> Self {
        Self {
            factory,
            templates,
            schema: schema.into(),
            events_prefix: events_prefix.into(),
            view_name: view_name.into(),
            retention_months,
            vacuum_reindex: false,
            health,
            metrics,
        }
    }

    pub fn from_config(
        cfg: &Resolver,
        factory: Arc<dyn SessionFactory>,
        health: HealthFlag,
        metrics: Arc<dyn MetricSink>,
    ) -> Result<Self, ConfigError> {
        let redshift = Some("redshift");
        let events_prefix = cfg.get_string_or(redshift, "events_table_prefix", "events");
        let view_name = cfg.get_string_or(redshift, "events_view_name", "events_all");
        let mut controller = Self::new(
            factory,
            SqlTemplates::from_config(cfg, redshift)?,
            cfg.get_string(redshift, "redshift_schema")?,
            events_prefix,
            view_name,
            cfg.get_i32_or(redshift, "warm_data_lifetime_months", 6)?,
            health,
            metrics,
        );
        controller.vacuum_reindex = cfg.get_bool_or(redshift, "vacuum_reindex", false)?;
        Ok(controller)
    }

    async fn open(&self) -> Result<WarehouseConnector, crate::WarehouseError> {
        WarehouseConnector::open(
            &*self.factory,
            self.templates.clone(),
            self.schema.clone(),
            self.events_prefix.clone(),
        )
        .await
    }

    fn finish(&self, operation: &'static str, result: &anyhow::Result<()>) {
        match result {
            Ok(()) => {
                self.health.set_healthy();
                self.metrics.record(
                    "MaintenanceAvailability",
                    Unit::Count,
                    1.0,
                    &[("Operation", operation)],
                );
            }
            Err(err) => {
                self.health.set_unhealthy();
                self.metrics.record(
                    "MaintenanceAvailability",
                    Unit::Count,
                    0.0,
                    &[("Operation", operation)],
                );
                tracing::error!(operation, error = %err, "maintenance operation failed");
            }
        }
    }

    /// Twice-daily rollover: ensure next month's table exists (dropping
    /// a stale one first), drop the table falling out of the retention
    /// window, and rebuild the union view over what remains.
    #[tracing::instrument(skip_all)]
    pub async fn roll_time_series(&self) -> anyhow::Result<()> {
        let result = self.roll_inner(YearMonth::now_utc()).await;
        self.finish("RollTimeSeries", &result);
        result
    }

    async fn roll_inner(&self, now: YearMonth) -> anyhow::Result<()> {
        let mut connector = self.open().await?;

        let started = Instant::now();
        let next = now.plus_months(1);
        connector
            .drop_table(&next.table_name(&self.events_prefix))
            .await?;
        connector.create_event_table(next).await?;
        self.step_time("RollCreateTime", started);

        let started = Instant::now();
        let expired = now.plus_months(-self.retention_months);
        connector
            .drop_table(&expired.table_name(&self.events_prefix))
            .await?;
        self.step_time("RollDropTime", started);

        let started = Instant::now();
        let tables = connector.list_tables().await?;
        connector.create_union_view(&self.view_name, &tables).await?;
        self.step_time("RollViewTime", started);

        connector.commit().await?;
        connector.close().await?;
        Ok(())
    }

    /// Nightly VACUUM of every event table, then ANALYZE of every event
    /// table, in that order so statistics reflect the compacted state.
    /// Per-table failures are logged and skipped.
    #[tracing::instrument(skip_all)]
    pub async fn vacuum_and_analyze(&self) -> anyhow::Result<()> {
        let result = self.vacuum_inner().await;
        self.finish("VacuumAndAnalyze", &result);
        result
    }

    async fn vacuum_inner(&self) -> anyhow::Result<()> {
        let mut connector = self.open().await?;
        let tables = connector.list_tables().await?;

        let started = Instant::now();
        for table in &tables {
            if let Err(err) = connector.vacuum_table(table, self.vacuum_reindex).await {
                tracing::warn!(%table, error = %err, "vacuum failed; continuing");
            }
        }
        self.step_time("VacuumTime", started);

        let started = Instant::now();
        for table in &tables {
            if let Err(err) = connector.analyze_table(table).await {
                tracing::warn!(%table, error = %err, "analyze failed; continuing");
            }
        }
        self.step_time("AnalyzeTime", started);

        connector.close().await?;
        Ok(())
    }

    /// Startup catch-up: ensure a table exists for every month from
    /// next month back through the retention window, then rebuild the
    /// union view.
    #[tracing::instrument(skip_all)]
    pub async fn boot_initialize(&self) -> anyhow::Result<()> {
        let result = self.boot_inner(YearMonth::now_utc()).await;
        self.finish("BootInitialize", &result);
        result
    }

    async fn boot_inner(&self, now: YearMonth) -> anyhow::Result<()> {
        let mut connector = self.open().await?;

        let started = Instant::now();
        let oldest = now.plus_months(-self.retention_months);
        let newest = now.plus_months(1);
        for month in YearMonth::range_inclusive(oldest, newest).into_iter().rev() {
            connector.create_event_table(month).await?;
        }

        let tables = connector.list_tables().await?;
        connector.create_union_view(&self.view_name, &tables).await?;
        connector.commit().await?;
        self.step_time("BootInitializeTime", started);

        connector.close().await?;
        Ok(())
    }

    fn step_time(&self, name: &'static str, started: Instant) {
        self.metrics.record(
            name,
            Unit::Milliseconds,
            started.elapsed().as_millis() as f64,
            &[],
        );
    }

    /// Test seam: run the rollover relative to an explicit month.
    #[doc(hidden)]
    pub async fn roll_time_series_at(&self, now: YearMonth) -> anyhow::Result<()> {
        let result = self.roll_inner(now).await;
        self.finish("RollTimeSeries", &result);
        result
    }

    /// Test seam: run the boot catch-up relative to an explicit month.
    #[doc(hidden)]
    pub async fn boot_initialize_at(&self, now: YearMonth) -> anyhow::Result<()> {
        let result = self.boot_inner(now).await;
        self.finish("BootInitialize", &result);
        result
    }
}
