use crate::months::YearMonth;
use crate::templates::{render, SqlTemplates};
use crate::{CopyCredentials, SessionFactory, SqlSession, WarehouseError};

/// A stateful, single-threaded façade over one SQL session. Statements
/// are rendered from the configured templates; the session autocommits
/// per statement, so `commit`/`rollback` are best-effort brackets.
pub struct WarehouseConnector {
    session: Box<dyn SqlSession>,
    templates: SqlTemplates,
    schema: String,
    events_prefix: String,
}

impl WarehouseConnector {
    /// Open a session through the factory, which acquires short-lived
    /// cluster credentials and dials TLS.
    pub async fn open(
        factory: &dyn SessionFactory,
        templates: SqlTemplates,
        schema: impl Into<String>,
        events_prefix: impl Into<String>,
    ) -> Result<Self, WarehouseError> {
        Ok(Self {
            session: factory.open().await?,
            templates,
            schema: schema.into(),
            events_prefix: events_prefix.into(),
        })
    }

    pub async fn close(self) -> Result<(), WarehouseError> {
        self.session.close().await
    }

    pub fn events_table(&self, month: YearMonth) -> String {
        month.table_name(&self.events_prefix)
    }

    pub async fn create_event_table(&mut self, month: YearMonth) -> Result<(), WarehouseError> {
        let table = self.events_table(month);
        let sql = render(
            &self.templates.create_events_table,
            &[("schema", &self.schema), ("table", &table)],
        );
        self.session.execute(&sql).await?;
        tracing::info!(%table, "ensured event table");
        Ok(())
    }

    pub async fn create_staging_table(&mut self, table: &str) -> Result<(), WarehouseError> {
        let sql = render(
            &self.templates.create_staging_table,
            &[("schema", &self.schema), ("table", table)],
        );
        self.session.execute(&sql).await?;
        Ok(())
    }

    pub async fn drop_table(&mut self, table: &str) -> Result<(), WarehouseError> {
        let sql = render(
            &self.templates.drop_table,
            &[("schema", &self.schema), ("table", table)],
        );
        self.session.execute(&sql).await?;
        Ok(())
    }

    /// COPY from a manifest into the given staging table. The rendered
    /// statement embeds the credential clause and is never logged.
    pub async fn copy_from_object_store(
        &mut self,
        staging_table: &str,
        manifest_url: &str,
        credentials: &CopyCredentials,
        jsonpaths_url: &str,
    ) -> Result<u64, WarehouseError> {
        let clause = credentials.to_clause();
        let sql = render(
            &self.templates.copy_from_manifest,
            &[
                ("schema", &self.schema),
                ("table", staging_table),
                ("manifest", manifest_url),
                ("credentials", clause.as_str()),
                ("jsonpaths", jsonpaths_url),
            ],
        );
        let rows = self.session.execute(&sql).await?;
        tracing::info!(%staging_table, %manifest_url, rows, "copied manifest into staging");
        Ok(rows)
    }

    /// Observability scalar; -1 when the query itself fails.
    pub async fn get_last_load_error_count(&mut self) -> i64 {
        let sql = self.templates.load_error_count.clone();
        self.scalar_or_negative_one(&sql).await
    }

    pub async fn get_copy_count(&mut self) -> i64 {
        let sql = self.templates.copy_count.clone();
        self.scalar_or_negative_one(&sql).await
    }

    pub async fn get_insert_count(&mut self) -> i64 {
        let sql = self.templates.insert_count.clone();
        self.scalar_or_negative_one(&sql).await
    }

    async fn scalar_or_negative_one(&mut self, sql: &str) -> i64 {
        match self.session.fetch_i64(sql).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "observability query failed");
                -1
            }
        }
    }

    /// Ordered, de-duplicated, schema-qualified event tables of the
    /// current dataset.
    pub async fn list_tables(&mut self) -> Result<Vec<String>, WarehouseError> {
        let sql = render(
            &self.templates.list_tables,
            &[("schema", &self.schema), ("prefix", &self.events_prefix)],
        );
        let mut tables: Vec<String> = self
            .session
            .fetch_text_column(&sql)
            .await?
            .into_iter()
            .map(|name| format!("{}.{name}", self.schema))
            .collect();
        tables.sort();
        tables.dedup();
        Ok(tables)
    }

    /// Atomically replace the UNION-ALL view over the given tables.
    /// Table names are expected schema-qualified, as returned by
    /// [`WarehouseConnector::list_tables`].
    pub async fn create_union_view(
        &mut self,
        view: &str,
        tables: &[String],
    ) -> Result<(), WarehouseError> {
        if tables.is_empty() {
            tracing::warn!(%view, "no event tables; leaving the union view untouched");
            return Ok(());
        }
        let selects = tables
            .iter()
            .map(|table| format!("SELECT * FROM {table}"))
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        let sql = render(
            &self.templates.create_union_view,
            &[("schema", &self.schema), ("view", view), ("selects", &selects)],
        );
        self.session.execute(&sql).await?;
        tracing::info!(%view, tables = tables.len(), "rebuilt union view");
        Ok(())
    }

    /// Distinct months present in a staging table, oldest first.
    pub async fn unique_year_month_pairs(
        &mut self,
        table: &str,
    ) -> Result<Vec<YearMonth>, WarehouseError> {
        let sql = render(
            &self.templates.distinct_year_months,
            &[("schema", &self.schema), ("table", table)],
        );
        let mut months: Vec<YearMonth> = self
            .session
            .fetch_int_pairs(&sql)
            .await?
            .into_iter()
            .map(|(year, month)| YearMonth::new(year as i32, month as u32))
            .collect();
        months.sort();
        Ok(months)
    }

    pub async fn analyze_table(&mut self, table: &str) -> Result<(), WarehouseError> {
        let sql = render(&self.templates.analyze_table, &[("table", table)]);
        self.session.execute(&sql).await?;
        Ok(())
    }

    pub async fn vacuum_table(&mut self, table: &str, reindex: bool) -> Result<(), WarehouseError> {
        let mode = if reindex { "REINDEX" } else { "FULL" };
        let sql = render(
            &self.templates.vacuum_table,
            &[("mode", mode), ("table", table)],
        );
        self.session.execute(&sql).await?;
        Ok(())
    }

    /// Insert rows of `staging` for the given month into the dedupe
    /// staging table, excluding rows already present in the month's
    /// destination event table.
    pub async fn dedupe_insert(
        &mut self,
        staging_table: &str,
        dedupe_table: &str,
        month: YearMonth,
    ) -> Result<u64, WarehouseError> {
        let events = self.events_table(month);
        let sql = render(
            &self.templates.dedupe_insert,
            &[
                ("schema", &self.schema),
                ("dedupe", dedupe_table),
                ("staging", staging_table),
                ("events", &events),
                ("year", &month.year.to_string()),
                ("month", &month.month.to_string()),
            ],
        );
        self.session.execute(&sql).await.map_err(Into::into)
    }

    pub async fn final_insert(
        &mut self,
        dedupe_table: &str,
        month: YearMonth,
    ) -> Result<u64, WarehouseError> {
        let events = self.events_table(month);
        let sql = render(
            &self.templates.final_insert,
            &[
                ("schema", &self.schema),
                ("dedupe", dedupe_table),
                ("events", &events),
            ],
        );
        self.session.execute(&sql).await.map_err(Into::into)
    }

    pub async fn commit(&mut self) -> Result<(), WarehouseError> {
        self.session.execute("COMMIT").await?;
        Ok(())
    }

    /// Best-effort: with per-statement autocommit a rollback cannot undo
    /// completed statements, and failures here are only logged.
    pub async fn rollback(&mut self) {
        if let Err(err) = self.session.execute("ROLLBACK").await {
            tracing::warn!(error = %err, "rollback failed");
        }
    }
}
