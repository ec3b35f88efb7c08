use config::{ConfigError, Resolver};

// Column layout shared by the event tables and both staging shapes.
const EVENTS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS {schema}.{table} (
    event_version VARCHAR(64) ENCODE ZSTD,
    app_name VARCHAR(64) NOT NULL ENCODE ZSTD,
    app_version VARCHAR(64) ENCODE ZSTD,
    client_id VARCHAR(36) NOT NULL ENCODE ZSTD,
    event_id VARCHAR(36) NOT NULL ENCODE ZSTD,
    event_type VARCHAR(256) NOT NULL ENCODE ZSTD,
    event_timestamp TIMESTAMP NOT NULL,
    server_timestamp TIMESTAMP NOT NULL,
    level_id VARCHAR(64) ENCODE ZSTD,
    position_x FLOAT,
    position_y FLOAT
)
DISTKEY(event_id)
SORTKEY(event_timestamp)";

const DROP_TABLE: &str = "DROP TABLE IF EXISTS {schema}.{table}";

const COPY_FROM_MANIFEST: &str = "\
COPY {schema}.{table}
FROM '{manifest}'
CREDENTIALS '{credentials}'
JSON '{jsonpaths}'
TIMEFORMAT 'epochmillisecs'
GZIP
MANIFEST";

const LOAD_ERROR_COUNT: &str =
    "SELECT COUNT(*)::BIGINT FROM stl_load_errors WHERE query = pg_last_copy_id()";

const COPY_COUNT: &str = "SELECT pg_last_copy_count()::BIGINT";

const INSERT_COUNT: &str =
    "SELECT COALESCE(SUM(rows), 0)::BIGINT FROM stl_insert WHERE query = pg_last_query_id()";

const LIST_TABLES: &str = "\
SELECT DISTINCT tablename FROM pg_table_def
WHERE schemaname = '{schema}' AND tablename LIKE '{prefix}\\_%'
ORDER BY tablename";

const CREATE_UNION_VIEW: &str = "CREATE OR REPLACE VIEW {schema}.{view} AS {selects}";

const DISTINCT_YEAR_MONTHS: &str = "\
SELECT DISTINCT EXTRACT(YEAR FROM event_timestamp)::BIGINT,
                EXTRACT(MONTH FROM event_timestamp)::BIGINT
FROM {schema}.{table}
ORDER BY 1, 2";

const DEDUPE_INSERT: &str = "\
INSERT INTO {schema}.{dedupe}
SELECT DISTINCT s.*
FROM {schema}.{staging} s
LEFT JOIN {schema}.{events} e
    ON s.event_id = e.event_id
    AND s.client_id = e.client_id
    AND s.event_timestamp = e.event_timestamp
WHERE e.event_id IS NULL
  AND EXTRACT(YEAR FROM s.event_timestamp) = {year}
  AND EXTRACT(MONTH FROM s.event_timestamp) = {month}";

const FINAL_INSERT: &str = "INSERT INTO {schema}.{events} SELECT * FROM {schema}.{dedupe}";

const ANALYZE_TABLE: &str = "ANALYZE {table}";

const VACUUM_TABLE: &str = "VACUUM {mode} {table}";

/// The SQL statement templates the connector renders. Any template can
/// be overridden through configuration under `sql.<name>`; placeholders
/// are `{name}`-style and substituted verbatim.
#[derive(Debug, Clone)]
pub struct SqlTemplates {
    pub create_events_table: String,
    pub create_staging_table: String,
    pub drop_table: String,
    pub copy_from_manifest: String,
    pub load_error_count: String,
    pub copy_count: String,
    pub insert_count: String,
    pub list_tables: String,
    pub create_union_view: String,
    pub distinct_year_months: String,
    pub dedupe_insert: String,
    pub final_insert: String,
    pub analyze_table: String,
    pub vacuum_table: String,
}

impl Default for SqlTemplates {
    fn default() -> Self {
        Self {
            create_events_table: EVENTS_DDL.to_string(),
            create_staging_table: EVENTS_DDL.to_string(),
            drop_table: DROP_TABLE.to_string(),
            copy_from_manifest: COPY_FROM_MANIFEST.to_string(),
            load_error_count: LOAD_ERROR_COUNT.to_string(),
            copy_count: COPY_COUNT.to_string(),
            insert_count: INSERT_COUNT.to_string(),
            list_tables: LIST_TABLES.to_string(),
            create_union_view: CREATE_UNION_VIEW.to_string(),
            distinct_year_months: DISTINCT_YEAR_MONTHS.to_string(),
            dedupe_insert: DEDUPE_INSERT.to_string(),
            final_insert: FINAL_INSERT.to_string(),
            analyze_table: ANALYZE_TABLE.to_string(),
            vacuum_table: VACUUM_TABLE.to_string(),
        }
    }
}

impl SqlTemplates {
    pub fn from_config(cfg: &Resolver, connector: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str, default: &str| cfg.get_string_or(connector, key, default);
        Ok(Self {
            create_events_table: get("sql.create_events_table", &defaults.create_events_table),
            create_staging_table: get("sql.create_staging_table", &defaults.create_staging_table),
            drop_table: get("sql.drop_table", &defaults.drop_table),
            copy_from_manifest: get("sql.copy_from_manifest", &defaults.copy_from_manifest),
            load_error_count: get("sql.load_error_count", &defaults.load_error_count),
            copy_count: get("sql.copy_count", &defaults.copy_count),
            insert_count: get("sql.insert_count", &defaults.insert_count),
            list_tables: get("sql.list_tables", &defaults.list_tables),
            create_union_view: get("sql.create_union_view", &defaults.create_union_view),
            distinct_year_months: get("sql.distinct_year_months", &defaults.distinct_year_months),
            dedupe_insert: get("sql.dedupe_insert", &defaults.dedupe_insert),
            final_insert: get("sql.final_insert", &defaults.final_insert),
            analyze_table: get("sql.analyze_table", &defaults.analyze_table),
            vacuum_table: get("sql.vacuum_table", &defaults.vacuum_table),
        })
    }
}

/// Substitute `{name}` placeholders. Unknown placeholders are left in
/// place, which makes a template/operator mismatch visible in the SQL
/// error rather than silently dropped.
pub fn render(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in substitutions {
        rendered = rendered.replace(&format!("{{{name}}}"), value);
    }
    rendered
}
