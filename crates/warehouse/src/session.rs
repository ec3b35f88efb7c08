use crate::{
    ClusterCredentials, CredentialSource, SessionFactory, SqlSession, WarehouseError,
};
use config::{ConfigError, Resolver};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{ConnectOptions, Connection, Row};
use std::sync::Arc;

/// The warehouse network endpoint, parsed from a JDBC-style URL such
/// as `jdbc:redshift://cluster.example.com:5439/telemetry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl Endpoint {
    pub fn parse_jdbc(raw: &str) -> Result<Self, WarehouseError> {
        let trimmed = raw.strip_prefix("jdbc:").unwrap_or(raw);
        let url = url::Url::parse(trimmed).map_err(|_| WarehouseError::Endpoint(raw.to_string()))?;

        let host = url
            .host_str()
            .ok_or_else(|| WarehouseError::Endpoint(raw.to_string()))?
            .to_string();
        let port = url.port().unwrap_or(5439);
        let database = url.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(WarehouseError::Endpoint(raw.to_string()));
        }

        Ok(Self {
            host,
            port,
            database,
        })
    }
}

/// Opens TLS sessions against the warehouse, acquiring a fresh
/// short-lived login for every session.
pub struct PgSessionFactory {
    endpoint: Endpoint,
    cluster_id: String,
    username: String,
    credentials: Arc<dyn CredentialSource>,
}

impl PgSessionFactory {
    pub fn new(
        endpoint: Endpoint,
        cluster_id: impl Into<String>,
        username: impl Into<String>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            endpoint,
            cluster_id: cluster_id.into(),
            username: username.into(),
            credentials,
        }
    }

    pub fn from_config(
        cfg: &Resolver,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, WarehouseError> {
        let connector = Some("redshift");
        let endpoint = Endpoint::parse_jdbc(&cfg.get_string(connector, "redshift_jdbc")?)?;
        Ok(Self::new(
            endpoint,
            cfg.get_string(connector, "redshift_cluster_identifier")?,
            cfg.get_string(connector, "redshift_worker_username")?,
            credentials,
        ))
    }
}

#[async_trait::async_trait]
impl SessionFactory for PgSessionFactory {
    async fn open(&self) -> Result<Box<dyn SqlSession>, WarehouseError> {
        let login: ClusterCredentials = self
            .credentials
            .cluster_credentials(&self.cluster_id, &self.username, &self.endpoint.database)
            .await
            .map_err(WarehouseError::Credentials)?;

        let options = PgConnectOptions::new()
            .host(&self.endpoint.host)
            .port(self.endpoint.port)
            .database(&self.endpoint.database)
            .username(&login.username)
            .password(&login.password)
            .ssl_mode(PgSslMode::Require);

        let conn = options.connect().await.map_err(WarehouseError::Connect)?;
        tracing::debug!(host = %self.endpoint.host, database = %self.endpoint.database, "opened warehouse session");
        Ok(Box::new(PgSession { conn }))
    }
}

struct PgSession {
    conn: PgConnection,
}

#[async_trait::async_trait]
impl SqlSession for PgSession {
    async fn execute(&mut self, sql: &str) -> Result<u64, WarehouseError> {
        let done = sqlx::query(sql).execute(&mut self.conn).await?;
        Ok(done.rows_affected())
    }

    async fn fetch_i64(&mut self, sql: &str) -> Result<i64, WarehouseError> {
        let value: i64 = sqlx::query_scalar(sql).fetch_one(&mut self.conn).await?;
        Ok(value)
    }

    async fn fetch_text_column(&mut self, sql: &str) -> Result<Vec<String>, WarehouseError> {
        let rows = sqlx::query(sql).fetch_all(&mut self.conn).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(WarehouseError::Sql))
            .collect()
    }

    async fn fetch_int_pairs(&mut self, sql: &str) -> Result<Vec<(i64, i64)>, WarehouseError> {
        let rows = sqlx::query(sql).fetch_all(&mut self.conn).await?;
        rows.iter()
            .map(|row| {
                let first = row.try_get::<i64, _>(0).map_err(WarehouseError::Sql)?;
                let second = row.try_get::<i64, _>(1).map_err(WarehouseError::Sql)?;
                Ok((first, second))
            })
            .collect()
    }

    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        self.conn.close().await.map_err(WarehouseError::Sql)
    }
}
