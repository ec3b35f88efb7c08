//! The warehouse side of the pipeline: a typed façade over the SQL
//! session, the manifest-driven staging/dedupe/upsert load, and the
//! cron-driven lifecycle of per-month time-series tables.

mod connector;
mod maintenance;
mod manifest;
mod months;
mod session;
mod templates;

pub use connector::WarehouseConnector;
pub use maintenance::MaintenanceController;
pub use manifest::{Manifest, ManifestEmitter, ManifestEmitterConfig, ManifestEntry};
pub use months::YearMonth;
pub use session::{Endpoint, PgSessionFactory};
pub use templates::SqlTemplates;

use config::ConfigError;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("acquiring warehouse credentials: {0}")]
    Credentials(#[source] anyhow::Error),

    #[error("connecting to the warehouse: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("executing warehouse statement: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("warehouse session error: {0}")]
    Session(String),

    #[error("invalid warehouse endpoint '{0}'")]
    Endpoint(String),

    #[error("serializing manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("uploading manifest '{key}': {source}")]
    ManifestUpload {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Short-lived warehouse login, valid for about an hour.
#[derive(Debug, Clone)]
pub struct ClusterCredentials {
    pub username: String,
    pub password: String,
}

/// Session credentials embedded into the COPY statement so the
/// warehouse can read the manifest and the archival objects.
#[derive(Debug, Clone)]
pub struct CopyCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl CopyCredentials {
    /// The credential clause of a COPY statement. Never log this.
    pub fn to_clause(&self) -> String {
        match &self.session_token {
            Some(token) => format!(
                "aws_access_key_id={};aws_secret_access_key={};token={}",
                self.access_key_id, self.secret_access_key, token
            ),
            None => format!(
                "aws_access_key_id={};aws_secret_access_key={}",
                self.access_key_id, self.secret_access_key
            ),
        }
    }
}

/// Acquisition of rotating credentials. Shared and thread-safe; the
/// concrete implementation lives with the deployment.
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    /// A short-lived database login for the given cluster and worker
    /// user.
    async fn cluster_credentials(
        &self,
        cluster_id: &str,
        username: &str,
        database: &str,
    ) -> anyhow::Result<ClusterCredentials>;

    /// Object-store session credentials for COPY.
    async fn copy_credentials(&self) -> anyhow::Result<CopyCredentials>;
}

/// One open SQL session. At most one statement is in flight at a time;
/// the session is `Send` but deliberately not `Sync`.
#[async_trait::async_trait]
pub trait SqlSession: Send {
    /// Execute a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64, WarehouseError>;

    /// Execute a single-scalar query.
    async fn fetch_i64(&mut self, sql: &str) -> Result<i64, WarehouseError>;

    /// Execute a query returning one text column.
    async fn fetch_text_column(&mut self, sql: &str) -> Result<Vec<String>, WarehouseError>;

    /// Execute a query returning two integer columns.
    async fn fetch_int_pairs(&mut self, sql: &str) -> Result<Vec<(i64, i64)>, WarehouseError>;

    async fn close(self: Box<Self>) -> Result<(), WarehouseError>;
}

/// Opens warehouse sessions. Each flush and each maintenance run opens
/// and closes its own session.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn SqlSession>, WarehouseError>;
}

/// Convenience alias used throughout the crate.
pub type SharedSessionFactory = Arc<dyn SessionFactory>;
