//! The cron/health HTTP surface. The scheduler that posts to these
//! endpoints and the server binding both live with the deployment; this
//! crate only builds the router and its handlers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use ops::HealthFlag;
use std::sync::Arc;
use warehouse::MaintenanceController;

/// The anonymous solution-statistics relay, an external collaborator.
#[async_trait::async_trait]
pub trait StatisticsRelay: Send + Sync {
    async fn relay(&self) -> anyhow::Result<()>;
}

pub struct App {
    pub maintenance: MaintenanceController,
    pub relay: Arc<dyn StatisticsRelay>,
    pub health: HealthFlag,
}

pub fn build_router(app: Arc<App>) -> axum::Router<()> {
    use axum::routing::{get, post};

    axum::Router::new()
        .route(
            "/redshift-time-series-table-create",
            post(create_time_series_tables),
        )
        .route(
            "/redshift-analyze-vacuum-tables",
            post(analyze_vacuum_tables),
        )
        .route("/report-solution-statistics", post(report_solution_statistics))
        .route("/health", get(health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app)
}

#[tracing::instrument(skip_all)]
async fn create_time_series_tables(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> StatusCode {
    match app.maintenance.roll_time_series().await {
        Ok(()) => StatusCode::OK,
        // The controller has already logged and flipped the health flag.
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[tracing::instrument(skip_all)]
async fn analyze_vacuum_tables(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> StatusCode {
    match app.maintenance.vacuum_and_analyze().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[tracing::instrument(skip_all)]
async fn report_solution_statistics(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> StatusCode {
    match app.relay.relay().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::error!(error = %err, "statistics relay failed");
            app.health.set_unhealthy();
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn health(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
) -> impl IntoResponse {
    if app.health.is_healthy() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}
