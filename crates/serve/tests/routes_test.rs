use axum::body::Body;
use axum::http::{Request, StatusCode};
use ops::{HealthFlag, NoopSink};
use serve::{build_router, App, StatisticsRelay};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use warehouse::{
    MaintenanceController, SessionFactory, SqlSession, SqlTemplates, WarehouseError, YearMonth,
};

struct FakeSession {
    fail: bool,
}

#[async_trait::async_trait]
impl SqlSession for FakeSession {
    async fn execute(&mut self, _sql: &str) -> Result<u64, WarehouseError> {
        if self.fail {
            return Err(WarehouseError::Session("injected".to_string()));
        }
        Ok(0)
    }
    async fn fetch_i64(&mut self, _sql: &str) -> Result<i64, WarehouseError> {
        Ok(0)
    }
    async fn fetch_text_column(&mut self, _sql: &str) -> Result<Vec<String>, WarehouseError> {
        Ok(vec![YearMonth::new(2017, 10).table_name("events")])
    }
    async fn fetch_int_pairs(&mut self, _sql: &str) -> Result<Vec<(i64, i64)>, WarehouseError> {
        Ok(Vec::new())
    }
    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        Ok(())
    }
}

struct FakeFactory {
    fail: bool,
}

#[async_trait::async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self) -> Result<Box<dyn SqlSession>, WarehouseError> {
        Ok(Box::new(FakeSession { fail: self.fail }))
    }
}

#[derive(Default)]
struct CountingRelay {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait::async_trait]
impl StatisticsRelay for CountingRelay {
    async fn relay(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("injected relay failure");
        }
        Ok(())
    }
}

fn app(fail_sql: bool, relay: Arc<CountingRelay>, health: HealthFlag) -> Arc<App> {
    let maintenance = MaintenanceController::new(
        Arc::new(FakeFactory { fail: fail_sql }),
        SqlTemplates::default(),
        "analytics",
        "events",
        "events_all",
        3,
        health.clone(),
        Arc::new(NoopSink),
    );
    Arc::new(App {
        maintenance,
        relay,
        health,
    })
}

async fn request(router: axum::Router<()>, method: &str, uri: &str) -> StatusCode {
    let response = router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

#[tokio::test]
async fn health_tracks_the_shared_flag() {
    let health = HealthFlag::new_healthy();
    let app = app(false, Arc::new(CountingRelay::default()), health.clone());

    let status = request(build_router(app.clone()), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);

    health.set_unhealthy();
    let status = request(build_router(app), "GET", "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn cron_endpoints_report_success_and_failure() {
    let health = HealthFlag::new_healthy();
    let app_ok = app(false, Arc::new(CountingRelay::default()), health.clone());

    for uri in [
        "/redshift-time-series-table-create",
        "/redshift-analyze-vacuum-tables",
    ] {
        let status = request(build_router(app_ok.clone()), "POST", uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert!(health.is_healthy());
    }

    let health = HealthFlag::new_healthy();
    let app_broken = app(true, Arc::new(CountingRelay::default()), health.clone());
    let status = request(
        build_router(app_broken),
        "POST",
        "/redshift-time-series-table-create",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!health.is_healthy());
}

#[tokio::test]
async fn statistics_relay_is_invoked_and_errors_flip_health() {
    let health = HealthFlag::new_healthy();
    let relay = Arc::new(CountingRelay::default());
    let app_ok = app(false, relay.clone(), health.clone());

    let status = request(build_router(app_ok), "POST", "/report-solution-statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(relay.calls.load(Ordering::SeqCst), 1);

    let failing = Arc::new(CountingRelay {
        fail: true,
        ..Default::default()
    });
    let app_err = app(false, failing.clone(), health.clone());
    let status = request(build_router(app_err), "POST", "/report-solution-statistics").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!health.is_healthy());
}
