use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use flightdeck_client::{AtsStrategies, ReqwestFetcher};
use flightdeck_core::scheduler::SchedulerConfig;
use flightdeck_core::throttle::{ThrottleConfig, ThrottledFetcher};
use flightdeck_core::{Engine, Normalizer};
use flightdeck_db::Database;
use flightdeck_server::routes;
use flightdeck_server::state::AppState;

pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub state: Arc<AppState>,
    _container: ContainerAsync<GenericImage>,
}

/// App with write endpoints enabled behind [`TEST_ADMIN_TOKEN`].
pub async fn setup_test_app() -> TestApp {
    build_app(Some(TEST_ADMIN_TOKEN.to_string())).await
}

/// App without an admin token, so write endpoints answer 403.
pub async fn setup_test_app_no_auth() -> TestApp {
    build_app(None).await
}

async fn build_app(admin_token: Option<String>) -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "flightdeck_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/flightdeck_test");
    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    let fetcher = ThrottledFetcher::new(
        ReqwestFetcher::with_timeout(Duration::from_secs(5))
            .expect("Failed to build HTTP client")
            .allow_private_urls(),
        ThrottleConfig::new(Duration::ZERO),
    );
    let engine = Engine::new(
        fetcher.clone(),
        AtsStrategies::new(fetcher, None),
        db.posting_repo(),
        Normalizer::default(),
    );
    let scheduler = SchedulerConfig::default()
        .with_dispatch_delay(Duration::ZERO)
        .with_source_timeout(Duration::from_secs(10));

    let state = Arc::new(AppState::new(db.clone(), admin_token, engine, scheduler));

    TestApp {
        router: routes::router(state.clone()),
        db,
        state,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}
