//! Container-backed harness for the Postgres and Redis implementations.
//!
//! Containers start once per test binary and are reused; migrations run once.
//! Tests share one database, so each test works on its own run ids and keys.

use anyhow::{Context, Result};
use importer_core::kernel::RedisRunLock;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

struct SharedInfra {
    db_url: String,
    redis_url: String,
    // Keep containers alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
    _redis: ContainerAsync<Redis>,
}

static SHARED_INFRA: OnceCell<SharedInfra> = OnceCell::const_new();

impl SharedInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let redis = Redis::default()
            .start()
            .await
            .context("Failed to start Redis container")?;

        let redis_host = redis.get_host().await?;
        let redis_port = redis.get_host_port_ipv4(6379).await?;
        let redis_url = format!("redis://{}:{}", redis_host, redis_port);

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            redis_url,
            _postgres: postgres,
            _redis: redis,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Per-test handles onto the shared containers.
///
/// ```ignore
/// #[test_context(ContainerHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &ContainerHarness) {
///     let store = PostgresRunStore::new(ctx.db_pool.clone());
/// }
/// ```
pub struct ContainerHarness {
    pub db_pool: PgPool,
    pub redis_url: String,
}

impl AsyncTestContext for ContainerHarness {
    async fn setup() -> Self {
        Self::new()
            .await
            .expect("Failed to create container harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}

impl ContainerHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedInfra::get().await;
        let db_pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(&infra.db_url)
            .await
            .context("Failed to connect to shared Postgres")?;

        Ok(Self {
            db_pool,
            redis_url: infra.redis_url.clone(),
        })
    }

    pub async fn run_lock(&self) -> RedisRunLock {
        RedisRunLock::connect(&self.redis_url)
            .await
            .expect("Failed to connect to shared Redis")
    }
}
