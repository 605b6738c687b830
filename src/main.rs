//! HookRelay webhook delivery service.
//!
//! Main entry point. Initializes logging, configuration, and the database,
//! then runs the queue poller and retention sweeper until a shutdown signal
//! arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookrelay_core::RealClock;
use hookrelay_delivery::{
    PollerConfig, PostgresDeliveryStorage, QueuePoller, RetentionSweeper, SweeperConfig,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting HookRelay webhook delivery service");

    let config = Config::from_env()?;
    info!(
        database_url = %config.database_url_masked(),
        max_connections = config.database_max_connections,
        poll_interval_secs = config.poll_interval.as_secs(),
        batch_size = config.batch_size,
        "configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    run_migrations(&db_pool).await?;
    info!("database schema ready");

    let storage = Arc::new(hookrelay_core::storage::Storage::new(db_pool.clone()));
    let delivery_storage = Arc::new(PostgresDeliveryStorage::new(storage));
    let clock = Arc::new(RealClock::new());
    let cancellation_token = CancellationToken::new();

    let poller_config = PollerConfig {
        batch_size: config.batch_size,
        poll_interval: config.poll_interval,
        ..PollerConfig::default()
    };
    let poller = QueuePoller::new(
        delivery_storage.clone(),
        poller_config,
        clock.clone(),
        cancellation_token.clone(),
    )
    .context("failed to initialize queue poller")?;

    let sweeper = RetentionSweeper::new(
        delivery_storage,
        SweeperConfig { retention: config.retention, ..SweeperConfig::default() },
        clock,
        cancellation_token.clone(),
    );

    let poller_handle = tokio::spawn(async move { poller.run().await });
    let sweeper_handle = tokio::spawn(async move { sweeper.run().await });

    info!("delivery pipeline running");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    cancellation_token.cancel();

    // In-flight deliveries finish or hit the request timeout.
    let drain = async {
        if let Err(e) = poller_handle.await {
            error!(error = %e, "poller task failed");
        }
        if let Err(e) = sweeper_handle.await {
            error!(error = %e, "sweeper task failed");
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        error!("shutdown grace period expired with work still in flight");
    }

    db_pool.close().await;
    info!("database connections closed");

    info!("HookRelay shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,hookrelay=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Ensures the delivery schema exists.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_subscriptions (
            id UUID PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            secret TEXT,
            headers JSONB NOT NULL DEFAULT '{}'::jsonb,
            events JSONB NOT NULL DEFAULT '[]'::jsonb,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            total_calls BIGINT NOT NULL DEFAULT 0,
            successful_calls BIGINT NOT NULL DEFAULT 0,
            failed_calls BIGINT NOT NULL DEFAULT 0,
            last_called_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_subscriptions table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_queue (
            id UUID PRIMARY KEY,
            subscription_id UUID NOT NULL REFERENCES webhook_subscriptions(id) ON DELETE RESTRICT,
            event TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            scheduled_for TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            status_code INTEGER,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_queue table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_delivery_logs (
            id UUID PRIMARY KEY,
            subscription_id UUID NOT NULL REFERENCES webhook_subscriptions(id) ON DELETE CASCADE,
            event TEXT NOT NULL,
            url TEXT NOT NULL,
            payload JSONB NOT NULL,
            status_code INTEGER NOT NULL,
            succeeded BOOLEAN NOT NULL,
            error TEXT,
            duration_ms BIGINT NOT NULL,
            attempted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_delivery_logs table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_queue_claim
        ON webhook_queue(created_at)
        WHERE status = 'pending'
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_queue claim index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_delivery_logs_subscription
        ON webhook_delivery_logs(subscription_id, attempted_at DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_delivery_logs index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}

/// Service configuration.
struct Config {
    /// PostgreSQL connection string.
    database_url: String,
    /// Maximum database connections.
    database_max_connections: u32,
    /// Time between poll cycles.
    poll_interval: Duration,
    /// Maximum items claimed per cycle.
    batch_size: usize,
    /// Retention horizon for terminal queue items.
    retention: Duration,
    /// Maximum time to wait for loop tasks during shutdown.
    shutdown_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")?;

        let database_max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let poll_interval = std::env::var("POLL_INTERVAL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(
                Duration::from_secs(hookrelay_delivery::DEFAULT_POLL_INTERVAL_SECONDS),
                Duration::from_secs,
            );

        let batch_size = std::env::var("DELIVERY_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(hookrelay_delivery::DEFAULT_BATCH_SIZE);

        let retention = std::env::var("RETENTION_DAYS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map_or(Duration::from_secs(hookrelay_delivery::DEFAULT_RETENTION_SECONDS), |days| {
                Duration::from_secs(days * 24 * 60 * 60)
            });

        let shutdown_timeout = std::env::var("SHUTDOWN_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(Duration::from_secs(35), Duration::from_secs);

        Ok(Self {
            database_url,
            database_max_connections,
            poll_interval,
            batch_size,
            retention,
            shutdown_timeout,
        })
    }

    /// Returns database URL with password masked for logging.
    fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(password_start) = self.database_url[..at_pos].rfind(':') {
                if let Some(user_start) = self.database_url[..password_start].rfind('/') {
                    return format!(
                        "{}//{}:***@{}",
                        &self.database_url[..user_start],
                        &self.database_url[user_start + 2..password_start],
                        &self.database_url[at_pos + 1..]
                    );
                }
            }
        }
        "postgresql://***".to_string()
    }
}
