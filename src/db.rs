//! Database bootstrap
//!
//! Builds the connection pool for the migration store and creates its
//! tables.

use crate::config::DatabaseConfig;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tracing::info;

/// Table definitions, applied in order
pub const SCHEMA: [&str; 6] = [
    "CREATE TABLE IF NOT EXISTS clusters (
        name TEXT PRIMARY KEY,
        rw_host TEXT NOT NULL,
        port INTEGER NOT NULL,
        admin_review_required BOOLEAN NOT NULL DEFAULT false
    )",
    "CREATE TABLE IF NOT EXISTS cluster_owners (
        cluster_name TEXT NOT NULL REFERENCES clusters(name) ON DELETE CASCADE,
        username TEXT NOT NULL,
        PRIMARY KEY (cluster_name, username)
    )",
    "CREATE TABLE IF NOT EXISTS meta_requests (
        id UUID PRIMARY KEY,
        ddl_statement TEXT NOT NULL,
        final_insert TEXT,
        pr_url TEXT NOT NULL,
        requestor TEXT NOT NULL,
        custom_options JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS migrations (
        id UUID PRIMARY KEY,
        lock_version BIGINT NOT NULL DEFAULT 0,
        cluster_name TEXT NOT NULL REFERENCES clusters(name),
        database TEXT NOT NULL,
        ddl_statement TEXT NOT NULL,
        final_insert TEXT,
        pr_url TEXT NOT NULL,
        custom_options JSONB NOT NULL,
        initial_runtype TEXT NOT NULL,
        action TEXT NOT NULL,
        mode TEXT NOT NULL,
        table_name TEXT NOT NULL,
        parsed_statement TEXT NOT NULL,
        requestor TEXT NOT NULL,
        meta_request_id UUID REFERENCES meta_requests(id) ON DELETE SET NULL,
        status SMALLINT NOT NULL,
        runtype TEXT NOT NULL,
        staged BOOLEAN NOT NULL,
        auto_run BOOLEAN NOT NULL,
        editable BOOLEAN NOT NULL,
        approved_by TEXT,
        approved_at TIMESTAMPTZ,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        error_message TEXT,
        table_rows_start BIGINT,
        table_rows_end BIGINT,
        table_size_start BIGINT,
        table_size_end BIGINT,
        index_size_start BIGINT,
        index_size_end BIGINT,
        copy_percentage INTEGER,
        run_host TEXT,
        work_directory TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_migrations_status ON migrations(status)",
    "CREATE INDEX IF NOT EXISTS idx_migrations_cluster_status ON migrations(cluster_name, status)",
];

/// Create a pool and verify it with a round trip
pub async fn init_pool(config: &DatabaseConfig) -> anyhow::Result<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if config.ssl_required {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
    };

    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;
    client
        .query_one("SELECT 1", &[])
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify database connection: {}", e))?;

    info!(
        host = %config.host,
        database = %config.database,
        tls = config.ssl_required,
        "Database connection established"
    );
    Ok(pool)
}

/// Create the store tables if they don't exist
pub async fn create_tables(pool: &Pool) -> anyhow::Result<()> {
    let client = pool.get().await?;
    for statement in SCHEMA {
        client.execute(statement, &[]).await?;
    }
    info!("Database tables initialized");
    Ok(())
}
