use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::config::AppConfig;
use crate::migrator::Migrator;

/// Shared connection pool handle. SeaORM's `DatabaseConnection` is already a
/// pool internally; services clone an `Arc` of this.
pub type DbPool = DatabaseConnection;

/// Open a connection pool using the pool sizing from configuration.
pub async fn establish_connection(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    let mut opts = ConnectOptions::new(cfg.database_url.clone());
    opts.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(false);

    let conn = Database::connect(opts).await?;
    info!("database connection established");
    Ok(conn)
}

/// Apply all pending migrations.
pub async fn run_migrations(conn: &DbPool) -> Result<(), DbErr> {
    info!("running database migrations");
    Migrator::up(conn, None).await?;
    info!("database migrations complete");
    Ok(())
}
