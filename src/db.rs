use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, Pool};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::data::QUERY_TIMEOUT;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 25;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies a server-side `statement_timeout` to every pooled connection so a
/// query abandoned by its caller is cancelled by Postgres as well.
#[derive(Debug, Clone, Copy)]
struct StatementTimeout(Duration);

impl CustomizeConnection<PgConnection, r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!("SET statement_timeout = {}", self.0.as_millis()))
            .map_err(r2d2::Error::QueryError)
    }
}

pub fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    init_pool_with_size(database_url, DEFAULT_MAX_POOL_SIZE)
}

pub fn init_pool_with_size(database_url: &str, max_size: u32) -> anyhow::Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool_size = max_size.max(1);
    let pool = Pool::builder()
        .max_size(pool_size)
        .connection_timeout(Duration::from_secs(10))
        .idle_timeout(Some(Duration::from_secs(15 * 60)))
        .connection_customizer(Box::new(StatementTimeout(QUERY_TIMEOUT)))
        .build(manager)?;
    Ok(pool)
}

/// Applies any pending embedded migrations and returns how many ran.
pub fn run_migrations(pool: &PgPool) -> anyhow::Result<usize> {
    let mut conn = pool.get()?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow::anyhow!("failed to run migrations: {err}"))?;
    Ok(applied.len())
}
