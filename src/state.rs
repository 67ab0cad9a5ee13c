use std::sync::Arc;

use diesel::{
    SqliteConnection,
    r2d2::{ConnectionManager, Pool},
};
use diesel_migrations::MigrationHarness;

use crate::{
    MIGRATIONS,
    clock::Clock,
    debates::verdicts::VerdictQueue,
    error::ArenaError,
    notify::{Notifier, UsageMeter},
};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Builds a connection pool and brings the schema up to date.
///
/// An in-memory database only exists for as long as its connection does, so
/// for `:memory:` the pool is limited to a single connection.
pub fn make_pool(db_url: &str, max_size: u32) -> Result<DbPool, ArenaError> {
    let pool: DbPool = Pool::builder()
        .max_size(if db_url == ":memory:" { 1 } else { max_size })
        .build(ConnectionManager::<SqliteConnection>::new(db_url))?;

    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| ArenaError::Migration(e.to_string()))?;

    tracing::debug!(location = db_url, "database ready");

    Ok(pool)
}

/// The collaborators which the debate and tournament operations need besides
/// the store itself.
#[derive(Clone)]
pub struct Services {
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub meter: Arc<dyn UsageMeter>,
    pub verdicts: VerdictQueue,
}

impl Services {
    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }
}
