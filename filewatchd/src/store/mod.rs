//! Persistence store: a pooled, synchronous `diesel`/SQLite connection, with every call wrapped
//! in `spawn_blocking` so the rest of the service stays `async` throughout. Grounded in
//! `storage_controller`'s choice of `diesel` + `diesel_migrations`, retargeted from its
//! PostgreSQL/`diesel-async` pairing to SQLite, since `diesel-async` has no SQLite backend.

pub mod models;
pub mod schema;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::error::StoreError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledSqlite = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the SQLite database at `database_url` and applies any pending
    /// migrations. Fails loudly: an unapplied migration is a fatal startup error.
    pub fn open(database_url: &str) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let mut builder = Pool::builder();
        if database_url == ":memory:" {
            // Each pooled connection to ":memory:" gets its own private, independent database;
            // a pool size above one would silently lose every write made through another
            // connection. A single shared connection is the only way this works.
            builder = builder.max_size(1);
        }
        let pool = builder
            .build(manager)
            .map_err(|e| StoreError::Migration(format!("failed to build connection pool: {e}")))?;

        let mut conn = pool.get()?;
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
            .map_err(|e| StoreError::Migration(format!("failed to set pragmas: {e}")))?;

        info!("applying database migrations");
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    /// A private, single-connection in-memory database. Used by tests in place of a temp file.
    pub fn open_in_memory() -> Self {
        Self::open(":memory:").expect("in-memory database always migrates cleanly")
    }

    pub fn conn(&self) -> Result<PooledSqlite, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Runs a synchronous closure against a pooled connection on the blocking thread pool.
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}
