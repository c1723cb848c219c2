//! Database connection pool management.
//!
//! Connection pooling for SQLite using r2d2: pool initialization, per-connection
//! setup, and running migrations.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use stowage_common::{Error, Result};

use crate::migrations;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

fn build_pool(manager: SqliteConnectionManager, max_size: u32) -> Result<DbPool> {
    let manager = manager.with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create connection pool: {}", e)))?;

    let conn = pool
        .get()
        .map_err(|e| Error::database(format!("Failed to get connection for migrations: {}", e)))?;

    migrations::run_migrations(&conn)
        .map_err(|e| Error::database(format!("Failed to run migrations: {}", e)))?;

    Ok(pool)
}

/// Initialize a new database pool with the given file path.
///
/// Creates the database file if needed, enables foreign keys on every
/// connection and runs pending migrations.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(DbPool)` - Initialized connection pool
/// * `Err(Error)` - If pool creation or migration fails
///
/// # Example
///
/// ```no_run
/// use stowage_db::pool::init_pool;
///
/// let pool = init_pool("/var/lib/stowage/stowage.db").unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    build_pool(SqliteConnectionManager::file(db_path), 4)
}

/// Initialize an in-memory database pool for testing.
///
/// Every `:memory:` connection is its own database, so the pool holds a
/// single connection. Callers must not hold two connections at once.
///
/// # Example
///
/// ```
/// use stowage_db::pool::init_memory_pool;
///
/// let pool = init_memory_pool().unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_memory_pool() -> Result<DbPool> {
    build_pool(SqliteConnectionManager::memory(), 1)
}

/// Open a bare connection without running migrations.
///
/// Used by management commands that report or apply migrations explicitly.
pub fn open(db_path: &str) -> Result<Connection> {
    Connection::open(db_path)
        .map_err(|e| Error::database(format!("Failed to open database {}: {}", db_path, e)))
}

/// Get a connection from the pool.
///
/// Converts the r2d2 error into the common Error type.
///
/// # Example
///
/// ```
/// use stowage_db::pool::{init_memory_pool, get_conn};
///
/// let pool = init_memory_pool().unwrap();
/// let conn = get_conn(&pool).unwrap();
/// ```
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("Failed to get connection from pool: {}", e)))
}
