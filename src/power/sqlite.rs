//! The SQLite Power (SPEC_FULL.md §4.3.1).
//!
//! Grounded on `original_source/superpowers/sqlite.py`'s schema and query
//! logic, and on the teacher's `sqlx` usage in `db/user.rs` for the actual
//! `Pool<Sqlite>` / `sqlx::query` idiom.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{Result, SuperpowersError};
use crate::ip_address::Address;

use super::Marshalling;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS Address (address TEXT PRIMARY KEY, fqdn TEXT);";

#[derive(Debug)]
pub struct SqlitePower {
    pool: SqlitePool,
    marshalling: Marshalling,
}

impl SqlitePower {
    /// Open (creating if missing) the sqlite database at `db_path` and
    /// ensure the `Address` table exists.
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(SuperpowersError::Sqlx)?;
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(SuperpowersError::Sqlx)?;
        Ok(SqlitePower {
            pool,
            // No background init tasks: the source's SQLite power never
            // registers any (SPEC_FULL.md §4.3.1).
            marshalling: Marshalling::new(Vec::new()),
        })
    }

    pub(super) fn marshalling(&self) -> &Marshalling {
        &self.marshalling
    }

    /// Exposed for tests that need to seed rows directly.
    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn query(&self, addr: Address) -> String {
        let row: Option<(String,)> =
            match sqlx::query_as("SELECT fqdn FROM Address WHERE address = ?")
                .bind(addr.to_string())
                .fetch_optional(&self.pool)
                .await
            {
                Ok(row) => row,
                Err(err) => {
                    tracing::warn!(error = %err, %addr, "sqlite power query failed");
                    None
                }
            };
        row.map(|(fqdn,)| fqdn).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_schema_and_answers_empty_for_unknown_address() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite3");
        let power = SqlitePower::new(db_path.to_str().unwrap()).await.unwrap();
        let addr: Address = "1.2.3.4".parse().unwrap();
        assert_eq!(power.query(addr).await, "");
    }

    #[tokio::test]
    async fn returns_inserted_fqdn() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite3");
        let power = SqlitePower::new(db_path.to_str().unwrap()).await.unwrap();
        sqlx::query("INSERT INTO Address (address, fqdn) VALUES (?, ?)")
            .bind("1.2.3.4")
            .bind("host.example.com")
            .execute(&power.pool)
            .await
            .unwrap();
        let addr: Address = "1.2.3.4".parse().unwrap();
        assert_eq!(power.query(addr).await, "host.example.com");
    }
}
