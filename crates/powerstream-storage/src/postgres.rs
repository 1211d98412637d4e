//! PostgreSQL archive backend.
//!
//! Runs the relational form of a query against the indexer's archive
//! schema. Requires the `postgres` feature:
//! ```toml
//! powerstream-storage = { version = "0.2", features = ["postgres"] }
//! ```
//!
//! # Schema
//! The archive is written by the indexer; this backend only reads:
//! - `transactions(id, height, tx_bytes, tx_data)`
//! - `event_paths(id, path_text)`
//! - `events_for_transactions(bigint[])` → `(tx_id, path_text, value_text, value_bytes)`
//! - the `filter_event_*` relations the relational compiler targets

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use powerstream_core::archive::{Archive, ArchivedTx, AttributeRow};
use powerstream_core::error::StoreError;
use powerstream_core::query::CompiledQuery;
use powerstream_core::relational::{RelationalOptions, SqlParam};

// ─── Connection options ───────────────────────────────────────────────────────

/// Connection pool options for the Postgres archive.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds (default: 30)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    30
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// ─── PostgresArchive ──────────────────────────────────────────────────────────

/// PostgreSQL-backed archive. Cheaply cloneable; wraps a connection pool.
#[derive(Clone)]
pub struct PostgresArchive {
    pool: PgPool,
}

impl PostgresArchive {
    /// Connect with default pool options.
    ///
    /// The URL follows libpq convention:
    /// `postgresql://[user[:password]@][host][:port][/dbname]`
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connect(format!("postgres connect: {e}")))?;

        info!(max_connections = opts.max_connections, "PostgresArchive connected");
        Ok(Self { pool })
    }
}

fn query_error(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn decode_error(e: sqlx::Error) -> StoreError {
    StoreError::Decode(e.to_string())
}

fn attribute_row(row: &PgRow) -> Result<AttributeRow, StoreError> {
    let value_bytes: Option<Vec<u8>> = row.try_get("value_bytes").map_err(decode_error)?;
    let value = match value_bytes {
        // values too long for the text column are stored as bytes
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => row
            .try_get::<Option<String>, _>("value_text")
            .map_err(decode_error)?
            .unwrap_or_default(),
    };
    Ok(AttributeRow {
        tx_id: row.try_get("tx_id").map_err(decode_error)?,
        path: row.try_get("path_text").map_err(decode_error)?,
        value,
    })
}

#[async_trait]
impl Archive for PostgresArchive {
    async fn matching_ids(
        &self,
        query: &CompiledQuery,
        options: RelationalOptions,
    ) -> Result<Vec<i64>, StoreError> {
        let filter = query.relational(options)?;
        debug!(sql = %filter.sql, params = filter.params.len(), "executing relational filter");

        let mut statement = sqlx::query(&filter.sql);
        for param in filter.params {
            statement = match param {
                SqlParam::Text(text) => statement.bind(text),
                SqlParam::TextArray(values) => statement.bind(values),
            };
        }

        let rows = statement.fetch_all(&self.pool).await.map_err(query_error)?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(decode_error))
            .collect()
    }

    async fn transactions(&self, ids: &[i64]) -> Result<Vec<ArchivedTx>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, height, tx_bytes, tx_data FROM transactions
             WHERE id = ANY($1) ORDER BY id ASC",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                Ok(ArchivedTx {
                    id: row.try_get("id").map_err(decode_error)?,
                    height: row.try_get("height").map_err(decode_error)?,
                    tx_bytes: row
                        .try_get::<Option<Vec<u8>>, _>("tx_bytes")
                        .map_err(decode_error)?
                        .unwrap_or_default(),
                    tx_data: row.try_get("tx_data").map_err(decode_error)?,
                })
            })
            .collect()
    }

    async fn attributes_for(&self, ids: &[i64]) -> Result<Vec<AttributeRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT tx_id, path_text, value_text, value_bytes
             FROM events_for_transactions($1::bigint[])",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(attribute_row).collect()
    }

    async fn attribute_keys(
        &self,
        exclude_prefix: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT path_text FROM event_paths
             WHERE $1 = '' OR NOT starts_with(path_text, $1)
             ORDER BY path_text ASC LIMIT $2 OFFSET $3",
        )
        .bind(exclude_prefix)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| row.try_get("path_text").map_err(decode_error))
            .collect()
    }
}
