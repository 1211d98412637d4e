//! Service configuration.

use serde::{Deserialize, Serialize};

use powerstream_core::parser::DEFAULT_MAX_EXPRESSIONS;
use powerstream_core::relational::{RelationalOptions, DEFAULT_MAX_VALUE_TEXT};

use crate::error::ServiceError;
use crate::telemetry::LogConfig;

/// Identity of the upstream chain node, reported by `power_stream_info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub version: String,
}

/// Connection settings for the Postgres archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_pg_host")]
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default = "default_pg_database")]
    pub database: String,
    #[serde(default = "default_pg_user")]
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_pg_host() -> String { "localhost".into() }
fn default_pg_port() -> u16 { 5432 }
fn default_pg_database() -> String { "powerstream".into() }
fn default_pg_user() -> String { "postgres".into() }
fn default_max_connections() -> u32 { 10 }

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            database: default_pg_database(),
            user: default_pg_user(),
            password: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl PostgresConfig {
    /// libpq-style connection URL.
    pub fn url(&self) -> String {
        let auth = if self.password.is_empty() {
            self.user.clone()
        } else {
            format!("{}:{}", self.user, self.password)
        };
        format!(
            "postgresql://{auth}@{}:{}/{}",
            self.host, self.port, self.database
        )
    }

    #[cfg(feature = "postgres")]
    pub fn pool_options(&self) -> powerstream_storage::postgres::PostgresOptions {
        powerstream_storage::postgres::PostgresOptions {
            max_connections: self.max_connections,
            ..Default::default()
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Transactions per search batch push
    #[serde(default = "default_search_batch_size")]
    pub search_batch_size: usize,
    /// Equality literals longer than this (bytes) are compared by SHA-256 digest
    #[serde(default = "default_max_value_text")]
    pub max_value_text: usize,
    /// Upper bound for the `limit` param of `attributes`
    #[serde(default = "default_attributes_max_limit")]
    pub attributes_max_limit: usize,
    /// Attribute namespace hidden from `attributes`
    #[serde(default = "default_excluded_prefix")]
    pub excluded_attribute_prefix: String,
    /// Maximum number of expressions in one query
    #[serde(default = "default_max_query_expressions")]
    pub max_query_expressions: usize,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub node: NodeInfo,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_search_batch_size() -> usize { 128 }
fn default_max_value_text() -> usize { DEFAULT_MAX_VALUE_TEXT }
fn default_attributes_max_limit() -> usize { 1_000 }
fn default_excluded_prefix() -> String { "tm.".into() }
fn default_max_query_expressions() -> usize { DEFAULT_MAX_EXPRESSIONS }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            search_batch_size: default_search_batch_size(),
            max_value_text: default_max_value_text(),
            attributes_max_limit: default_attributes_max_limit(),
            excluded_attribute_prefix: default_excluded_prefix(),
            max_query_expressions: default_max_query_expressions(),
            postgres: PostgresConfig::default(),
            node: NodeInfo::default(),
            log: LogConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ServiceError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Overlay variables resolved by `lookup` onto this config.
    ///
    /// Reads `POSTGRES_HOST`, `POSTGRES_PORT`, `POSTGRES_DATABASE`,
    /// `POSTGRES_USER`, `POSTGRES_PASSWORD`, `POWERSTREAM_SEARCH_BATCH_SIZE`
    /// and `POWERSTREAM_LOG`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ServiceError> {
        let pg = &mut self.postgres;
        if let Some(host) = lookup("POSTGRES_HOST") {
            pg.host = host;
        }
        if let Some(port) = lookup("POSTGRES_PORT") {
            pg.port = port
                .parse()
                .map_err(|_| ServiceError::Config(format!("POSTGRES_PORT: {port:?}")))?;
        }
        if let Some(database) = lookup("POSTGRES_DATABASE") {
            pg.database = database;
        }
        if let Some(user) = lookup("POSTGRES_USER") {
            pg.user = user;
        }
        if let Some(password) = lookup("POSTGRES_PASSWORD") {
            pg.password = password;
        }
        if let Some(size) = lookup("POWERSTREAM_SEARCH_BATCH_SIZE") {
            self.search_batch_size = size.parse().map_err(|_| {
                ServiceError::Config(format!("POWERSTREAM_SEARCH_BATCH_SIZE: {size:?}"))
            })?;
        }
        if let Some(level) = lookup("POWERSTREAM_LOG") {
            self.log.service_level = level;
        }
        Ok(())
    }

    /// Reject values that would make the service misbehave.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.search_batch_size == 0 {
            return Err(ServiceError::Config("search_batch_size must be at least 1".into()));
        }
        if self.attributes_max_limit == 0 {
            return Err(ServiceError::Config("attributes_max_limit must be at least 1".into()));
        }
        if self.max_query_expressions == 0 {
            return Err(ServiceError::Config("max_query_expressions must be at least 1".into()));
        }
        Ok(())
    }

    pub fn relational_options(&self) -> RelationalOptions {
        RelationalOptions {
            max_value_text: self.max_value_text,
        }
    }

    /// Open the Postgres archive described by `self.postgres`.
    ///
    /// Streamers built through [`crate::ServiceContext`] compile their
    /// filters with [`Self::relational_options`], so this archive and the
    /// session's validation share one hashing threshold.
    #[cfg(feature = "postgres")]
    pub async fn connect_archive(
        &self,
    ) -> Result<powerstream_storage::postgres::PostgresArchive, ServiceError> {
        let archive = powerstream_storage::postgres::PostgresArchive::connect_with_options(
            &self.postgres.url(),
            self.postgres.pool_options(),
        )
        .await?;
        Ok(archive)
    }
}
