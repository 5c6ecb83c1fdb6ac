//! Redshift warehouse connector.
//!
//! Redshift speaks the Postgres wire protocol; this connector delegates to
//! the Postgres implementation, differing only in dialect tag, default
//! port, and environment prefix.

use crate::config::PostgresConfig;
use crate::error::Result;
use crate::warehouse::{
    Dialect, PostgresConnector, TableRef, Warehouse, WriteOptions,
};
use async_trait::async_trait;
use polars::prelude::DataFrame;

/// Environment prefix for Redshift connection settings.
pub const REDSHIFT_ENV_PREFIX: &str = "REDSHIFT";

/// Redshift warehouse connector.
#[derive(Debug)]
pub struct RedshiftConnector {
    inner: PostgresConnector,
}

impl RedshiftConnector {
    /// Connects to a Redshift cluster described by the config.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let inner = PostgresConnector::connect_with_dialect(config, Dialect::Redshift).await?;
        Ok(Self { inner })
    }

    /// Connects using `REDSHIFT_*` environment variables.
    pub async fn connect_from_env() -> Result<Self> {
        let port = Dialect::Redshift.default_port().unwrap_or(5439);
        let config = PostgresConfig::from_env(REDSHIFT_ENV_PREFIX, port);
        Self::connect(&config).await
    }
}

#[async_trait]
impl Warehouse for RedshiftConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Redshift
    }

    async fn query(&self, sql: &str) -> Result<Option<DataFrame>> {
        self.inner.query(sql).await
    }

    async fn write_dataframe(
        &self,
        df: &DataFrame,
        table: &TableRef,
        opts: &WriteOptions,
    ) -> Result<()> {
        self.inner.write_dataframe(df, table, opts).await
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        self.inner.table_exists(table).await
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        self.inner.list_tables(schema).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
