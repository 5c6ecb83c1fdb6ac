//! Warehouse abstraction layer for Sluice.
//!
//! Provides a trait-based interface over cloud warehouse clients, allowing
//! different backends to be used interchangeably. Every backend speaks
//! DataFrames at the seam; SQL execution and transport stay inside the
//! vendor client crates.

mod bigquery;
mod mock;
mod postgres;
mod redshift;
mod snowflake;

pub use bigquery::BigQueryConnector;
pub use mock::{FailingWarehouse, MockWarehouse};
pub use postgres::PostgresConnector;
pub use redshift::RedshiftConnector;
pub use snowflake::SnowflakeConnector;

use crate::config::ProfileConfig;
use crate::error::{Result, SluiceError};
use async_trait::async_trait;
use polars::prelude::DataFrame;

/// Supported warehouse backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    BigQuery,
    Snowflake,
    Postgres,
    Redshift,
}

impl Dialect {
    /// Returns the dialect as a string for persistence and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigQuery => "bigquery",
            Self::Snowflake => "snowflake",
            Self::Postgres => "postgres",
            Self::Redshift => "redshift",
        }
    }

    /// Parses a dialect from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bigquery" => Some(Self::BigQuery),
            "snowflake" => Some(Self::Snowflake),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "redshift" => Some(Self::Redshift),
            _ => None,
        }
    }

    /// Returns the default port for this dialect, where one applies.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::Redshift => Some(5439),
            Self::BigQuery | Self::Snowflake => None,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior when the destination table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Error if the table already exists.
    #[default]
    Fail,
    /// Append rows to the existing table.
    Append,
    /// Clear the existing table, then write.
    Truncate,
    /// Drop the table first (absence is not an error), then create fresh.
    Drop,
}

impl WriteMode {
    /// Returns the mode as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Append => "append",
            Self::Truncate => "truncate",
            Self::Drop => "drop",
        }
    }

    /// Parses a mode from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fail" => Some(Self::Fail),
            "append" => Some(Self::Append),
            "truncate" => Some(Self::Truncate),
            "drop" => Some(Self::Drop),
            _ => None,
        }
    }
}

/// Options for [`Warehouse::write_dataframe`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// What to do when the destination table already exists.
    pub mode: WriteMode,

    /// Rows per write chunk; `None` uses the backend's default.
    pub chunk_size: Option<usize>,
}

impl WriteOptions {
    /// Creates options with the given mode and default chunking.
    pub fn with_mode(mode: WriteMode) -> Self {
        Self {
            mode,
            chunk_size: None,
        }
    }

    /// Validates the options.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == Some(0) {
            return Err(SluiceError::config("chunk_size must be greater than zero"));
        }
        Ok(())
    }

    pub(crate) fn chunk_size_or(&self, backend_default: usize) -> usize {
        self.chunk_size.unwrap_or(backend_default)
    }
}

/// A qualified table name: `schema.table` or `project.schema.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Project (BigQuery) or database (Snowflake) qualifier, when present.
    pub project: Option<String>,

    /// Schema (Postgres/Snowflake) or dataset (BigQuery).
    pub schema: String,

    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Creates a table reference from schema and table parts.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: None,
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parses a dotted table name.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        let invalid = || {
            SluiceError::config(format!(
                "Invalid table name '{name}'. Expected 'schema.table' or 'project.schema.table'"
            ))
        };

        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        match parts.as_slice() {
            [schema, table] => Ok(Self::new(*schema, *table)),
            [project, schema, table] => Ok(Self {
                project: Some((*project).to_string()),
                schema: (*schema).to_string(),
                table: (*table).to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    /// Returns the dotted form, including the project qualifier when present.
    pub fn qualified(&self) -> String {
        match &self.project {
            Some(project) => format!("{project}.{}.{}", self.schema, self.table),
            None => format!("{}.{}", self.schema, self.table),
        }
    }
}

impl std::str::FromStr for TableRef {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// Creates a warehouse connector for the given profile.
///
/// This is the central factory function for warehouse connections.
pub async fn connect(profile: &ProfileConfig) -> Result<Box<dyn Warehouse>> {
    match profile {
        ProfileConfig::BigQuery(cfg) => {
            let connector = BigQueryConnector::connect(cfg).await?;
            Ok(Box::new(connector))
        }
        ProfileConfig::Snowflake(cfg) => {
            let connector = SnowflakeConnector::connect(cfg)?;
            Ok(Box::new(connector))
        }
        ProfileConfig::Postgres(cfg) => {
            let connector = PostgresConnector::connect(cfg).await?;
            Ok(Box::new(connector))
        }
        ProfileConfig::Redshift(cfg) => {
            let connector = RedshiftConnector::connect(cfg).await?;
            Ok(Box::new(connector))
        }
    }
}

/// Trait defining the interface for warehouse connectors.
///
/// All operations are async and return Results with SluiceError.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Returns the backend dialect.
    fn dialect(&self) -> Dialect;

    /// Executes a SQL statement.
    ///
    /// Returns `Ok(Some(df))` for result-returning statements (the frame may
    /// be empty) and `Ok(None)` for statements without a result set.
    async fn query(&self, sql: &str) -> Result<Option<DataFrame>>;

    /// Executes a SQL query and materializes the result as a DataFrame.
    ///
    /// Errors if the statement produced no result set.
    async fn read_dataframe(&self, sql: &str) -> Result<DataFrame> {
        match self.query(sql).await? {
            Some(df) => Ok(df),
            None => Err(SluiceError::query(
                "statement did not produce a result set",
            )),
        }
    }

    /// Persists a DataFrame as a warehouse table.
    async fn write_dataframe(
        &self,
        df: &DataFrame,
        table: &TableRef,
        opts: &WriteOptions,
    ) -> Result<()>;

    /// Determines whether a table exists.
    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    /// Lists table names in a schema (dataset).
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Releases the connection, where the backend holds one.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
