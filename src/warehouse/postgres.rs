//! PostgreSQL warehouse connector.
//!
//! Implements the `Warehouse` trait over sqlx. Redshift speaks the Postgres
//! wire protocol, so `RedshiftConnector` reuses this implementation with a
//! different dialect tag.

use crate::config::PostgresConfig;
use crate::error::{Result, SluiceError};
use crate::frame::{self, ColumnInfo, Row, Value, ValueKind};
use crate::warehouse::{Dialect, TableRef, Warehouse, WriteMode, WriteOptions};
use async_trait::async_trait;
use polars::prelude::{DataFrame, DataType};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, TypeInfo};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Query timeout in seconds.
const QUERY_TIMEOUT_SECS: u64 = 90;

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Rows per INSERT statement when no chunk size is given.
const DEFAULT_INSERT_CHUNK: usize = 1_000;

/// PostgreSQL warehouse connector.
#[derive(Debug)]
pub struct PostgresConnector {
    pool: PgPool,
    dialect: Dialect,
}

impl PostgresConnector {
    /// Connects to a Postgres database described by the config.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        Self::connect_with_dialect(config, Dialect::Postgres).await
    }

    /// Connects with an explicit dialect tag (used by the Redshift connector).
    pub(crate) async fn connect_with_dialect(
        config: &PostgresConfig,
        dialect: Dialect,
    ) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!("Connected to {}", config.display_string());
                    return Ok(Self { pool, dialect });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    // Auth failures and the like will not resolve themselves.
                    if !is_transient {
                        break;
                    }

                    if attempt < MAX_RETRY_ATTEMPTS {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2; // Exponential backoff
                    }
                }
            }
        }

        // All retries exhausted
        Err(map_connection_error(
            last_error.expect("at least one attempt was made"),
            config,
        ))
    }

    /// Creates a connector from an existing connection pool.
    ///
    /// This is primarily useful for testing.
    #[allow(dead_code)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            dialect: Dialect::Postgres,
        }
    }

    /// Runs a statement without materializing results.
    async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| SluiceError::write(format_query_error(e)))?;
        Ok(())
    }
}

#[async_trait]
impl Warehouse for PostgresConnector {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str) -> Result<Option<DataFrame>> {
        debug!("Running SQL against {}", self.dialect);

        let rows = tokio::time::timeout(
            Duration::from_secs(QUERY_TIMEOUT_SECS),
            sqlx::query(sql).fetch_all(&self.pool),
        )
        .await
        .map_err(|_| {
            SluiceError::query(format!("Query timed out after {QUERY_TIMEOUT_SECS} seconds"))
        })?
        .map_err(|e| SluiceError::query(format_query_error(e)))?;

        let columns = if let Some(first_row) = rows.first() {
            first_row
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), kind_for_pg_type(col.type_info().name())))
                .collect::<Vec<_>>()
        } else {
            // Empty result: the prepared statement still knows whether this
            // statement produces columns at all.
            let describe = self
                .pool
                .describe(sql)
                .await
                .map_err(|e| SluiceError::query(format_query_error(e)))?;

            if describe.columns().is_empty() {
                return Ok(None);
            }

            describe
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), kind_for_pg_type(col.type_info().name())))
                .collect()
        };

        let values: Vec<Row> = rows.iter().map(convert_row).collect();
        let df = frame::rows_to_dataframe(&columns, values)?;

        info!("Read {} rows from {}", df.height(), self.dialect);
        Ok(Some(df))
    }

    async fn write_dataframe(
        &self,
        df: &DataFrame,
        table: &TableRef,
        opts: &WriteOptions,
    ) -> Result<()> {
        opts.validate()?;
        let target = quote_table(table);

        match opts.mode {
            WriteMode::Fail => {
                if self.table_exists(table).await? {
                    return Err(SluiceError::write(format!(
                        "table {} already exists",
                        table.qualified()
                    )));
                }
            }
            WriteMode::Drop => {
                self.execute(&format!("DROP TABLE IF EXISTS {target}")).await?;
            }
            WriteMode::Truncate => {
                if self.table_exists(table).await? {
                    self.execute(&format!("TRUNCATE TABLE {target}")).await?;
                }
            }
            WriteMode::Append => {}
        }

        let ddl = create_table_ddl(df, table);
        self.execute(&ddl).await?;

        let column_list = insert_column_list(df);
        let rows = frame::dataframe_to_rows(df)?;
        let chunk_size = opts.chunk_size_or(DEFAULT_INSERT_CHUNK);

        info!("Writing to {}...", table.qualified());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SluiceError::write(format_query_error(e)))?;

        for chunk in rows.chunks(chunk_size) {
            let stmt = insert_statement(&target, &column_list, chunk);
            sqlx::query(&stmt)
                .execute(&mut *tx)
                .await
                .map_err(|e| SluiceError::write(format_query_error(e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| SluiceError::write(format_query_error(e)))?;

        info!("Successfully wrote {} rows to {}", df.height(), table.qualified());
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM information_schema.tables
                WHERE table_schema = $1
                    AND table_name = $2
            )
            "#,
        )
        .bind(&table.schema)
        .bind(&table.table)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SluiceError::query(format_query_error(e)))?;

        Ok(exists)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let tables: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1
            ORDER BY table_name
            "#,
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SluiceError::query(format_query_error(e)))?;

        Ok(tables)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Converts a sqlx PgRow to a row of frame values.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow, keyed by declared type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),

        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        // For all other types, try to get as string
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Maps a Postgres type name to the frame column kind.
fn kind_for_pg_type(type_name: &str) -> ValueKind {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => ValueKind::Bool,
        "INT2" | "SMALLINT" | "INT4" | "INT" | "INTEGER" | "INT8" | "BIGINT" => ValueKind::Int,
        "FLOAT4" | "REAL" | "FLOAT8" | "DOUBLE PRECISION" => ValueKind::Float,
        "BYTEA" => ValueKind::Bytes,
        _ => ValueKind::String,
    }
}

/// Maps a polars dtype to a Postgres column type for CREATE TABLE.
fn pg_type_for_dtype(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Boolean => "BOOLEAN",
        DataType::Int8 | DataType::Int16 => "SMALLINT",
        DataType::Int32 => "INTEGER",
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => "BIGINT",
        DataType::UInt8 | DataType::UInt16 => "INTEGER",
        DataType::Float32 => "REAL",
        DataType::Float64 => "DOUBLE PRECISION",
        DataType::Binary => "BYTEA",
        DataType::Date => "DATE",
        DataType::Datetime(_, _) => "TIMESTAMPTZ",
        _ => "TEXT",
    }
}

/// Doubles embedded quotes for a quoted identifier.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_table(table: &TableRef) -> String {
    format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.table))
}

fn create_table_ddl(df: &DataFrame, table: &TableRef) -> String {
    let columns: Vec<String> = df
        .get_columns()
        .iter()
        .map(|col| {
            format!(
                "{} {}",
                quote_ident(col.name().as_str()),
                pg_type_for_dtype(col.dtype())
            )
        })
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_table(table),
        columns.join(", ")
    )
}

fn insert_column_list(df: &DataFrame) -> String {
    df.get_columns()
        .iter()
        .map(|col| quote_ident(col.name().as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_statement(target: &str, column_list: &str, rows: &[Row]) -> String {
    let values: Vec<String> = rows
        .iter()
        .map(|row| {
            let literals: Vec<String> = row.iter().map(Value::to_sql_literal).collect();
            format!("({})", literals.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {target} ({column_list}) VALUES {}",
        values.join(", ")
    )
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    // Connection refused or timeout are often transient
    if error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
    {
        return true;
    }

    // Authentication and database-not-found errors are not transient
    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
        || error_str.contains("ssl")
        || error_str.contains("tls")
    {
        return false;
    }

    // Default to not retrying unknown errors
    false
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &PostgresConfig) -> SluiceError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        SluiceError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        SluiceError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        SluiceError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        SluiceError::connection(
            "Server requires SSL. Add '?sslmode=require' to the connection string.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        SluiceError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        SluiceError::connection(error.to_string())
    }
}

/// Formats a query error with detail and hints if available.
fn format_query_error(error: sqlx::Error) -> String {
    let error_str = error.to_string();

    let mut result = String::new();

    // PostgreSQL errors carry structured detail worth surfacing
    if let Some(db_error) = error.as_database_error() {
        result.push_str("ERROR: ");
        result.push_str(db_error.message());

        if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
            if let Some(detail) = pg_error.detail() {
                result.push_str("\n  DETAIL: ");
                result.push_str(detail);
            }

            if let Some(hint) = pg_error.hint() {
                result.push_str("\n  HINT: ");
                result.push_str(hint);
            }

            if let Some(table) = pg_error.table() {
                result.push_str("\n  TABLE: ");
                result.push_str(table);
            }

            if let Some(column) = pg_error.column() {
                result.push_str("\n  COLUMN: ");
                result.push_str(column);
            }

            if let Some(constraint) = pg_error.constraint() {
                result.push_str("\n  CONSTRAINT: ");
                result.push_str(constraint);
            }
        }
    } else {
        result = error_str;
    }

    result
}
