//! Snowflake warehouse connector.
//!
//! Implements the `Warehouse` trait over the `snowflake-api` crate. Query
//! results arrive as Arrow record batches and cross into polars through an
//! in-memory IPC buffer; writes go through batched INSERT statements.

use crate::config::SnowflakeConfig;
use crate::error::{Result, SluiceError};
use crate::frame::{self, escape_sql_string, hex_encode, Row, Value};
use crate::warehouse::{Dialect, TableRef, Warehouse, WriteMode, WriteOptions};
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use polars::prelude::{DataFrame, DataType, IpcReader, SerReader};
use snowflake_api::{QueryResult, SnowflakeApi};
use std::io::Cursor;
use tracing::{debug, info};

/// Snowflake warehouse connector.
pub struct SnowflakeConnector {
    api: SnowflakeApi,
    config: SnowflakeConfig,
}

impl SnowflakeConnector {
    /// Authenticates a Snowflake session with password auth.
    pub fn connect(config: &SnowflakeConfig) -> Result<Self> {
        let api = SnowflakeApi::with_password_auth(
            &config.account,
            config.warehouse.as_deref(),
            config.database.as_deref(),
            config.schema.as_deref(),
            &config.user,
            config.role.as_deref(),
            &config.password,
        )
        .map_err(|e| SluiceError::connection(e.to_string()))?;

        Ok(Self {
            api,
            config: config.clone(),
        })
    }

    /// Connects using `SNOWFLAKE_*` environment variables.
    pub fn connect_from_env() -> Result<Self> {
        let config = SnowflakeConfig::from_env()?;
        Self::connect(&config)
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.api
            .exec(sql)
            .await
            .map_err(|e| SluiceError::write(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Warehouse for SnowflakeConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Snowflake
    }

    async fn query(&self, sql: &str) -> Result<Option<DataFrame>> {
        debug!("Running SQL against snowflake");

        let result = self
            .api
            .exec(sql)
            .await
            .map_err(|e| SluiceError::query(e.to_string()))?;

        match result {
            QueryResult::Arrow(batches) => {
                let df = batches_to_dataframe(&batches)?;
                info!("Successfully read {} rows from Snowflake", df.height());
                Ok(Some(df))
            }
            // DDL and session statements report their status as JSON rather
            // than a result set worth materializing.
            QueryResult::Json(json) => {
                let rows = json.value.as_array().map_or(0, |a| a.len());
                info!("Statement returned a JSON status payload ({rows} rows), no frame materialized");
                Ok(None)
            }
            QueryResult::Empty => {
                info!("No results returned from SQL call");
                Ok(None)
            }
        }
    }

    async fn write_dataframe(
        &self,
        df: &DataFrame,
        table: &TableRef,
        opts: &WriteOptions,
    ) -> Result<()> {
        opts.validate()?;
        let target = table.qualified();

        match opts.mode {
            WriteMode::Fail => {
                if self.table_exists(table).await? {
                    return Err(SluiceError::write(format!(
                        "table {target} already exists"
                    )));
                }
            }
            WriteMode::Drop => {
                self.execute(&format!("DROP TABLE IF EXISTS {target}")).await?;
            }
            WriteMode::Truncate => {
                self.execute(&format!("TRUNCATE TABLE IF EXISTS {target}"))
                    .await?;
            }
            WriteMode::Append => {}
        }

        self.execute(&create_table_ddl(df, &target)).await?;

        let column_list = insert_column_list(df);
        let rows = frame::dataframe_to_rows(df)?;
        let chunk_size = opts.chunk_size_or(self.config.row_chunk_size);

        info!("Writing to {target}...");

        for chunk in rows.chunks(chunk_size) {
            let stmt = insert_statement(&target, &column_list, chunk);
            self.execute(&stmt).await?;
        }

        info!("Successfully wrote {} rows to {target}", df.height());
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let sql = format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE UPPER(table_schema) = UPPER('{}') AND UPPER(table_name) = UPPER('{}')",
            escape_sql_string(&table.schema),
            escape_sql_string(&table.table),
        );

        // Zero-row results may surface as an empty payload, so absence of a
        // frame also means absence of the table.
        match self.query(&sql).await? {
            Some(df) => Ok(df.height() > 0),
            None => Ok(false),
        }
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE UPPER(table_schema) = UPPER('{}') ORDER BY table_name",
            escape_sql_string(schema),
        );

        let Some(df) = self.query(&sql).await? else {
            return Ok(Vec::new());
        };
        if df.height() == 0 {
            return Ok(Vec::new());
        }

        let names = df.get_columns()[0]
            .as_materialized_series()
            .str()
            .map_err(|e| SluiceError::frame(e.to_string()))?;

        Ok(names.into_iter().flatten().map(String::from).collect())
    }
}

/// Concatenates Arrow record batches into a polars DataFrame.
///
/// The batches cross crate boundaries through an in-memory Arrow IPC file;
/// both sides speak the format natively, avoiding a per-cell conversion.
fn batches_to_dataframe(batches: &[RecordBatch]) -> Result<DataFrame> {
    let Some(first) = batches.first() else {
        return Ok(DataFrame::empty());
    };

    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = FileWriter::try_new(&mut buf, first.schema().as_ref())
            .map_err(|e| SluiceError::frame(e.to_string()))?;
        for batch in batches {
            writer
                .write(batch)
                .map_err(|e| SluiceError::frame(e.to_string()))?;
        }
        writer
            .finish()
            .map_err(|e| SluiceError::frame(e.to_string()))?;
    }

    IpcReader::new(Cursor::new(buf))
        .finish()
        .map_err(Into::into)
}

/// Renders a value as a Snowflake literal.
///
/// Snowflake treats backslash as an escape inside string literals, and
/// binary literals go through `TO_BINARY`.
fn snowflake_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''")),
        Value::Bytes(b) => format!("TO_BINARY('{}', 'HEX')", hex_encode(b)),
        other => other.to_sql_literal(),
    }
}

/// Maps a polars dtype to a Snowflake column type for CREATE TABLE.
fn snowflake_type_for_dtype(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Boolean => "BOOLEAN",
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "NUMBER",
        DataType::Float32 | DataType::Float64 => "FLOAT",
        DataType::Binary => "BINARY",
        DataType::Date => "DATE",
        DataType::Datetime(_, _) => "TIMESTAMP_NTZ",
        _ => "VARCHAR",
    }
}

fn create_table_ddl(df: &DataFrame, target: &str) -> String {
    let columns: Vec<String> = df
        .get_columns()
        .iter()
        .map(|col| format!("{} {}", col.name(), snowflake_type_for_dtype(col.dtype())))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {target} ({})",
        columns.join(", ")
    )
}

fn insert_column_list(df: &DataFrame) -> String {
    df.get_columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_statement(target: &str, column_list: &str, rows: &[Row]) -> String {
    let values: Vec<String> = rows
        .iter()
        .map(|row| {
            let literals: Vec<String> = row.iter().map(snowflake_literal).collect();
            format!("({})", literals.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {target} ({column_list}) VALUES {}",
        values.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_snowflake_literal_escaping() {
        assert_eq!(
            snowflake_literal(&Value::String("a\\b".to_string())),
            "'a\\\\b'"
        );
        assert_eq!(
            snowflake_literal(&Value::String("it's".to_string())),
            "'it''s'"
        );
        assert_eq!(
            snowflake_literal(&Value::Bytes(vec![0xbe, 0xef])),
            "TO_BINARY('beef', 'HEX')"
        );
        assert_eq!(snowflake_literal(&Value::Null), "NULL");
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(snowflake_type_for_dtype(&DataType::Int64), "NUMBER");
        assert_eq!(snowflake_type_for_dtype(&DataType::Float32), "FLOAT");
        assert_eq!(snowflake_type_for_dtype(&DataType::String), "VARCHAR");
        assert_eq!(
            snowflake_type_for_dtype(&DataType::Datetime(TimeUnit::Microseconds, None)),
            "TIMESTAMP_NTZ"
        );
    }

    #[test]
    fn test_statement_builders() {
        let df = df!(
            "id" => [1i64, 2],
            "name" => ["ada", "grace"],
        )
        .unwrap();

        let ddl = create_table_ddl(&df, "analytics.events");
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS analytics.events (id NUMBER, name VARCHAR)"
        );

        let rows = frame::dataframe_to_rows(&df).unwrap();
        let stmt = insert_statement("analytics.events", &insert_column_list(&df), &rows);
        assert_eq!(
            stmt,
            "INSERT INTO analytics.events (id, name) VALUES (1, 'ada'), (2, 'grace')"
        );
    }

    #[test]
    fn test_empty_batches_make_empty_frame() {
        let df = batches_to_dataframe(&[]).unwrap();
        assert_eq!(df.height(), 0);
    }
}
