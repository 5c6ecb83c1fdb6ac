//! BigQuery warehouse connector.
//!
//! Implements the `Warehouse` trait over the `gcp-bigquery-client` crate.
//! Queries run through the jobs API; writes create the destination table
//! from the DataFrame schema and stream rows through the tabledata
//! insert-all API in chunks.

use crate::config::BigQueryConfig;
use crate::error::{Result, SluiceError};
use crate::frame::{self, ColumnInfo, Row, Value, ValueKind};
use crate::warehouse::{Dialect, TableRef, Warehouse, WriteMode, WriteOptions};
use async_trait::async_trait;
use base64::Engine as _;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::field_type::FieldType;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::ResultSet;
use gcp_bigquery_client::model::table::Table;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use gcp_bigquery_client::model::table_schema::TableSchema;
use gcp_bigquery_client::table::ListOptions;
use gcp_bigquery_client::Client;
use polars::prelude::{DataFrame, DataType};
use tracing::{debug, info};

/// Rows per insert-all request when no chunk size is given. The tabledata
/// API caps requests at 50k rows / 10 MB.
const DEFAULT_INSERT_CHUNK: usize = 10_000;

/// BigQuery warehouse connector.
pub struct BigQueryConnector {
    client: Client,
    config: BigQueryConfig,
}

impl BigQueryConnector {
    /// Authenticates and connects to BigQuery.
    ///
    /// Credentials resolve in the order documented on [`BigQueryConfig`]:
    /// explicit key file, `GOOGLE_APPLICATION_CREDENTIALS`, then
    /// application-default credentials when `bypass_env_check` is set.
    pub async fn connect(config: &BigQueryConfig) -> Result<Self> {
        let client = match config.resolve_key_file()? {
            Some(path) => {
                let path = path.to_str().ok_or_else(|| {
                    SluiceError::credentials("key file path is not valid UTF-8")
                })?;
                Client::from_service_account_key_file(path)
                    .await
                    .map_err(|e| {
                        SluiceError::credentials(format!("Failed to load service account key: {e}"))
                    })?
            }
            None => Client::from_application_default_credentials()
                .await
                .map_err(|e| {
                    SluiceError::credentials(format!(
                        "Failed to resolve application-default credentials: {e}"
                    ))
                })?,
        };

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn project_for(&self, table: &TableRef) -> String {
        table
            .project
            .clone()
            .unwrap_or_else(|| self.config.project.clone())
    }

    async fn create_table(&self, df: &DataFrame, table: &TableRef) -> Result<()> {
        let fields: Vec<TableFieldSchema> = df
            .get_columns()
            .iter()
            .map(|col| field_for_dtype(col.name().as_str(), col.dtype()))
            .collect();

        let definition = Table::new(
            &self.project_for(table),
            &table.schema,
            &table.table,
            TableSchema::new(fields),
        );

        self.client
            .table()
            .create(definition)
            .await
            .map_err(|e| SluiceError::write(format!("Failed to create table: {e}")))?;

        Ok(())
    }

    /// Deletes the table; a missing table is not an error.
    async fn delete_table(&self, table: &TableRef) -> Result<()> {
        let result = self
            .client
            .table()
            .delete(&self.project_for(table), &table.schema, &table.table)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(SluiceError::write(format!("Failed to delete table: {e}"))),
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryConnector {
    fn dialect(&self) -> Dialect {
        Dialect::BigQuery
    }

    async fn query(&self, sql: &str) -> Result<Option<DataFrame>> {
        debug!("Running SQL against bigquery");

        let mut request = QueryRequest::new(sql);
        request.timeout_ms = Some(timeout_ms(self.config.timeout_secs));
        request.location = self.config.location.clone();

        let response = self
            .client
            .job()
            .query(&self.config.project, request)
            .await
            .map_err(|e| SluiceError::query(e.to_string()))?;

        // DML and DDL statements come back without a result schema.
        let Some(fields) = response.schema.as_ref().and_then(|s| s.fields.clone()) else {
            info!("No results returned from SQL call");
            return Ok(None);
        };

        let columns: Vec<ColumnInfo> = fields
            .iter()
            .map(|f| ColumnInfo::new(f.name.as_str(), kind_for_field_type(&f.r#type)))
            .collect();

        let mut rs = ResultSet::new_from_query_response(response);
        let mut rows: Vec<Row> = Vec::new();

        while rs.next_row() {
            let mut row = Vec::with_capacity(columns.len());
            for (idx, info) in columns.iter().enumerate() {
                row.push(read_cell(&rs, idx, info.kind)?);
            }
            rows.push(row);
        }

        let df = frame::rows_to_dataframe(&columns, rows)?;
        info!("Successfully read {} rows from BigQuery", df.height());
        Ok(Some(df))
    }

    async fn write_dataframe(
        &self,
        df: &DataFrame,
        table: &TableRef,
        opts: &WriteOptions,
    ) -> Result<()> {
        opts.validate()?;

        // `drop` deletes the target and then behaves like a fresh `fail`.
        let mode = match opts.mode {
            WriteMode::Drop => {
                self.delete_table(table).await?;
                WriteMode::Fail
            }
            other => other,
        };

        let exists = self.table_exists(table).await?;
        match mode {
            WriteMode::Fail if exists => {
                return Err(SluiceError::write(format!(
                    "table {} already exists",
                    table.qualified()
                )));
            }
            WriteMode::Truncate if exists => {
                self.delete_table(table).await?;
                self.create_table(df, table).await?;
            }
            _ if !exists => {
                self.create_table(df, table).await?;
            }
            _ => {}
        }

        let column_names: Vec<String> = df
            .get_columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();
        let rows = frame::dataframe_to_rows(df)?;
        let chunk_size = opts.chunk_size_or(DEFAULT_INSERT_CHUNK);
        let project = self.project_for(table);

        info!("Writing to {}...", table.qualified());

        for chunk in rows.chunks(chunk_size) {
            let mut request = TableDataInsertAllRequest::new();
            for row in chunk {
                request
                    .add_row(None, json_record(&column_names, row))
                    .map_err(|e| SluiceError::write(format!("Failed to stage row: {e}")))?;
            }

            let response = self
                .client
                .tabledata()
                .insert_all(&project, &table.schema, &table.table, request)
                .await
                .map_err(|e| SluiceError::write(format!("Insert failed: {e}")))?;

            if let Some(errors) = response.insert_errors {
                if !errors.is_empty() {
                    return Err(SluiceError::write(format!(
                        "BigQuery rejected {} rows while writing to {}",
                        errors.len(),
                        table.qualified()
                    )));
                }
            }
        }

        info!(
            "Successfully wrote {} rows to {}",
            df.height(),
            table.qualified()
        );
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let result = self
            .client
            .table()
            .get(&self.project_for(table), &table.schema, &table.table, None)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(SluiceError::query(e.to_string())),
        }
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let listing = self
            .client
            .table()
            .list(&self.config.project, schema, ListOptions::default())
            .await
            .map_err(|e| SluiceError::query(e.to_string()))?;

        Ok(listing
            .tables
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.table_reference.table_id)
            .collect())
    }
}

/// Reads one cell from the result set according to the declared kind.
fn read_cell(rs: &ResultSet, idx: usize, kind: ValueKind) -> Result<Value> {
    let cell = match kind {
        ValueKind::Bool => rs
            .get_bool(idx)
            .map_err(|e| SluiceError::query(e.to_string()))?
            .map(Value::Bool),
        ValueKind::Int => rs
            .get_i64(idx)
            .map_err(|e| SluiceError::query(e.to_string()))?
            .map(Value::Int),
        ValueKind::Float => rs
            .get_f64(idx)
            .map_err(|e| SluiceError::query(e.to_string()))?
            .map(Value::Float),
        ValueKind::Bytes => rs
            .get_string(idx)
            .map_err(|e| SluiceError::query(e.to_string()))?
            .map(|s| {
                // BYTES travel base64-encoded over the JSON API.
                base64::engine::general_purpose::STANDARD
                    .decode(&s)
                    .map(Value::Bytes)
                    .unwrap_or(Value::String(s))
            }),
        ValueKind::String => rs
            .get_string(idx)
            .map_err(|e| SluiceError::query(e.to_string()))?
            .map(Value::String),
    };

    Ok(cell.unwrap_or(Value::Null))
}

/// Maps a BigQuery result field type to the frame column kind.
fn kind_for_field_type(field_type: &FieldType) -> ValueKind {
    match field_type {
        FieldType::Boolean | FieldType::Bool => ValueKind::Bool,
        FieldType::Integer | FieldType::Int64 => ValueKind::Int,
        FieldType::Float | FieldType::Float64 => ValueKind::Float,
        FieldType::Bytes => ValueKind::Bytes,
        _ => ValueKind::String,
    }
}

/// Maps a polars dtype to a BigQuery field schema for CREATE TABLE.
fn field_for_dtype(name: &str, dtype: &DataType) -> TableFieldSchema {
    match dtype {
        DataType::Boolean => TableFieldSchema::bool(name),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => TableFieldSchema::integer(name),
        DataType::Float32 | DataType::Float64 => TableFieldSchema::float(name),
        DataType::Binary => TableFieldSchema::bytes(name),
        DataType::Date => TableFieldSchema::date(name),
        DataType::Datetime(_, _) => TableFieldSchema::timestamp(name),
        _ => TableFieldSchema::string(name),
    }
}

/// Builds the JSON record for one insert-all row.
fn json_record(column_names: &[String], row: &Row) -> serde_json::Map<String, serde_json::Value> {
    column_names
        .iter()
        .zip(row.iter())
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}

/// Converts the configured timeout to the request's millisecond field,
/// clamping instead of overflowing for absurdly large values.
fn timeout_ms(timeout_secs: u64) -> i32 {
    timeout_secs
        .saturating_mul(1000)
        .try_into()
        .unwrap_or(i32::MAX)
}

fn is_not_found(error: &BQError) -> bool {
    match error {
        BQError::ResponseError { error } => error.error.code == 404,
        _ => false,
    }
}
