//! CSV batch streaming into a warehouse.
//!
//! Reads a CSV file in row batches and writes each batch through a
//! [`Warehouse`], so arbitrarily large files load with bounded memory. The
//! first batch honors the caller's write mode; the rest append.

use crate::error::{Result, SluiceError};
use crate::warehouse::{TableRef, Warehouse, WriteMode, WriteOptions};
use polars::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Options for [`stream_csv_to_warehouse`].
#[derive(Debug, Clone)]
pub struct CsvStreamOptions {
    /// Rows per batch upload.
    pub batch_size: usize,

    /// Rows the CSV reader inspects to infer column types. Zero reads every
    /// column as a string.
    pub infer_schema_length: usize,

    /// Field separator in the CSV file.
    pub separator: u8,

    /// Write options for the destination; the mode applies to the first
    /// batch only.
    pub write: WriteOptions,
}

impl Default for CsvStreamOptions {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            infer_schema_length: 0,
            separator: b',',
            write: WriteOptions::default(),
        }
    }
}

impl CsvStreamOptions {
    /// Validates the options.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SluiceError::config("batch_size must be greater than zero"));
        }
        self.write.validate()
    }
}

/// Streams a CSV file to a warehouse table in batches.
///
/// Returns the number of rows written. The inferred schema of the first
/// batch carries over to later batches, so types stay consistent across the
/// whole file.
pub async fn stream_csv_to_warehouse(
    warehouse: &dyn Warehouse,
    csv_path: &Path,
    table: &TableRef,
    opts: &CsvStreamOptions,
) -> Result<usize> {
    opts.validate()?;

    info!(
        "Streaming data from {} to table {} in batches of {}...",
        csv_path.display(),
        table.qualified(),
        opts.batch_size
    );

    let mut rows_written = 0usize;
    let mut schema: Option<SchemaRef> = None;

    loop {
        let batch = read_batch(csv_path, opts, rows_written, schema.as_ref())?;
        if batch_is_exhausted(&batch, schema.is_some()) {
            break;
        }

        if schema.is_none() {
            schema = Some(Arc::new(Schema::from_iter(
                batch
                    .get_columns()
                    .iter()
                    .map(|col| Field::new(col.name().clone(), col.dtype().clone())),
            )));
        }

        let write_opts = if rows_written == 0 {
            opts.write.clone()
        } else {
            WriteOptions {
                mode: WriteMode::Append,
                chunk_size: opts.write.chunk_size,
            }
        };

        debug!("Uploading batch to table {}...", table.qualified());
        warehouse.write_dataframe(&batch, table, &write_opts).await?;
        rows_written += batch.height();

        // A short batch means the file is exhausted.
        if batch.height() < opts.batch_size {
            break;
        }
    }

    info!(
        "Finished streaming {} rows to {}",
        rows_written,
        table.qualified()
    );
    Ok(rows_written)
}

/// Determines whether a batch marks the end of the file.
///
/// With a pinned schema, skipping past the last line makes the polars CSV
/// reader yield a single all-null row rather than an empty frame, so a
/// fully-null batch after the first also means the file is exhausted.
fn batch_is_exhausted(batch: &DataFrame, schema_pinned: bool) -> bool {
    if batch.height() == 0 {
        return true;
    }
    schema_pinned
        && batch
            .get_columns()
            .iter()
            .all(|col| col.null_count() == col.len())
}

/// Reads one batch from the CSV file.
///
/// The first batch parses the header and infers types; later batches skip
/// past consumed rows and reuse the captured schema.
fn read_batch(
    path: &Path,
    opts: &CsvStreamOptions,
    offset: usize,
    schema: Option<&SchemaRef>,
) -> Result<DataFrame> {
    let parse = CsvParseOptions::default().with_separator(opts.separator);
    let mut read = CsvReadOptions::default()
        .with_n_rows(Some(opts.batch_size))
        .with_parse_options(parse);

    read = match schema {
        Some(s) => read
            .with_has_header(false)
            .with_skip_rows(1 + offset)
            .with_schema(Some(s.clone())),
        None => read
            .with_has_header(true)
            .with_infer_schema_length(Some(opts.infer_schema_length)),
    };

    read.try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(SluiceError::from)?
        .finish()
        .map_err(Into::into)
}
