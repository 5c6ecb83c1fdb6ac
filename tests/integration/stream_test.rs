//! CSV streaming integration tests.
//!
//! Exercises batched CSV uploads against the in-memory mock warehouse.

use polars::prelude::*;
use sluice::stream::{stream_csv_to_warehouse, CsvStreamOptions};
use sluice::warehouse::{
    FailingWarehouse, MockWarehouse, TableRef, Warehouse, WriteMode, WriteOptions,
};
use std::io::Write;
use tempfile::NamedTempFile;

/// Writes a header plus `rows` data rows to a temp CSV file.
fn csv_file(rows: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "id,name").unwrap();
    for i in 0..rows {
        writeln!(file, "{i},row_{i}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn batch_opts(batch_size: usize) -> CsvStreamOptions {
    CsvStreamOptions {
        batch_size,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_stream_single_batch() {
    let warehouse = MockWarehouse::new();
    let file = csv_file(5);
    let table: TableRef = "staging.events".parse().unwrap();

    let written = stream_csv_to_warehouse(&warehouse, file.path(), &table, &batch_opts(10))
        .await
        .unwrap();

    assert_eq!(written, 5);
    assert_eq!(warehouse.table(&table).unwrap().height(), 5);
    assert_eq!(
        warehouse.write_log(),
        vec![("staging.events".to_string(), WriteMode::Fail, 5)]
    );
}

#[tokio::test]
async fn test_stream_multiple_batches_append_after_first() {
    let warehouse = MockWarehouse::new();
    let file = csv_file(25);
    let table: TableRef = "staging.events".parse().unwrap();

    let written = stream_csv_to_warehouse(&warehouse, file.path(), &table, &batch_opts(10))
        .await
        .unwrap();

    assert_eq!(written, 25);
    assert_eq!(warehouse.table(&table).unwrap().height(), 25);
    assert_eq!(
        warehouse.write_log(),
        vec![
            ("staging.events".to_string(), WriteMode::Fail, 10),
            ("staging.events".to_string(), WriteMode::Append, 10),
            ("staging.events".to_string(), WriteMode::Append, 5),
        ]
    );
}

#[tokio::test]
async fn test_stream_exact_batch_multiple() {
    let warehouse = MockWarehouse::new();
    let file = csv_file(20);
    let table: TableRef = "staging.events".parse().unwrap();

    let written = stream_csv_to_warehouse(&warehouse, file.path(), &table, &batch_opts(10))
        .await
        .unwrap();

    // No trailing phantom batch: reading past end-of-file with a pinned
    // schema must not append a spurious all-null row.
    assert_eq!(written, 20);
    assert_eq!(
        warehouse.write_log(),
        vec![
            ("staging.events".to_string(), WriteMode::Fail, 10),
            ("staging.events".to_string(), WriteMode::Append, 10),
        ]
    );

    let df = warehouse.table(&table).unwrap();
    assert_eq!(df.height(), 20);
    assert_eq!(df.column("id").unwrap().null_count(), 0);
}

#[tokio::test]
async fn test_stream_header_only_file() {
    let warehouse = MockWarehouse::new();
    let file = csv_file(0);
    let table: TableRef = "staging.events".parse().unwrap();

    let written = stream_csv_to_warehouse(&warehouse, file.path(), &table, &batch_opts(10))
        .await
        .unwrap();

    assert_eq!(written, 0);
    assert!(warehouse.write_log().is_empty());
    assert!(warehouse.table(&table).is_none());
}

#[tokio::test]
async fn test_stream_default_infer_reads_strings() {
    let warehouse = MockWarehouse::new();
    let file = csv_file(3);
    let table: TableRef = "staging.events".parse().unwrap();

    stream_csv_to_warehouse(&warehouse, file.path(), &table, &batch_opts(10))
        .await
        .unwrap();

    let df = warehouse.table(&table).unwrap();
    for dtype in df.dtypes() {
        assert_eq!(dtype, DataType::String);
    }
}

#[tokio::test]
async fn test_stream_fail_mode_on_existing_table() {
    let warehouse = MockWarehouse::new();
    let table: TableRef = "staging.events".parse().unwrap();

    let existing = df!("id" => ["0"], "name" => ["seed"]).unwrap();
    warehouse
        .write_dataframe(&existing, &table, &WriteOptions::default())
        .await
        .unwrap();

    let file = csv_file(3);
    let result = stream_csv_to_warehouse(&warehouse, file.path(), &table, &batch_opts(10)).await;

    assert!(result.is_err());
    assert_eq!(warehouse.table(&table).unwrap().height(), 1);
}

#[tokio::test]
async fn test_stream_truncate_replaces_existing_table() {
    let warehouse = MockWarehouse::new();
    let table: TableRef = "staging.events".parse().unwrap();

    let existing = df!("id" => ["0"], "name" => ["seed"]).unwrap();
    warehouse
        .write_dataframe(&existing, &table, &WriteOptions::default())
        .await
        .unwrap();

    let file = csv_file(25);
    let opts = CsvStreamOptions {
        batch_size: 10,
        write: WriteOptions::with_mode(WriteMode::Truncate),
        ..Default::default()
    };

    let written = stream_csv_to_warehouse(&warehouse, file.path(), &table, &opts)
        .await
        .unwrap();

    assert_eq!(written, 25);
    // Seed row is gone: the first batch truncated, the rest appended.
    assert_eq!(warehouse.table(&table).unwrap().height(), 25);
}

#[tokio::test]
async fn test_stream_propagates_write_errors() {
    let warehouse = FailingWarehouse;
    let file = csv_file(3);
    let table: TableRef = "staging.events".parse().unwrap();

    let result = stream_csv_to_warehouse(&warehouse, file.path(), &table, &batch_opts(10)).await;
    assert!(result.is_err());
}
