//! Postgres connector integration tests.
//!
//! These tests require a running PostgreSQL database. Set DATABASE_URL
//! to run them; they are skipped otherwise.

use polars::prelude::*;
use sluice::config::PostgresConfig;
use sluice::warehouse::{PostgresConnector, TableRef, Warehouse, WriteMode, WriteOptions};

/// Helper to create a test connector from DATABASE_URL.
async fn get_test_warehouse() -> Option<PostgresConnector> {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = PostgresConfig::from_connection_string(&url).ok()?;
    PostgresConnector::connect(&config).await.ok()
}

/// Unique table name per test run, so parallel runs do not collide.
fn scratch_table(suffix: &str) -> TableRef {
    TableRef::new("public", format!("sluice_test_{}_{suffix}", std::process::id()))
}

fn sample_df() -> DataFrame {
    df!(
        "id" => [1i64, 2, 3],
        "name" => ["alice", "bob", "carol"],
        "score" => [0.5f64, 1.5, 2.5],
    )
    .unwrap()
}

#[tokio::test]
async fn test_read_simple_select() {
    let Some(warehouse) = get_test_warehouse().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let df = warehouse
        .read_dataframe("SELECT 1 AS num, 'hello' AS greeting")
        .await
        .unwrap();

    assert_eq!(df.shape(), (1, 2));
    let names: Vec<&str> = df.get_column_names_str();
    assert_eq!(names, vec!["num", "greeting"]);

    warehouse.close().await.unwrap();
}

#[tokio::test]
async fn test_query_empty_result_keeps_columns() {
    let Some(warehouse) = get_test_warehouse().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = warehouse
        .query("SELECT 1 AS num WHERE false")
        .await
        .unwrap();

    let df = result.expect("row-producing statement yields a frame");
    assert_eq!(df.height(), 0);
    assert_eq!(df.width(), 1);

    warehouse.close().await.unwrap();
}

#[tokio::test]
async fn test_statement_without_results_returns_none() {
    let Some(warehouse) = get_test_warehouse().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let table = scratch_table("ddl");
    let result = warehouse
        .query(&format!(
            "CREATE TABLE {} (id BIGINT)",
            table.qualified()
        ))
        .await
        .unwrap();
    assert!(result.is_none());

    warehouse
        .query(&format!("DROP TABLE {}", table.qualified()))
        .await
        .unwrap();

    warehouse.close().await.unwrap();
}

#[tokio::test]
async fn test_write_modes_roundtrip() {
    let Some(warehouse) = get_test_warehouse().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let table = scratch_table("write");
    let df = sample_df();

    // Fresh table: default Fail mode creates it.
    warehouse
        .write_dataframe(&df, &table, &WriteOptions::default())
        .await
        .unwrap();
    assert!(warehouse.table_exists(&table).await.unwrap());

    // Fail on the now-existing table must error without touching data.
    let err = warehouse
        .write_dataframe(&df, &table, &WriteOptions::default())
        .await;
    assert!(err.is_err());

    let back = warehouse
        .read_dataframe(&format!("SELECT * FROM {} ORDER BY id", table.qualified()))
        .await
        .unwrap();
    assert_eq!(back.height(), 3);

    // Append doubles the rows.
    warehouse
        .write_dataframe(&df, &table, &WriteOptions::with_mode(WriteMode::Append))
        .await
        .unwrap();
    let back = warehouse
        .read_dataframe(&format!("SELECT * FROM {}", table.qualified()))
        .await
        .unwrap();
    assert_eq!(back.height(), 6);

    // Truncate replaces the contents.
    warehouse
        .write_dataframe(&df, &table, &WriteOptions::with_mode(WriteMode::Truncate))
        .await
        .unwrap();
    let back = warehouse
        .read_dataframe(&format!("SELECT * FROM {}", table.qualified()))
        .await
        .unwrap();
    assert_eq!(back.height(), 3);

    // Drop removes the table before writing fresh.
    warehouse
        .write_dataframe(&df, &table, &WriteOptions::with_mode(WriteMode::Drop))
        .await
        .unwrap();
    let back = warehouse
        .read_dataframe(&format!("SELECT * FROM {}", table.qualified()))
        .await
        .unwrap();
    assert_eq!(back.height(), 3);

    warehouse
        .query(&format!("DROP TABLE {}", table.qualified()))
        .await
        .unwrap();
    warehouse.close().await.unwrap();
}

#[tokio::test]
async fn test_list_tables_includes_written_table() {
    let Some(warehouse) = get_test_warehouse().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let table = scratch_table("list");
    warehouse
        .write_dataframe(&sample_df(), &table, &WriteOptions::default())
        .await
        .unwrap();

    let tables = warehouse.list_tables("public").await.unwrap();
    assert!(tables.contains(&table.table));

    warehouse
        .query(&format!("DROP TABLE {}", table.qualified()))
        .await
        .unwrap();
    warehouse.close().await.unwrap();
}

#[tokio::test]
async fn test_null_values_surface_as_nulls() {
    let Some(warehouse) = get_test_warehouse().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let df = warehouse
        .read_dataframe("SELECT NULL::TEXT AS name")
        .await
        .unwrap();

    assert_eq!(df.height(), 1);
    assert_eq!(df.column("name").unwrap().null_count(), 1);

    warehouse.close().await.unwrap();
}
