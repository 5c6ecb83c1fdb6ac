//! Mock warehouse for testing.
//!
//! Provides an in-memory implementation of the `Warehouse` trait with real
//! write-mode semantics, so callers can test pipelines without credentials.

use crate::error::{Result, SluiceError};
use crate::warehouse::{Dialect, TableRef, Warehouse, WriteMode, WriteOptions};
use async_trait::async_trait;
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::sync::Mutex;

/// A mock warehouse backed by in-memory tables.
#[derive(Default)]
pub struct MockWarehouse {
    tables: Mutex<HashMap<String, DataFrame>>,
    canned: Mutex<HashMap<String, DataFrame>>,
    writes: Mutex<Vec<(String, WriteMode, usize)>>,
}

impl MockWarehouse {
    /// Creates an empty mock warehouse.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a canned result for an exact SQL string.
    pub fn with_result(self, sql: impl Into<String>, df: DataFrame) -> Self {
        self.canned.lock().unwrap().insert(sql.into(), df);
        self
    }

    /// Returns the current contents of a table, if written.
    pub fn table(&self, table: &TableRef) -> Option<DataFrame> {
        self.tables.lock().unwrap().get(&table.qualified()).cloned()
    }

    /// Returns the write log: (table, mode, rows) per call.
    pub fn write_log(&self) -> Vec<(String, WriteMode, usize)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for MockWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str) -> Result<Option<DataFrame>> {
        if let Some(df) = self.canned.lock().unwrap().get(sql) {
            return Ok(Some(df.clone()));
        }

        if sql.trim_start().to_uppercase().starts_with("SELECT") {
            Ok(Some(DataFrame::empty()))
        } else {
            Ok(None)
        }
    }

    async fn write_dataframe(
        &self,
        df: &DataFrame,
        table: &TableRef,
        opts: &WriteOptions,
    ) -> Result<()> {
        opts.validate()?;
        let key = table.qualified();
        let mut tables = self.tables.lock().unwrap();

        match opts.mode {
            WriteMode::Fail => {
                if tables.contains_key(&key) {
                    return Err(SluiceError::write(format!("table {key} already exists")));
                }
                tables.insert(key.clone(), df.clone());
            }
            WriteMode::Drop | WriteMode::Truncate => {
                tables.insert(key.clone(), df.clone());
            }
            WriteMode::Append => match tables.remove(&key) {
                Some(existing) => {
                    let combined = existing.vstack(df)?;
                    tables.insert(key.clone(), combined);
                }
                None => {
                    tables.insert(key.clone(), df.clone());
                }
            },
        }

        self.writes
            .lock()
            .unwrap()
            .push((key, opts.mode, df.height()));
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        Ok(self.tables.lock().unwrap().contains_key(&table.qualified()))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let prefix = format!("{schema}.");
        let mut names: Vec<String> = self
            .tables
            .lock()
            .unwrap()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(String::from))
            .collect();
        names.sort();
        Ok(names)
    }
}

/// A warehouse whose every operation fails, for error-path testing.
#[derive(Default)]
pub struct FailingWarehouse;

impl FailingWarehouse {
    fn fail<T>() -> Result<T> {
        Err(SluiceError::connection("mock connection failure"))
    }
}

#[async_trait]
impl Warehouse for FailingWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, _sql: &str) -> Result<Option<DataFrame>> {
        Self::fail()
    }

    async fn write_dataframe(
        &self,
        _df: &DataFrame,
        _table: &TableRef,
        _opts: &WriteOptions,
    ) -> Result<()> {
        Self::fail()
    }

    async fn table_exists(&self, _table: &TableRef) -> Result<bool> {
        Self::fail()
    }

    async fn list_tables(&self, _schema: &str) -> Result<Vec<String>> {
        Self::fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn sample_df() -> DataFrame {
        df!("id" => [1i64, 2], "name" => ["ada", "grace"]).unwrap()
    }

    #[tokio::test]
    async fn test_mock_canned_query() {
        let mock = MockWarehouse::new().with_result("SELECT * FROM t", sample_df());
        let df = mock.read_dataframe("SELECT * FROM t").await.unwrap();
        assert_eq!(df.height(), 2);
    }

    #[tokio::test]
    async fn test_mock_select_without_canned_result_is_empty() {
        let mock = MockWarehouse::new();
        let df = mock.query("SELECT 1").await.unwrap().unwrap();
        assert_eq!(df.height(), 0);
    }

    #[tokio::test]
    async fn test_mock_statement_returns_none() {
        let mock = MockWarehouse::new();
        assert!(mock.query("TRUNCATE TABLE t").await.unwrap().is_none());
        assert!(mock.read_dataframe("TRUNCATE TABLE t").await.is_err());
    }

    #[tokio::test]
    async fn test_write_fail_mode_errors_on_existing() {
        let mock = MockWarehouse::new();
        let table = TableRef::new("analytics", "events");
        let opts = WriteOptions::default();

        mock.write_dataframe(&sample_df(), &table, &opts)
            .await
            .unwrap();
        let err = mock
            .write_dataframe(&sample_df(), &table, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::Write(_)));
    }

    #[tokio::test]
    async fn test_write_append_stacks_rows() {
        let mock = MockWarehouse::new();
        let table = TableRef::new("analytics", "events");
        let opts = WriteOptions::with_mode(WriteMode::Append);

        mock.write_dataframe(&sample_df(), &table, &opts)
            .await
            .unwrap();
        mock.write_dataframe(&sample_df(), &table, &opts)
            .await
            .unwrap();

        assert_eq!(mock.table(&table).unwrap().height(), 4);
    }

    #[tokio::test]
    async fn test_write_truncate_replaces_rows() {
        let mock = MockWarehouse::new();
        let table = TableRef::new("analytics", "events");

        mock.write_dataframe(&sample_df(), &table, &WriteOptions::default())
            .await
            .unwrap();
        mock.write_dataframe(
            &sample_df(),
            &table,
            &WriteOptions::with_mode(WriteMode::Truncate),
        )
        .await
        .unwrap();

        assert_eq!(mock.table(&table).unwrap().height(), 2);
    }

    #[tokio::test]
    async fn test_write_drop_never_errors_on_missing() {
        let mock = MockWarehouse::new();
        let table = TableRef::new("analytics", "missing");

        mock.write_dataframe(
            &sample_df(),
            &table,
            &WriteOptions::with_mode(WriteMode::Drop),
        )
        .await
        .unwrap();
        assert!(mock.table_exists(&table).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_tables_scoped_to_schema() {
        let mock = MockWarehouse::new();
        let opts = WriteOptions::default();
        mock.write_dataframe(&sample_df(), &TableRef::new("a", "t1"), &opts)
            .await
            .unwrap();
        mock.write_dataframe(&sample_df(), &TableRef::new("b", "t2"), &opts)
            .await
            .unwrap();

        assert_eq!(mock.list_tables("a").await.unwrap(), vec!["t1"]);
        assert_eq!(mock.list_tables("b").await.unwrap(), vec!["t2"]);
    }

    #[tokio::test]
    async fn test_failing_warehouse() {
        let failing = FailingWarehouse;
        assert!(failing.query("SELECT 1").await.is_err());
        assert!(failing.list_tables("a").await.is_err());
    }
}
