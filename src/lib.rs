//! Sluice moves polars DataFrames in and out of cloud data warehouses.
//!
//! The crate is a thin binding layer: each backend (BigQuery, Snowflake,
//! Postgres, Redshift) implements the [`Warehouse`] trait, so callers read
//! query results as DataFrames and write DataFrames as tables without
//! touching backend client APIs directly. A [`storage`] module covers
//! Google Cloud Storage blobs and [`stream`] loads large CSV files in
//! batches.
//!
//! ```no_run
//! use sluice::{connect, ProfileConfig, TableRef, WriteOptions};
//! use sluice::config::PostgresConfig;
//!
//! # async fn run(df: polars::prelude::DataFrame) -> sluice::Result<()> {
//! let config = PostgresConfig::from_env("WAREHOUSE", 5432);
//! let warehouse = connect(&ProfileConfig::Postgres(config)).await?;
//!
//! let table: TableRef = "analytics.events".parse()?;
//! warehouse
//!     .write_dataframe(&df, &table, &WriteOptions::default())
//!     .await?;
//!
//! let frame = warehouse.read_dataframe("SELECT * FROM analytics.events").await?;
//! println!("{frame}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod storage;
pub mod stream;
pub mod warehouse;

pub use config::{Config, ProfileConfig};
pub use error::{Result, SluiceError};
pub use stream::{stream_csv_to_warehouse, CsvStreamOptions};
pub use warehouse::{connect, Dialect, TableRef, Warehouse, WriteMode, WriteOptions};
