//! Object storage connectors for Sluice.
//!
//! Moves DataFrames in and out of cloud object stores as CSV or Parquet
//! blobs. Only Google Cloud Storage is implemented today.

mod gcs;

pub use gcs::{BlobFormat, CloudStorageConnector};
