//! Google Cloud Storage connector.
//!
//! Reads and writes DataFrames as blobs through the `object_store` crate.
//! The connector binds to a single bucket; blob format is chosen by file
//! extension (`.parquet` or CSV for everything else).

use crate::config::{GcsConfig, GOOGLE_CREDENTIALS_ENV};
use crate::error::{Result, SluiceError};
use futures::TryStreamExt;
use object_store::gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use polars::prelude::*;
use std::io::Cursor;
use tracing::{debug, info};

/// Serialization format for a blob, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobFormat {
    Csv,
    Parquet,
}

impl BlobFormat {
    /// Chooses a format for the given blob name.
    pub fn for_blob(name: &str) -> Self {
        if name.ends_with(".parquet") {
            Self::Parquet
        } else {
            Self::Csv
        }
    }
}

/// Cloud Storage connector bound to a single bucket.
pub struct CloudStorageConnector {
    store: GoogleCloudStorage,
    bucket: String,
}

impl CloudStorageConnector {
    /// Builds a client for the configured bucket.
    ///
    /// With no key file configured, credentials resolve from the
    /// environment (`GOOGLE_APPLICATION_CREDENTIALS` and friends).
    pub fn connect(config: &GcsConfig) -> Result<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&config.bucket);

        if let Some(key_file) = &config.key_file {
            let path = key_file.to_str().ok_or_else(|| {
                SluiceError::credentials("key file path is not valid UTF-8")
            })?;
            builder = builder.with_service_account_path(path);
        } else if std::env::var(GOOGLE_CREDENTIALS_ENV).is_ok() {
            debug!("Using `{GOOGLE_CREDENTIALS_ENV}` variable defined in environment");
        }

        let store = builder
            .build()
            .map_err(|e| SluiceError::connection(e.to_string()))?;

        Ok(Self {
            store,
            bucket: config.bucket.clone(),
        })
    }

    /// Lists blob names, optionally filtered by prefix and substring pattern.
    pub async fn list_blobs(
        &self,
        prefix: Option<&str>,
        pattern: Option<&str>,
    ) -> Result<Vec<String>> {
        let prefix_path = prefix.map(ObjectPath::from);
        let metas: Vec<_> = self
            .store
            .list(prefix_path.as_ref())
            .try_collect()
            .await
            .map_err(|e| SluiceError::query(e.to_string()))?;

        let mut names: Vec<String> = metas
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|name| pattern.map_or(true, |p| name.contains(p)))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Downloads a blob and reads it as a DataFrame.
    pub async fn get_blob(&self, blob_name: &str) -> Result<DataFrame> {
        let path = ObjectPath::from(blob_name);
        let bytes = self
            .store
            .get(&path)
            .await
            .map_err(|e| SluiceError::query(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| SluiceError::query(e.to_string()))?;

        let df = read_blob(BlobFormat::for_blob(blob_name), bytes.to_vec())?;
        info!(
            "Read {} rows from gs://{}/{}",
            df.height(),
            self.bucket,
            blob_name
        );
        Ok(df)
    }

    /// Uploads a DataFrame as a blob.
    pub async fn put_blob(&self, df: &DataFrame, blob_name: &str) -> Result<()> {
        let buf = write_blob(BlobFormat::for_blob(blob_name), df)?;
        let path = ObjectPath::from(blob_name);

        self.store
            .put(&path, buf.into())
            .await
            .map_err(|e| SluiceError::write(e.to_string()))?;

        info!(
            "Wrote {} rows to gs://{}/{}",
            df.height(),
            self.bucket,
            blob_name
        );
        Ok(())
    }
}

fn read_blob(format: BlobFormat, bytes: Vec<u8>) -> Result<DataFrame> {
    let df = match format {
        BlobFormat::Csv => CsvReadOptions::default()
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()?,
        BlobFormat::Parquet => ParquetReader::new(Cursor::new(bytes)).finish()?,
    };
    Ok(df)
}

fn write_blob(format: BlobFormat, df: &DataFrame) -> Result<Vec<u8>> {
    // Writers take the frame mutably for chunk alignment; clones are cheap.
    let mut df = df.clone();
    let mut buf = Vec::new();

    match format {
        BlobFormat::Csv => {
            CsvWriter::new(&mut buf).finish(&mut df)?;
        }
        BlobFormat::Parquet => {
            ParquetWriter::new(&mut buf).finish(&mut df)?;
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_df() -> DataFrame {
        df!("id" => [1i64, 2, 3], "name" => ["a", "b", "c"]).unwrap()
    }

    #[test]
    fn test_format_for_blob() {
        assert_eq!(BlobFormat::for_blob("data/part-0.parquet"), BlobFormat::Parquet);
        assert_eq!(BlobFormat::for_blob("data/events.csv"), BlobFormat::Csv);
        assert_eq!(BlobFormat::for_blob("data/events"), BlobFormat::Csv);
    }

    #[test]
    fn test_csv_blob_roundtrip() {
        let df = sample_df();
        let bytes = write_blob(BlobFormat::Csv, &df).unwrap();
        let back = read_blob(BlobFormat::Csv, bytes).unwrap();
        assert_eq!(back.shape(), df.shape());
        assert!(back.equals(&df));
    }

    #[test]
    fn test_parquet_blob_roundtrip() {
        let df = sample_df();
        let bytes = write_blob(BlobFormat::Parquet, &df).unwrap();
        let back = read_blob(BlobFormat::Parquet, bytes).unwrap();
        assert!(back.equals(&df));
    }
}
