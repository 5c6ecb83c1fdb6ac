//! Integration tests for Sluice.

pub mod postgres_test;
pub mod stream_test;
