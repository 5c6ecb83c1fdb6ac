//! Integration tests for Sluice.
//!
//! Streaming tests run against the in-memory mock warehouse and need no
//! credentials. Postgres tests require a running database; set the
//! DATABASE_URL environment variable to run them.
//!
//! Run with: `cargo test --test integration_tests`

mod integration;
