//! Integration tests for the CCTNS copilot.
//!
//! The SQLite tests run everywhere against temporary database files. The
//! PostgreSQL tests require a running server and are skipped unless
//! DATABASE_URL is set.
//!
//! Run with: `cargo test --test integration_tests`

mod integration;
