//! Integration tests for the CCTNS copilot.

pub mod cli_test;
pub mod gateway_test;
pub mod postgres_test;
