//! CCTNS copilot - a read-only SQL gateway over the crime records database.
//!
//! This library exposes the core modules for the `cctns-query` binary and
//! for integration tests.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod policy;
pub mod report;
