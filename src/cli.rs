//! Command-line argument parsing for `cctns-query`.

use crate::config::{Config, DatabaseConfig};
use crate::db::{QueryParams, Value};
use crate::error::{CopilotError, Result};
use crate::report::ReportFormat;
use clap::Parser;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Runs a read-only SQL query against the CCTNS records database.
#[derive(Parser, Debug)]
#[command(name = "cctns-query")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// SQL to execute ("-" reads from stdin)
    #[arg(value_name = "SQL", conflicts_with = "file")]
    pub sql: Option<String>,

    /// Read the SQL from a file
    #[arg(short = 'f', long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Bind parameter as name=value (repeatable)
    #[arg(short = 'P', long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Database user
    #[arg(short = 'U', long, value_name = "USER")]
    pub user: Option<String>,

    /// Database locator (host:port/database, postgres:// URL or sqlite:path)
    #[arg(long, value_name = "DSN")]
    pub dsn: Option<String>,

    /// Config file path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output format: table, csv or json
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub format: ReportFormat,

    /// Write output to file instead of stdout
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Reject statements the SQL parser cannot read
    #[arg(long)]
    pub strict: bool,

    /// Write logs to a file instead of stderr (default location if no path)
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Converts CLI arguments to a DatabaseConfig.
    ///
    /// The password is never taken from the command line.
    pub fn to_database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            user: self.user.clone(),
            password: None,
            dsn: self.dsn.clone(),
        }
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Returns the explicit log file path, if logging to a file was requested.
    pub fn log_target(&self) -> Option<Option<&Path>> {
        self.log_file.as_ref().map(|path| path.as_deref())
    }

    /// Reads the SQL from the positional argument, `--file`, or stdin.
    pub fn read_sql(&self) -> Result<String> {
        let sql = match (&self.sql, &self.file) {
            (Some(sql), _) if sql == "-" => {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            }
            (Some(sql), _) => sql.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                CopilotError::config(format!("Failed to read SQL file {}: {}", path.display(), e))
            })?,
            (None, None) => {
                return Err(CopilotError::config(
                    "No SQL given. Pass it as an argument, with --file, or \"-\" for stdin",
                ))
            }
        };

        if sql.trim().is_empty() {
            return Err(CopilotError::config("SQL text is empty"));
        }
        Ok(sql)
    }

    /// Parses the `--param` arguments into named parameters.
    pub fn parse_params(&self) -> Result<Option<QueryParams>> {
        if self.params.is_empty() {
            return Ok(None);
        }

        let mut map = BTreeMap::new();
        for raw in &self.params {
            let (name, value) = raw.split_once('=').ok_or_else(|| {
                CopilotError::config(format!("Invalid parameter '{raw}'. Expected NAME=VALUE"))
            })?;
            let name = name.trim().trim_start_matches(':');
            if name.is_empty() {
                return Err(CopilotError::config(format!(
                    "Invalid parameter '{raw}'. Name is empty"
                )));
            }
            map.insert(name.to_lowercase(), Value::parse_literal(value));
        }
        Ok(Some(QueryParams::Named(map)))
    }
}
