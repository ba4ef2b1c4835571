//! Configuration management for the CCTNS copilot.
//!
//! Handles loading configuration from TOML files and environment variables,
//! and resolves database credentials into an explicit configured/unconfigured
//! value before the gateway ever sees them.

use crate::error::{CopilotError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable holding the database user.
pub const ENV_DB_USER: &str = "CCTNS_DB_USER";

/// Environment variable holding the database password.
pub const ENV_DB_PASSWORD: &str = "CCTNS_DB_PASSWORD";

/// Environment variable holding the database locator.
pub const ENV_DB_DSN: &str = "CCTNS_DB_DSN";

/// Placeholder shipped in sample configuration for the user.
pub const PLACEHOLDER_USER: &str = "your_db_user";

/// Placeholder shipped in sample configuration for the password.
pub const PLACEHOLDER_PASSWORD: &str = "your_db_password";

/// Placeholder shipped in sample configuration for the locator.
pub const PLACEHOLDER_DSN: &str = "your_db_host:your_db_port/your_db_service";

/// Default PostgreSQL port used when a locator omits one.
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Connection options a PostgreSQL locator may carry in its query string.
pub const POSTGRES_LOCATOR_OPTIONS: &[&str] = &[
    "sslmode",
    "sslrootcert",
    "sslcert",
    "sslkey",
    "application_name",
];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Database credentials and locator.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Read-only policy settings.
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Read-only policy settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Reject statements the SQL parser cannot understand instead of
    /// forwarding them on the strength of the `SELECT` prefix alone.
    #[serde(default)]
    pub strict: bool,
}

/// Database connection settings as read from the config file, CLI or
/// environment. Any field may still be missing or a placeholder.
#[derive(Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database user.
    pub user: Option<String>,

    /// Database password (not recommended to store in config).
    pub password: Option<String>,

    /// Locator: `host:port/database`, a `postgres://` URL, or `sqlite:path`.
    pub dsn: Option<String>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dsn", &self.dsn)
            .finish()
    }
}

impl DatabaseConfig {
    /// Merges another config into this one, with the other taking precedence.
    pub fn merge(&mut self, other: &DatabaseConfig) {
        if other.user.is_some() {
            self.user = other.user.clone();
        }
        if other.password.is_some() {
            self.password = other.password.clone();
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn.clone();
        }
    }

    /// Applies `CCTNS_DB_*` environment variables as defaults.
    pub fn apply_env_defaults(&mut self) {
        self.apply_defaults_from(|key| std::env::var(key).ok());
    }

    fn apply_defaults_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.user.is_none() {
            self.user = lookup(ENV_DB_USER);
        }
        if self.password.is_none() {
            self.password = lookup(ENV_DB_PASSWORD);
        }
        if self.dsn.is_none() {
            self.dsn = lookup(ENV_DB_DSN);
        }
    }

    /// Resolves these settings into a provisioning decision.
    ///
    /// A field that is missing or still holds its placeholder makes the
    /// whole configuration unusable.
    pub fn provisioning(&self) -> Provisioning {
        let missing: Vec<&str> = [
            (ENV_DB_USER, &self.user, PLACEHOLDER_USER),
            (ENV_DB_PASSWORD, &self.password, PLACEHOLDER_PASSWORD),
            (ENV_DB_DSN, &self.dsn, PLACEHOLDER_DSN),
        ]
        .into_iter()
        .filter(|(_, value, placeholder)| !is_configured(value.as_deref(), placeholder))
        .map(|(name, _, _)| name)
        .collect();

        match (&self.user, &self.password, &self.dsn) {
            (Some(user), Some(secret), Some(locator)) if missing.is_empty() => {
                Provisioning::Configured(Credentials::new(user, secret, locator))
            }
            _ => Provisioning::Unconfigured {
                reason: format!(
                    "{} not set or still a placeholder value",
                    missing.join(", ")
                ),
            },
        }
    }
}

fn is_configured(value: Option<&str>, placeholder: &str) -> bool {
    match value {
        Some(value) => {
            let value = value.trim();
            !value.is_empty() && value != placeholder
        }
        None => false,
    }
}

/// Outcome of credential resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioning {
    /// All credentials are present and none is a placeholder.
    Configured(Credentials),
    /// Provisioning must be skipped.
    Unconfigured {
        /// Which credentials are missing.
        reason: String,
    },
}

impl Provisioning {
    /// Returns true if credentials are usable.
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured(_))
    }
}

/// Validated database credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    secret: String,
    locator: String,
}

impl Credentials {
    /// Creates credentials from already-validated values.
    pub fn new(
        user: impl Into<String>,
        secret: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
            locator: locator.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .field("locator", &self.locator)
            .finish()
    }
}

/// A parsed database locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A PostgreSQL server.
    Postgres {
        host: String,
        port: u16,
        database: String,
        /// `key=value` options from the query string, in order.
        options: Vec<(String, String)>,
    },
    /// A SQLite database file (or `:memory:`).
    Sqlite {
        /// The locator as given, passed to the SQLite driver unchanged.
        url: String,
    },
}

impl Locator {
    /// Parses a locator string.
    ///
    /// Accepted forms:
    /// - `postgres://host[:port]/database` (or `postgresql://`)
    /// - `host[:port]/database`
    /// - `sqlite:path`, `sqlite://path`, `sqlite::memory:`
    ///
    /// PostgreSQL forms may end in `?key=value&...` with any of
    /// [`POSTGRES_LOCATOR_OPTIONS`].
    pub fn parse(locator: &str) -> std::result::Result<Self, String> {
        let locator = locator.trim();

        if locator.starts_with("sqlite:") {
            return Ok(Self::Sqlite {
                url: locator.to_string(),
            });
        }

        if locator.contains("://") {
            let url = Url::parse(locator).map_err(|e| format!("Invalid locator URL: {e}"))?;
            if url.scheme() != "postgres" && url.scheme() != "postgresql" {
                return Err(format!(
                    "Invalid scheme '{}'. Expected 'postgres', 'postgresql' or 'sqlite'",
                    url.scheme()
                ));
            }
            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| "Locator URL is missing a host".to_string())?;
            let database = url
                .path()
                .strip_prefix('/')
                .filter(|d| !d.is_empty())
                .ok_or_else(|| "Locator URL is missing a database name".to_string())?;
            let options: Vec<(String, String)> = url
                .query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            return Ok(Self::Postgres {
                host: host.to_string(),
                port: url.port().unwrap_or(DEFAULT_POSTGRES_PORT),
                database: database.to_string(),
                options: checked_options(options)?,
            });
        }

        // EZConnect style: host[:port]/database[?key=value&...]
        let (locator, query) = match locator.split_once('?') {
            Some((locator, query)) => (locator, Some(query)),
            None => (locator, None),
        };
        let options: Vec<(String, String)> = query
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        let (address, database) = locator
            .split_once('/')
            .ok_or_else(|| format!("Invalid locator '{locator}'. Expected host[:port]/database"))?;
        if database.is_empty() {
            return Err(format!("Locator '{locator}' is missing a database name"));
        }
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("Invalid port '{port}' in locator"))?;
                (host, port)
            }
            None => (address, DEFAULT_POSTGRES_PORT),
        };
        if host.is_empty() {
            return Err(format!("Locator '{locator}' is missing a host"));
        }

        Ok(Self::Postgres {
            host: host.to_string(),
            port,
            database: database.to_string(),
            options: checked_options(options)?,
        })
    }

    /// Returns the value of a query-string option, if present.
    pub fn option(&self, key: &str) -> Option<&str> {
        match self {
            Self::Postgres { options, .. } => options
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            Self::Sqlite { .. } => None,
        }
    }

    /// Returns a display-safe description of the target.
    pub fn display_string(&self) -> String {
        match self {
            Self::Postgres {
                host,
                port,
                database,
                ..
            } => format!("{database} @ {host}:{port}"),
            Self::Sqlite { url } => url.clone(),
        }
    }
}

fn checked_options(
    options: Vec<(String, String)>,
) -> std::result::Result<Vec<(String, String)>, String> {
    match options
        .iter()
        .find(|(key, _)| !POSTGRES_LOCATOR_OPTIONS.contains(&key.as_str()))
    {
        Some((key, _)) => Err(format!(
            "Unsupported locator option '{key}'. Supported: {}",
            POSTGRES_LOCATOR_OPTIONS.join(", ")
        )),
        None => Ok(options),
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cctns-copilot")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields the default configuration.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| CopilotError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            CopilotError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }
}
