//! Database engine abstraction for the query gateway.
//!
//! The gateway talks to the relational store through three traits:
//! a [`Connector`] opens a [`Session`], and a session hands out one scoped
//! [`Cursor`] per statement. The cursor borrows the session mutably, so at
//! most one is in flight, and it is released when dropped.

mod mock;
mod params;
mod postgres;
mod sqlite;
mod types;

pub use mock::{MockConnector, MockProbe, MockResponse};
pub use params::{bind_parameters, BindError, BoundStatement, QueryParams};
pub use postgres::PostgresSession;
pub use sqlite::SqliteSession;
pub use types::{Record, ResultTable, Row, Value};

use crate::config::{Credentials, Locator};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of connection attempts for transient failures.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Upper bound on a single connection attempt.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    /// Returns the backend name for logs and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Returns the native placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${index}"),
            Self::Sqlite => format!("?{index}"),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by an engine client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine itself reported an error.
    #[error("{message}")]
    Database {
        code: Option<String>,
        message: String,
    },

    /// Transport, decoding or any other client-side failure.
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Creates an engine-reported error.
    pub fn database(code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Database {
            code: code.map(String::from),
            message: message.into(),
        }
    }

    /// Creates a client-side error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Determines if a connection error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        let error_str = self.to_string().to_lowercase();

        // Authentication and database-not-found errors are not transient
        if error_str.contains("password authentication failed")
            || error_str.contains("authentication failed")
            || error_str.contains("does not exist")
        {
            return false;
        }

        error_str.contains("connection refused")
            || error_str.contains("timed out")
            || error_str.contains("timeout")
            || error_str.contains("temporarily unavailable")
            || error_str.contains("connection reset")
            || error_str.contains("broken pipe")
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(error: sqlx::Error) -> Self {
        match error.as_database_error() {
            Some(db_error) => Self::Database {
                code: db_error.code().map(|c| c.into_owned()),
                message: db_error.message().to_string(),
            },
            None => Self::Other(error.to_string()),
        }
    }
}

/// Opens sessions against a relational store.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new session with the given credentials.
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Session>, EngineError>;
}

/// A live session to the relational store.
#[async_trait]
pub trait Session: Send {
    /// Returns the backend this session talks to.
    fn backend(&self) -> Backend;

    /// Opens a cursor scoped to a single statement.
    fn cursor(&mut self) -> Box<dyn Cursor + '_>;

    /// Closes the session.
    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// A single-statement cursor.
///
/// Dropping the cursor releases everything it holds, whether or not the
/// statement succeeded.
#[async_trait]
pub trait Cursor: Send {
    /// Executes a statement with positional parameters.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<(), EngineError>;

    /// Returns the column names of the executed statement, in engine order.
    fn description(&self) -> &[String];

    /// Returns every row of the executed statement.
    async fn fetch_all(&mut self) -> Result<Vec<Row>, EngineError>;
}

/// Connector backed by sqlx, choosing PostgreSQL or SQLite from the locator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxConnector;

#[async_trait]
impl Connector for SqlxConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Session>, EngineError> {
        let locator = Locator::parse(credentials.locator()).map_err(EngineError::Other)?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = tokio::time::timeout(
                Duration::from_secs(CONNECT_TIMEOUT_SECS),
                open_session(&locator, credentials),
            )
            .await
            .unwrap_or_else(|_| {
                Err(EngineError::other(format!(
                    "connection timed out after {CONNECT_TIMEOUT_SECS} seconds"
                )))
            });

            match result {
                Ok(session) => {
                    debug!("Connected to {}", locator.display_string());
                    return Ok(session);
                }
                Err(e) => {
                    let is_transient = e.is_transient();
                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::other("no connection attempt was made")))
    }
}

async fn open_session(
    locator: &Locator,
    credentials: &Credentials,
) -> Result<Box<dyn Session>, EngineError> {
    match locator {
        Locator::Postgres { .. } => {
            let session = PostgresSession::connect(locator, credentials).await?;
            Ok(Box::new(session))
        }
        Locator::Sqlite { url } => {
            let session = SqliteSession::connect(url).await?;
            Ok(Box::new(session))
        }
    }
}
