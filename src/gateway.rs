//! The query gateway.
//!
//! `QueryGateway` is the only path from the application to the relational
//! store. It owns at most one live connection, refuses anything that is not a
//! read-only `SELECT` before the engine sees it, and translates every engine
//! failure into a [`GatewayError`].
//!
//! The API is blocking. Each call drives the async engine layer to completion
//! on a current-thread tokio runtime owned by the connection, so no
//! background tasks outlive a call. Do not call the gateway (or drop a
//! connected one) from inside an async runtime; async callers should use
//! `spawn_blocking` or the [`crate::db`] traits directly.

use crate::config::{Credentials, Locator, Provisioning};
use crate::db::{
    bind_parameters, Backend, BoundStatement, Connector, EngineError, QueryParams, ResultTable,
    Session, SqlxConnector, Value,
};
use crate::error::GatewayError;
use crate::policy::ReadOnlyPolicy;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, info, warn};

/// Number of statement characters written to the log.
const LOGGED_SQL_CHARS: usize = 200;

/// Outcome of executing a request.
pub type ExecutionOutcome = Result<ResultTable, GatewayError>;

/// SQL text plus optional bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    sql: String,
    params: Option<QueryParams>,
}

impl QueryRequest {
    /// Creates a request without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: None,
        }
    }

    /// Adds a named parameter. Names are case-insensitive.
    ///
    /// Replaces any positional parameters set earlier.
    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        let name = name.trim_start_matches(':').to_lowercase();
        match &mut self.params {
            Some(QueryParams::Named(map)) => {
                map.insert(name, value.into());
            }
            _ => {
                let mut map = BTreeMap::new();
                map.insert(name, value.into());
                self.params = Some(QueryParams::Named(map));
            }
        }
        self
    }

    /// Sets the full parameter set.
    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Sets values for placeholders already written in the backend's syntax.
    pub fn with_positional(mut self, values: Vec<Value>) -> Self {
        self.params = Some(QueryParams::Positional(values));
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> Option<&QueryParams> {
        self.params.as_ref()
    }
}

/// A live session plus the runtime that drives it.
struct ConnectionHandle {
    runtime: Runtime,
    session: Box<dyn Session>,
    target: String,
}

impl ConnectionHandle {
    fn close(self) {
        let ConnectionHandle {
            runtime,
            session,
            target,
        } = self;

        match runtime.block_on(session.close()) {
            Ok(()) => info!("Closed connection to {}", target),
            Err(e) => warn!("Error while closing connection to {}: {}", target, e),
        }
    }
}

/// Mediates all access to the relational store.
pub struct QueryGateway {
    provisioning: Provisioning,
    connector: Box<dyn Connector>,
    policy: ReadOnlyPolicy,
    handle: Option<ConnectionHandle>,
    idle_cause: String,
}

impl QueryGateway {
    /// Creates a gateway that is not yet connected.
    pub fn new(provisioning: Provisioning) -> Self {
        Self {
            provisioning,
            connector: Box::new(SqlxConnector),
            policy: ReadOnlyPolicy::default(),
            handle: None,
            idle_cause: "database has not been provisioned".to_string(),
        }
    }

    /// Replaces the engine connector.
    pub fn with_connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replaces the read-only policy.
    pub fn with_policy(mut self, policy: ReadOnlyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Opens the connection.
    ///
    /// Returns `NotConfigured` without touching the engine when credentials
    /// are missing or placeholders, and `ConnectionFailed` with a hint when
    /// the engine refuses. Calling this on a live gateway does nothing.
    pub fn provision(&mut self) -> Result<(), GatewayError> {
        if let Some(handle) = &self.handle {
            debug!("Already connected to {}", handle.target);
            return Ok(());
        }

        let credentials = match &self.provisioning {
            Provisioning::Configured(credentials) => credentials,
            Provisioning::Unconfigured { reason } => {
                warn!("Skipping database provisioning: {}", reason);
                self.idle_cause = format!("provisioning skipped: {reason}");
                return Err(GatewayError::not_configured(reason.clone()));
            }
        };

        let target = Locator::parse(credentials.locator())
            .map(|locator| locator.display_string())
            .unwrap_or_else(|_| credentials.locator().to_string());

        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                let cause = format!("could not start the I/O runtime: {e}");
                error!("{}", cause);
                self.idle_cause = format!("last connection attempt failed: {cause}");
                return Err(GatewayError::connection_failed(cause));
            }
        };

        info!("Connecting to {} as {}", target, credentials.user());
        match runtime.block_on(self.connector.connect(credentials)) {
            Ok(session) => {
                info!("Connected to {} ({})", target, session.backend());
                self.handle = Some(ConnectionHandle {
                    runtime,
                    session,
                    target,
                });
                Ok(())
            }
            Err(e) => {
                let cause = connection_hint(&e, credentials, &target);
                error!("Connection to {} failed: {}", target, e);
                self.idle_cause = format!("last connection attempt failed: {cause}");
                Err(GatewayError::connection_failed(cause))
            }
        }
    }

    /// Executes a read-only query and returns every row.
    ///
    /// The checks run in order: liveness, the read-only policy, then
    /// parameter binding. The engine is only reached once all three pass.
    /// Failures leave the connection usable.
    pub fn execute(&mut self, request: &QueryRequest) -> ExecutionOutcome {
        let Some(handle) = self.handle.as_mut() else {
            warn!("Execute called without a connection: {}", self.idle_cause);
            return Err(GatewayError::not_connected(self.idle_cause.clone()));
        };

        let backend = handle.session.backend();
        if let Err(violation) = self.policy.check(request.sql(), backend) {
            warn!("Rejected statement: {}", violation);
            return Err(GatewayError::policy_rejected(violation.to_string()));
        }

        let bound = bind_parameters(request.sql(), request.params(), backend).map_err(|e| {
            warn!("Parameter binding failed: {}", e);
            GatewayError::unexpected(e.to_string())
        })?;

        info!("Executing: {}", log_excerpt(request.sql()));
        debug!("Parameters: {:?}", bound.values);

        let start = Instant::now();
        let ConnectionHandle {
            runtime, session, ..
        } = handle;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.block_on(run_statement(session.as_mut(), &bound))
        }));

        match outcome {
            Ok(Ok(table)) => {
                let table = table.with_execution_time(start.elapsed());
                info!(
                    "Query returned {} rows in {:?}",
                    table.row_count(),
                    table.execution_time()
                );
                Ok(table)
            }
            Ok(Err(e)) => {
                let err = map_engine_error(e);
                warn!("Query failed: {}", err);
                Err(err)
            }
            Err(payload) => {
                let err = GatewayError::unexpected(format!(
                    "engine client panicked: {}",
                    panic_message(payload.as_ref())
                ));
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// Returns true while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the backend of the open connection.
    pub fn backend(&self) -> Option<Backend> {
        self.handle.as_ref().map(|handle| handle.session.backend())
    }

    pub fn policy(&self) -> ReadOnlyPolicy {
        self.policy
    }

    /// Releases the connection if one is open. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
            self.idle_cause = "connection was closed".to_string();
        }
    }
}

impl Drop for QueryGateway {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for QueryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryGateway")
            .field("provisioning", &self.provisioning)
            .field("policy", &self.policy)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Runs one statement through a scoped cursor. The cursor is dropped on
/// every exit path, including unwinding.
async fn run_statement(
    session: &mut dyn Session,
    bound: &BoundStatement,
) -> Result<ResultTable, EngineError> {
    let mut cursor = session.cursor();
    cursor.execute(&bound.sql, &bound.values).await?;
    let columns = cursor.description().to_vec();
    let rows = cursor.fetch_all().await?;
    Ok(ResultTable::new(columns, rows))
}

fn map_engine_error(error: EngineError) -> GatewayError {
    match error {
        EngineError::Database { code, message } => GatewayError::engine_failure(code, message),
        EngineError::Other(message) => GatewayError::unexpected(message),
    }
}

/// Maps a connection error to a message with an actionable hint.
fn connection_hint(error: &EngineError, credentials: &Credentials, target: &str) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        format!("Cannot connect to {target}. Check that the server is running.")
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        format!(
            "Authentication failed for user '{}'. Check your credentials.",
            credentials.user()
        )
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        format!("Database {target} does not exist.")
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        "Server requires TLS. Add '?sslmode=require' to the locator.".to_string()
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        format!("Connection to {target} timed out. The server may be overloaded or unreachable.")
    } else {
        error.to_string()
    }
}

fn log_excerpt(sql: &str) -> String {
    let trimmed = sql.trim();
    if trimmed.chars().count() > LOGGED_SQL_CHARS {
        let excerpt: String = trimmed.chars().take(LOGGED_SQL_CHARS).collect();
        format!("{excerpt}...")
    } else {
        trimmed.to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
