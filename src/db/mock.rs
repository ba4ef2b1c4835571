//! Mock engine for testing.
//!
//! Provides a scripted in-memory engine whose responses are keyed by the
//! exact statement text, plus a probe that records every interaction so
//! tests can prove what did (or did not) reach the engine.

use super::{Backend, Connector, Cursor, EngineError, Row, Session, Value};
use crate::config::Credentials;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted response for a statement.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return these columns and rows.
    Rows { columns: Vec<String>, rows: Vec<Row> },
    /// Fail during execution with this error.
    Error(EngineError),
    /// Execute successfully but fail while fetching rows.
    FetchError(EngineError),
    /// Panic inside the engine client.
    Panic(String),
}

impl MockResponse {
    /// Creates a row response from column names and rows.
    pub fn rows(columns: &[&str], rows: Vec<Row>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }
}

/// Records interactions with the mock engine.
#[derive(Debug, Default, Clone)]
pub struct MockProbe {
    inner: Arc<ProbeInner>,
}

#[derive(Debug, Default)]
struct ProbeInner {
    connects: AtomicUsize,
    cursors_opened: AtomicUsize,
    cursors_released: AtomicUsize,
    sessions_closed: AtomicUsize,
    executed: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockProbe {
    /// Number of sessions opened.
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of cursors opened.
    pub fn cursors_opened(&self) -> usize {
        self.inner.cursors_opened.load(Ordering::SeqCst)
    }

    /// Number of cursors dropped.
    pub fn cursors_released(&self) -> usize {
        self.inner.cursors_released.load(Ordering::SeqCst)
    }

    /// Number of sessions closed.
    pub fn sessions_closed(&self) -> usize {
        self.inner.sessions_closed.load(Ordering::SeqCst)
    }

    /// Statements sent to the engine, with their bound values.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.inner
            .executed
            .lock()
            .map(|executed| executed.clone())
            .unwrap_or_default()
    }

    fn record(&self, sql: &str, params: &[Value]) {
        if let Ok(mut executed) = self.inner.executed.lock() {
            executed.push((sql.to_string(), params.to_vec()));
        }
    }
}

/// A connector that opens mock sessions.
#[derive(Debug, Clone)]
pub struct MockConnector {
    backend: Backend,
    responses: Arc<HashMap<String, MockResponse>>,
    connect_error: Option<EngineError>,
    probe: MockProbe,
}

impl MockConnector {
    /// Creates a mock connector with no scripted statements.
    pub fn new() -> Self {
        Self {
            backend: Backend::Postgres,
            responses: Arc::new(HashMap::new()),
            connect_error: None,
            probe: MockProbe::default(),
        }
    }

    /// Scripts the response for an exact statement text.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        Arc::make_mut(&mut self.responses).insert(sql.into(), response);
        self
    }

    /// Makes every connection attempt fail with `error`.
    pub fn with_connect_error(mut self, error: EngineError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Sets the backend the sessions report.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Returns a probe sharing this connector's counters.
    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn Session>, EngineError> {
        self.probe.inner.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }
        Ok(Box::new(MockSession {
            backend: self.backend,
            responses: Arc::clone(&self.responses),
            probe: self.probe.clone(),
        }))
    }
}

struct MockSession {
    backend: Backend,
    responses: Arc<HashMap<String, MockResponse>>,
    probe: MockProbe,
}

#[async_trait]
impl Session for MockSession {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn cursor(&mut self) -> Box<dyn Cursor + '_> {
        self.probe.inner.cursors_opened.fetch_add(1, Ordering::SeqCst);
        Box::new(MockCursor {
            session: self,
            description: Vec::new(),
            pending: None,
        })
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.probe.inner.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockCursor<'s> {
    session: &'s MockSession,
    description: Vec<String>,
    pending: Option<Result<Vec<Row>, EngineError>>,
}

#[async_trait]
impl<'s> Cursor for MockCursor<'s> {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<(), EngineError> {
        self.session.probe.record(sql, params);

        match self.session.responses.get(sql) {
            Some(MockResponse::Rows { columns, rows }) => {
                self.description = columns.clone();
                self.pending = Some(Ok(rows.clone()));
                Ok(())
            }
            Some(MockResponse::FetchError(error)) => {
                self.pending = Some(Err(error.clone()));
                Ok(())
            }
            Some(MockResponse::Error(error)) => Err(error.clone()),
            Some(MockResponse::Panic(message)) => panic!("{message}"),
            None => Err(EngineError::database(
                Some("42P01"),
                format!("no scripted response for statement: {sql}"),
            )),
        }
    }

    fn description(&self) -> &[String] {
        &self.description
    }

    async fn fetch_all(&mut self) -> Result<Vec<Row>, EngineError> {
        self.pending
            .take()
            .unwrap_or_else(|| Err(EngineError::other("fetch before execute")))
    }
}

impl Drop for MockCursor<'_> {
    fn drop(&mut self) {
        self.session
            .probe
            .inner
            .cursors_released
            .fetch_add(1, Ordering::SeqCst);
    }
}
