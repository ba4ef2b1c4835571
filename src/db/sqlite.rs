//! SQLite session implementation.
//!
//! Opens the database file read-only; a missing file is a connection error
//! rather than a fresh empty database.

use super::{Backend, Cursor, EngineError, Row, Session, Value};
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::types::Json;
use sqlx::{Column, Connection, Executor, Row as SqlxRow, Statement, TypeInfo, ValueRef};
use std::str::FromStr;

/// A read-only SQLite session.
#[derive(Debug)]
pub struct SqliteSession {
    conn: SqliteConnection,
}

impl SqliteSession {
    /// Opens a session for a `sqlite:` locator.
    pub async fn connect(url: &str) -> Result<Self, EngineError> {
        let options = SqliteConnectOptions::from_str(url)?
            .read_only(true)
            .create_if_missing(false);
        let conn = SqliteConnection::connect_with(&options).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Session for SqliteSession {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn cursor(&mut self) -> Box<dyn Cursor + '_> {
        Box::new(SqliteCursor {
            conn: &mut self.conn,
            description: Vec::new(),
            pending: Vec::new(),
        })
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        let session = *self;
        session.conn.close().await?;
        Ok(())
    }
}

struct SqliteCursor<'c> {
    conn: &'c mut SqliteConnection,
    description: Vec<String>,
    pending: Vec<SqliteRow>,
}

#[async_trait]
impl<'c> Cursor for SqliteCursor<'c> {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<(), EngineError> {
        let statement = (&mut *self.conn).prepare(sql).await?;
        self.description = statement
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();

        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, value| bind_value(query, value));
        self.pending = query.fetch_all(&mut *self.conn).await?;
        Ok(())
    }

    fn description(&self) -> &[String] {
        &self.description
    }

    async fn fetch_all(&mut self) -> Result<Vec<Row>, EngineError> {
        std::mem::take(&mut self.pending)
            .iter()
            .map(convert_row)
            .collect()
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        // SQLite has no exact numeric type; keep the digits as text.
        Value::Decimal(d) => query.bind(d.to_string()),
        Value::String(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Date(d) => query.bind(*d),
        Value::Time(t) => query.bind(*t),
        Value::Timestamp(ts) => query.bind(*ts),
        Value::TimestampTz(ts) => query.bind(*ts),
        Value::Json(j) => query.bind(Json(j.clone())),
    }
}

fn convert_row(row: &SqliteRow) -> Result<Row, EngineError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a value by its storage class. SQLite typing is per value, so
/// the declared column type only matters for booleans.
fn convert_value(row: &SqliteRow, index: usize, declared: &str) -> Result<Value, EngineError> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_uppercase();

    let value = match (storage.as_str(), declared.to_uppercase().as_str()) {
        ("INTEGER", "BOOLEAN") => Value::Bool(row.try_get_unchecked::<bool, _>(index)?),
        ("INTEGER", _) => Value::Int(row.try_get_unchecked::<i64, _>(index)?),
        ("REAL", _) => Value::Float(row.try_get_unchecked::<f64, _>(index)?),
        ("BLOB", _) => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };

    Ok(value)
}
