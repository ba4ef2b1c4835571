//! PostgreSQL session implementation.
//!
//! Provides the `PostgresSession` struct that implements the `Session` trait
//! for PostgreSQL databases using a single sqlx connection.

use super::{Backend, Cursor, EngineError, Row, Session, Value};
use crate::config::{Credentials, Locator};
use async_trait::async_trait;
use sqlx::postgres::{
    PgArguments, PgConnectOptions, PgConnection, PgHasArrayType, PgRow, PgSslMode, PgStatement,
    PgTypeInfo, Postgres,
};
use sqlx::query::Query;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, Json, JsonValue, Uuid};
use sqlx::{
    Column, Connection, Decode, Either, Executor, Row as SqlxRow, Statement, Type, TypeInfo,
    ValueRef,
};

/// Application name reported to the server.
const APPLICATION_NAME: &str = "cctns-copilot";

/// Column types decoded from the binary protocol. Anything else is rendered
/// to text by the server.
const NATIVE_TYPES: &[&str] = &[
    "BOOL", "INT2", "INT4", "INT8", "FLOAT4", "FLOAT8", "NUMERIC", "BYTEA", "DATE", "TIME",
    "TIMESTAMP", "TIMESTAMPTZ", "UUID", "JSON", "JSONB", "VOID", "TEXT", "VARCHAR", "CHAR", "NAME",
    "UNKNOWN", "BOOL[]", "INT2[]", "INT4[]", "INT8[]", "FLOAT4[]", "FLOAT8[]", "NUMERIC[]",
    "TEXT[]", "VARCHAR[]", "CHAR[]", "NAME[]", "UUID[]",
];

/// A read-only PostgreSQL session.
#[derive(Debug)]
pub struct PostgresSession {
    conn: PgConnection,
}

impl PostgresSession {
    /// Opens a session for the given locator and credentials.
    ///
    /// Every transaction in the session defaults to read-only.
    pub async fn connect(locator: &Locator, credentials: &Credentials) -> Result<Self, EngineError> {
        let options = connect_options(locator, credentials)?;
        let conn = PgConnection::connect_with(&options).await?;
        Ok(Self { conn })
    }

    /// Wraps an existing connection.
    ///
    /// This is primarily useful for testing.
    pub fn from_connection(conn: PgConnection) -> Self {
        Self { conn }
    }
}

fn connect_options(
    locator: &Locator,
    credentials: &Credentials,
) -> Result<PgConnectOptions, EngineError> {
    let (base, extra) = match locator {
        Locator::Postgres {
            host,
            port,
            database,
            options,
        } => (
            PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(database),
            options,
        ),
        Locator::Sqlite { url } => {
            return Err(EngineError::other(format!(
                "'{url}' is not a PostgreSQL locator"
            )))
        }
    };

    let options = base
        .username(credentials.user())
        .password(credentials.secret())
        .application_name(APPLICATION_NAME)
        .options([("default_transaction_read_only", "on")]);

    extra
        .iter()
        .try_fold(options, |options, (key, value)| apply_locator_option(options, key, value))
}

/// Applies one `key=value` option from the locator's query string.
fn apply_locator_option(
    options: PgConnectOptions,
    key: &str,
    value: &str,
) -> Result<PgConnectOptions, EngineError> {
    let options = match key {
        "sslmode" => {
            let mode = value
                .parse::<PgSslMode>()
                .map_err(|_| EngineError::other(format!("Invalid sslmode '{value}'")))?;
            options.ssl_mode(mode)
        }
        "sslrootcert" => options.ssl_root_cert(value),
        "sslcert" => options.ssl_client_cert(value),
        "sslkey" => options.ssl_client_key(value),
        "application_name" => options.application_name(value),
        other => {
            return Err(EngineError::other(format!(
                "Unsupported locator option '{other}'"
            )))
        }
    };
    Ok(options)
}

#[async_trait]
impl Session for PostgresSession {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn cursor(&mut self) -> Box<dyn Cursor + '_> {
        Box::new(PgCursor {
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

/// Cursor over a borrowed PostgreSQL connection.
struct PgCursor<'c> {
    conn: &'c mut PgConnection,
    description: Vec<String>,
    pending: Vec<PgRow>,
}

#[async_trait]
impl<'c> Cursor for PgCursor<'c> {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<(), EngineError> {
        // Preparing first yields column names even when no row comes back.
        // The prepared statement is cached per connection and reused by the
        // query below, so values must be encoded as the parameter types the
        // server inferred here.
        let statement = (&mut *self.conn).prepare(sql).await?;
        self.description = statement
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();
        let as_text: Vec<bool> = statement
            .columns()
            .iter()
            .map(|col| !NATIVE_TYPES.contains(&col.type_info().name()))
            .collect();

        let mut parameter_types = declared_parameters(&statement);
        let run_sql = if as_text.contains(&true) {
            let projected = text_projection(sql, &as_text);
            parameter_types = declared_parameters(&(&mut *self.conn).prepare(&projected).await?);
            projected
        } else {
            sql.to_string()
        };

        let query = params.iter().enumerate().try_fold(
            sqlx::query(&run_sql),
            |query, (i, value)| match parameter_types.get(i) {
                Some(target) => bind_as(query, value, target, i + 1),
                None => Ok(bind_value(query, value)),
            },
        )?;
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

fn declared_parameters(statement: &PgStatement<'_>) -> Vec<PgTypeInfo> {
    match statement.parameters() {
        Some(Either::Left(types)) => types.to_vec(),
        _ => Vec::new(),
    }
}

/// Wraps `sql` so the columns flagged in `as_text` come back as text.
///
/// Columns are renamed positionally, so duplicate and anonymous column names
/// survive the wrapping.
fn text_projection(sql: &str, as_text: &[bool]) -> String {
    let body = sql.trim_end().trim_end_matches(';').trim_end();
    let aliases: Vec<String> = (1..=as_text.len()).map(|i| format!("c{i}")).collect();
    let projection: Vec<String> = aliases
        .iter()
        .zip(as_text)
        .map(|(alias, &text)| {
            if text {
                format!("{alias}::text")
            } else {
                alias.clone()
            }
        })
        .collect();
    format!(
        "SELECT {} FROM (\n{body}\n) AS cctns_rows({})",
        projection.join(", "),
        aliases.join(", ")
    )
}

/// Binds a single value, choosing the Rust type sqlx encodes it from.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Decimal(d) => query.bind(*d),
        Value::String(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Date(d) => query.bind(*d),
        Value::Time(t) => query.bind(*t),
        Value::Timestamp(ts) => query.bind(*ts),
        Value::TimestampTz(ts) => query.bind(*ts),
        Value::Json(j) => query.bind(Json(j.clone())),
    }
}

/// Binds a value encoded as `target`, the type the server expects at
/// parameter `position`.
fn bind_as<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
    target: &PgTypeInfo,
    position: usize,
) -> Result<Query<'q, Postgres, PgArguments>, EngineError> {
    let mismatch = || {
        EngineError::other(format!(
            "cannot bind '{value}' to parameter ${position} of type {}",
            target.name()
        ))
    };

    let query = match (target.name(), value) {
        (_, Value::Null) => query.bind(None::<String>),
        ("BOOL", Value::Bool(b)) => query.bind(*b),
        ("BOOL", Value::String(s)) => query.bind(s.trim().parse::<bool>().map_err(|_| mismatch())?),
        ("INT2", v) => {
            let i = as_integer(v).ok_or_else(mismatch)?;
            query.bind(i16::try_from(i).map_err(|_| mismatch())?)
        }
        ("INT4", v) => {
            let i = as_integer(v).ok_or_else(mismatch)?;
            query.bind(i32::try_from(i).map_err(|_| mismatch())?)
        }
        ("INT8", v) => query.bind(as_integer(v).ok_or_else(mismatch)?),
        ("FLOAT4", v) => query.bind(as_float(v).ok_or_else(mismatch)? as f32),
        ("FLOAT8", v) => query.bind(as_float(v).ok_or_else(mismatch)?),
        ("NUMERIC", v) => query.bind(as_decimal(v).ok_or_else(mismatch)?),
        ("TEXT" | "VARCHAR" | "CHAR" | "NAME" | "UNKNOWN", Value::Bytes(_)) => {
            return Err(mismatch())
        }
        ("TEXT" | "VARCHAR" | "CHAR" | "NAME" | "UNKNOWN", v) => query.bind(v.to_display_string()),
        ("DATE", Value::Date(d)) => query.bind(*d),
        ("DATE", Value::Timestamp(ts)) => query.bind(ts.date()),
        ("DATE", Value::String(s)) => {
            query.bind(s.trim().parse::<NaiveDate>().map_err(|_| mismatch())?)
        }
        ("TIME", Value::Time(t)) => query.bind(*t),
        ("TIME", Value::String(s)) => {
            query.bind(s.trim().parse::<NaiveTime>().map_err(|_| mismatch())?)
        }
        ("TIMESTAMP", Value::Timestamp(ts)) => query.bind(*ts),
        ("TIMESTAMP", Value::TimestampTz(ts)) => query.bind(ts.naive_utc()),
        ("TIMESTAMP", Value::Date(d)) => query.bind(d.and_hms_opt(0, 0, 0).ok_or_else(mismatch)?),
        ("TIMESTAMP", Value::String(s)) => query.bind(parse_timestamp(s).ok_or_else(mismatch)?),
        ("TIMESTAMPTZ", Value::TimestampTz(ts)) => query.bind(*ts),
        ("TIMESTAMPTZ", Value::Timestamp(ts)) => {
            query.bind(DateTime::<Utc>::from_naive_utc_and_offset(*ts, Utc))
        }
        ("TIMESTAMPTZ", Value::String(s)) => {
            let ts = match s.trim().parse::<DateTime<Utc>>() {
                Ok(ts) => ts,
                Err(_) => {
                    let naive = parse_timestamp(s).ok_or_else(mismatch)?;
                    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
                }
            };
            query.bind(ts)
        }
        ("UUID", Value::String(s)) => query.bind(s.trim().parse::<Uuid>().map_err(|_| mismatch())?),
        ("JSON" | "JSONB", Value::Json(j)) => query.bind(Json(j.clone())),
        ("JSON" | "JSONB", v) => query.bind(Json(serde_json::to_value(v).map_err(|_| mismatch())?)),
        ("BYTEA", Value::Bytes(b)) => query.bind(b.clone()),
        ("BOOL" | "DATE" | "TIME" | "TIMESTAMP" | "TIMESTAMPTZ" | "UUID" | "BYTEA", _) => {
            return Err(mismatch())
        }
        _ => bind_value(query, value),
    };
    Ok(query)
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Decimal(d) => d.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Decimal(d) => d.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Int(i) => Some(Decimal::from(*i)),
        Value::Float(f) => f.to_string().parse().ok(),
        Value::Decimal(d) => Some(*d),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses `YYYY-MM-DD[ T]HH:MM:SS[.f]` or a bare date at midnight.
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    s.replacen(' ', "T", 1)
        .parse::<NaiveDateTime>()
        .ok()
        .or_else(|| s.parse::<NaiveDate>().ok()?.and_hms_opt(0, 0, 0))
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Result<Row, EngineError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.name(), col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(
    row: &PgRow,
    index: usize,
    column: &str,
    type_name: &str,
) -> Result<Value, EngineError> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index)?),
        "INT2" | "SMALLINT" => Value::Int(row.try_get::<i16, _>(index)? as i64),
        "INT4" | "INT" | "INTEGER" => Value::Int(row.try_get::<i32, _>(index)? as i64),
        "INT8" | "BIGINT" => Value::Int(row.try_get::<i64, _>(index)?),
        "FLOAT4" | "REAL" => Value::Float(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" | "DOUBLE PRECISION" => Value::Float(row.try_get::<f64, _>(index)?),
        "NUMERIC" => Value::Decimal(row.try_get::<Decimal, _>(index)?),
        "BYTEA" => Value::Bytes(row.try_get::<Vec<u8>, _>(index)?),
        "DATE" => Value::Date(row.try_get::<NaiveDate, _>(index)?),
        "TIME" => Value::Time(row.try_get::<NaiveTime, _>(index)?),
        "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(index)?),
        "TIMESTAMPTZ" => Value::TimestampTz(row.try_get::<DateTime<Utc>, _>(index)?),
        "UUID" => Value::String(row.try_get::<Uuid, _>(index)?.to_string()),
        "JSON" | "JSONB" => Value::Json(row.try_get::<JsonValue, _>(index)?),
        "VOID" => Value::Null,
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "UNKNOWN" => {
            Value::String(row.try_get::<String, _>(index)?)
        }
        "BOOL[]" => array_value(row, index, JsonValue::Bool)?,
        "INT2[]" => array_value(row, index, |i: i16| JsonValue::from(i))?,
        "INT4[]" => array_value(row, index, |i: i32| JsonValue::from(i))?,
        "INT8[]" => array_value(row, index, |i: i64| JsonValue::from(i))?,
        "FLOAT4[]" => array_value(row, index, |f: f32| JsonValue::from(f))?,
        "FLOAT8[]" => array_value(row, index, |f: f64| JsonValue::from(f))?,
        "NUMERIC[]" => array_value(row, index, |d: Decimal| JsonValue::String(d.to_string()))?,
        "UUID[]" => array_value(row, index, |u: Uuid| JsonValue::String(u.to_string()))?,
        "TEXT[]" | "VARCHAR[]" | "CHAR[]" | "NAME[]" => array_value(row, index, JsonValue::String)?,
        other => match row.try_get::<String, _>(index) {
            Ok(s) => Value::String(s),
            Err(_) => {
                return Err(EngineError::other(format!(
                    "column \"{column}\" has unsupported type {other}"
                )))
            }
        },
    };

    Ok(value)
}

/// Decodes a one-dimensional array column into a JSON array.
fn array_value<T, F>(row: &PgRow, index: usize, to_json: F) -> Result<Value, EngineError>
where
    T: for<'r> Decode<'r, Postgres> + Type<Postgres> + PgHasArrayType,
    F: Fn(T) -> JsonValue,
{
    let items = row.try_get::<Vec<Option<T>>, _>(index)?;
    Ok(Value::Json(JsonValue::Array(
        items
            .into_iter()
            .map(|item| item.map_or(JsonValue::Null, &to_json))
            .collect(),
    )))
}
