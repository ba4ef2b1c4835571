//! Gateway integration tests against PostgreSQL.
//!
//! Skipped unless DATABASE_URL is set. The URL must carry a password, since
//! a blank password counts as unconfigured.

use cctns_copilot::config::{DatabaseConfig, Provisioning};
use cctns_copilot::db::{Backend, Value};
use cctns_copilot::error::GatewayError;
use cctns_copilot::gateway::{QueryGateway, QueryRequest};
use url::Url;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Splits DATABASE_URL into the separate user, password and locator inputs.
fn get_test_provisioning() -> Option<Provisioning> {
    let url = Url::parse(&get_test_database_url()?).ok()?;
    let locator = format!(
        "{}:{}/{}",
        url.host_str()?,
        url.port().unwrap_or(5432),
        url.path().trim_start_matches('/')
    );
    let config = DatabaseConfig {
        user: Some(url.username().to_string()),
        password: Some(url.password().unwrap_or_default().to_string()),
        dsn: Some(locator),
    };
    Some(config.provisioning())
}

fn get_test_gateway() -> Option<QueryGateway> {
    let mut gateway = QueryGateway::new(get_test_provisioning()?);
    gateway.provision().ok()?;
    Some(gateway)
}

#[test]
fn test_execute_simple_select() {
    let Some(mut gateway) = get_test_gateway() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    assert_eq!(gateway.backend(), Some(Backend::Postgres));

    let table = gateway
        .execute(&QueryRequest::new("SELECT 1 AS num, 'hello' AS greeting"))
        .unwrap();

    assert_eq!(table.columns(), ["num", "greeting"]);
    assert_eq!(table.rows(), [vec![Value::Int(1), Value::from("hello")]]);
}

#[test]
fn test_empty_result_keeps_columns() {
    let Some(mut gateway) = get_test_gateway() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let table = gateway
        .execute(&QueryRequest::new(
            "SELECT n AS id, n::text AS label FROM generate_series(1, 0) AS n",
        ))
        .unwrap();

    assert_eq!(table.columns(), ["id", "label"]);
    assert!(table.is_empty());
}

#[test]
fn test_typed_values() {
    let Some(mut gateway) = get_test_gateway() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let table = gateway
        .execute(&QueryRequest::new(
            "SELECT 12.50::numeric AS amount, DATE '2025-01-31' AS reported_on, \
             NULL::text AS missing, true AS active",
        ))
        .unwrap();

    assert_eq!(
        table.get(0, "amount").map(Value::to_display_string),
        Some("12.50".to_string())
    );
    assert_eq!(
        table.get(0, "reported_on").map(Value::to_display_string),
        Some("2025-01-31".to_string())
    );
    assert_eq!(table.get(0, "missing"), Some(&Value::Null));
    assert_eq!(table.get(0, "active"), Some(&Value::Bool(true)));
}

#[test]
fn test_named_parameters() {
    let Some(mut gateway) = get_test_gateway() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let request = QueryRequest::new("SELECT :a::int8 + :b::int8 AS total, :a::int8 AS a")
        .with_param("a", 40)
        .with_param("b", 2);
    let table = gateway.execute(&request).unwrap();

    assert_eq!(table.rows(), [vec![Value::Int(42), Value::Int(40)]]);
}

#[test]
fn test_named_parameters_match_column_types() {
    let Some(mut gateway) = get_test_gateway() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    // `id` is int4, `amount` numeric, `reported_on` date; no casts on the binds.
    let request = QueryRequest::new(
        "SELECT id, label FROM (VALUES (1, 'Rao', 12.50::numeric, DATE '2025-01-31'), \
         (2, 'Devi', 3.00::numeric, DATE '2025-02-01')) AS officers(id, label, amount, reported_on) \
         WHERE id = :id AND amount > :floor AND reported_on >= :since",
    )
    .with_param("id", 1)
    .with_param("floor", 10)
    .with_param("since", "2025-01-01");
    let table = gateway.execute(&request).unwrap();

    assert_eq!(table.rows(), [vec![Value::Int(1), Value::from("Rao")]]);
}

#[test]
fn test_array_and_interval_columns() {
    let Some(mut gateway) = get_test_gateway() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let table = gateway
        .execute(&QueryRequest::new(
            "SELECT ARRAY[1, 2] AS a, INTERVAL '90 minutes' AS wait, n AS id \
             FROM generate_series(1, 2) AS n ORDER BY n",
        ))
        .unwrap();

    assert_eq!(table.columns(), ["a", "wait", "id"]);
    assert_eq!(table.row_count(), 2);
    assert_eq!(
        table.get(0, "a"),
        Some(&Value::Json(serde_json::json!([1, 2])))
    );
    assert_eq!(table.get(1, "wait"), Some(&Value::from("01:30:00")));
    assert_eq!(table.get(1, "id"), Some(&Value::Int(2)));
}

#[test]
fn test_engine_failure_then_success() {
    let Some(mut gateway) = get_test_gateway() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let err = gateway
        .execute(&QueryRequest::new("SELECT * FROM nonexistent_table_xyz"))
        .unwrap_err();
    match err {
        GatewayError::EngineFailure { code, message } => {
            assert_eq!(code.as_deref(), Some("42P01"));
            assert!(message.contains("nonexistent_table_xyz"));
        }
        other => panic!("Expected engine failure, got {other:?}"),
    }

    assert!(gateway.execute(&QueryRequest::new("SELECT 1")).is_ok());
}

#[test]
fn test_wrong_password_fails_with_hint() {
    let Some(Provisioning::Configured(credentials)) = get_test_provisioning() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let config = DatabaseConfig {
        user: Some(credentials.user().to_string()),
        password: Some("definitely-not-the-password".to_string()),
        dsn: Some(credentials.locator().to_string()),
    };
    let mut gateway = QueryGateway::new(config.provisioning());

    match gateway.provision() {
        Err(GatewayError::ConnectionFailed(cause)) => assert!(!cause.is_empty()),
        // Trust authentication accepts any password
        Ok(()) => {}
        Err(other) => panic!("Expected connection failure, got {other:?}"),
    }
}
