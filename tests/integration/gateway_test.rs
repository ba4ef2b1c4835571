//! Gateway integration tests against SQLite database files.

use cctns_copilot::config::{DatabaseConfig, Provisioning};
use cctns_copilot::db::{Backend, Value};
use cctns_copilot::error::GatewayError;
use cctns_copilot::gateway::{QueryGateway, QueryRequest};
use cctns_copilot::report::{self, ReportFormat};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use std::path::Path;
use tempfile::TempDir;

const SEED: &[&str] = &[
    "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance REAL)",
    "INSERT INTO accounts VALUES (1, 'Station 4', 1200.5), (2, 'Station 9', NULL)",
    "CREATE TABLE fir_records (fir_no TEXT PRIMARY KEY, district TEXT, crime_type TEXT, year INTEGER)",
    "INSERT INTO fir_records VALUES \
        ('FIR-001', 'Guntur', 'theft', 2024), \
        ('FIR-002', 'Guntur', 'assault', 2025), \
        ('FIR-003', 'Krishna', 'theft', 2025)",
    "CREATE TABLE empty_table (id INTEGER, name TEXT)",
];

/// Creates a seeded database file and returns its directory and locator.
fn seeded_database() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cctns.db");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(seed(&path));

    let locator = format!("sqlite://{}", path.display());
    (dir, locator)
}

async fn seed(path: &Path) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
    for statement in SEED {
        sqlx::query(statement).execute(&mut conn).await.unwrap();
    }
    conn.close().await.unwrap();
}

fn provisioning(locator: &str) -> Provisioning {
    DatabaseConfig {
        user: Some("records_ro".to_string()),
        password: Some("unused-for-sqlite".to_string()),
        dsn: Some(locator.to_string()),
    }
    .provisioning()
}

fn connected_gateway(locator: &str) -> QueryGateway {
    let mut gateway = QueryGateway::new(provisioning(locator));
    gateway.provision().unwrap();
    gateway
}

fn count_accounts(locator: &str) -> i64 {
    let mut gateway = connected_gateway(locator);
    let table = gateway
        .execute(&QueryRequest::new("SELECT COUNT(*) AS n FROM accounts"))
        .unwrap();
    match table.get(0, "n") {
        Some(Value::Int(n)) => *n,
        other => panic!("expected integer count, got {other:?}"),
    }
}

#[test]
fn test_select_returns_columns_and_rows() {
    let (_dir, locator) = seeded_database();
    let mut gateway = connected_gateway(&locator);
    assert_eq!(gateway.backend(), Some(Backend::Sqlite));

    let table = gateway
        .execute(&QueryRequest::new(
            "SELECT crime_type, COUNT(*) AS cases FROM fir_records GROUP BY crime_type ORDER BY crime_type",
        ))
        .unwrap();

    assert_eq!(table.columns(), ["crime_type", "cases"]);
    assert_eq!(
        table.rows(),
        [
            vec![Value::from("assault"), Value::Int(1)],
            vec![Value::from("theft"), Value::Int(2)],
        ]
    );
}

#[test]
fn test_empty_table_yields_columns_and_no_rows() {
    let (_dir, locator) = seeded_database();
    let mut gateway = connected_gateway(&locator);

    let table = gateway
        .execute(&QueryRequest::new("SELECT id, name FROM empty_table"))
        .unwrap();

    assert_eq!(table.columns(), ["id", "name"]);
    assert_eq!(table.row_count(), 0);
}

#[test]
fn test_engine_failure_then_success() {
    let (_dir, locator) = seeded_database();
    let mut gateway = connected_gateway(&locator);

    let err = gateway
        .execute(&QueryRequest::new("SELECT * FROM nonexistent_table_xyz"))
        .unwrap_err();
    match &err {
        GatewayError::EngineFailure { message, .. } => {
            assert!(message.contains("nonexistent_table_xyz"), "{message}");
        }
        other => panic!("expected engine failure, got {other:?}"),
    }
    assert!(gateway.is_connected());

    let table = gateway
        .execute(&QueryRequest::new("SELECT fir_no FROM fir_records"))
        .unwrap();
    assert_eq!(table.row_count(), 3);
}

#[test]
fn test_drop_is_rejected_and_table_untouched() {
    let (_dir, locator) = seeded_database();
    let mut gateway = connected_gateway(&locator);

    let err = gateway
        .execute(&QueryRequest::new("DROP TABLE accounts"))
        .unwrap_err();
    assert!(matches!(err, GatewayError::PolicyRejected(_)));

    let err = gateway
        .execute(&QueryRequest::new("SELECT 1; DELETE FROM accounts"))
        .unwrap_err();
    assert!(matches!(err, GatewayError::PolicyRejected(_)));

    gateway.close();
    assert_eq!(count_accounts(&locator), 2);
}

#[test]
fn test_padded_lowercase_select_is_forwarded() {
    let (_dir, locator) = seeded_database();
    let mut gateway = connected_gateway(&locator);

    // SQLite has no `dual`, so the engine answers; the policy let it through.
    let err = gateway
        .execute(&QueryRequest::new("  select sysdate from dual  "))
        .unwrap_err();
    assert!(matches!(err, GatewayError::EngineFailure { .. }), "{err:?}");

    let table = gateway
        .execute(&QueryRequest::new("  select 1 as one  "))
        .unwrap();
    assert_eq!(table.rows(), [vec![Value::Int(1)]]);
}

#[test]
fn test_named_parameters() {
    let (_dir, locator) = seeded_database();
    let mut gateway = connected_gateway(&locator);

    let request = QueryRequest::new(
        "SELECT fir_no FROM fir_records WHERE district = :district AND year = :year ORDER BY fir_no",
    )
    .with_param("district", "Guntur")
    .with_param("YEAR", 2025);
    let table = gateway.execute(&request).unwrap();

    assert_eq!(table.rows(), [vec![Value::from("FIR-002")]]);
}

#[test]
fn test_close_twice() {
    let (_dir, locator) = seeded_database();
    let mut gateway = connected_gateway(&locator);

    gateway.close();
    gateway.close();

    assert!(!gateway.is_connected());
    assert!(matches!(
        gateway.execute(&QueryRequest::new("SELECT 1")),
        Err(GatewayError::NotConnected(_))
    ));
}

#[test]
fn test_placeholder_credentials_skip_provisioning() {
    let config = DatabaseConfig {
        user: Some("your_db_user".to_string()),
        password: Some("your_db_password".to_string()),
        dsn: Some("your_db_host:your_db_port/your_db_service".to_string()),
    };
    let mut gateway = QueryGateway::new(config.provisioning());

    assert!(matches!(
        gateway.provision(),
        Err(GatewayError::NotConfigured(_))
    ));
    assert!(matches!(
        gateway.execute(&QueryRequest::new("SELECT 1")),
        Err(GatewayError::NotConnected(_))
    ));
}

#[test]
fn test_missing_database_file_fails_to_connect() {
    let dir = tempfile::tempdir().unwrap();
    let locator = format!("sqlite://{}", dir.path().join("missing.db").display());
    let mut gateway = QueryGateway::new(provisioning(&locator));

    assert!(matches!(
        gateway.provision(),
        Err(GatewayError::ConnectionFailed(_))
    ));
    assert!(!gateway.is_connected());
    assert!(!dir.path().join("missing.db").exists());
}

#[test]
fn test_result_renders_as_csv() {
    let (_dir, locator) = seeded_database();
    let mut gateway = connected_gateway(&locator);

    let table = gateway
        .execute(&QueryRequest::new(
            "SELECT id, owner, balance FROM accounts ORDER BY id",
        ))
        .unwrap();
    let csv = report::render(&table, ReportFormat::Csv).unwrap();

    assert_eq!(
        csv,
        "id,owner,balance\r\n1,Station 4,1200.5\r\n2,Station 9,\r\n"
    );
}
