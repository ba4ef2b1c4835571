//! End-to-end tests for the `cctns-query` binary.

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Runs the binary in `dir` with a clean environment and returns
/// (exit code, stdout, stderr). Without an explicit `--config` a path that
/// does not exist is passed, so the user's own config is never read.
fn run_query(dir: &Path, args: &[&str], env: &[(&str, &str)]) -> (i32, String, String) {
    let mut command = Command::new(env!("CARGO_BIN_EXE_cctns-query"));
    command
        .current_dir(dir)
        .env_remove("CCTNS_DB_USER")
        .env_remove("CCTNS_DB_PASSWORD")
        .env_remove("CCTNS_DB_DSN")
        .env("RUST_LOG", "info");
    if !args.contains(&"--config") {
        command.arg("--config").arg(dir.join("no-config.toml"));
    }
    command.args(args);
    for (key, value) in env {
        command.env(key, value);
    }

    let output = command.output().expect("Failed to execute cctns-query");
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

fn seeded_database() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cctns.db");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
        sqlx::query("CREATE TABLE officers (id INTEGER PRIMARY KEY, name TEXT, district TEXT)")
            .execute(&mut conn)
            .await
            .unwrap();
        sqlx::query("INSERT INTO officers VALUES (1, 'Rao', 'Guntur'), (2, 'Devi', 'Krishna')")
            .execute(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();
    });

    (dir, path)
}

fn dsn(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

#[test]
fn test_csv_output() {
    let (dir, db) = seeded_database();
    let dsn = dsn(&db);

    let (code, stdout, stderr) = run_query(
        dir.path(),
        &[
            "--user",
            "records_ro",
            "--dsn",
            &dsn,
            "--format",
            "csv",
            "SELECT id, name FROM officers ORDER BY id",
        ],
        &[("CCTNS_DB_PASSWORD", "unused")],
    );

    assert_eq!(code, 0, "stderr: {stderr}");
    assert_eq!(stdout, "id,name\r\n1,Rao\r\n2,Devi\r\n");
}

#[test]
fn test_named_param_from_command_line() {
    let (dir, db) = seeded_database();
    let dsn = dsn(&db);

    let (code, stdout, stderr) = run_query(
        dir.path(),
        &[
            "--dsn",
            &dsn,
            "--format",
            "json",
            "--param",
            "district=Krishna",
            "SELECT name FROM officers WHERE district = :district",
        ],
        &[("CCTNS_DB_USER", "records_ro"), ("CCTNS_DB_PASSWORD", "unused")],
    );

    assert_eq!(code, 0, "stderr: {stderr}");
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["rows"][0]["name"], "Devi");
    assert_eq!(json["row_count"], 1);
}

#[test]
fn test_mutating_statement_exits_nonzero() {
    let (dir, db) = seeded_database();
    let dsn = dsn(&db);

    let (code, stdout, stderr) = run_query(
        dir.path(),
        &["--user", "records_ro", "--dsn", &dsn, "DROP TABLE officers"],
        &[("CCTNS_DB_PASSWORD", "unused")],
    );

    assert_eq!(code, 1);
    assert!(stdout.is_empty());
    assert!(stderr.contains("Policy Rejected"), "stderr: {stderr}");
    assert!(db.exists());
}

#[test]
fn test_unconfigured_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();

    let (code, _stdout, stderr) = run_query(dir.path(), &["SELECT 1"], &[]);

    assert_eq!(code, 1);
    assert!(stderr.contains("Not Configured"), "stderr: {stderr}");
}

#[test]
fn test_config_file_and_output_file() {
    let (dir, db) = seeded_database();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "[database]\nuser = \"records_ro\"\npassword = \"unused\"\ndsn = \"{}\"\n\n[policy]\nstrict = true\n",
            dsn(&db)
        ),
    )
    .unwrap();
    let out_path = dir.path().join("report.txt");

    let (code, stdout, stderr) = run_query(
        dir.path(),
        &[
            "--config",
            config_path.to_str().unwrap(),
            "--output-file",
            out_path.to_str().unwrap(),
            "SELECT name FROM officers ORDER BY id",
        ],
        &[],
    );

    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.is_empty());
    let report = std::fs::read_to_string(&out_path).unwrap();
    assert!(report.contains("Rao"));
    assert!(report.contains("(2 rows,"));
}
