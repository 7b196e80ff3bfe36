//! Command-line tests for the `sqlite-supasync` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sqlite-supasync").unwrap();
    cmd.current_dir(dir)
        .env_remove("SUPABASE_URL")
        .env_remove("SUPABASE_KEY")
        .env_remove("SQLITE_PATH")
        .env_remove("SYNC_TABLE")
        .env_remove("SYNC_BATCH_SIZE")
        .env_remove("LOG_LEVEL")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn reviews_db(dir: &Path) {
    let conn = Connection::open(dir.join("IMDB_Movies_2021.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE REVIEWS (ID INTEGER PRIMARY KEY, REVIEW TEXT, RATING REAL, AUTHOR VARCHAR(255), TITLE TEXT);
         INSERT INTO REVIEWS VALUES (1, 'Great', 9.0, 'ana', 'Heat');",
    )
    .unwrap();
}

#[test]
fn init_writes_sample_config() {
    let dir = tempfile::tempdir().unwrap();

    cmd(dir.path())
        .args(["init", "-o", "custom.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created: custom.toml"));

    let written = std::fs::read_to_string(dir.path().join("custom.toml")).unwrap();
    assert!(written.contains("[supabase]"));
    assert!(written.contains("batch_size = 100"));
}

#[test]
fn sync_without_credentials_fails_before_io() {
    let dir = tempfile::tempdir().unwrap();

    cmd(dir.path())
        .arg("sync")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("SUPABASE_URL not set"));
}

#[test]
fn schema_prints_both_definitions() {
    let dir = tempfile::tempdir().unwrap();
    reviews_db(dir.path());

    cmd(dir.path())
        .env("SUPABASE_URL", "http://127.0.0.1:1")
        .env("SUPABASE_KEY", "test-key")
        .args(["schema", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CREATE TABLE REVIEWS"))
        .stdout(predicate::str::contains("\"ID\" SERIAL PRIMARY KEY"))
        .stdout(predicate::str::contains("VARCHAR(255)"));
}

#[test]
fn default_config_file_is_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    reviews_db(dir.path());
    std::fs::write(
        dir.path().join("sqlite-supasync.toml"),
        "[supabase]\nurl = \"http://127.0.0.1:1\"\nkey = \"test-key\"\ntable = \"MOVIE_REVIEWS\"\n",
    )
    .unwrap();

    cmd(dir.path())
        .args(["schema", "--json", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("MOVIE_REVIEWS"));
}

#[test]
fn zero_batch_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    reviews_db(dir.path());

    cmd(dir.path())
        .env("SUPABASE_URL", "https://example.supabase.co")
        .env("SUPABASE_KEY", "test-key")
        .args(["sync", "--batch-size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn unreachable_supabase_fails_sync() {
    let dir = tempfile::tempdir().unwrap();
    reviews_db(dir.path());

    cmd(dir.path())
        .env("SUPABASE_URL", "http://127.0.0.1:1")
        .env("SUPABASE_KEY", "test-key")
        .args(["sync", "--quiet"])
        .assert()
        .failure()
        .code(1);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_against_missing_table_prints_creation_hint() {
    let dir = tempfile::tempdir().unwrap();
    reviews_db(dir.path());
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/REVIEWS"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "PGRST205",
            "message": "Could not find the table 'public.REVIEWS' in the schema cache"
        })))
        .mount(&server)
        .await;

    cmd(dir.path())
        .env("SUPABASE_URL", server.uri())
        .env("SUPABASE_KEY", "service-role-key")
        .args(["sync", "--quiet"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("CREATE TABLE IF NOT EXISTS \"REVIEWS\""));

    let posts = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .count();
    assert_eq!(posts, 0);
}
