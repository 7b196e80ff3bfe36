//! High-level client wiring the SQLite source to the Supabase sink.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::record::ExistingKeySet;
use crate::schema::IntrospectedColumn;
use crate::source::{RowSource, SqliteSource};
use crate::supabase::{RowSink, SupabaseClient};
use crate::sync::{ProgressCallback, SyncDriver, SyncProgress, SyncResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Pending-work summary for the configured table pair.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// Source table name
    pub source_table: String,
    /// Target table name
    pub target_table: String,
    /// Rows in the source table
    pub source_rows: u64,
    /// Keys already present at the sink
    pub target_keys: usize,
    /// Source rows whose key is not yet at the sink
    pub pending: u64,
}

/// Source and target table definitions side by side.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    /// Source table name
    pub source_table: String,
    /// CREATE statement stored in the SQLite database
    pub source_ddl: Option<String>,
    /// Source columns with their PostgreSQL mapping
    pub columns: Vec<ColumnReport>,
    /// Statement that creates the target table
    pub target_ddl: String,
}

/// One source column and the PostgreSQL type it maps to.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnReport {
    /// Column name
    pub name: String,
    /// Declared SQLite type
    pub sqlite_type: String,
    /// Mapped PostgreSQL type
    pub postgres_type: String,
    /// Part of the primary key
    pub primary_key: bool,
}

impl From<&IntrospectedColumn> for ColumnReport {
    fn from(column: &IntrospectedColumn) -> Self {
        Self {
            name: column.name.clone(),
            sqlite_type: column.decl_type.clone(),
            postgres_type: column.to_column().column_type.to_postgres(),
            primary_key: column.is_primary_key,
        }
    }
}

/// Main sync client.
pub struct SyncClient {
    config: SyncConfig,
    source: SqliteSource,
    sink: SupabaseClient,
    metrics: Arc<Metrics>,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl SyncClient {
    /// Open the source database and build the Supabase client.
    #[instrument(skip(config))]
    pub fn new(config: SyncConfig) -> Result<Self> {
        info!("Initializing sync client...");

        let source = SqliteSource::open(config.source.clone())?;
        let sink = SupabaseClient::connect(config.supabase.clone())?;

        Ok(Self {
            config,
            source,
            sink,
            metrics: Arc::new(Metrics::new()),
            progress_callback: None,
        })
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(SyncProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Metrics shared with every sync this client runs.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Test connectivity to both ends.
    pub async fn test_connectivity(&self) -> Result<()> {
        info!("Testing connectivity...");

        self.source.ping()?;
        info!("SQLite: OK ({} rows)", self.source.row_count()?);

        self.sink.ensure_table_exists().await?;
        info!("Supabase: OK");

        Ok(())
    }

    /// Run one sync, consuming the client.
    pub async fn sync(self) -> Result<SyncResult> {
        let Self {
            config,
            source,
            sink,
            metrics,
            progress_callback,
        } = self;

        let mut driver = SyncDriver::new(source, sink, &config).with_metrics(metrics);
        if let Some(callback) = progress_callback {
            driver = driver.with_progress(move |progress| callback(progress));
        }

        driver.run().await
    }

    /// Count source rows still missing at the sink. Reads the whole source.
    #[instrument(skip(self), fields(table = %self.config.source.table))]
    pub async fn status(mut self) -> Result<SyncStatus> {
        let existing: ExistingKeySet = self.sink.existing_keys().await?;
        let source_rows = self.source.row_count()?;
        let primary_key = &self.config.supabase.primary_key;
        let chunk = self.config.sync.batch_size;

        let mut pending = 0u64;
        loop {
            let rows = self.source.next_rows(chunk)?;
            if rows.is_empty() {
                break;
            }
            for record in &rows {
                if !existing.contains(&record.key(primary_key)?) {
                    pending += 1;
                }
            }
        }

        Ok(SyncStatus {
            source_table: self.source.table().to_string(),
            target_table: self.sink.table().to_string(),
            source_rows,
            target_keys: existing.len(),
            pending,
        })
    }

    /// Describe the source table and the target table it maps to.
    pub fn schema(&self) -> Result<SchemaReport> {
        let columns = self.source.introspect()?;

        Ok(SchemaReport {
            source_table: self.source.table().to_string(),
            source_ddl: self.source.create_statement()?,
            columns: columns.iter().map(ColumnReport::from).collect(),
            target_ddl: self.sink.creation_hint(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use rusqlite::{Connection, params};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn movies_db(ids: impl IntoIterator<Item = i64>) -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMDB_Movies_2021.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE REVIEWS (ID INTEGER PRIMARY KEY, REVIEW TEXT, RATING REAL, AUTHOR VARCHAR(255), TITLE TEXT);",
        )
        .unwrap();
        for id in ids {
            conn.execute(
                "INSERT INTO REVIEWS VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, "solid", 7.0, "critic", "Film"],
            )
            .unwrap();
        }
        (dir, path)
    }

    fn config(db: &std::path::Path, server: &MockServer, batch_size: usize) -> SyncConfig {
        SyncConfig::builder()
            .source_path(db)
            .supabase_url(server.uri())
            .supabase_key("service-role-key")
            .batch_size(batch_size)
            .retry(RetryConfig {
                max_retries: 0,
                ..Default::default()
            })
            .build()
            .unwrap()
    }

    async fn mount_table(server: &MockServer, keys: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/REVIEWS"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/REVIEWS"))
            .and(query_param("select", "ID"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(keys))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/REVIEWS"))
            .and(query_param("select", "ID"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_sync_end_to_end() {
        let (_dir, db) = movies_db(1..=5);
        let server = MockServer::start().await;
        mount_table(&server, json!([{"ID": 2}])).await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/REVIEWS"))
            .respond_with(ResponseTemplate::new(201))
            .expect(2)
            .mount(&server)
            .await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let client = SyncClient::new(config(&db, &server, 2))
            .unwrap()
            .with_progress(move |p| recorder.lock().unwrap().push(p.records_inserted));
        let metrics = client.metrics();

        let result = client.sync().await.unwrap();

        assert_eq!(result.records_read, 5);
        assert_eq!(result.records_skipped, 1);
        assert_eq!(result.total_records(), 4);
        assert_eq!(result.batches_flushed, 2);
        assert_eq!(metrics.snapshot().records_inserted, 4);
        assert_eq!(seen.lock().unwrap().last(), Some(&4));

        let requests = server.received_requests().await.unwrap();
        let bodies: Vec<serde_json::Value> = requests
            .iter()
            .filter(|r| r.method.as_str() == "POST")
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        assert_eq!(bodies[0][0]["ID"], json!(1));
        assert_eq!(bodies[0][1]["ID"], json!(3));
        assert_eq!(bodies[1].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_status_counts_pending() {
        let (_dir, db) = movies_db(1..=4);
        let server = MockServer::start().await;
        mount_table(&server, json!([{"ID": 1}, {"ID": 4}, {"ID": 99}])).await;

        let client = SyncClient::new(config(&db, &server, 100)).unwrap();
        let status = client.status().await.unwrap();

        assert_eq!(status.source_rows, 4);
        assert_eq!(status.target_keys, 3);
        assert_eq!(status.pending, 2);
    }

    #[tokio::test]
    async fn test_schema_report() {
        let (_dir, db) = movies_db([]);
        let server = MockServer::start().await;

        let client = SyncClient::new(config(&db, &server, 100)).unwrap();
        let report = client.schema().unwrap();

        assert_eq!(report.source_table, "REVIEWS");
        assert!(report.source_ddl.unwrap().contains("CREATE TABLE REVIEWS"));
        assert_eq!(report.columns.len(), 5);
        assert_eq!(report.columns[3].postgres_type, "VARCHAR(255)");
        assert!(report.columns[0].primary_key);
        assert!(report.target_ddl.contains("\"ID\" SERIAL PRIMARY KEY"));
    }

    #[tokio::test]
    async fn test_connectivity_reports_missing_table() {
        let (_dir, db) = movies_db([]);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SyncClient::new(config(&db, &server, 100)).unwrap();
        let err = client.test_connectivity().await.unwrap_err();
        assert_eq!(err.code(), "TABLE_MISSING");
    }
}
