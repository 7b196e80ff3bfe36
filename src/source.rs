//! SQLite row source for sqlite-supasync.

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::schema::{IntrospectedColumn, quote_ident};
use base64::{Engine, engine::general_purpose::STANDARD};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

/// A local, read-only table the sync copies from.
///
/// Rows come out in chunks so the driver never holds the whole table. The
/// cursor only moves forward; reading again means opening a new source.
pub trait RowSource {
    /// Source table name.
    fn table(&self) -> &str;

    /// Ordered column names.
    fn columns(&self) -> Result<Vec<String>>;

    /// Next chunk of at most `limit` rows in source order. Empty when done.
    fn next_rows(&mut self, limit: usize) -> Result<Vec<Record>>;

    /// Total number of rows, for progress reporting.
    fn row_count(&self) -> Result<u64>;
}

/// SQLite-backed [`RowSource`].
pub struct SqliteSource {
    conn: Connection,
    config: SourceConfig,
    columns: Vec<String>,
    last_rowid: Option<i64>,
}

impl SqliteSource {
    /// Open the database read-only and check the table exists.
    #[instrument(skip(config), fields(path = %config.path.display(), table = %config.table))]
    pub fn open(config: SourceConfig) -> Result<Self> {
        info!("Opening SQLite database...");

        let conn = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            Error::source_connection(
                format!("Failed to open {}", config.path.display()),
                e,
            )
        })?;

        // The file is only parsed on first use, so a non-database file
        // surfaces here rather than in open_with_flags.
        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&config.table],
                |row| row.get(0),
            )
            .map_err(|e| {
                Error::source_connection(
                    format!("Failed to read {}", config.path.display()),
                    e,
                )
            })?;

        if exists == 0 {
            return Err(Error::schema(format!(
                "table '{}' does not exist in {}",
                config.table,
                config.path.display()
            )));
        }

        let mut source = Self {
            conn,
            config,
            columns: Vec::new(),
            last_rowid: None,
        };
        source.columns = source.introspect()?.into_iter().map(|c| c.name).collect();

        info!("Opened SQLite table with {} columns", source.columns.len());
        Ok(source)
    }

    /// Column details from `PRAGMA table_info`.
    pub fn introspect(&self) -> Result<Vec<IntrospectedColumn>> {
        let table = &self.config.table;
        let query = format!("PRAGMA table_info({})", quote_ident(table));

        let mut stmt = self
            .conn
            .prepare(&query)
            .map_err(|e| Error::source_query(table, "Introspection failed", e))?;

        let columns = stmt
            .query_map([], |row| {
                Ok(IntrospectedColumn {
                    name: row.get(1)?,
                    decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    nullable: row.get::<_, i64>(3)? == 0,
                    default: row.get(4)?,
                    is_primary_key: row.get::<_, i64>(5)? > 0,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::source_query(table, "Introspection failed", e))?;

        Ok(columns)
    }

    /// The table's CREATE statement as stored in `sqlite_master`.
    pub fn create_statement(&self) -> Result<Option<String>> {
        let table = &self.config.table;
        self.conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()
            .map(Option::flatten)
            .map_err(|e| Error::source_query(table, "Reading table definition failed", e))
    }

    /// Test connectivity.
    pub fn ping(&self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::source_query(&self.config.table, "Ping failed", e))?;
        Ok(())
    }
}

impl RowSource for SqliteSource {
    fn table(&self) -> &str {
        &self.config.table
    }

    fn columns(&self) -> Result<Vec<String>> {
        Ok(self.columns.clone())
    }

    // Keyset pagination on rowid: every chunk is one short query, and
    // source order is rowid order. WITHOUT ROWID tables are not supported.
    fn next_rows(&mut self, limit: usize) -> Result<Vec<Record>> {
        let table = &self.config.table;
        let query = format!(
            "SELECT rowid, * FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            quote_ident(table)
        );

        let mut stmt = self
            .conn
            .prepare_cached(&query)
            .map_err(|e| Error::source_query(table, "Prepare fetch failed", e))?;

        let after = self.last_rowid.unwrap_or(i64::MIN);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt
            .query(params![after, limit])
            .map_err(|e| Error::source_query(table, "Fetch failed", e))?;

        let mut records = Vec::new();
        let mut last_rowid = self.last_rowid;

        while let Some(row) = rows
            .next()
            .map_err(|e| Error::source_query(table, "Fetch failed", e))?
        {
            let rowid: i64 = row
                .get(0)
                .map_err(|e| Error::source_query(table, "Reading rowid failed", e))?;

            let mut record = Record::new();
            for (i, name) in self.columns.iter().enumerate() {
                let value = row
                    .get_ref(i + 1)
                    .map_err(|e| Error::source_query(table, "Reading column failed", e))?;
                record.insert(name.clone(), sqlite_to_json(value));
            }

            records.push(record);
            last_rowid = Some(rowid);
        }

        drop(rows);
        drop(stmt);
        self.last_rowid = last_rowid;

        debug!("Fetched {} rows from {}", records.len(), self.config.table);
        Ok(records)
    }

    fn row_count(&self) -> Result<u64> {
        let table = &self.config.table;
        let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table));

        let count: i64 = self
            .conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| Error::source_query(table, "Count failed", e))?;

        Ok(count.max(0) as u64)
    }
}

/// Convert a SQLite value to JSON.
fn sqlite_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(STANDARD.encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn reviews_db(rows: &[(i64, &str, f64, &str, &str)]) -> (TempDir, SourceConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movies.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"CREATE TABLE REVIEWS (
                ID INTEGER PRIMARY KEY,
                REVIEW TEXT,
                RATING REAL,
                AUTHOR VARCHAR(255),
                TITLE TEXT
            );"#,
        )
        .unwrap();
        for (id, review, rating, author, title) in rows {
            conn.execute(
                "INSERT INTO REVIEWS (ID, REVIEW, RATING, AUTHOR, TITLE) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, review, rating, author, title],
            )
            .unwrap();
        }

        let config = SourceConfig {
            path,
            table: "REVIEWS".into(),
        };
        (dir, config)
    }

    #[test]
    fn test_columns_in_table_order() {
        let (_dir, config) = reviews_db(&[]);
        let source = SqliteSource::open(config).unwrap();
        assert_eq!(
            source.columns().unwrap(),
            vec!["ID", "REVIEW", "RATING", "AUTHOR", "TITLE"]
        );
    }

    #[test]
    fn test_streams_in_chunks() {
        let rows: Vec<(i64, &str, f64, &str, &str)> = (1..=5)
            .map(|i| (i, "fine", 7.5, "critic", "Film"))
            .collect();
        let (_dir, config) = reviews_db(&rows);
        let mut source = SqliteSource::open(config).unwrap();

        assert_eq!(source.row_count().unwrap(), 5);

        let mut seen = Vec::new();
        loop {
            let chunk = source.next_rows(2).unwrap();
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= 2);
            seen.extend(chunk.iter().map(|r| r.key("ID").unwrap().to_string()));
        }
        assert_eq!(seen, vec!["1", "2", "3", "4", "5"]);

        // Exhausted stays exhausted.
        assert!(source.next_rows(2).unwrap().is_empty());
    }

    #[test]
    fn test_record_values() {
        let (_dir, config) = reviews_db(&[(10, "It's great", 8.5, "o'brien", "Heat")]);
        let mut source = SqliteSource::open(config).unwrap();
        let records = source.next_rows(100).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.get("ID"), Some(&json!(10)));
        assert_eq!(record.get("REVIEW"), Some(&json!("It's great")));
        assert_eq!(record.get("RATING"), Some(&json!(8.5)));
        assert_eq!(record.get("AUTHOR"), Some(&json!("o'brien")));
        assert_eq!(record.columns().next(), Some("ID"));
    }

    #[test]
    fn test_null_and_blob_values() {
        assert_eq!(sqlite_to_json(ValueRef::Null), JsonValue::Null);
        assert_eq!(sqlite_to_json(ValueRef::Blob(b"hi")), json!("aGk="));
        assert_eq!(sqlite_to_json(ValueRef::Real(f64::NAN)), JsonValue::Null);
    }

    #[test]
    fn test_missing_table_is_schema_error() {
        let (_dir, mut config) = reviews_db(&[]);
        config.table = "MOVIES".into();
        let err = SqliteSource::open(config).err().unwrap();
        assert_eq!(err.code(), "SCHEMA_ERROR");
        assert!(err.to_string().contains("MOVIES"));
    }

    #[test]
    fn test_missing_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SourceConfig {
            path: dir.path().join("absent.db"),
            table: "REVIEWS".into(),
        };
        let err = SqliteSource::open(config).err().unwrap();
        assert_eq!(err.code(), "SQLITE_CONNECTION_ERROR");
    }

    #[test]
    fn test_create_statement_and_introspection() {
        let (_dir, config) = reviews_db(&[]);
        let source = SqliteSource::open(config).unwrap();

        let ddl = source.create_statement().unwrap().unwrap();
        assert!(ddl.contains("CREATE TABLE REVIEWS"));

        let columns = source.introspect().unwrap();
        assert!(columns[0].is_primary_key);
        assert_eq!(columns[3].decl_type, "VARCHAR(255)");
        source.ping().unwrap();
    }
}
