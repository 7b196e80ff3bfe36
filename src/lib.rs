//! # SQLite SupaSync
//!
//! Copy rows from a local SQLite table into a Supabase table.
//!
//! ## Features
//!
//! - **Deduplicated sync**: Rows whose primary key is already in Supabase are skipped
//! - **Batch inserts**: Rows are sent in batches of a configurable size
//! - **Retry logic**: Bounded retries with exponential backoff for transient failures
//! - **Table check**: A missing target table aborts the run with the `CREATE TABLE` to run
//! - **Progress tracking**: Real-time progress updates via callbacks
//! - **Metrics**: Built-in metrics for observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sqlite_supasync::{SyncClient, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .source_path("IMDB_Movies_2021.db")
//!         .supabase_url("https://your-project.supabase.co")
//!         .supabase_key("your_service_role_key")
//!         .build()?;
//!
//!     let client = SyncClient::new(config)?;
//!     let result = client.sync().await?;
//!
//!     println!("Synced {} records", result.total_records());
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Endpoints
//!
//! The driver only needs a [`RowSource`] and a [`RowSink`]:
//!
//! ```rust,no_run
//! use sqlite_supasync::{SqliteSource, SupabaseClient, SyncConfig, SyncDriver};
//!
//! # async fn run(config: SyncConfig) -> sqlite_supasync::Result<()> {
//! let source = SqliteSource::open(config.source.clone())?;
//! let sink = SupabaseClient::connect(config.supabase.clone())?;
//!
//! let mut driver = SyncDriver::new(source, sink, &config)
//!     .with_progress(|p| println!("{}: {} inserted", p.phase, p.records_inserted));
//! driver.run().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod record;
pub mod retry;
pub mod schema;
pub mod source;
pub mod supabase;
pub mod sync;

// Re-exports for convenience
pub use client::{SchemaReport, SyncClient, SyncStatus};
pub use config::{DedupFailurePolicy, SyncConfig, SyncConfigBuilder};
pub use error::{Error, Result};
pub use crate::metrics::{Metrics, MetricsSnapshot};
pub use record::{Record, RecordKey};
pub use retry::RetryPolicy;
pub use schema::{Column, ColumnType, Table};
pub use source::{RowSource, SqliteSource};
pub use supabase::{InsertMode, RowSink, SupabaseClient};
pub use sync::{SyncDriver, SyncPhase, SyncProgress, SyncResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
