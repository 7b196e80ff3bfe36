//! SQLite SupaSync CLI

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use sqlite_supasync::config::{LogFormat, LoggingConfig, SAMPLE_CONFIG};
use sqlite_supasync::{Error, MetricsSnapshot, SyncClient, SyncConfig, SyncResult};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const DEFAULT_CONFIG_FILES: [&str; 2] = ["sqlite-supasync.toml", ".sqlite-supasync.toml"];

#[derive(Parser)]
#[command(name = "sqlite-supasync")]
#[command(author, version, about = "Copy SQLite table rows into Supabase")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (overrides the config file)
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode
    #[arg(short, long, global = true)]
    quiet: bool,

    /// SQLite database path
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Rows per insert batch
    #[arg(short, long, global = true)]
    batch_size: Option<usize>,

    /// Read and filter rows without inserting
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sync (default)
    Sync,
    /// Test connectivity
    Test,
    /// Show how many source rows are not yet in Supabase
    Status,
    /// Show source and target table definitions
    Schema,
    /// Generate sample config
    Init {
        #[arg(short, long, default_value = "sqlite-supasync.toml")]
        output: String,
    },
}

#[derive(Serialize)]
struct SyncReport<'a> {
    result: &'a SyncResult,
    metrics: MetricsSnapshot,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match &cli.command {
        Some(Commands::Init { output }) => {
            init_logging(&LoggingConfig::default(), &cli);
            run_init(output)
        }
        _ => run(&cli).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {}", e);
            if let Some(hint) = e.downcast_ref::<Error>().and_then(Error::creation_hint) {
                eprintln!(
                    "\nCreate the table in the Supabase SQL editor, then run again:\n\n{}\n",
                    hint
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> CliResult<()> {
    let (config, origin) = match load_config(cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_logging(&LoggingConfig::default(), cli);
            return Err(e);
        }
    };

    init_logging(&config.logging, cli);
    info!("Loaded config from {}", origin);

    match cli.command {
        None | Some(Commands::Sync) => run_sync(config, cli.json, cli.quiet).await,
        Some(Commands::Test) => run_test(config, cli.json).await,
        Some(Commands::Status) => run_status(config, cli.json).await,
        Some(Commands::Schema) => run_schema(config, cli.json),
        Some(Commands::Init { .. }) => unreachable!(), // Handled in main
    }
}

/// Config file from `--config`, else a default file in the working
/// directory, else the environment. Command-line overrides apply last.
fn load_config(cli: &Cli) -> CliResult<(SyncConfig, String)> {
    let (mut config, origin) = if let Some(path) = &cli.config {
        (SyncConfig::from_file(path)?, path.clone())
    } else if let Some(path) = DEFAULT_CONFIG_FILES.iter().find(|f| Path::new(f).exists()) {
        (SyncConfig::from_file(path)?, path.to_string())
    } else {
        (SyncConfig::from_env()?, "environment".to_string())
    };

    if let Some(path) = &cli.source {
        config.source.path = path.clone();
    }
    if let Some(size) = cli.batch_size {
        config.sync.batch_size = size;
    }
    if cli.dry_run {
        config.sync.dry_run = true;
    }

    config.validate()?;
    Ok((config, origin))
}

async fn run_sync(config: SyncConfig, json: bool, quiet: bool) -> CliResult<()> {
    let interactive = !json && !quiet;

    if interactive {
        println!("SQLite SupaSync v{}", sqlite_supasync::VERSION);
        println!(
            "{} ({}) -> {}{}\n",
            config.source.table,
            config.source.path.display(),
            config.supabase.table,
            if config.sync.dry_run { " [dry run]" } else { "" }
        );
    }

    let mut client = SyncClient::new(config)?;
    let bar = interactive.then(progress_bar);
    if let Some(bar) = bar.clone() {
        client = client.with_progress(move |p| {
            if let Some(total) = p.total_records {
                bar.set_length(total);
            }
            bar.set_position(p.records_read as u64);
            bar.set_message(format!("{} inserted", p.records_inserted));
        });
    }

    let metrics = client.metrics();
    let outcome = client.sync().await;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            if interactive {
                println!("{} Sync failed", style("✗").red());
            }
            return Err(e.into());
        }
    };

    if json {
        let report = SyncReport {
            result: &result,
            metrics: metrics.snapshot(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        println!("{} Sync completed", style("✓").green());
        println!("\nDuration: {}ms", result.duration_ms);
        println!("Read: {}", result.records_read);
        println!("Skipped (already present): {}", result.records_skipped);
        if result.dry_run {
            println!("Would insert: {}", result.total_records());
        } else {
            println!("Inserted: {} in {} batches", result.total_records(), result.batches_flushed);
        }
        if result.retries > 0 {
            println!("Retries: {}", result.retries);
        }
        if result.dedup_degraded {
            println!(
                "\n{} Existing keys could not be read; rows already in {} may have been sent again",
                style("!").yellow(),
                result.target_table
            );
        }
    }

    Ok(())
}

async fn run_test(config: SyncConfig, json: bool) -> CliResult<()> {
    if !json {
        println!("Testing connectivity...\n");
    }

    let client = SyncClient::new(config)?;
    client.test_connectivity().await?;

    if json {
        println!(r#"{{"sqlite":"ok","supabase":"ok"}}"#);
    } else {
        println!("\n{} All connectivity tests passed!", style("✓").green());
    }
    Ok(())
}

async fn run_status(config: SyncConfig, json: bool) -> CliResult<()> {
    let client = SyncClient::new(config)?;
    let status = client.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("Sync Status\n");
        println!("  {} (SQLite): {} rows", status.source_table, status.source_rows);
        println!("  {} (Supabase): {} rows", status.target_table, status.target_keys);
        println!("\nPending: {} rows", status.pending);
    }
    Ok(())
}

fn run_schema(config: SyncConfig, json: bool) -> CliResult<()> {
    let client = SyncClient::new(config)?;
    let report = client.schema()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Source: {}\n", report.source_table);
    match &report.source_ddl {
        Some(ddl) => println!("{}\n", ddl),
        None => println!("(no stored definition)\n"),
    }
    for column in &report.columns {
        let key = if column.primary_key { " [pk]" } else { "" };
        println!(
            "  {:<24} {:<16} -> {}{}",
            column.name, column.sqlite_type, column.postgres_type, key
        );
    }
    println!("\nTarget:\n\n{}", report.target_ddl);
    Ok(())
}

fn run_init(output: &str) -> CliResult<()> {
    std::fs::write(output, SAMPLE_CONFIG)?;
    println!("{} Created: {}", style("✓").green(), output);
    println!("\nEdit the file or use environment variables:");
    println!("  SUPABASE_URL, SUPABASE_KEY, SQLITE_PATH, SYNC_TABLE, SYNC_BATCH_SIZE");
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} read, {msg} ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

// Logs go to stderr so stdout only carries results.
fn init_logging(logging: &LoggingConfig, cli: &Cli) {
    if cli.quiet {
        return;
    }
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match (logging.format, logging.timestamps) {
        (LogFormat::Json, true) => builder.json().init(),
        (LogFormat::Json, false) => builder.json().without_time().init(),
        (LogFormat::Text, true) => builder.init(),
        (LogFormat::Text, false) => builder.without_time().init(),
    }
}
