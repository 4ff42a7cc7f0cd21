//! firesync CLI entry point.
//!
//! Composition root. In order:
//!
//! 1. Load `.env` and read configuration from the environment ([`config`]).
//! 2. Install the tracing subscriber ([`telemetry`]).
//! 3. Construct the target sink and open the source.
//! 4. Run one [`job::TransferJob`], asking for confirmation on the terminal
//!    ([`prompt`]).
//! 5. Print the report and exit: `0` clean, `2` when some writes failed,
//!    `1` on a fatal error.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use firebase::{AccessTokens, FirestoreSink, RealtimeSink};
use flatfile::CsvSource;
use job::TransferJob;
use relational::MySqlSource;
use transfer::{DocumentSink, RecordMapper, RowSource, TransferReport};
use warehouse::SnowflakeSource;

mod config;
mod prompt;
mod telemetry;

use config::{Settings, SourceSettings, TargetSettings};
use prompt::PromptGate;

const SHOWN_PLANNED_KEYS: usize = 20;
const EXIT_FATAL: u8 = 1;
const EXIT_FAILED_WRITES: u8 = 2;

/// Copy every row of a MySQL table, CSV file, or Snowflake query into a
/// Firebase collection, keyed by the row's id.
///
/// All settings come from environment variables (a `.env` file in the working
/// directory is loaded first). Before writing, the planned record count is
/// shown and `y` must be typed to proceed; any other answer performs a dry
/// run.
#[derive(Debug, Parser)]
#[command(name = "firesync", version, about, long_about = None)]
struct Cli {}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("firesync: cannot load .env: {e}");
        }
    }
    let _cli = Cli::parse();

    let telemetry = match telemetry::init(
        config::log_format_from_env(),
        config::otlp_endpoint_from_env(),
    ) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("firesync: {e:#}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let code = match run().await {
        Ok(report) => {
            print_report(&report);
            if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILED_WRITES)
            }
        }
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "transfer aborted");
            eprintln!("firesync: {message}");
            ExitCode::from(EXIT_FATAL)
        }
    };

    telemetry.shutdown();
    code
}

async fn run() -> anyhow::Result<TransferReport> {
    let settings = Settings::from_env().context("invalid configuration")?;

    let sink = build_sink(&settings)?;
    let mut source = open_source(settings.source).await?;

    let job = TransferJob::new(
        RecordMapper::new(settings.mapping),
        settings.collection,
        settings.job,
    );
    let report = job
        .run(source.as_mut(), sink.as_ref(), &PromptGate::stdio())
        .await?;
    Ok(report)
}

fn build_sink(settings: &Settings) -> anyhow::Result<Box<dyn DocumentSink>> {
    let client = firebase::http_client(settings.http_timeout)?;
    let tokens = Arc::new(AccessTokens::new(client.clone(), settings.credentials.clone()));
    let sink: Box<dyn DocumentSink> = match &settings.target {
        TargetSettings::Realtime {
            database_url,
            namespace,
        } => Box::new(RealtimeSink::new(
            client,
            database_url,
            namespace.clone(),
            tokens,
        )?),
        TargetSettings::Firestore {
            endpoint,
            project_id,
        } => Box::new(FirestoreSink::new(client, endpoint, project_id, tokens)?),
    };
    Ok(sink)
}

async fn open_source(settings: SourceSettings) -> anyhow::Result<Box<dyn RowSource>> {
    let source: Box<dyn RowSource> = match settings {
        SourceSettings::MySql { database, tunnel } => Box::new(
            MySqlSource::connect(database, tunnel)
                .await
                .context("cannot reach the MySQL source")?,
        ),
        SourceSettings::Csv(config) => Box::new(CsvSource::new(config)),
        SourceSettings::Snowflake(config) => Box::new(SnowflakeSource::new(config)?),
    };
    Ok(source)
}

fn print_report(report: &TransferReport) {
    if let Ok(json) = serde_json::to_string(report) {
        tracing::debug!(report = %json, "transfer report");
    }

    println!();
    println!("{}", report.summary());
    for row in &report.skipped_rows {
        println!("  skipped row {}: {}", row.position, row.reason);
    }
    for failure in &report.failed_writes {
        println!(
            "  failed {} after {} attempt(s): {}",
            failure.key, failure.attempts, failure.message
        );
    }
    if report.is_dry_run() {
        if let Some(existing) = report.existing_count {
            println!("existing: {existing} records in /{}", report.collection);
        }
        print_planned_keys(report);
    }
    if let Some(count) = report.verified_count {
        println!("verified: {count} records now in /{}", report.collection);
    }
}

fn print_planned_keys(report: &TransferReport) {
    let (paths, hidden) = report.planned_paths(SHOWN_PLANNED_KEYS);
    if paths.is_empty() {
        return;
    }
    println!("would write:");
    for path in paths {
        println!("  /{path}");
    }
    if hidden > 0 {
        println!("  ... and {hidden} more");
    }
}
