// ABOUTME: CLI entry point for sfdc-replicator
// ABOUTME: Parses commands, opens connections, and runs the configured sync targets

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sfdc_replicator::config::{Config, TargetConfig, DEFAULT_CONFIG_PATH};
use sfdc_replicator::postgres::{self, PostgresStore};
use sfdc_replicator::remote::SalesforceClient;
use sfdc_replicator::sync::{read_watermark, validate_target, Synchronizer};
use sfdc_replicator::utils::sanitize_url;

#[derive(Parser)]
#[command(name = "sfdc-replicator")]
#[command(about = "Keep PostgreSQL tables in sync with Salesforce objects", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to the TOML file describing the org, the database and the sync targets
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Destination database URL (overrides [postgres].url)
    #[arg(long, env = "TARGET_DATABASE_URL", global = true, hide_env_values = true)]
    target: Option<String>,
    /// Salesforce OAuth access token (overrides [salesforce].access_token)
    #[arg(
        long = "access-token",
        env = "SFDC_ACCESS_TOKEN",
        global = true,
        hide_env_values = true
    )]
    access_token: Option<String>,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(long = "allow-self-signed-certs", global = true, default_value_t = false)]
    allow_self_signed_certs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the configured tables up to date, one after the other
    Sync {
        /// Only sync this table (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,
        /// Pick the strategy for each table and report it without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Print one JSON report per table instead of a summary line
        #[arg(long)]
        json: bool,
    },
    /// Check every field mapping against the live table schema
    Validate {
        /// Only validate this table (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,
    },
    /// Show the local row count and latest modstamp of each table
    Watermark {
        /// Only show this table (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = Config::load(&cli.config)?;

    let target_url = match cli.target.clone().or_else(|| config.postgres.url.clone()) {
        Some(url) => url,
        None => bail!(
            "No destination database given.\n\
             Pass --target, set TARGET_DATABASE_URL, or add [postgres].url to {:?}",
            cli.config
        ),
    };
    tracing::info!("Destination: {}", sanitize_url(&target_url));

    let client = postgres::connect(
        &target_url,
        cli.allow_self_signed_certs || config.postgres.allow_self_signed_certs,
    )
    .await?;
    let mut store = PostgresStore::new(client);

    match cli.command {
        Commands::Sync {
            tables,
            dry_run,
            json,
        } => {
            let access_token = cli
                .access_token
                .clone()
                .or_else(|| config.salesforce.access_token.clone())
                .context(
                    "No Salesforce access token given.\n\
                     Pass --access-token or set SFDC_ACCESS_TOKEN",
                )?;
            let remote = SalesforceClient::new(
                &config.salesforce.instance_url,
                config.salesforce.api_version.as_deref(),
                access_token,
            )?
            .with_bulk_polling(
                config.salesforce.bulk_poll_interval(),
                config.salesforce.bulk_timeout(),
            );

            let targets = config.select_targets(&tables)?;
            run_sync(&remote, &mut store, &targets, dry_run, json).await
        }
        Commands::Validate { tables } => {
            let targets = config.select_targets(&tables)?;
            let mut failed = 0;
            for target in &targets {
                match validate_target(&store, &target.to_sync_target()).await {
                    Ok(layout) => println!(
                        "{}: OK ({} columns mapped from {})",
                        layout.table,
                        layout.columns.len(),
                        layout.object
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("{}: FAILED - {:#}", target.table, anyhow::Error::new(e));
                    }
                }
            }
            finish(failed, targets.len())
        }
        Commands::Watermark { tables } => {
            let targets = config.select_targets(&tables)?;
            let mut failed = 0;
            for target in &targets {
                let result = async {
                    let layout = validate_target(&store, &target.to_sync_target()).await?;
                    read_watermark(&store, &layout).await
                }
                .await;
                match result {
                    Ok(watermark) => println!(
                        "{}: {} rows, max modstamp {}",
                        target.table,
                        watermark.row_count,
                        watermark
                            .soql_literal()
                            .unwrap_or_else(|| "none".to_string())
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("{}: FAILED - {:#}", target.table, anyhow::Error::new(e));
                    }
                }
            }
            finish(failed, targets.len())
        }
    }
}

async fn run_sync(
    remote: &SalesforceClient,
    store: &mut PostgresStore,
    targets: &[&TargetConfig],
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut failed = 0;

    for target in targets {
        let mut synchronizer = Synchronizer::new(remote, &mut *store, target.sync_options(dry_run));
        match synchronizer.run(&target.to_sync_target()).await {
            Ok(report) if json => println!(
                "{}",
                serde_json::to_string(&report).context("Failed to serialize sync report")?
            ),
            Ok(report) => println!(
                "{}: {}{} - {} fetched, {} written in {}ms",
                report.table,
                report.strategy,
                if report.dry_run { " (dry run)" } else { "" },
                report.rows_fetched,
                report.rows_written,
                report.duration_ms
            ),
            Err(e) => {
                failed += 1;
                let partial = e.may_have_partial_writes();
                let e = anyhow::Error::new(e);
                tracing::error!("Sync of {} failed: {:#}", target.table, e);
                if partial {
                    tracing::warn!(
                        "{} may contain rows from the failed run; the next run resumes from its watermark",
                        target.table
                    );
                }
                println!("{}: FAILED - {:#}", target.table, e);
            }
        }
    }

    finish(failed, targets.len())
}

fn finish(failed: usize, total: usize) -> anyhow::Result<()> {
    if failed > 0 {
        bail!("{} of {} targets failed", failed, total);
    }
    Ok(())
}
