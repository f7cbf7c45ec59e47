//! Operator entry point for the atgraph identity pipeline

use anyhow::Result;
use atgraph_resolver::{
    CallLimiter, HandleVerifier, HickoryDns, HttpWellKnown, PlcDirectory, VerifierConfig,
};
use atgraph_storage::{SledStore, Store};
use atgraph_sync::{BatchConfig, BatchResolver, DirectoryWalker};
use atgraph_types::{Did, SyncStage};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

#[derive(Debug, Parser)]
#[command(author, version, about = "Identity directory mirror and handle verifier")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config/atgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Walk the directory export feed from the stored cursor
    Sync,
    /// Re-verify every stored handle binding in checkpointed batches
    ResyncHandles {
        /// Ignore a persisted checkpoint and start from the beginning
        #[arg(long)]
        no_resume: bool,
    },
    /// Report store and checkpoint state
    Progress,
    /// Remove one identity record
    Purge { did: String },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn http_client(cfg: &NodeConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.http_timeout_secs))
        .user_agent(concat!("atgraph/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = NodeConfig::load(&cli.config)?;
    init_tracing(&cfg.log_level);

    let store: Arc<dyn Store> = Arc::new(SledStore::new(&cfg.db_path)?);
    let limiter = Arc::new(CallLimiter::new(cfg.calls_per_second, cfg.call_burst));

    match cli.cmd {
        Command::Sync => {
            let http = http_client(&cfg)?;
            let directory = Arc::new(PlcDirectory::with_http_client(&cfg.directory_host, http)?);
            let walker = DirectoryWalker::new(directory, store.clone(), limiter, cfg.page_size);
            info!(host = %cfg.directory_host, "starting directory sync");
            let report = walker.run().await?;
            println!(
                "synced {} pages ({} records, {} new, {} skipped)",
                report.pages, report.records, report.created, report.skipped
            );
        }
        Command::ResyncHandles { no_resume } => {
            let http = http_client(&cfg)?;
            let directory = Arc::new(PlcDirectory::with_http_client(
                &cfg.directory_host,
                http.clone(),
            )?);
            let verifier = Arc::new(HandleVerifier::new(
                Arc::new(HickoryDns::new()),
                Arc::new(HttpWellKnown::with_http_client(http)),
                directory,
                limiter.clone(),
                VerifierConfig {
                    max_attempts: cfg.max_attempts,
                    well_known_attempts: cfg.well_known_attempts,
                    platform_suffix: cfg.platform_suffix.clone(),
                },
            ));
            let resolver = BatchResolver::new(
                store.clone(),
                verifier,
                limiter,
                BatchConfig {
                    batch_size: cfg.batch_size,
                    lease_ttl: chrono::Duration::seconds(cfg.lease_ttl_secs),
                    ..BatchConfig::default()
                },
            );
            info!(batch_size = cfg.batch_size, resume = !no_resume, "starting handle re-verification");
            let report = resolver.run(!no_resume).await?;
            println!(
                "examined {} bindings: {} valid, {} invalid, {} updated, {} skipped, {} failed",
                report.examined,
                report.valid,
                report.invalid,
                report.updated,
                report.skipped,
                report.failed
            );
        }
        Command::Progress => {
            println!("identities: {}", store.identity_count()?);
            for stage in [SyncStage::DirectorySync, SyncStage::HandleSync] {
                match store.checkpoint(stage)? {
                    Some(cp) => println!(
                        "{stage}: cursor {} (version {}, updated {})",
                        cp.cursor, cp.version, cp.updated_at
                    ),
                    None => println!("{stage}: no checkpoint"),
                }
            }
        }
        Command::Purge { did } => {
            let did = Did::new(did);
            if store.purge_identity(&did)? {
                info!(%did, "identity purged");
                println!("purged {did}");
            } else {
                println!("no record for {did}");
            }
        }
    }

    store.flush()?;
    Ok(())
}
