//! dha-harvester - main entry point

use clap::Parser;
use dha_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use dha_harvester::{Cli, Command, HarvestJob, JobOutcome, VocabularyHarvester};
use std::process;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("dha-harvester")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: ignoring invalid LOG_* setting: {}", e);
            log_config
        }
    };
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: failed to initialise logging: {}", e);
            None
        }
    };

    if let Err(e) = run(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Oaipmh(args) => {
            let config = args.into_config()?;
            info!(
                endpoint = %config.source.endpoint(),
                prefix = config.source.metadata_prefix(),
                set = ?config.source.set(),
                sparql = %config.sparql.endpoint,
                "Starting OAI-PMH harvest"
            );
            let mut job = HarvestJob::from_config(config)?;
            let report = job.run().await?;
            if report.outcome() == JobOutcome::PartialSuccess {
                warn!(
                    records_failed = report.records_failed,
                    batches_skipped = report.sync.batches_skipped,
                    triples_skipped = report.sync.triples_skipped,
                    "Harvest completed with skipped records or batches"
                );
            }
        }
        Command::Vocabulary(args) => {
            let config = args.into_config()?;
            info!(
                namespace = %config.namespace,
                sparql = %config.sparql.endpoint,
                "Starting vocabulary enrichment"
            );
            let harvester = VocabularyHarvester::from_config(config)?;
            let report = harvester.run().await?;
            if report.outcome() == JobOutcome::PartialSuccess {
                warn!(
                    concepts_failed = report.concepts_failed,
                    "Vocabulary enrichment completed with skipped concepts"
                );
            }
        }
    }
    Ok(())
}
