// reco_ingestor/src/main.rs
// Entry point for the reco-ingestor CLI application.

use std::future::Future;
use std::time::Duration;

use clap::Parser;
use reco_ingestor::cli::{Cli, Commands, RunArgs};
use reco_ingestor::error::{IngestorError, Result};
use reco_ingestor::firestore::{FirestoreConfig, FirestoreStore};
use reco_ingestor::memory::{MemoryConfig, MemoryStore};
use reco_ingestor::mongo::{MongoConfig, MongoStore};
use reco_ingestor::orchestrator::{RunReport, RunRequest, execute};
use reco_ingestor::store::Connect;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const REPORT_PATH: &str = "ingestion_report.json";

#[tokio::main]
async fn main() {
    let file_appender = tracing_appender::rolling::never(".", "reco-ingestor.log",);
    let (non_blocking, guard,) = tracing_appender::non_blocking(file_appender,);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info",),),)
        .with(fmt::layer().with_writer(std::io::stderr,),)
        .with(fmt::layer().with_writer(non_blocking,).with_ansi(false,),)
        .init();

    let cli = Cli::parse();

    let res = match cli.command {
        Commands::Firestore(args,) => {
            let config = FirestoreConfig {
                project_id:    args.project_id,
                database_id:   args.database_id,
                emulator_host: args.emulator_host,
                access_token:  args.access_token,
            };
            handle_run(&args.run, FirestoreStore::connect(config,), cli.report,).await
        },
        Commands::Mongo(args,) => {
            let config = MongoConfig {
                uri:      args.uri,
                database: args.database,
            };
            handle_run(&args.run, MongoStore::connect(config,), cli.report,).await
        },
        Commands::Memory(args,) => {
            let config = MemoryConfig { seed: args.seed, };
            handle_run(&args.run, MemoryStore::connect(config,), cli.report,).await
        },
    };

    if let Err(e,) = res {
        error!("{}", e);
        drop(guard,);
        std::process::exit(1,);
    }
}

/// Runs one subcommand and writes the report when asked, also for a failed run.
async fn handle_run<S: Connect,>(
    args: &RunArgs,
    connect: impl Future<Output = Result<S,>,>,
    write_report: bool,
) -> Result<(),> {
    let request = RunRequest {
        usecase:      &args.usecase,
        entity:       &args.entity,
        config_path:  &args.config,
        verbose:      args.verbose,
        batch_size:   args.batch_size,
        settle_delay: Duration::from_secs(args.settle_delay_secs,),
    };

    let mut stdout = std::io::stdout();
    let (report, res,) = match execute(&request, connect, &mut stdout,).await? {
        Ok(report,) => (report, Ok((),),),
        Err(failure,) => (failure.report, Err(failure.error,),),
    };

    if write_report {
        if let Err(e,) = save_report(&report,) {
            error!("{}", e);
            res?;
            return Err(e,);
        }
    }
    res
}

fn save_report(report: &RunReport,) -> Result<(),> {
    let json = serde_json::to_string_pretty(report,)
        .map_err(|e| IngestorError::Other(format!("Failed to serialize run report: {}", e),),)?;
    std::fs::write(REPORT_PATH, json,)
        .map_err(|e| IngestorError::Other(format!("Failed to write {}: {}", REPORT_PATH, e),),)?;
    info!("Run report saved to {}", REPORT_PATH);
    Ok((),)
}
