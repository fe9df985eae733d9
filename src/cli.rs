// reco_ingestor/src/cli.rs
// Command Line Interface (CLI) specific logic for reco_ingestor.

use std::path::PathBuf;

use clap::Parser;

/// Ingest, inspect or reset per-user recommendation collections.
#[derive(Parser, Debug,)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// The document database to run against.
    #[clap(subcommand)]
    pub command: Commands,

    /// Write a run summary (ingestion_report.json) at the end, also when the run fails.
    #[clap(long)]
    pub report: bool,
}

#[derive(Parser, Debug,)]
pub enum Commands {
    /// Run against Cloud Firestore (or its emulator)
    Firestore(FirestoreArgs,),
    /// Run against MongoDB
    Mongo(MongoArgs,),
    /// Run against an in-memory store, optionally seeded from a JSON file
    Memory(MemoryArgs,),
}

#[derive(Parser, Debug,)]
pub struct RunArgs {
    /// JSON config file with userIds, recommendations and meta
    #[clap(long)]
    pub config: PathBuf,

    /// Use case: READ_ONLY (READ), READ_WRITE (WRITE) or RESET
    #[clap(long, default_value = "READ_ONLY")]
    pub usecase: String,

    /// Entity whose collections are addressed: shows or episodes
    #[clap(long, default_value = "shows")]
    pub entity: String,

    /// Print every document read
    #[clap(short, long)]
    pub verbose: bool,

    /// Documents fetched per deletion round
    #[clap(long, default_value_t = crate::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Seconds to wait between writing and the verification read
    #[clap(long, default_value_t = crate::DEFAULT_SETTLE_DELAY_SECS)]
    pub settle_delay_secs: u64,
}

#[derive(Parser, Debug,)]
pub struct FirestoreArgs {
    /// Google Cloud project hosting the database
    #[clap(long, env = "GOOGLE_CLOUD_PROJECT")]
    pub project_id:    String,
    /// Firestore database id
    #[clap(long, env = "FIRESTORE_DATABASE_ID")]
    pub database_id:   Option<String,>,
    /// host:port of a Firestore emulator
    #[clap(long, env = "FIRESTORE_EMULATOR_HOST")]
    pub emulator_host: Option<String,>,
    /// OAuth2 access token; the metadata server is used when absent
    #[clap(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token:  Option<String,>,

    #[clap(flatten)]
    pub run: RunArgs,
}

#[derive(Parser, Debug,)]
pub struct MongoArgs {
    /// Connection string for MongoDB
    #[clap(long, env = "MONGO_URI")]
    pub uri:      String,
    /// Database holding the collections
    #[clap(long, env = "MONGO_DATABASE")]
    pub database: Option<String,>,

    #[clap(flatten)]
    pub run: RunArgs,
}

#[derive(Parser, Debug,)]
pub struct MemoryArgs {
    /// JSON file shaped {collectionPath: {docId: fields}} loaded before the run
    #[clap(long)]
    pub seed: Option<PathBuf,>,

    #[clap(flatten)]
    pub run: RunArgs,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_memory_run_with_defaults() {
        let cli = Cli::try_parse_from(["reco-ingestor", "memory", "--config", "c.json"]).unwrap();
        let Commands::Memory(args) = cli.command else {
            panic!("expected memory subcommand");
        };
        assert_eq!(args.run.usecase, "READ_ONLY");
        assert_eq!(args.run.entity, "shows");
        assert_eq!(args.run.batch_size, 20);
        assert_eq!(args.run.settle_delay_secs, 5);
        assert!(!cli.report);
    }

    #[test]
    fn parses_mongo_reset() {
        let cli = Cli::try_parse_from([
            "reco-ingestor",
            "--report",
            "mongo",
            "--uri",
            "mongodb://localhost:27017",
            "--config",
            "c.json",
            "--usecase",
            "RESET",
            "--entity",
            "episodes",
            "--batch-size",
            "50",
        ])
        .unwrap();
        assert!(cli.report);
        let Commands::Mongo(args) = cli.command else {
            panic!("expected mongo subcommand");
        };
        assert_eq!(args.run.usecase, "RESET");
        assert_eq!(args.run.batch_size, 50);
    }
}
