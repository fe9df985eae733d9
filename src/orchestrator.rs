// reco_ingestor/src/orchestrator.rs
// Per-user loop driving the read, reset and write use cases.

use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::domain::{Entity, UseCase};
use crate::error::{IngestorError, Result};
use crate::operations::{delete_collection, read_collection, write_recommendations};
use crate::store::DocumentStore;

#[derive(Debug, Clone,)]
pub struct RunOptions {
    pub use_case:     UseCase,
    pub entity:       Entity,
    pub verbose:      bool,
    pub batch_size:   usize,
    /// Wait between the write and the verification read. A heuristic for
    /// write propagation, not a consistency guarantee.
    pub settle_delay: Duration,
}

impl RunOptions {
    pub fn new(use_case: UseCase, entity: Entity,) -> Self {
        Self {
            use_case,
            entity,
            verbose: false,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            settle_delay: Duration::from_secs(crate::DEFAULT_SETTLE_DELAY_SECS,),
        }
    }
}

/// Raw run inputs, as they come from the command line.
#[derive(Debug, Clone,)]
pub struct RunRequest<'a,> {
    pub usecase:      &'a str,
    pub entity:       &'a str,
    pub config_path:  &'a Path,
    pub verbose:      bool,
    pub batch_size:   usize,
    pub settle_delay: Duration,
}

/// Parses the use case and entity, then loads the config file. Nothing here
/// touches a database.
pub fn prepare_run(request: &RunRequest<'_,>,) -> Result<(Config, RunOptions,),> {
    let use_case: UseCase = request.usecase.parse()?;
    let entity: Entity = request.entity.parse()?;
    let config = Config::from_file(request.config_path,)?;

    let options = RunOptions {
        use_case,
        entity,
        verbose: request.verbose,
        batch_size: request.batch_size,
        settle_delay: request.settle_delay,
    };
    Ok((config, options,),)
}

/// Validates `request`, opens the store, runs every user and closes the store
/// again whatever the outcome.
///
/// The outer error covers invalid inputs and connection failures, where no user
/// was processed; `connect` is not awaited when the inputs are invalid. The
/// inner result is the run itself.
pub async fn execute<S: DocumentStore,>(
    request: &RunRequest<'_,>,
    connect: impl Future<Output = Result<S,>,>,
    out: &mut (dyn Write + Send),
) -> Result<std::result::Result<RunReport, RunFailure,>,> {
    let (config, options,) = prepare_run(request,)?;

    let store = connect.await?;
    let outcome = Orchestrator::new(&store, options,).run(&config, out,).await;

    if let Err(e,) = store.close().await {
        warn!("Failed to close store: {}", e);
    }
    Ok(outcome,)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize,)]
pub struct UserOutcome {
    pub user_id:      String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_before: Option<usize,>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_after:  Option<usize,>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted:      Option<usize,>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written:      Option<String,>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct UserFailure {
    pub user_id: String,
    pub error:   String,
}

/// What a run did, user by user, up to the point it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct RunReport {
    pub use_case:    UseCase,
    pub entity:      String,
    pub total_users: usize,
    pub completed:   Vec<UserOutcome,>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure:     Option<UserFailure,>,
}

/// A run that stopped at its first error. Users before the failing one have
/// already been processed.
#[derive(Debug, Error,)]
#[error("Run aborted at user '{user_id}': {error}")]
pub struct RunFailure {
    pub user_id: String,
    pub report:  RunReport,
    #[source]
    pub error:   IngestorError,
}

pub struct Orchestrator<'a,> {
    store:   &'a dyn DocumentStore,
    options: RunOptions,
}

impl<'a,> Orchestrator<'a,> {
    pub fn new(store: &'a dyn DocumentStore, options: RunOptions,) -> Self {
        Self { store, options, }
    }

    /// Processes every configured user in order. The first error ends the run.
    pub async fn run(
        &self,
        config: &Config,
        out: &mut (dyn Write + Send),
    ) -> std::result::Result<RunReport, RunFailure,> {
        let mut report = RunReport {
            use_case:    self.options.use_case,
            entity:      self.options.entity.to_string(),
            total_users: config.user_ids.len(),
            completed:   Vec::with_capacity(config.user_ids.len(),),
            failure:     None,
        };

        info!(
            "Starting {} run for {} users ({})",
            self.options.use_case,
            config.user_ids.len(),
            self.options.entity
        );

        for user_id in &config.user_ids {
            match self.process_user(user_id, config, out,).await {
                Ok(outcome,) => report.completed.push(outcome,),
                Err(e,) => {
                    error!("Processing user {} failed: {}", user_id, e);
                    report.failure = Some(UserFailure {
                        user_id: user_id.clone(),
                        error:   e.to_string(),
                    },);
                    return Err(RunFailure {
                        user_id: user_id.clone(),
                        report,
                        error: e,
                    },);
                },
            }
        }

        info!("Finished run: {} users processed", report.completed.len());
        Ok(report,)
    }

    async fn process_user(
        &self,
        user_id: &str,
        config: &Config,
        out: &mut (dyn Write + Send),
    ) -> Result<UserOutcome,> {
        let paths = self.options.entity.paths(user_id,);
        let verbose = self.options.verbose;
        let mut outcome = UserOutcome {
            user_id: user_id.to_string(),
            ..UserOutcome::default()
        };

        match self.options.use_case {
            UseCase::Reset => {
                write!(out, "Resetting user <{}> recommendations collection...", user_id)?;
                let summary = delete_collection(
                    self.store,
                    &paths.feed_collection,
                    self.options.batch_size,
                    out,
                )
                .await?;
                outcome.deleted = Some(summary.deleted,);
            },
            UseCase::ReadOnly => {
                write!(out, "Reading user <{}> recommendations collection...", user_id)?;
                outcome.count_before =
                    Some(read_collection(self.store, &paths.feed_collection, verbose, out,).await?,);
            },
            UseCase::ReadWrite => {
                writeln!(out, "Ingesting user <{}> recommendation ids...", user_id)?;
                outcome.count_before =
                    Some(read_collection(self.store, &paths.feed_collection, verbose, out,).await?,);

                write_recommendations(
                    self.store,
                    &paths.recommendations_document,
                    &config.recommendations(),
                    paths.field_key,
                    out,
                )
                .await?;
                outcome.written = Some(paths.recommendations_document.clone(),);

                if !self.options.settle_delay.is_zero() {
                    info!(
                        "Waiting {:?} for writes to propagate",
                        self.options.settle_delay
                    );
                    tokio::time::sleep(self.options.settle_delay,).await;
                }

                writeln!(out, "After Ingestion")?;
                outcome.count_after =
                    Some(read_collection(self.store, &paths.feed_collection, verbose, out,).await?,);
            },
        }

        Ok(outcome,)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::domain::Meta;
    use crate::memory::MemoryStore;
    use crate::store::Fields;

    fn config(users: &[&str]) -> Config {
        Config {
            user_ids:        users.iter().map(|u| u.to_string()).collect(),
            recommendations: vec!["s1".into(), "s2".into()],
            meta:            Meta { kind: "show".into(), ver: "1".into() },
        }
    }

    fn options(use_case: UseCase) -> RunOptions {
        RunOptions {
            settle_delay: Duration::ZERO,
            ..RunOptions::new(use_case, Entity::Shows)
        }
    }

    #[tokio::test]
    async fn read_only_never_mutates() {
        let store = MemoryStore::new();
        store.insert("users/u1/personalisedShowRecommendations", "a", Fields::new());
        let mut out = Vec::new();
        let report = Orchestrator::new(&store, options(UseCase::ReadOnly))
            .run(&config(&["u1"]), &mut out)
            .await
            .unwrap();
        assert_eq!(report.completed[0].count_before, Some(1));
        assert_eq!(store.flushes(), 0);
        assert!(store.document("personalisedShowRecommendations/u1/personalisedShows/recommendations").is_none());
    }

    #[tokio::test]
    async fn read_write_reads_writes_then_reads_again() {
        let store = MemoryStore::new();
        let mut out = Vec::new();
        let report = Orchestrator::new(&store, options(UseCase::ReadWrite))
            .run(&config(&["u1"]), &mut out)
            .await
            .unwrap();

        let outcome = &report.completed[0];
        assert_eq!(outcome.count_before, Some(0));
        assert_eq!(outcome.count_after, Some(0));
        let doc = store
            .document("personalisedShowRecommendations/u1/personalisedShows/recommendations")
            .unwrap();
        assert_eq!(doc["recommendations"], json!(["s1", "s2"]));

        let feed_scans = store
            .queries()
            .iter()
            .filter(|q| q.collection == "users/u1/personalisedShowRecommendations")
            .count();
        assert_eq!(feed_scans, 2);
    }

    #[tokio::test]
    async fn first_failure_stops_remaining_users() {
        let store = MemoryStore::new();
        store.fail_scans_of("users/u2/personalisedShowRecommendations");
        let mut out = Vec::new();
        let failure = Orchestrator::new(&store, options(UseCase::ReadOnly))
            .run(&config(&["u1", "u2", "u3"]), &mut out)
            .await
            .unwrap_err();

        assert_eq!(failure.user_id, "u2");
        assert_eq!(failure.report.completed.len(), 1);
        assert_eq!(failure.report.failure.as_ref().unwrap().user_id, "u2");
        assert!(
            !store
                .queries()
                .iter()
                .any(|q| q.collection.contains("u3"))
        );
    }

    #[tokio::test]
    async fn write_failure_skips_verification_read() {
        let store = MemoryStore::new();
        store.fail_writes_to("personalisedShowRecommendations/u1/personalisedShows/recommendations");
        let mut out = Vec::new();
        let failure = Orchestrator::new(&store, options(UseCase::ReadWrite))
            .run(&config(&["u1"]), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, IngestorError::WriteError(_)));
        assert_eq!(store.queries().len(), 1);
    }

    fn config_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            json!({"userIds": ["u1"], "recommendations": ["s1"], "meta": {"type": "show", "ver": "1"}})
        )
        .unwrap();
        file
    }

    fn request<'a>(usecase: &'a str, entity: &'a str, config_path: &'a Path) -> RunRequest<'a> {
        RunRequest {
            usecase,
            entity,
            config_path,
            verbose: false,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            settle_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn unknown_entity_is_rejected_before_connecting() {
        let file = config_file();
        let store = MemoryStore::new();
        let connect = {
            let store = store.clone();
            async move { Ok::<_, IngestorError>(store) }
        };

        let mut out = Vec::new();
        let err = execute(&request("READ_WRITE", "movies", file.path()), connect, &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestorError::UnknownEntity(_)));
        assert!(store.queries().is_empty());
        assert!(!store.is_closed());
        assert!(out.is_empty());
    }

    #[test]
    fn unknown_use_case_is_rejected_before_loading_config() {
        let missing = Path::new("does-not-exist.json");
        let err = prepare_run(&request("UPSERT", "shows", missing)).unwrap_err();
        assert!(matches!(err, IngestorError::UnknownUseCase(_)));
    }

    #[tokio::test]
    async fn execute_runs_every_user_and_closes_the_store() {
        let file = config_file();
        let store = MemoryStore::new();
        store.insert("users/u1/personalisedShowRecommendations", "a", Fields::new());
        let connect = {
            let store = store.clone();
            async move { Ok::<_, IngestorError>(store) }
        };

        let mut out = Vec::new();
        let report = execute(&request("READ", "shows", file.path()), connect, &mut out)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.completed[0].count_before, Some(1));
        assert!(store.is_closed());
    }
}
