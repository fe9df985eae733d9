// reco_ingestor/src/operations.rs
// Reader, deleter and writer primitives shared by every use case.

use std::io::Write;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::Recommendations;
use crate::error::{IngestorError, Result};
use crate::store::{DocumentStore, Next};

/// Outcome of [`delete_collection`]. `rounds` counts non-empty rounds only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize,)]
pub struct DeletionSummary {
    pub rounds:  usize,
    pub deleted: usize,
}

/// Scans the whole collection and returns the number of documents seen.
///
/// With `verbose`, each document's fields are written to `out` as pretty JSON.
/// An empty or missing collection counts as zero documents.
pub async fn read_collection(
    store: &dyn DocumentStore,
    collection: &str,
    verbose: bool,
    out: &mut (dyn Write + Send),
) -> Result<usize,> {
    let mut cursor = store.documents(collection, None,).await?;
    let mut count = 0usize;

    loop {
        match cursor.next().await {
            Next::Document(doc,) => {
                if verbose {
                    let pretty = serde_json::to_string_pretty(&doc.fields,).map_err(|e| {
                        IngestorError::Other(format!(
                            "Failed to render document '{}': {}",
                            doc.reference.path(),
                            e
                        ),)
                    },)?;
                    writeln!(out, "{}", pretty)?;
                }
                count += 1;
            },
            Next::Done => break,
            Next::Failed(e,) => return Err(e,),
        }
    }

    writeln!(out, "{}: Document count: {}", collection, count)?;
    debug!("Read {} documents from {}", count, collection);
    Ok(count,)
}

/// Deletes every document in `collection`, `batch_size` documents per round.
///
/// Each round fetches up to `batch_size` documents, queues their deletion on a
/// bulk writer and flushes before the next fetch. A round that fetches nothing
/// ends the writer and the loop. The first error aborts, leaving whatever was
/// already flushed deleted.
pub async fn delete_collection(
    store: &dyn DocumentStore,
    collection: &str,
    batch_size: usize,
    out: &mut (dyn Write + Send),
) -> Result<DeletionSummary,> {
    if batch_size == 0 {
        return Err(IngestorError::ConfigurationError(
            "Delete batch size must be at least 1".to_string(),
        ),);
    }

    let mut writer = store.bulk_writer();
    let mut summary = DeletionSummary::default();

    loop {
        let mut cursor = store.documents(collection, Some(batch_size,),).await?;
        let mut queued = 0usize;

        loop {
            match cursor.next().await {
                Next::Document(doc,) => {
                    writer.delete(&doc.reference,)?;
                    queued += 1;
                },
                Next::Done => break,
                Next::Failed(e,) => return Err(e,),
            }
        }

        if queued == 0 {
            writer.end().await?;
            break;
        }

        writer.flush().await?;
        summary.rounds += 1;
        summary.deleted += queued;
        debug!(
            "Deletion round {} removed {} documents from {}",
            summary.rounds, queued, collection
        );
    }

    writeln!(out, "Deleted collection \"{}\"", collection)?;
    info!(
        "Deleted {} documents from {} in {} rounds",
        summary.deleted, collection, summary.rounds
    );
    Ok(summary,)
}

/// Replaces the document at `document_path` with
/// `{field_key: recommendations.items, "meta": {type, ver}}`.
pub async fn write_recommendations(
    store: &dyn DocumentStore,
    document_path: &str,
    recommendations: &Recommendations,
    field_key: &str,
    out: &mut (dyn Write + Send),
) -> Result<(),> {
    store
        .set_document(document_path, recommendations.to_fields(field_key,),)
        .await?;
    writeln!(out, "Set document \"{}\"", document_path)?;
    info!(
        "Wrote {} recommendations to {}",
        recommendations.items.len(),
        document_path
    );
    Ok((),)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::Meta;
    use crate::memory::MemoryStore;
    use crate::store::Fields;

    const FEED: &str = "users/u1/personalisedShowRecommendations";

    fn seeded(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..n {
            let mut fields = Fields::new();
            fields.insert("showId".into(), json!(format!("s{}", i)));
            store.insert(FEED, &format!("doc{:03}", i), fields);
        }
        store
    }

    fn recs() -> Recommendations {
        Recommendations {
            items: vec!["s1".into(), "s2".into()],
            meta:  Meta { kind: "show".into(), ver: "1".into() },
        }
    }

    #[tokio::test]
    async fn read_counts_without_printing_documents() {
        let store = seeded(3);
        let mut out = Vec::new();
        let count = read_collection(&store, FEED, false, &mut out).await.unwrap();
        assert_eq!(count, 3);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, format!("{}: Document count: 3\n", FEED));
    }

    #[tokio::test]
    async fn verbose_read_prints_each_document() {
        let store = seeded(2);
        let mut out = Vec::new();
        read_collection(&store, FEED, true, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("\"showId\"").count(), 2);
        assert!(text.contains("\"showId\": \"s0\""));
    }

    #[tokio::test]
    async fn reading_an_empty_collection_yields_zero() {
        let store = MemoryStore::new();
        let mut out = Vec::new();
        assert_eq!(read_collection(&store, FEED, true, &mut out).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_stops_on_iteration_error() {
        let store = seeded(2);
        store.fail_scans_of(FEED);
        let mut out = Vec::new();
        let err = read_collection(&store, FEED, false, &mut out).await.unwrap_err();
        assert!(matches!(err, IngestorError::IterationError(_)));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn delete_runs_ceil_rounds_plus_terminating_round() {
        let store = seeded(45);
        let mut out = Vec::new();
        let summary = delete_collection(&store, FEED, 20, &mut out).await.unwrap();

        assert_eq!(summary, DeletionSummary { rounds: 3, deleted: 45 });
        let returned: Vec<usize> = store.queries().iter().map(|q| q.returned).collect();
        assert_eq!(returned, vec![20, 20, 5, 0]);
        assert!(store.queries().iter().all(|q| q.limit == Some(20)));
        assert_eq!(store.flushes(), 3);
        assert_eq!(store.count(FEED), 0);
        assert!(String::from_utf8(out).unwrap().contains("Deleted collection"));
    }

    #[tokio::test]
    async fn deleting_an_empty_collection_is_one_empty_round() {
        let store = MemoryStore::new();
        let mut out = Vec::new();
        let summary = delete_collection(&store, FEED, 20, &mut out).await.unwrap();
        assert_eq!(summary, DeletionSummary::default());
        assert_eq!(store.queries().len(), 1);
        assert_eq!(store.flushes(), 0);
    }

    #[tokio::test]
    async fn delete_of_exact_multiple_still_needs_empty_round() {
        let store = seeded(40);
        let mut out = Vec::new();
        let summary = delete_collection(&store, FEED, 20, &mut out).await.unwrap();
        assert_eq!(summary.rounds, 2);
        assert_eq!(store.queries().len(), 3);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let store = seeded(1);
        let mut out = Vec::new();
        let err = delete_collection(&store, FEED, 0, &mut out).await.unwrap_err();
        assert!(matches!(err, IngestorError::ConfigurationError(_)));
        assert_eq!(store.count(FEED), 1);
    }

    #[tokio::test]
    async fn delete_aborts_on_iteration_error() {
        let store = seeded(5);
        store.fail_scans_of(FEED);
        let mut out = Vec::new();
        assert!(delete_collection(&store, FEED, 2, &mut out).await.is_err());
        assert_eq!(store.count(FEED), 5);
    }

    #[tokio::test]
    async fn delete_stops_at_first_failed_flush() {
        let store = seeded(45);
        store.fail_flush_after(1);
        let mut out = Vec::new();

        let err = delete_collection(&store, FEED, 20, &mut out).await.unwrap_err();

        assert!(matches!(err, IngestorError::WriteError(_)));
        // Only the first round's deletes were applied.
        assert_eq!(store.count(FEED), 25);
        // No scan follows the failed flush.
        assert_eq!(store.queries().len(), 2);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn write_replaces_whole_document_and_is_idempotent() {
        let store = MemoryStore::new();
        let path = "personalisedShowRecommendations/u1/personalisedShows/recommendations";
        let mut stale = Fields::new();
        stale.insert("legacy".into(), json!(true));
        store.insert("personalisedShowRecommendations/u1/personalisedShows", "recommendations", stale);

        let mut out = Vec::new();
        write_recommendations(&store, path, &recs(), "recommendations", &mut out).await.unwrap();
        let once = store.document(path).unwrap();
        write_recommendations(&store, path, &recs(), "recommendations", &mut out).await.unwrap();
        let twice = store.document(path).unwrap();

        assert_eq!(once, twice);
        assert!(!once.contains_key("legacy"));
        assert_eq!(
            serde_json::Value::Object(once),
            json!({"recommendations": ["s1", "s2"], "meta": {"type": "show", "ver": "1"}})
        );
        assert_eq!(
            String::from_utf8(out).unwrap().lines().next().unwrap(),
            format!("Set document \"{}\"", path)
        );
    }
}
