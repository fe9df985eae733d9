// reco_ingestor/src/memory/mod.rs
// In-process document store for rehearsals and tests.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{IngestorError, Result};
use crate::store::{
    BulkWriter, Connect, Document, DocumentCursor, DocumentRef, DocumentStore, Fields, Next,
    validate_collection_path,
};

type Collections = BTreeMap<String, BTreeMap<String, Fields,>,>;

/// One call to [`DocumentStore::documents`] as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct QueryRecord {
    pub collection: String,
    pub limit:      Option<usize,>,
    pub returned:   usize,
}

#[derive(Default,)]
struct State {
    collections:        Collections,
    queries:            Vec<QueryRecord,>,
    flushes:            usize,
    closed:             bool,
    failing_scans:      HashSet<String,>,
    failing_documents:  HashSet<String,>,
    flush_limit:        Option<usize,>,
}

#[derive(Debug, Clone, Default,)]
pub struct MemoryConfig {
    /// JSON file shaped `{collectionPath: {docId: fields}}` loaded at startup.
    pub seed: Option<PathBuf,>,
}

/// Cloning shares the underlying data.
#[derive(Clone, Default,)]
pub struct MemoryStore {
    inner: Arc<Mutex<State,>,>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self,) -> MutexGuard<'_, State,> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner,)
    }

    pub fn seed_json(&self, raw: &str,) -> Result<(),> {
        let seed: BTreeMap<String, BTreeMap<String, Fields,>,> = serde_json::from_str(raw,)
            .map_err(|e| IngestorError::ConfigurationError(format!("Malformed seed: {}", e),),)?;
        for collection in seed.keys() {
            validate_collection_path(collection,)?;
        }
        let mut state = self.state();
        for (collection, docs,) in seed {
            state.collections.entry(collection,).or_default().extend(docs,);
        }
        Ok((),)
    }

    pub fn insert(&self, collection: &str, id: &str, fields: Fields,) {
        self.state()
            .collections
            .entry(collection.to_string(),)
            .or_default()
            .insert(id.to_string(), fields,);
    }

    pub fn document(&self, path: &str,) -> Option<Fields,> {
        let reference = DocumentRef::parse(path,).ok()?;
        self.state()
            .collections
            .get(&reference.collection,)
            .and_then(|docs| docs.get(&reference.id,),)
            .cloned()
    }

    pub fn count(&self, collection: &str,) -> usize {
        self.state().collections.get(collection,).map_or(0, |docs| docs.len(),)
    }

    pub fn queries(&self,) -> Vec<QueryRecord,> {
        self.state().queries.clone()
    }

    pub fn flushes(&self,) -> usize {
        self.state().flushes
    }

    pub fn is_closed(&self,) -> bool {
        self.state().closed
    }

    /// Makes every scan of `collection` fail on its first step.
    pub fn fail_scans_of(&self, collection: &str,) {
        self.state().failing_scans.insert(collection.to_string(),);
    }

    /// Makes every set of the document at `path` fail.
    pub fn fail_writes_to(&self, path: &str,) {
        self.state().failing_documents.insert(path.to_string(),);
    }

    /// Lets the first `n` bulk flushes succeed and fails every later one
    /// without deleting anything.
    pub fn fail_flush_after(&self, n: usize,) {
        self.state().flush_limit = Some(n,);
    }
}

#[async_trait]
impl Connect for MemoryStore {
    type Config = MemoryConfig;

    async fn connect(config: MemoryConfig,) -> Result<Self,> {
        let store = MemoryStore::new();
        if let Some(seed) = &config.seed {
            let raw = tokio::fs::read_to_string(seed,).await.map_err(|e| {
                IngestorError::ConfigurationError(format!(
                    "Failed to read seed file '{}': {}",
                    seed.display(),
                    e
                ),)
            },)?;
            store.seed_json(&raw,)?;
            info!("Seeded in-memory store from {}", seed.display());
        }
        Ok(store,)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn documents(
        &self,
        collection: &str,
        limit: Option<usize,>,
    ) -> Result<Box<dyn DocumentCursor,>,> {
        validate_collection_path(collection,)?;
        let mut state = self.state();
        let failing = state.failing_scans.contains(collection,);
        let docs: Vec<Document,> = state
            .collections
            .get(collection,)
            .map(|docs| {
                docs.iter()
                    .take(limit.unwrap_or(usize::MAX,),)
                    .map(|(id, fields,)| Document {
                        reference: DocumentRef::new(collection, id.clone(),),
                        fields:    fields.clone(),
                    },)
                    .collect()
            },)
            .unwrap_or_default();
        state.queries.push(QueryRecord {
            collection: collection.to_string(),
            limit,
            returned: docs.len(),
        },);
        Ok(Box::new(MemoryCursor {
            docs: docs.into_iter(),
            failing,
        },),)
    }

    fn bulk_writer(&self,) -> Box<dyn BulkWriter,> {
        Box::new(MemoryBulkWriter {
            store:  self.clone(),
            queued: Vec::new(),
            ended:  false,
        },)
    }

    async fn set_document(&self, path: &str, fields: Fields,) -> Result<(),> {
        let reference = DocumentRef::parse(path,)?;
        let mut state = self.state();
        if state.failing_documents.contains(path,) {
            return Err(IngestorError::WriteError(format!("Rejected write to '{}'", path),),);
        }
        state
            .collections
            .entry(reference.collection,)
            .or_default()
            .insert(reference.id, fields,);
        Ok((),)
    }

    async fn close(&self,) -> Result<(),> {
        self.state().closed = true;
        Ok((),)
    }
}

struct MemoryCursor {
    docs:    std::vec::IntoIter<Document,>,
    failing: bool,
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next(&mut self,) -> Next {
        if self.failing {
            return Next::Failed(IngestorError::IterationError(
                "Injected scan failure".to_string(),
            ),);
        }
        match self.docs.next() {
            Some(doc,) => Next::Document(doc,),
            None => Next::Done,
        }
    }
}

struct MemoryBulkWriter {
    store:  MemoryStore,
    queued: Vec<DocumentRef,>,
    ended:  bool,
}

#[async_trait]
impl BulkWriter for MemoryBulkWriter {
    fn delete(&mut self, reference: &DocumentRef,) -> Result<(),> {
        if self.ended {
            return Err(IngestorError::WriteError(
                "Bulk writer has already been ended".to_string(),
            ),);
        }
        self.queued.push(reference.clone(),);
        Ok((),)
    }

    async fn flush(&mut self,) -> Result<(),> {
        let mut state = self.store.state();
        if state.flush_limit.is_some_and(|limit| state.flushes >= limit,) {
            self.queued.clear();
            return Err(IngestorError::WriteError(
                "Injected bulk flush failure".to_string(),
            ),);
        }
        for reference in self.queued.drain(..,) {
            if let Some(docs) = state.collections.get_mut(&reference.collection,) {
                docs.remove(&reference.id,);
            }
        }
        state.collections.retain(|_, docs| !docs.is_empty(),);
        state.flushes += 1;
        debug!("Flushed memory bulk writer");
        Ok((),)
    }

    async fn end(&mut self,) -> Result<(),> {
        if self.ended {
            return Ok((),);
        }
        if !self.queued.is_empty() {
            self.flush().await?;
        }
        self.ended = true;
        Ok((),)
    }
}
