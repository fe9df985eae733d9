// reco_ingestor/src/store.rs
// Document-database capability the ingestion operations depend on.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{IngestorError, Result};

/// Field map of a single document.
pub type Fields = Map<String, Value,>;

/// Address of one document: the collection path it lives in plus its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash,)]
pub struct DocumentRef {
    pub collection: String,
    pub id:         String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String,>, id: impl Into<String,>,) -> Self {
        Self {
            collection: collection.into(),
            id:         id.into(),
        }
    }

    /// Splits a slash separated document path into collection path and id.
    ///
    /// A document path alternates collection and document segments, so it must
    /// have an even number of non-empty segments.
    pub fn parse(path: &str,) -> Result<Self,> {
        let segments: Vec<&str,> = path.split('/',).collect();
        if segments.iter().any(|s| s.is_empty(),) {
            return Err(IngestorError::ConfigurationError(format!(
                "Document path '{}' contains an empty segment",
                path
            ),),);
        }
        if segments.len() % 2 != 0 {
            return Err(IngestorError::ConfigurationError(format!(
                "Document path '{}' must have an even number of segments",
                path
            ),),);
        }
        let (collection, id,) = path.rsplit_once('/',).ok_or_else(|| {
            IngestorError::ConfigurationError(format!("Invalid document path '{}'", path),)
        },)?;
        Ok(Self::new(collection, id,),)
    }

    pub fn path(&self,) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

/// Checks that a collection path has an odd number of non-empty segments.
pub fn validate_collection_path(path: &str,) -> Result<(),> {
    let segments: Vec<&str,> = path.split('/',).collect();
    if segments.iter().any(|s| s.is_empty(),) || segments.len() % 2 == 0 {
        return Err(IngestorError::ConfigurationError(format!(
            "Invalid collection path '{}'",
            path
        ),),);
    }
    Ok((),)
}

#[derive(Debug, Clone, PartialEq,)]
pub struct Document {
    pub reference: DocumentRef,
    pub fields:    Fields,
}

/// One step of a document scan.
#[derive(Debug,)]
pub enum Next {
    Document(Document,),
    /// The scan is exhausted. Not an error.
    Done,
    Failed(IngestorError,),
}

#[async_trait]
pub trait DocumentCursor: Send {
    async fn next(&mut self,) -> Next;
}

/// Client side buffer of write operations sent to the store in bulk.
#[async_trait]
pub trait BulkWriter: Send {
    /// Queues a delete. Fails once the writer has been ended.
    fn delete(&mut self, reference: &DocumentRef,) -> Result<(),>;

    /// Sends every queued operation and waits for the store to apply them.
    async fn flush(&mut self,) -> Result<(),>;

    /// Flushes what is left and closes the writer.
    async fn end(&mut self,) -> Result<(),>;
}

/// Connection to a hierarchical document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Opens a scan over `collection`. `limit` bounds the number of documents
    /// returned, `None` scans the whole collection. No ordering is implied.
    async fn documents(
        &self,
        collection: &str,
        limit: Option<usize,>,
    ) -> Result<Box<dyn DocumentCursor,>,>;

    fn bulk_writer(&self,) -> Box<dyn BulkWriter,>;

    /// Replaces the whole document at `path` with `fields`, creating it if needed.
    async fn set_document(&self, path: &str, fields: Fields,) -> Result<(),>;

    /// Releases the connection.
    async fn close(&self,) -> Result<(),>;
}

/// Builds a store from its backend specific configuration.
#[async_trait]
pub trait Connect: DocumentStore + Sized {
    type Config: Send;

    async fn connect(config: Self::Config,) -> Result<Self,>;
}
