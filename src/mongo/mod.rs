// reco_ingestor/src/mongo/mod.rs
// MongoDB backed document store.
//
// A collection path is used verbatim as the collection name and the last
// segment of a document path becomes its `_id`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{Bson, Document as BsonDocument, doc};
use mongodb::options::{ClientOptions, FindOptions, ReplaceOptions};
use mongodb::{Client, Cursor, Database};
use tracing::{debug, info};

use crate::error::{IngestorError, Result};
use crate::retry::{execute_with_retry, wrap_error};
use crate::store::{
    BulkWriter, Connect, Document, DocumentCursor, DocumentRef, DocumentStore, Fields, Next,
    validate_collection_path,
};

#[derive(Debug, Clone,)]
pub struct MongoConfig {
    pub uri:      String,
    pub database: Option<String,>,
}

/// Original `_id` values of scanned documents whose id is not a plain string.
///
/// [`DocumentRef`] only carries the string form, so deletes look the typed
/// value up here to build a filter that matches the stored document.
type IdIndex = Arc<Mutex<HashMap<DocumentRef, Bson,>,>,>;

pub struct MongoStore {
    client:   Client,
    database: Database,
    ids:      IdIndex,
}

#[async_trait]
impl Connect for MongoStore {
    type Config = MongoConfig;

    async fn connect(config: MongoConfig,) -> Result<Self,> {
        let client_options = ClientOptions::parse(&config.uri,).await.map_err(|e| {
            IngestorError::ConfigurationError(format!("Failed to parse MongoDB URI: {}", e),)
        },)?;
        let client = Client::with_options(client_options,).map_err(|e| {
            IngestorError::ConnectionError(format!("Failed to create MongoDB client: {}", e),)
        },)?;

        execute_with_retry(|| async {
            client
                .database("admin",)
                .run_command(doc! {"ping": 1}, None,)
                .await
                .map(|_| (),)
                .map_err(|e| {
                    wrap_error(IngestorError::ConnectionError(format!(
                        "Failed to connect to MongoDB: {}",
                        e
                    ),),)
                },)
        },)
        .await?;

        let database_name = config
            .database
            .as_deref()
            .unwrap_or(crate::DEFAULT_MONGO_DATABASE_NAME,);
        info!("Connected to MongoDB database '{}'", database_name);
        let database = client.database(database_name,);

        Ok(MongoStore {
            client,
            database,
            ids: IdIndex::default(),
        },)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn documents(
        &self,
        collection: &str,
        limit: Option<usize,>,
    ) -> Result<Box<dyn DocumentCursor,>,> {
        validate_collection_path(collection,)?;
        let options = limit.map(|n| FindOptions::builder().limit(n as i64,).build(),);
        let cursor = self
            .database
            .collection::<BsonDocument>(collection,)
            .find(None, options,)
            .await
            .map_err(|e| {
                IngestorError::IterationError(format!(
                    "Failed to query MongoDB collection '{}': {}",
                    collection, e
                ),)
            },)?;

        Ok(Box::new(MongoCursor {
            collection: collection.to_string(),
            cursor,
            ids: Arc::clone(&self.ids,),
        },),)
    }

    fn bulk_writer(&self,) -> Box<dyn BulkWriter,> {
        Box::new(MongoBulkWriter {
            database: self.database.clone(),
            ids:      Arc::clone(&self.ids,),
            queued:   BTreeMap::new(),
            ended:    false,
        },)
    }

    async fn set_document(&self, path: &str, fields: Fields,) -> Result<(),> {
        let reference = DocumentRef::parse(path,)?;
        let mut replacement = mongodb::bson::to_document(&fields,).map_err(|e| {
            IngestorError::WriteError(format!("Failed to serialize fields to BSON: {}", e),)
        },)?;
        replacement.insert("_id", reference.id.clone(),);

        let options = ReplaceOptions::builder().upsert(true,).build();
        self.database
            .collection::<BsonDocument>(&reference.collection,)
            .replace_one(doc! {"_id": reference.id.as_str()}, replacement, options,)
            .await
            .map_err(|e| {
                IngestorError::WriteError(format!(
                    "Failed to set MongoDB document '{}': {}",
                    path, e
                ),)
            },)?;
        Ok((),)
    }

    async fn close(&self,) -> Result<(),> {
        self.client.clone().shutdown().await;
        debug!("MongoDB client shut down");
        Ok((),)
    }
}

struct MongoCursor {
    collection: String,
    cursor:     Cursor<BsonDocument,>,
    ids:        IdIndex,
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    async fn next(&mut self,) -> Next {
        match self.cursor.try_next().await {
            Ok(Some(raw,),) => {
                let (document, typed_id,) = to_document(&self.collection, raw,);
                if let Some(id,) = typed_id {
                    self.ids
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner,)
                        .insert(document.reference.clone(), id,);
                }
                Next::Document(document,)
            },
            Ok(None,) => Next::Done,
            Err(e,) => Next::Failed(IngestorError::IterationError(format!(
                "Failed to read from MongoDB collection '{}': {}",
                self.collection, e
            ),),),
        }
    }
}

/// Deletes are grouped per collection and sent as one `delete_many` each.
struct MongoBulkWriter {
    database: Database,
    ids:      IdIndex,
    queued:   BTreeMap<String, Vec<String,>,>,
    ended:    bool,
}

#[async_trait]
impl BulkWriter for MongoBulkWriter {
    fn delete(&mut self, reference: &DocumentRef,) -> Result<(),> {
        if self.ended {
            return Err(IngestorError::WriteError(
                "Bulk writer has already been ended".to_string(),
            ),);
        }
        self.queued
            .entry(reference.collection.clone(),)
            .or_default()
            .push(reference.id.clone(),);
        Ok((),)
    }

    async fn flush(&mut self,) -> Result<(),> {
        let queued = std::mem::take(&mut self.queued,);
        for (collection, ids,) in queued {
            let typed_ids = resolve_ids(&self.ids, &collection, &ids,);
            let filter = doc! {"_id": {"$in": typed_ids}};
            let result = self
                .database
                .collection::<BsonDocument>(&collection,)
                .delete_many(filter, None,)
                .await
                .map_err(|e| {
                    IngestorError::WriteError(format!(
                        "Failed to delete from MongoDB collection '{}': {}",
                        collection, e
                    ),)
                },)?;
            if (result.deleted_count as usize) < ids.len() {
                return Err(IngestorError::WriteError(format!(
                    "Deleted only {} of {} queued documents from MongoDB collection '{}'",
                    result.deleted_count,
                    ids.len(),
                    collection
                ),),);
            }
            debug!("Deleted {} documents from {}", result.deleted_count, collection);
        }
        Ok((),)
    }

    async fn end(&mut self,) -> Result<(),> {
        if self.ended {
            return Ok((),);
        }
        self.flush().await?;
        self.ended = true;
        Ok((),)
    }
}

/// String form of an `_id` as exposed through [`DocumentRef`].
fn id_to_string(id: &Bson,) -> String {
    match id {
        Bson::String(s,) => s.clone(),
        Bson::ObjectId(oid,) => oid.to_hex(),
        other => other.to_string(),
    }
}

/// Typed `_id` values for queued string ids, falling back to the string itself.
/// Resolved entries leave the index.
fn resolve_ids(index: &IdIndex, collection: &str, ids: &[String],) -> Vec<Bson,> {
    let mut index = index.lock().unwrap_or_else(PoisonError::into_inner,);
    ids.iter()
        .map(|id| {
            index
                .remove(&DocumentRef::new(collection, id.clone(),),)
                .unwrap_or_else(|| Bson::String(id.clone(),),)
        },)
        .collect()
}

/// Splits the `_id` off a raw document. The typed id is returned as well
/// unless it is a plain string.
fn to_document(collection: &str, mut raw: BsonDocument,) -> (Document, Option<Bson,>,) {
    let raw_id = raw.remove("_id",);
    let id = raw_id.as_ref().map(id_to_string,).unwrap_or_default();
    let typed_id = raw_id.filter(|id| !matches!(id, Bson::String(_)),);
    let fields = match Bson::Document(raw,).into_relaxed_extjson() {
        serde_json::Value::Object(map,) => map,
        _ => Fields::new(),
    };
    let document = Document {
        reference: DocumentRef::new(collection, id,),
        fields,
    };
    (document, typed_id,)
}
