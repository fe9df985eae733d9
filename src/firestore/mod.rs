// reco_ingestor/src/firestore/mod.rs
// Cloud Firestore backed document store, spoken over the REST API.

mod value;

use std::collections::VecDeque;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use url::Url;

use crate::error::{IngestorError, Result};
use crate::retry::{execute_with_retry, wrap_error};
use crate::store::{
    BulkWriter, Connect, Document, DocumentCursor, DocumentRef, DocumentStore, Fields, Next,
    validate_collection_path,
};

use value::{decode_fields, encode_fields};

const FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com/v1/";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
/// Token the emulator accepts for unrestricted access.
const EMULATOR_TOKEN: &str = "owner";
/// Page size used for full collection scans.
const SCAN_PAGE_SIZE: usize = 300;
/// Upper bound of writes accepted by a single batchWrite call.
const MAX_BATCH_WRITES: usize = 500;

#[derive(Debug, Clone,)]
pub struct FirestoreConfig {
    pub project_id:    String,
    pub database_id:   Option<String,>,
    /// `host:port` of a local emulator. Takes precedence over credentials.
    pub emulator_host: Option<String,>,
    pub access_token:  Option<String,>,
}

/// How requests are authorized.
#[derive(Debug, Clone, PartialEq, Eq,)]
enum Credentials {
    Emulator,
    AccessToken(String,),
    MetadataServer,
}

impl Credentials {
    fn resolve(config: &FirestoreConfig,) -> Self {
        if config.emulator_host.is_some() {
            Credentials::Emulator
        } else if let Some(token) = config.access_token.as_ref().filter(|t| !t.is_empty(),) {
            Credentials::AccessToken(token.clone(),)
        } else {
            Credentials::MetadataServer
        }
    }
}

#[derive(Deserialize,)]
struct MetadataToken {
    access_token: String,
}

/// Shared HTTP plumbing, cloned into cursors and bulk writers.
#[derive(Debug, Clone,)]
struct RestClient {
    http:        Client,
    base:        Url,
    project_id:  String,
    database_id: String,
    bearer:      String,
}

impl RestClient {
    /// `projects/{p}/databases/{d}/documents`
    fn database_root(&self,) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }

    fn url(&self, trailing: &[&str],) -> Result<Url,> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                IngestorError::ConfigurationError(format!(
                    "Firestore endpoint '{}' cannot carry a path",
                    self.base
                ),)
            },)?;
            segments.pop_if_empty().extend(trailing,);
        }
        Ok(url,)
    }

    /// URL of a collection or document below the database root.
    fn resource_url(&self, path: &str,) -> Result<Url,> {
        let mut trailing = vec![
            "projects",
            self.project_id.as_str(),
            "databases",
            self.database_id.as_str(),
            "documents",
        ];
        trailing.extend(path.split('/',),);
        self.url(&trailing,)
    }

    fn batch_write_url(&self,) -> Result<Url,> {
        self.url(&[
            "projects",
            self.project_id.as_str(),
            "databases",
            self.database_id.as_str(),
            "documents:batchWrite",
        ],)
    }

    fn authorize(&self, request: RequestBuilder,) -> RequestBuilder {
        request.bearer_auth(&self.bearer,)
    }

    /// Full resource name used by batchWrite, e.g. for deletes.
    fn document_name(&self, reference: &DocumentRef,) -> String {
        format!("{}/{}", self.database_root(), reference.path())
    }
}

/// Turns a non-2xx response into an error message carrying the body.
async fn error_for_status(response: Response,) -> std::result::Result<Response, String,> {
    if response.status().is_success() {
        return Ok(response,);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(format!("{} - {}", status, body),)
}

pub struct FirestoreStore {
    rest: RestClient,
}

impl FirestoreStore {
    async fn fetch_metadata_token(http: &Client,) -> Result<String,> {
        execute_with_retry(|| async {
            let response = http
                .get(METADATA_TOKEN_URL,)
                .header("Metadata-Flavor", "Google",)
                .send()
                .await
                .map_err(|e| {
                    wrap_error(IngestorError::ConnectionError(format!(
                        "Failed to reach metadata server: {}",
                        e
                    ),),)
                },)?;
            let response = error_for_status(response,).await.map_err(|e| {
                wrap_error(IngestorError::ConfigurationError(format!(
                    "Metadata server refused token request: {}",
                    e
                ),),)
            },)?;
            response
                .json::<MetadataToken>()
                .await
                .map(|t| t.access_token,)
                .map_err(|e| {
                    wrap_error(IngestorError::ConfigurationError(format!(
                        "Malformed metadata token response: {}",
                        e
                    ),),)
                },)
        },)
        .await
    }
}

#[async_trait]
impl Connect for FirestoreStore {
    type Config = FirestoreConfig;

    async fn connect(config: FirestoreConfig,) -> Result<Self,> {
        if config.project_id.trim().is_empty() {
            return Err(IngestorError::ConfigurationError(
                "A Firestore project id is required".to_string(),
            ),);
        }

        let base = match &config.emulator_host {
            Some(host,) => format!("http://{}/v1/", host.trim_end_matches('/',)),
            None => FIRESTORE_ENDPOINT.to_string(),
        };
        let base = Url::parse(&base,).map_err(|e| {
            IngestorError::ConfigurationError(format!("Invalid Firestore endpoint '{}': {}", base, e),)
        },)?;

        let http = Client::builder().build().map_err(|e| {
            IngestorError::ConnectionError(format!("Failed to create HTTP client: {}", e),)
        },)?;

        // TODO: refresh metadata server tokens before they expire (about an hour) for long runs.
        let bearer = match Credentials::resolve(&config,) {
            Credentials::Emulator => EMULATOR_TOKEN.to_string(),
            Credentials::AccessToken(token,) => token,
            Credentials::MetadataServer => Self::fetch_metadata_token(&http,).await?,
        };

        let database_id = config
            .database_id
            .clone()
            .unwrap_or_else(|| crate::DEFAULT_FIRESTORE_DATABASE_ID.to_string(),);
        info!(
            "Using Firestore project '{}' database '{}' at {}",
            config.project_id, database_id, base
        );

        Ok(FirestoreStore {
            rest: RestClient {
                http,
                base,
                project_id: config.project_id,
                database_id,
                bearer,
            },
        },)
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn documents(
        &self,
        collection: &str,
        limit: Option<usize,>,
    ) -> Result<Box<dyn DocumentCursor,>,> {
        validate_collection_path(collection,)?;
        let url = self.rest.resource_url(collection,)?;
        Ok(Box::new(FirestoreCursor {
            rest: self.rest.clone(),
            collection: collection.to_string(),
            url,
            remaining: limit,
            buffer: VecDeque::new(),
            page_token: None,
            exhausted: limit == Some(0,),
        },),)
    }

    fn bulk_writer(&self,) -> Box<dyn BulkWriter,> {
        Box::new(FirestoreBulkWriter {
            rest:   self.rest.clone(),
            queued: Vec::new(),
            ended:  false,
        },)
    }

    async fn set_document(&self, path: &str, fields: Fields,) -> Result<(),> {
        DocumentRef::parse(path,)?;
        let url = self.rest.resource_url(path,)?;
        // No update mask: the stored document is replaced as a whole.
        let body = json!({ "fields": encode_fields(&fields) });

        let response = self
            .rest
            .authorize(self.rest.http.patch(url,),)
            .json(&body,)
            .send()
            .await
            .map_err(|e| {
                IngestorError::WriteError(format!("Failed to set document '{}': {}", path, e),)
            },)?;
        error_for_status(response,).await.map_err(|e| {
            IngestorError::WriteError(format!("Failed to set document '{}': {}", path, e),)
        },)?;
        Ok((),)
    }

    async fn close(&self,) -> Result<(),> {
        debug!("Firestore store closed");
        Ok((),)
    }
}

#[derive(Deserialize,)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents:       Vec<RawDocument,>,
    next_page_token: Option<String,>,
}

#[derive(Deserialize,)]
struct RawDocument {
    name:   String,
    #[serde(default)]
    fields: Map<String, Value,>,
}

struct FirestoreCursor {
    rest:       RestClient,
    collection: String,
    url:        Url,
    /// Documents still allowed by the caller's limit.
    remaining:  Option<usize,>,
    buffer:     VecDeque<Document,>,
    page_token: Option<String,>,
    exhausted:  bool,
}

impl FirestoreCursor {
    async fn fetch_page(&mut self,) -> Result<(),> {
        let page_size = self
            .remaining
            .map_or(SCAN_PAGE_SIZE, |r| r.min(SCAN_PAGE_SIZE,),);
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("pageSize", &page_size.to_string(),);
        if let Some(token) = &self.page_token {
            url.query_pairs_mut().append_pair("pageToken", token,);
        }

        let response = self
            .rest
            .authorize(self.rest.http.get(url,),)
            .send()
            .await
            .map_err(|e| self.iteration_error(e.to_string(),),)?;
        let response = error_for_status(response,)
            .await
            .map_err(|e| self.iteration_error(e,),)?;
        let page: ListDocumentsResponse = response
            .json()
            .await
            .map_err(|e| self.iteration_error(e.to_string(),),)?;

        let fetched = page.documents.len();
        for raw in page.documents {
            let id = raw.name.rsplit('/',).next().unwrap_or_default().to_string();
            self.buffer.push_back(Document {
                reference: DocumentRef::new(self.collection.clone(), id,),
                fields:    decode_fields(&raw.fields,)?,
            },);
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(fetched,);
        }
        self.page_token = page.next_page_token.filter(|t| !t.is_empty(),);
        self.exhausted = self.page_token.is_none() || self.remaining == Some(0,);
        Ok((),)
    }

    fn iteration_error(&self, cause: String,) -> IngestorError {
        IngestorError::IterationError(format!(
            "Failed to list Firestore collection '{}': {}",
            self.collection, cause
        ),)
    }
}

#[async_trait]
impl DocumentCursor for FirestoreCursor {
    async fn next(&mut self,) -> Next {
        loop {
            if let Some(doc,) = self.buffer.pop_front() {
                return Next::Document(doc,);
            }
            if self.exhausted {
                return Next::Done;
            }
            if let Err(e,) = self.fetch_page().await {
                self.exhausted = true;
                return Next::Failed(e,);
            }
        }
    }
}

#[derive(Deserialize,)]
struct BatchWriteResponse {
    #[serde(default)]
    status: Vec<WriteStatus,>,
}

#[derive(Deserialize,)]
struct WriteStatus {
    #[serde(default)]
    code:    i32,
    #[serde(default)]
    message: String,
}

struct FirestoreBulkWriter {
    rest:   RestClient,
    queued: Vec<String,>,
    ended:  bool,
}

impl FirestoreBulkWriter {
    async fn send(&self, names: &[String],) -> Result<(),> {
        let writes: Vec<Value,> = names.iter().map(|n| json!({ "delete": n }),).collect();
        let response = self
            .rest
            .authorize(self.rest.http.post(self.rest.batch_write_url()?,),)
            .json(&json!({ "writes": writes }),)
            .send()
            .await
            .map_err(|e| IngestorError::WriteError(format!("Batch write failed: {}", e),),)?;
        let response = error_for_status(response,)
            .await
            .map_err(|e| IngestorError::WriteError(format!("Batch write failed: {}", e),),)?;
        let result: BatchWriteResponse = response.json().await.map_err(|e| {
            IngestorError::WriteError(format!("Malformed batch write response: {}", e),)
        },)?;

        if let Some((name, status,),) = names
            .iter()
            .zip(&result.status,)
            .find(|(_, status,)| status.code != 0,)
        {
            return Err(IngestorError::WriteError(format!(
                "Failed to delete '{}': code {} {}",
                name, status.code, status.message
            ),),);
        }
        Ok((),)
    }
}

#[async_trait]
impl BulkWriter for FirestoreBulkWriter {
    fn delete(&mut self, reference: &DocumentRef,) -> Result<(),> {
        if self.ended {
            return Err(IngestorError::WriteError(
                "Bulk writer has already been ended".to_string(),
            ),);
        }
        self.queued.push(self.rest.document_name(reference,),);
        Ok((),)
    }

    async fn flush(&mut self,) -> Result<(),> {
        let queued = std::mem::take(&mut self.queued,);
        for chunk in queued.chunks(MAX_BATCH_WRITES,) {
            self.send(chunk,).await?;
            debug!("Flushed {} Firestore deletes", chunk.len());
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

#[cfg(test)]
mod tests {
    use super::*;

    fn rest(base: &str) -> RestClient {
        RestClient {
            http:        Client::new(),
            base:        Url::parse(base).unwrap(),
            project_id:  "demo-project".into(),
            database_id: "(default)".into(),
            bearer:      EMULATOR_TOKEN.into(),
        }
    }

    fn config() -> FirestoreConfig {
        FirestoreConfig {
            project_id:    "demo-project".into(),
            database_id:   None,
            emulator_host: None,
            access_token:  None,
        }
    }

    #[test]
    fn collection_url_keeps_nested_segments() {
        let url = rest(FIRESTORE_ENDPOINT)
            .resource_url("users/u1/personalisedShowRecommendations")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://firestore.googleapis.com/v1/projects/demo-project/databases/(default)/documents/users/u1/personalisedShowRecommendations"
        );
    }

    #[test]
    fn batch_write_url_targets_database_root() {
        let url = rest("http://localhost:8080/v1/").batch_write_url().unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/projects/demo-project/databases/(default)/documents:batchWrite"
        );
    }

    #[test]
    fn delete_names_are_fully_qualified() {
        let name = rest(FIRESTORE_ENDPOINT).document_name(&DocumentRef::new("users/u1/feed", "d1"));
        assert_eq!(name, "projects/demo-project/databases/(default)/documents/users/u1/feed/d1");
    }

    #[test]
    fn emulator_wins_over_access_token() {
        let cfg = FirestoreConfig {
            emulator_host: Some("localhost:8080".into()),
            access_token: Some("secret".into()),
            ..config()
        };
        assert_eq!(Credentials::resolve(&cfg), Credentials::Emulator);
    }

    #[test]
    fn falls_back_to_metadata_server() {
        let cfg = FirestoreConfig {
            access_token: Some(String::new()),
            ..config()
        };
        assert_eq!(Credentials::resolve(&cfg), Credentials::MetadataServer);
        let cfg = FirestoreConfig {
            access_token: Some("t".into()),
            ..config()
        };
        assert_eq!(Credentials::resolve(&cfg), Credentials::AccessToken("t".into()));
    }

    #[tokio::test]
    async fn empty_project_id_is_rejected() {
        let cfg = FirestoreConfig {
            project_id: " ".into(),
            ..config()
        };
        assert!(matches!(
            FirestoreStore::connect(cfg).await,
            Err(IngestorError::ConfigurationError(_))
        ));
    }

    #[test]
    fn list_response_tolerates_empty_collections() {
        let page: ListDocumentsResponse = serde_json::from_str("{}").unwrap();
        assert!(page.documents.is_empty());
        assert!(page.next_page_token.is_none());
    }
}
