//! Realtime Database sink over the REST API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Url};
use transfer::{CollectionPath, DocumentSink, FieldValue, Record, RecordKey, SinkError};

use crate::http::send;
use crate::{AccessTokens, FirebaseError};

/// Writes records as child nodes of `/<collection>` in a Realtime Database.
///
/// `PUT` replaces the node at `/<collection>/<key>`, so re-running a transfer
/// leaves the tree unchanged. The database drops `null` children, so null
/// fields are absent from the stored node rather than present as `null`.
#[derive(Debug, Clone)]
pub struct RealtimeSink {
    client: Client,
    base: Url,
    namespace: Option<String>,
    tokens: Arc<AccessTokens>,
}

impl RealtimeSink {
    /// Targets the database at `database_url`.
    ///
    /// `namespace` is the emulator's `ns` query parameter (the database
    /// name); leave it `None` against the hosted service.
    pub fn new(
        client: Client,
        database_url: &str,
        namespace: Option<String>,
        tokens: Arc<AccessTokens>,
    ) -> Result<Self, FirebaseError> {
        let base = Url::parse(database_url.trim_end_matches('/')).map_err(|e| {
            FirebaseError::InvalidPath {
                message: format!("database url {database_url:?}: {e}"),
            }
        })?;
        Ok(Self {
            client,
            base,
            namespace,
            tokens,
        })
    }

    /// Default hosted URL for a project's default database instance.
    pub fn default_database_url(project_id: &str) -> String {
        format!("https://{project_id}-default-rtdb.firebaseio.com")
    }

    /// `.json` URL of a node below the root. The last segment gets the
    /// suffix; every segment is percent-encoded.
    pub fn node_url(&self, segments: &[&str]) -> Result<Url, FirebaseError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| FirebaseError::InvalidPath {
                    message: format!("{} cannot carry a path", self.base),
                })?;
            path.pop_if_empty();
            if let Some((last, parents)) = segments.split_last() {
                path.extend(parents);
                path.push(&format!("{last}.json"));
            } else {
                path.push(".json");
            }
        }
        if let Some(ns) = &self.namespace {
            url.query_pairs_mut().append_pair("ns", ns);
        }
        Ok(url)
    }

    fn record_url(&self, collection: &CollectionPath, key: &RecordKey) -> Result<Url, FirebaseError> {
        let mut segments: Vec<&str> = collection.segments().collect();
        segments.push(key.as_str());
        self.node_url(&segments)
    }

    async fn put(&self, collection: &CollectionPath, record: &Record) -> Result<(), FirebaseError> {
        // Writing an empty object (or only nulls) deletes the node.
        if record.fields.values().all(FieldValue::is_null) {
            return Err(FirebaseError::InvalidPath {
                message: format!("{} has no non-null fields to store", record.key),
            });
        }
        let url = self.record_url(collection, &record.key)?;
        let bearer = self.tokens.bearer().await?;
        let request = self
            .client
            .put(url.clone())
            .bearer_auth(bearer)
            .json(&record.to_json());
        send(url.as_str(), request).await.map(|_| ())
    }

    async fn count_children(&self, collection: &CollectionPath) -> Result<u64, FirebaseError> {
        let segments: Vec<&str> = collection.segments().collect();
        let mut url = self.node_url(&segments)?;
        url.query_pairs_mut().append_pair("shallow", "true");
        let bearer = self.tokens.bearer().await?;
        let body = send(url.as_str(), self.client.get(url.clone()).bearer_auth(bearer)).await?;
        count_shallow(&body)
    }
}

/// Counts the keys of a `?shallow=true` response; `null` means no node.
pub(crate) fn count_shallow(body: &str) -> Result<u64, FirebaseError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| FirebaseError::Decode {
        message: format!("shallow listing: {e}"),
    })?;
    match value {
        serde_json::Value::Null => Ok(0),
        serde_json::Value::Object(children) => Ok(children.len() as u64),
        other => Err(FirebaseError::Decode {
            message: format!("collection node is a leaf value: {other}"),
        }),
    }
}

#[async_trait]
impl DocumentSink for RealtimeSink {
    fn label(&self) -> String {
        format!("realtime:{}", self.base)
    }

    #[tracing::instrument(level = "info", skip(self), fields(collection = %collection))]
    async fn prepare(&self, collection: &CollectionPath) -> Result<(), SinkError> {
        self.tokens.bearer().await?;
        tracing::info!(emulator = self.tokens.is_emulator(), "realtime database credentials ready");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, record), fields(key = %record.key))]
    async fn upsert(&self, collection: &CollectionPath, record: &Record) -> Result<(), SinkError> {
        Ok(self.put(collection, record).await?)
    }

    async fn count(&self, collection: &CollectionPath) -> Result<u64, SinkError> {
        Ok(self.count_children(collection).await?)
    }
}
