//! Firestore sink over the v1 REST API.
//!
//! Documents are written with `PATCH` and no update mask, which creates the
//! document or replaces every field of an existing one.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Map, Value};
use transfer::{CollectionPath, DocumentSink, FieldValue, Fields, Record, RecordKey, SinkError};

use crate::http::send;
use crate::{AccessTokens, FirebaseError};

/// Hosted Firestore REST endpoint.
pub const FIRESTORE_API: &str = "https://firestore.googleapis.com";

/// Writes records as documents of a Firestore collection.
///
/// Each record is a `PATCH` without an update mask: the document is created
/// if absent and its field set fully replaced otherwise.
#[derive(Debug, Clone)]
pub struct FirestoreSink {
    client: Client,
    documents: Url,
    tokens: Arc<AccessTokens>,
}

impl FirestoreSink {
    /// Targets the `(default)` database of `project_id` at `endpoint`
    /// ([`FIRESTORE_API`], or `http://<emulator host>`).
    pub fn new(
        client: Client,
        endpoint: &str,
        project_id: &str,
        tokens: Arc<AccessTokens>,
    ) -> Result<Self, FirebaseError> {
        let raw = format!(
            "{}/v1/projects/{project_id}/databases/(default)/documents",
            endpoint.trim_end_matches('/')
        );
        let documents = Url::parse(&raw).map_err(|e| FirebaseError::InvalidPath {
            message: format!("firestore endpoint {raw:?}: {e}"),
        })?;
        Ok(Self {
            client,
            documents,
            tokens,
        })
    }

    fn url_for(&self, segments: &[&str], suffix: &str) -> Result<Url, FirebaseError> {
        let mut url = self.documents.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| FirebaseError::InvalidPath {
                    message: format!("{} cannot carry a path", self.documents),
                })?;
            path.extend(segments);
        }
        if !suffix.is_empty() {
            let with_suffix = format!("{}{suffix}", url.path());
            url.set_path(&with_suffix);
        }
        Ok(url)
    }

    /// URL of `<collection>/<key>`.
    pub fn document_url(&self, collection: &CollectionPath, key: &RecordKey) -> Result<Url, FirebaseError> {
        check_document_id(key.as_str())?;
        let mut segments: Vec<&str> = collection.segments().collect();
        segments.push(key.as_str());
        self.url_for(&segments, "")
    }

    async fn patch(&self, collection: &CollectionPath, record: &Record) -> Result<(), FirebaseError> {
        let url = self.document_url(collection, &record.key)?;
        let bearer = self.tokens.bearer().await?;
        let request = self
            .client
            .patch(url.clone())
            .bearer_auth(bearer)
            .json(&json!({ "fields": encode_fields(&record.fields) }));
        send(url.as_str(), request).await.map(|_| ())
    }

    async fn count_documents(&self, collection: &CollectionPath) -> Result<u64, FirebaseError> {
        let segments: Vec<&str> = collection.segments().collect();
        let Some((collection_id, parent)) = segments.split_last() else {
            return Ok(0);
        };
        let url = self.url_for(parent, ":runAggregationQuery")?;
        let body = json!({
            "structuredAggregationQuery": {
                "structuredQuery": { "from": [{ "collectionId": collection_id }] },
                "aggregations": [{ "alias": "total", "count": {} }]
            }
        });
        let bearer = self.tokens.bearer().await?;
        let response = send(
            url.as_str(),
            self.client.post(url.clone()).bearer_auth(bearer).json(&body),
        )
        .await?;
        parse_count(&response)
    }
}

/// Collections sit at odd depths: `c`, `c/doc/sub`, ...
pub fn check_collection_path(collection: &CollectionPath) -> Result<(), FirebaseError> {
    let depth = collection.segments().count();
    if depth % 2 == 1 {
        Ok(())
    } else {
        Err(FirebaseError::InvalidPath {
            message: format!(
                "{collection} has {depth} segments; a collection path needs an odd number"
            ),
        })
    }
}

/// Firestore reserves `.`, `..`, and ids of the form `__*__`.
pub fn check_document_id(id: &str) -> Result<(), FirebaseError> {
    let reserved = id == "." || id == ".." || (id.len() >= 4 && id.starts_with("__") && id.ends_with("__"));
    if reserved {
        Err(FirebaseError::InvalidPath {
            message: format!("{id:?} is a reserved document id"),
        })
    } else {
        Ok(())
    }
}

/// Encodes a record body as a Firestore `fields` map.
pub fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, value)| (name.clone(), encode_value(value)))
            .collect(),
    )
}

/// Encodes one field as a typed Firestore `Value`.
pub fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Bool(b) => json!({ "booleanValue": b }),
        FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        FieldValue::Float(f) if f.is_finite() => json!({ "doubleValue": f }),
        FieldValue::Float(_) => json!({ "nullValue": null }),
        FieldValue::Text(s) => json!({ "stringValue": s }),
        FieldValue::Timestamp(ts) => json!({ "timestampValue": ts.to_string() }),
        FieldValue::Json(v) => encode_json(v),
    }
}

fn encode_json(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_json).collect::<Vec<_>>() }
        }),
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_json(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

/// Reads the `total` aggregate from a `runAggregationQuery` response.
pub(crate) fn parse_count(body: &str) -> Result<u64, FirebaseError> {
    let value: Value = serde_json::from_str(body).map_err(|e| FirebaseError::Decode {
        message: format!("aggregation response: {e}"),
    })?;
    let total = value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .find_map(|item| item.pointer("/result/aggregateFields/total/integerValue"))
        })
        .ok_or_else(|| FirebaseError::Decode {
            message: "aggregation response without a total".to_string(),
        })?;
    // integerValue is a decimal string on the wire; accept a bare number too.
    let count = match total {
        Value::String(s) => s.parse::<u64>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    };
    count.ok_or_else(|| FirebaseError::Decode {
        message: format!("aggregation total {total} is not a count"),
    })
}

#[async_trait]
impl DocumentSink for FirestoreSink {
    fn label(&self) -> String {
        format!("firestore:{}", self.documents)
    }

    #[tracing::instrument(level = "info", skip(self), fields(collection = %collection))]
    async fn prepare(&self, collection: &CollectionPath) -> Result<(), SinkError> {
        check_collection_path(collection)?;
        self.tokens.bearer().await?;
        tracing::info!(emulator = self.tokens.is_emulator(), "firestore credentials ready");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, record), fields(key = %record.key))]
    async fn upsert(&self, collection: &CollectionPath, record: &Record) -> Result<(), SinkError> {
        Ok(self.patch(collection, record).await?)
    }

    async fn count(&self, collection: &CollectionPath) -> Result<u64, SinkError> {
        Ok(self.count_documents(collection).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use transfer::Timestamp;

    use crate::Credentials;

    use super::*;

    fn sink() -> FirestoreSink {
        FirestoreSink::new(
            Client::new(),
            FIRESTORE_API,
            "index-align",
            Arc::new(AccessTokens::new(Client::new(), Credentials::Emulator)),
        )
        .unwrap()
    }

    #[test]
    fn document_url_nests_under_documents_root() {
        let url = sink()
            .document_url(
                &CollectionPath::new("issues").unwrap(),
                &RecordKey::new("42").unwrap(),
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://firestore.googleapis.com/v1/projects/index-align/databases/(default)/documents/issues/42"
        );
    }

    #[test]
    fn aggregation_url_targets_parent_document() {
        let url = sink().url_for(&["tenants", "acme"], ":runAggregationQuery").unwrap();
        assert!(url
            .as_str()
            .ends_with("/documents/tenants/acme:runAggregationQuery"));
        let root = sink().url_for(&[], ":runAggregationQuery").unwrap();
        assert!(root.as_str().ends_with("/documents:runAggregationQuery"));
    }

    #[test]
    fn collection_depth_must_be_odd() {
        assert!(check_collection_path(&CollectionPath::new("issues").unwrap()).is_ok());
        assert!(check_collection_path(&CollectionPath::new("tenants/acme/issues").unwrap()).is_ok());
        assert!(check_collection_path(&CollectionPath::new("tenants/acme").unwrap()).is_err());
    }

    #[test]
    fn reserved_document_ids_are_refused() {
        assert!(check_document_id("__name__").is_err());
        assert!(check_document_id("..").is_err());
        assert!(check_document_id("__").is_ok());
        assert!(check_document_id("42").is_ok());
    }

    #[test]
    fn scalar_values_are_typed() {
        let ts = Timestamp::from_utc(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(encode_value(&FieldValue::Integer(7)), json!({"integerValue": "7"}));
        assert_eq!(encode_value(&FieldValue::Float(1.5)), json!({"doubleValue": 1.5}));
        assert_eq!(encode_value(&FieldValue::Float(f64::NAN)), json!({"nullValue": null}));
        assert_eq!(encode_value(&FieldValue::Text("MSFT".into())), json!({"stringValue": "MSFT"}));
        assert_eq!(
            encode_value(&FieldValue::Timestamp(ts)),
            json!({"timestampValue": "2024-01-02T03:04:05Z"})
        );
    }

    #[test]
    fn nested_json_becomes_map_and_array_values() {
        let encoded = encode_value(&FieldValue::Json(json!({"tags": ["a", 1], "ok": true})));
        assert_eq!(
            encoded,
            json!({"mapValue": {"fields": {
                "ok": {"booleanValue": true},
                "tags": {"arrayValue": {"values": [
                    {"stringValue": "a"},
                    {"integerValue": "1"}
                ]}}
            }}})
        );
    }

    #[test]
    fn count_is_read_from_aggregate_fields() {
        let body = r#"[{"result":{"aggregateFields":{"total":{"integerValue":"128"}}},"readTime":"2024-01-01T00:00:00Z"}]"#;
        assert_eq!(parse_count(body).unwrap(), 128);
        assert!(parse_count("[]").is_err());
    }
}
