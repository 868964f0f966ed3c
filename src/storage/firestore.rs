//! Managed document database over its REST API.
//!
//! Documents travel as typed values:
//!
//! ```text
//! { "fields": { "title": { "stringValue": "Aortic Root" },
//!               "createdAt": { "timestampValue": "2026-01-01T00:00:00Z" },
//!               "images": { "arrayValue": { "values": [ { "mapValue": { "fields": {..} } } ] } } } }
//! ```
//!
//! Plain JSON documents are converted to and from that encoding at this
//! boundary so the rest of the crate only sees `serde_json` maps.

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{Map, Value, json};

use crate::error::{AppError, Result};
use crate::models::FirebaseConfig;
use crate::storage::{Direction, Document, DocumentStore};

/// Top-level fields stored as native timestamps so ordering is chronological.
const TIMESTAMP_FIELDS: &[&str] = &["createdAt", "updatedAt"];

const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com/v1";

/// REST-backed document store.
#[derive(Clone)]
pub struct FirestoreStore {
    client: Client,
    documents_url: String,
    id_token: Option<String>,
}

impl FirestoreStore {
    /// Create a store for the configured project and database.
    pub fn new(client: Client, config: &FirebaseConfig) -> Self {
        Self::with_endpoint(client, DEFAULT_ENDPOINT, config)
    }

    /// Create a store against a custom endpoint (e.g. a local emulator).
    pub fn with_endpoint(client: Client, endpoint: &str, config: &FirebaseConfig) -> Self {
        Self {
            client,
            documents_url: format!(
                "{}/projects/{}/databases/{}/documents",
                endpoint.trim_end_matches('/'),
                config.project_id,
                config.database
            ),
            id_token: None,
        }
    }

    /// Attach a signed-in user's token to every request.
    pub fn with_id_token(mut self, id_token: Option<String>) -> Self {
        self.id_token = id_token;
        self
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.id_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn doc_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_url, collection, id)
    }

    /// Send a request; 404 comes back as `Ok(None)`.
    async fn send(&self, builder: RequestBuilder, write: bool) -> Result<Option<Value>> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("document store returned {}: {}", status, body.trim());
            return Err(if write {
                AppError::store_write(message)
            } else {
                AppError::store_read(message)
            });
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Some(Value::Null));
        }
        Ok(Some(serde_json::from_str(&text)?))
    }
}

/// Last path segment of a document resource name.
fn document_id(name: &str) -> Option<&str> {
    name.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Encode a plain JSON value as a typed value.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Encode a document's fields, storing known timestamp fields natively.
pub fn encode_fields(fields: &Document) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| {
            let encoded = match value {
                Value::String(s)
                    if TIMESTAMP_FIELDS.contains(&key.as_str())
                        && DateTime::parse_from_rfc3339(s).is_ok() =>
                {
                    json!({ "timestampValue": s })
                }
                other => encode_value(other),
            };
            (key.clone(), encoded)
        })
        .collect()
}

/// Decode a typed value into plain JSON.
pub fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().unwrap_or_default()),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "doubleValue" => inner.clone(),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        _ => inner.clone(),
    }
}

/// Decode a typed field map into a plain document.
pub fn decode_fields(fields: &Map<String, Value>) -> Document {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), decode_value(value)))
        .collect()
}

/// Split a REST document into `(id, fields)`.
fn decode_document(document: &Value) -> Option<(String, Document)> {
    let id = document.get("name").and_then(Value::as_str).and_then(document_id)?;
    let fields = document
        .get("fields")
        .and_then(Value::as_object)
        .map(decode_fields)
        .unwrap_or_default();
    Some((id.to_string(), fields))
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn backend_tag(&self) -> &'static str {
        "firestore"
    }

    async fn add(&self, collection: &str, fields: Document) -> Result<String> {
        let url = format!("{}/{}", self.documents_url, collection);
        let body = json!({ "fields": encode_fields(&fields) });
        let created = self
            .send(self.request(Method::POST, &url).json(&body), true)
            .await?
            .ok_or_else(|| AppError::store_write(format!("collection '{}' not found", collection)))?;

        decode_document(&created)
            .map(|(id, _)| id)
            .ok_or_else(|| AppError::store_write("document store returned no document name"))
    }

    async fn set(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        let body = json!({ "fields": encode_fields(&fields) });
        self.send(
            self.request(Method::PATCH, &self.doc_url(collection, id)).json(&body),
            true,
        )
        .await?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let found = self
            .send(self.request(Method::GET, &self.doc_url(collection, id)), false)
            .await?;
        Ok(found.as_ref().and_then(decode_document).map(|(_, doc)| doc))
    }

    async fn list(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> Result<Vec<(String, Document)>> {
        let url = format!("{}:runQuery", self.documents_url);
        let direction = match direction {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        };
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "orderBy": [{ "field": { "fieldPath": order_by }, "direction": direction }]
            }
        });

        let rows = self
            .send(self.request(Method::POST, &url).json(&body), false)
            .await?
            .unwrap_or(Value::Null);

        // Empty results still carry one row with only `readTime`.
        Ok(rows
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("document"))
                    .filter_map(decode_document)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        let mut query: Vec<(&str, &str)> = fields
            .keys()
            .map(|key| ("updateMask.fieldPaths", key.as_str()))
            .collect();
        query.push(("currentDocument.exists", "true"));

        let body = json!({ "fields": encode_fields(&fields) });
        self.send(
            self.request(Method::PATCH, &self.doc_url(collection, id))
                .query(&query)
                .json(&body),
            true,
        )
        .await?
        .ok_or_else(|| AppError::not_found(format!("{}/{}", collection, id)))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.send(
            self.request(Method::DELETE, &self.doc_url(collection, id)),
            true,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_record_fields() {
        let doc = json!({
            "title": "Aortic Root",
            "createdAt": "2026-01-01T00:00:00Z",
            "searchTerms": ["aorta", "root"],
            "images": [{ "url": "u", "caption": "c" }],
            "rank": 3,
            "isAdmin": true
        });
        let encoded = encode_fields(doc.as_object().unwrap());

        assert_eq!(encoded["title"], json!({ "stringValue": "Aortic Root" }));
        assert_eq!(
            encoded["createdAt"],
            json!({ "timestampValue": "2026-01-01T00:00:00Z" })
        );
        assert_eq!(
            encoded["searchTerms"]["arrayValue"]["values"][1],
            json!({ "stringValue": "root" })
        );
        assert_eq!(
            encoded["images"]["arrayValue"]["values"][0]["mapValue"]["fields"]["url"],
            json!({ "stringValue": "u" })
        );
        assert_eq!(encoded["rank"], json!({ "integerValue": "3" }));
        assert_eq!(encoded["isAdmin"], json!({ "booleanValue": true }));
    }

    #[test]
    fn test_non_timestamp_strings_stay_strings() {
        let doc = json!({ "createdAt": "yesterday", "title": "2026-01-01T00:00:00Z" });
        let encoded = encode_fields(doc.as_object().unwrap());
        assert_eq!(encoded["createdAt"], json!({ "stringValue": "yesterday" }));
        assert_eq!(
            encoded["title"],
            json!({ "stringValue": "2026-01-01T00:00:00Z" })
        );
    }

    #[test]
    fn test_decode_document() {
        let document = json!({
            "name": "projects/p/databases/(default)/documents/measurements/abc123",
            "fields": {
                "title": { "stringValue": "Spleen" },
                "updatedAt": { "timestampValue": "2026-02-01T10:00:00.123456Z" },
                "references": { "arrayValue": {} },
                "count": { "integerValue": "42" },
                "ratio": { "doubleValue": 0.5 },
                "extra": { "nullValue": null }
            },
            "createTime": "2026-02-01T10:00:00.123456Z"
        });

        let (id, doc) = decode_document(&document).unwrap();
        assert_eq!(id, "abc123");
        assert_eq!(doc["title"], "Spleen");
        assert_eq!(doc["updatedAt"], "2026-02-01T10:00:00.123456Z");
        assert_eq!(doc["references"], json!([]));
        assert_eq!(doc["count"], 42);
        assert_eq!(doc["ratio"], 0.5);
        assert_eq!(doc["extra"], Value::Null);
    }

    #[test]
    fn test_roundtrip_nested_images() {
        let doc = json!({
            "images": [{ "url": "https://x/o/a.png", "caption": "axial" }]
        });
        let encoded = encode_fields(doc.as_object().unwrap());
        let decoded = decode_fields(&encoded);
        assert_eq!(Value::Object(decoded), doc);
    }

    #[test]
    fn test_documents_url() {
        let config = FirebaseConfig {
            project_id: "radnorms".into(),
            ..Default::default()
        };
        let store = FirestoreStore::with_endpoint(Client::new(), "http://localhost:8080/v1/", &config);
        assert_eq!(
            store.doc_url("users", "u1"),
            "http://localhost:8080/v1/projects/radnorms/databases/(default)/documents/users/u1"
        );
    }
}
