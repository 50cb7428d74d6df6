//! Document-store boundary: a small trait over the hosted multi-collection
//! JSON store plus the production HTTP implementation.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store responded with {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed store document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed store response: {0}")]
    Malformed(&'static str),
}

/// A schema-less document with its server-assigned id.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    /// Typed view of the document body; parsing happens here, at the store
    /// boundary, instead of field-poking at call sites.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }

    /// The document body with its id re-attached, for echoing to callers.
    pub fn to_json(&self) -> Value {
        let mut map = self.data.clone();
        map.insert("$id".to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, collection: &str, data: Value) -> Result<Document, StoreError>;
    async fn get(&self, collection: &str, document_id: &str) -> Result<Document, StoreError>;
    /// Equality filters only, ANDed together.
    async fn list(
        &self,
        collection: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Document>, StoreError>;
    /// Partial update; fields absent from `patch` are left untouched.
    async fn update(
        &self,
        collection: &str,
        document_id: &str,
        patch: Value,
    ) -> Result<Document, StoreError>;
    async fn delete(&self, collection: &str, document_id: &str) -> Result<(), StoreError>;
}

/// Client for the hosted store's REST API (endpoint + project + api key,
/// documents under a named database).
pub struct HttpStore {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    api_key: String,
    database_id: String,
}

impl HttpStore {
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.store_endpoint.trim_end_matches('/').to_string(),
            project_id: config.store_project_id.clone(),
            api_key: config.store_api_key.clone(),
            database_id: config.database_id.clone(),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.endpoint, self.database_id, collection
        )
    }

    fn document_url(&self, collection: &str, document_id: &str) -> String {
        format!("{}/{}", self.collection_url(collection), document_id)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        let response = request
            .header("X-Appwrite-Project", &self.project_id)
            .header("X-Appwrite-Key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        Ok(response.json().await?)
    }

    fn document_from_value(value: Value) -> Result<Document, StoreError> {
        let Value::Object(mut map) = value else {
            return Err(StoreError::Malformed("expected a JSON object"));
        };
        let id = map
            .remove("$id")
            .and_then(|v| v.as_str().map(str::to_owned))
            .ok_or(StoreError::Malformed("document has no $id"))?;
        Ok(Document { id, data: map })
    }
}

/// Equality-filter query string, e.g. `equal("userId", ["u1"])`.
fn equal_query(attribute: &str, value: &str) -> String {
    format!(r#"equal("{}", ["{}"])"#, attribute, value)
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn create(&self, collection: &str, data: Value) -> Result<Document, StoreError> {
        let body = serde_json::json!({
            "documentId": "unique()",
            "data": data,
        });
        let value = self
            .send(self.http.post(self.collection_url(collection)).json(&body))
            .await?;
        Self::document_from_value(value)
    }

    async fn get(&self, collection: &str, document_id: &str) -> Result<Document, StoreError> {
        let value = self
            .send(self.http.get(self.document_url(collection, document_id)))
            .await?;
        Self::document_from_value(value)
    }

    async fn list(
        &self,
        collection: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Document>, StoreError> {
        let queries: Vec<(&str, String)> = filters
            .iter()
            .map(|(attribute, value)| ("queries[]", equal_query(attribute, value)))
            .collect();
        let value = self
            .send(self.http.get(self.collection_url(collection)).query(&queries))
            .await?;

        let documents = value
            .get("documents")
            .and_then(Value::as_array)
            .ok_or(StoreError::Malformed("list response has no documents"))?;
        documents
            .iter()
            .cloned()
            .map(Self::document_from_value)
            .collect()
    }

    async fn update(
        &self,
        collection: &str,
        document_id: &str,
        patch: Value,
    ) -> Result<Document, StoreError> {
        let body = serde_json::json!({ "data": patch });
        let value = self
            .send(
                self.http
                    .patch(self.document_url(collection, document_id))
                    .json(&body),
            )
            .await?;
        Self::document_from_value(value)
    }

    async fn delete(&self, collection: &str, document_id: &str) -> Result<(), StoreError> {
        self.send(self.http.delete(self.document_url(collection, document_id)))
            .await?;
        Ok(())
    }
}

/// In-memory store for handler tests: same contract, plus fault injection for
/// exercising the best-effort paths.
#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    pub struct MemoryStore {
        collections: Mutex<HashMap<String, Vec<Document>>>,
        failing: Mutex<HashSet<String>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// All subsequent operations on `collection` fail.
        pub fn fail_collection(&self, collection: &str) {
            self.failing.lock().unwrap().insert(collection.to_string());
        }

        pub fn documents(&self, collection: &str) -> Vec<Document> {
            self.collections
                .lock()
                .unwrap()
                .get(collection)
                .cloned()
                .unwrap_or_default()
        }

        pub fn count(&self, collection: &str) -> usize {
            self.documents(collection).len()
        }

        /// Seeds a document directly, bypassing fault injection.
        pub fn seed(&self, collection: &str, data: Value) -> String {
            let Value::Object(map) = data else {
                panic!("seed data must be a JSON object");
            };
            let id = Uuid::new_v4().to_string();
            self.collections
                .lock()
                .unwrap()
                .entry(collection.to_string())
                .or_default()
                .push(Document {
                    id: id.clone(),
                    data: map,
                });
            id
        }

        fn check(&self, collection: &str) -> Result<(), StoreError> {
            if self.failing.lock().unwrap().contains(collection) {
                return Err(StoreError::Api {
                    status: 503,
                    message: "injected failure".to_string(),
                });
            }
            Ok(())
        }

        fn matches(document: &Document, filters: &[(&str, &str)]) -> bool {
            filters.iter().all(|(attribute, value)| {
                document.data.get(*attribute).and_then(Value::as_str) == Some(*value)
            })
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        async fn create(&self, collection: &str, data: Value) -> Result<Document, StoreError> {
            self.check(collection)?;
            let Value::Object(map) = data else {
                return Err(StoreError::Malformed("expected a JSON object"));
            };
            let document = Document {
                id: Uuid::new_v4().to_string(),
                data: map,
            };
            self.collections
                .lock()
                .unwrap()
                .entry(collection.to_string())
                .or_default()
                .push(document.clone());
            Ok(document)
        }

        async fn get(&self, collection: &str, document_id: &str) -> Result<Document, StoreError> {
            self.check(collection)?;
            self.documents(collection)
                .into_iter()
                .find(|d| d.id == document_id)
                .ok_or(StoreError::NotFound)
        }

        async fn list(
            &self,
            collection: &str,
            filters: &[(&str, &str)],
        ) -> Result<Vec<Document>, StoreError> {
            self.check(collection)?;
            Ok(self
                .documents(collection)
                .into_iter()
                .filter(|d| Self::matches(d, filters))
                .collect())
        }

        async fn update(
            &self,
            collection: &str,
            document_id: &str,
            patch: Value,
        ) -> Result<Document, StoreError> {
            self.check(collection)?;
            let Value::Object(patch) = patch else {
                return Err(StoreError::Malformed("expected a JSON object"));
            };
            let mut collections = self.collections.lock().unwrap();
            let documents = collections
                .get_mut(collection)
                .ok_or(StoreError::NotFound)?;
            let document = documents
                .iter_mut()
                .find(|d| d.id == document_id)
                .ok_or(StoreError::NotFound)?;
            for (key, value) in patch {
                document.data.insert(key, value);
            }
            Ok(document.clone())
        }

        async fn delete(&self, collection: &str, document_id: &str) -> Result<(), StoreError> {
            self.check(collection)?;
            let mut collections = self.collections.lock().unwrap();
            let documents = collections
                .get_mut(collection)
                .ok_or(StoreError::NotFound)?;
            let before = documents.len();
            documents.retain(|d| d.id != document_id);
            if documents.len() == before {
                return Err(StoreError::NotFound);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_query_renders_attribute_and_value() {
        assert_eq!(equal_query("userId", "u1"), r#"equal("userId", ["u1"])"#);
    }

    #[test]
    fn document_json_roundtrip_carries_id() {
        let document = Document {
            id: "abc".to_string(),
            data: json!({"title": "Rust 101"})
                .as_object()
                .cloned()
                .unwrap(),
        };
        assert_eq!(document.to_json()["$id"], "abc");
        assert_eq!(document.to_json()["title"], "Rust 101");
    }

    #[tokio::test]
    async fn memory_store_filters_and_updates() {
        let store = MemoryStore::new();
        let created = store
            .create("enrollments", json!({"userId": "u1", "courseId": "c1"}))
            .await
            .unwrap();
        store
            .create("enrollments", json!({"userId": "u2", "courseId": "c1"}))
            .await
            .unwrap();

        let listed = store
            .list("enrollments", &[("userId", "u1"), ("courseId", "c1")])
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);

        let updated = store
            .update("enrollments", &created.id, json!({"status": "completed"}))
            .await
            .unwrap();
        assert_eq!(updated.data["status"], "completed");
        assert_eq!(updated.data["userId"], "u1");

        store.delete("enrollments", &created.id).await.unwrap();
        assert_eq!(store.count("enrollments"), 1);
    }
}
