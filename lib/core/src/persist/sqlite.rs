use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{matches_filters, sort_documents, RemoteStore, ScopedRemoteStore};
use crate::cache::{ChildEntity, Entity, Filter, SortOrder};
use crate::error::RemoteError;

/// Parent value used for top-level collections
const ROOT: &str = "";

/// SQLite-backed document store
///
/// Every record is a JSON document keyed by collection, parent and id, so a
/// single table serves both top-level and nested collections.
#[derive(Clone)]
pub struct SqliteRemoteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRemoteStore {
    /// Creates a new SQLite store
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    pub fn new(db_path: &Path) -> Result<Self, RemoteError> {
        let connection = Connection::open(db_path)?;
        let store = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        store.init()?;
        Ok(store)
    }

    /// Creates a new in-memory SQLite store for testing
    pub fn new_in_memory() -> Result<Self, RemoteError> {
        let connection = Connection::open_in_memory()?;
        let store = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), RemoteError> {
        let connection = self.lock()?;

        connection.execute(
            "CREATE TABLE IF NOT EXISTS documents (
          collection TEXT NOT NULL,
          parent TEXT NOT NULL,
          id TEXT NOT NULL,
          body TEXT NOT NULL,
          PRIMARY KEY (collection, parent, id)
      )",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RemoteError> {
        self.connection
            .lock()
            .map_err(|_| RemoteError::new("Failed to lock connection"))
    }

    fn insert_document(
        &self,
        collection: &str,
        parent: &str,
        fields: &impl Serialize,
    ) -> Result<String, RemoteError> {
        let mut body = into_object(serde_json::to_value(fields)?)?;
        let now = serde_json::to_value(Utc::now())?;
        body.insert("createdAt".to_string(), now.clone());
        body.insert("updatedAt".to_string(), now);

        let id = uuid::Uuid::new_v4().simple().to_string();
        let connection = self.lock()?;
        connection.execute(
            "INSERT INTO documents (collection, parent, id, body) VALUES (?, ?, ?, ?)",
            params![collection, parent, id, Value::Object(body).to_string()],
        )?;

        debug!("Created document {collection}/{id}");
        Ok(id)
    }

    fn load_documents(&self, collection: &str, parent: &str) -> Result<Vec<Value>, RemoteError> {
        let connection = self.lock()?;
        let mut stmt = connection
            .prepare("SELECT id, body FROM documents WHERE collection = ? AND parent = ?")?;

        let rows = stmt.query_map(params![collection, parent], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, body) = row?;
            documents.push(with_id(&id, &body)?);
        }

        Ok(documents)
    }

    fn load_document(
        &self,
        collection: &str,
        parent: &str,
        id: &str,
    ) -> Result<Option<Value>, RemoteError> {
        let connection = self.lock()?;
        let body: Option<String> = connection
            .query_row(
                "SELECT body FROM documents WHERE collection = ? AND parent = ? AND id = ?",
                params![collection, parent, id],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|body| with_id(id, &body)).transpose()
    }

    /// Merges `patch` into the stored document, like a document-database update
    fn merge_document(
        &self,
        collection: &str,
        parent: &str,
        id: &str,
        patch: &impl Serialize,
    ) -> Result<(), RemoteError> {
        let patch = into_object(serde_json::to_value(patch)?)?;

        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        let body: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE collection = ? AND parent = ? AND id = ?",
                params![collection, parent, id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(body) = body else {
            return Err(RemoteError::with_status(
                404,
                format!("No document to update: {collection}/{id}"),
            ));
        };

        let mut document = into_object(serde_json::from_str(&body)?)?;
        document.extend(patch);
        document.insert("updatedAt".to_string(), serde_json::to_value(Utc::now())?);

        tx.execute(
            "UPDATE documents SET body = ? WHERE collection = ? AND parent = ? AND id = ?",
            params![Value::Object(document).to_string(), collection, parent, id],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn delete_document(&self, collection: &str, parent: &str, id: &str) -> Result<(), RemoteError> {
        let connection = self.lock()?;
        // Deleting a missing document is not an error.
        connection.execute(
            "DELETE FROM documents WHERE collection = ? AND parent = ? AND id = ?",
            params![collection, parent, id],
        )?;
        Ok(())
    }

    fn list<E: DeserializeOwned>(
        &self,
        collection: &str,
        parent: &str,
        filters: &[Filter],
        sort: SortOrder,
    ) -> Result<Vec<E>, RemoteError> {
        let mut documents: Vec<Value> = self
            .load_documents(collection, parent)?
            .into_iter()
            .filter(|document| matches_filters(document, filters))
            .collect();
        sort_documents(&mut documents, sort);

        documents
            .into_iter()
            .map(|document| serde_json::from_value(document).map_err(RemoteError::from))
            .collect()
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>, RemoteError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RemoteError::new(format!(
            "Expected a JSON object, got {other}"
        ))),
    }
}

fn with_id(id: &str, body: &str) -> Result<Value, RemoteError> {
    let mut document = into_object(serde_json::from_str(body)?)?;
    document.insert("id".to_string(), Value::String(id.to_string()));
    Ok(Value::Object(document))
}

#[async_trait]
impl<E: Entity> RemoteStore<E> for SqliteRemoteStore {
    async fn list_all(&self, sort: SortOrder) -> Result<Vec<E>, RemoteError> {
        self.list(E::COLLECTION, ROOT, &[], sort)
    }

    async fn list_where(&self, filters: &[Filter], sort: SortOrder) -> Result<Vec<E>, RemoteError> {
        self.list(E::COLLECTION, ROOT, filters, sort)
    }

    async fn get(&self, id: &str) -> Result<Option<E>, RemoteError> {
        self.load_document(E::COLLECTION, ROOT, id)?
            .map(|document| serde_json::from_value(document).map_err(RemoteError::from))
            .transpose()
    }

    async fn create(&self, draft: &E::Draft) -> Result<String, RemoteError> {
        self.insert_document(E::COLLECTION, ROOT, draft)
    }

    async fn update(&self, id: &str, patch: &E::Patch) -> Result<(), RemoteError> {
        self.merge_document(E::COLLECTION, ROOT, id, patch)
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.delete_document(E::COLLECTION, ROOT, id)
    }
}

#[async_trait]
impl<E: ChildEntity> ScopedRemoteStore<E> for SqliteRemoteStore {
    async fn list_all(
        &self,
        parent: &E::ParentKey,
        sort: SortOrder,
    ) -> Result<Vec<E>, RemoteError> {
        self.list(E::COLLECTION, &parent.to_string(), &[], sort)
    }

    async fn get(&self, parent: &E::ParentKey, id: &str) -> Result<Option<E>, RemoteError> {
        self.load_document(E::COLLECTION, &parent.to_string(), id)?
            .map(|document| serde_json::from_value(document).map_err(RemoteError::from))
            .transpose()
    }

    async fn create(&self, parent: &E::ParentKey, draft: &E::Draft) -> Result<String, RemoteError> {
        self.insert_document(E::COLLECTION, &parent.to_string(), draft)
    }

    async fn update(
        &self,
        parent: &E::ParentKey,
        id: &str,
        patch: &E::Patch,
    ) -> Result<(), RemoteError> {
        self.merge_document(E::COLLECTION, &parent.to_string(), id, patch)
    }

    async fn delete(&self, parent: &E::ParentKey, id: &str) -> Result<(), RemoteError> {
        self.delete_document(E::COLLECTION, &parent.to_string(), id)
    }
}
