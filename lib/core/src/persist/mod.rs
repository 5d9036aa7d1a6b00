pub(crate) mod sqlite;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use std::cmp::Ordering;

use crate::cache::{ChildEntity, Entity, Filter, SortDirection, SortOrder};
use crate::error::RemoteError;
use crate::models::{AttendanceRecord, Course, Enrollment, Mark, Stage, Student};

pub use sqlite::SqliteRemoteStore;

/// CRUD access to a top-level remote collection
#[async_trait]
pub trait RemoteStore<E: Entity>: Send + Sync {
    /// List every record, ordered by `sort`
    async fn list_all(&self, sort: SortOrder) -> Result<Vec<E>, RemoteError>;

    /// List the records matching all `filters`, ordered by `sort`
    async fn list_where(&self, filters: &[Filter], sort: SortOrder)
        -> Result<Vec<E>, RemoteError>;

    async fn get(&self, id: &str) -> Result<Option<E>, RemoteError>;

    /// Create a record and return the id the store assigned to it
    async fn create(&self, draft: &E::Draft) -> Result<String, RemoteError>;

    async fn update(&self, id: &str, patch: &E::Patch) -> Result<(), RemoteError>;

    async fn delete(&self, id: &str) -> Result<(), RemoteError>;
}

/// CRUD access to a remote collection nested under a parent record
#[async_trait]
pub trait ScopedRemoteStore<E: ChildEntity>: Send + Sync {
    async fn list_all(
        &self,
        parent: &E::ParentKey,
        sort: SortOrder,
    ) -> Result<Vec<E>, RemoteError>;

    async fn get(&self, parent: &E::ParentKey, id: &str) -> Result<Option<E>, RemoteError>;

    async fn create(&self, parent: &E::ParentKey, draft: &E::Draft)
        -> Result<String, RemoteError>;

    async fn update(
        &self,
        parent: &E::ParentKey,
        id: &str,
        patch: &E::Patch,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, parent: &E::ParentKey, id: &str) -> Result<(), RemoteError>;
}

/// A backend able to serve every collection the SDK caches
pub trait RecordsBackend:
    RemoteStore<Student>
    + RemoteStore<Stage>
    + RemoteStore<Course>
    + ScopedRemoteStore<Enrollment>
    + ScopedRemoteStore<Mark>
    + ScopedRemoteStore<AttendanceRecord>
{
}

impl<T> RecordsBackend for T where
    T: RemoteStore<Student>
        + RemoteStore<Stage>
        + RemoteStore<Course>
        + ScopedRemoteStore<Enrollment>
        + ScopedRemoteStore<Mark>
        + ScopedRemoteStore<AttendanceRecord>
{
}

pub(crate) fn matches_filters(document: &Value, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|filter| document.get(&filter.field) == Some(&filter.value))
}

/// Orders documents by a single field. Missing fields sort first.
pub(crate) fn sort_documents(documents: &mut [Value], sort: SortOrder) {
    documents.sort_by(|a, b| {
        let ordering = compare_values(a.get(sort.field), b.get(sort.field));
        match sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => {
            match (
                DateTime::parse_from_rfc3339(a),
                DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_documents() {
        let mut docs = vec![
            json!({ "name": "Carol", "level": 3 }),
            json!({ "name": "alice" }),
            json!({ "name": "Bob", "level": 1 }),
        ];
        sort_documents(&mut docs, SortOrder::ascending("level"));
        assert_eq!(json!("alice"), docs[0]["name"]);
        assert_eq!(json!("Bob"), docs[1]["name"]);

        sort_documents(&mut docs, SortOrder::descending("level"));
        assert_eq!(json!("Carol"), docs[0]["name"]);
    }

    #[test]
    fn test_sort_timestamps_by_instant() {
        let mut docs = vec![
            json!({ "date": "2024-10-01T09:00:00Z" }),
            json!({ "date": "2024-10-01T09:00:00.500Z" }),
            json!({ "date": "2024-10-01T08:59:59.999999999Z" }),
        ];
        sort_documents(&mut docs, SortOrder::descending("date"));
        assert_eq!(json!("2024-10-01T09:00:00.500Z"), docs[0]["date"]);
        assert_eq!(json!("2024-10-01T09:00:00Z"), docs[1]["date"]);
        assert_eq!(json!("2024-10-01T08:59:59.999999999Z"), docs[2]["date"]);
    }

    #[test]
    fn test_matches_filters() {
        let doc = json!({ "stageId": "s1", "name": "Alice" });
        assert!(matches_filters(&doc, &[Filter::eq("stageId", "s1")]));
        assert!(!matches_filters(&doc, &[Filter::eq("stageId", "s2")]));
        assert!(matches_filters(&doc, &[]));
    }
}
