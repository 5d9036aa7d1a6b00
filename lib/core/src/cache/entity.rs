use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TEMPORARY_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a cached record
///
/// Records added optimistically carry a `Temporary` handle until the remote
/// store confirms the write and assigns the `Persisted` id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityId {
    Temporary(u64),
    Persisted(String),
}

impl EntityId {
    /// Allocates a handle that is unique within this process
    pub fn temporary() -> Self {
        EntityId::Temporary(NEXT_TEMPORARY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, EntityId::Temporary(_))
    }

    /// The remote id, `None` for placeholders
    pub fn as_persisted(&self) -> Option<&str> {
        match self {
            EntityId::Persisted(id) => Some(id),
            EntityId::Temporary(_) => None,
        }
    }

    /// True if this is the persisted id `id`. Placeholders never match.
    pub fn is(&self, id: &str) -> bool {
        self.as_persisted() == Some(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Temporary(handle) => write!(f, "temp_{handle}"),
            EntityId::Persisted(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Persisted(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId::Persisted(id)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Anything read back from a store has been persisted.
        String::deserialize(deserializer).map(EntityId::Persisted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Single-field ordering applied by the remote store when listing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortOrder {
    /// Field name as stored in the document
    pub field: &'static str,
    pub direction: SortDirection,
}

impl SortOrder {
    pub const fn ascending(field: &'static str) -> Self {
        Self {
            field,
            direction: SortDirection::Ascending,
        }
    }

    pub const fn descending(field: &'static str) -> Self {
        Self {
            field,
            direction: SortDirection::Descending,
        }
    }
}

/// Equality filter on a stored field
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: serde_json::Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A record kind mirrored by the caches
pub trait Entity: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Fields supplied by the caller when creating a record
    type Draft: Clone + fmt::Debug + Send + Sync + Serialize;
    /// Partial update, unset fields are left alone
    type Patch: Clone + fmt::Debug + Send + Sync + Serialize;

    /// Name of the remote collection
    const COLLECTION: &'static str;
    /// Order the remote store returns a full listing in
    const SORT: SortOrder;

    fn id(&self) -> &EntityId;

    fn from_draft(id: EntityId, draft: &Self::Draft, now: DateTime<Utc>) -> Self;

    fn apply_patch(&mut self, patch: &Self::Patch);

    /// Stamps the record as updated at `now`
    fn touch(&mut self, now: DateTime<Utc>);
}

/// A record kind stored in a collection nested under a parent record
pub trait ChildEntity: Entity {
    type ParentKey: Clone + fmt::Debug + fmt::Display + Eq + Hash + Send + Sync + 'static;
}
