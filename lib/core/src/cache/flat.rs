use log::{debug, info, warn};
use std::sync::{Arc, RwLock};

use super::collection::{
    confirm_placeholder, insert_placeholder, patch_record, remove_record, replace_record,
    touch_record,
};
use super::entity::{Entity, EntityId, Filter};
use super::{read_lock, write_lock};
use crate::clock::Clock;
use crate::error::{RemoteError, RollbackOutcome, StoreError, WriteOp};
use crate::events::{EventEmitter, SdkEvent};
use crate::persist::RemoteStore;

/// Local mirror of a top-level remote collection
pub struct EntityCache<E: Entity> {
    remote: Arc<dyn RemoteStore<E>>,
    clock: Arc<dyn Clock>,
    records: RwLock<Vec<E>>,
    events: Option<Arc<EventEmitter>>,
}

impl<E: Entity> EntityCache<E> {
    pub fn new(remote: Arc<dyn RemoteStore<E>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            clock,
            records: RwLock::new(Vec::new()),
            events: None,
        }
    }

    /// Report loads and rollbacks to `emitter`
    pub fn with_events(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.events = Some(emitter);
        self
    }

    /// Snapshot of the cached records in their current order
    pub fn records(&self) -> Vec<E> {
        read_lock(&self.records).clone()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.records).is_empty()
    }

    /// Looks up a cached record by its persisted id
    pub fn get(&self, id: &str) -> Option<E> {
        read_lock(&self.records)
            .iter()
            .find(|record| record.id().is(id))
            .cloned()
    }

    /// Cached records matching `predicate`, in cache order
    pub fn filter(&self, predicate: impl Fn(&E) -> bool) -> Vec<E> {
        read_lock(&self.records)
            .iter()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }

    /// Replaces the whole collection with the remote contents
    ///
    /// On failure the cached collection is left as it was.
    pub async fn fetch_all(&self) -> Result<Vec<E>, StoreError> {
        let records = self
            .remote
            .list_all(E::SORT)
            .await
            .map_err(|e| {
                warn!("Failed to fetch {}: {e}", E::COLLECTION);
                StoreError::Fetch(e)
            })?;

        *write_lock(&self.records) = records.clone();
        info!("Loaded {} {}", records.len(), E::COLLECTION);
        self.emit(SdkEvent::CacheLoaded {
            collection: E::COLLECTION,
            count: records.len(),
        });

        Ok(records)
    }

    /// Queries the remote store directly, without touching the cache
    pub async fn query(&self, filters: &[Filter]) -> Result<Vec<E>, StoreError> {
        self.remote
            .list_where(filters, E::SORT)
            .await
            .map_err(StoreError::Fetch)
    }

    /// Adds a record optimistically
    ///
    /// A placeholder with a temporary id is visible as soon as this is called.
    /// It is swapped for the record as stored remotely when the create
    /// succeeds, and removed again when it fails.
    pub async fn add(&self, draft: E::Draft) -> Result<E, StoreError> {
        let placeholder = E::from_draft(EntityId::temporary(), &draft, self.clock.now());
        let temp_id = placeholder.id().clone();
        let inverse = insert_placeholder(&mut write_lock(&self.records), placeholder);

        match self.remote.create(&draft).await {
            Ok(id) => {
                let confirmed = match self.read_back(&id).await {
                    Some(record) => record,
                    None => E::from_draft(EntityId::Persisted(id), &draft, self.clock.now()),
                };
                if !confirm_placeholder(&mut write_lock(&self.records), &temp_id, confirmed.clone())
                {
                    debug!(
                        "Placeholder {temp_id} left {} before confirmation",
                        E::COLLECTION
                    );
                }
                Ok(confirmed)
            }
            Err(e) => {
                let rollback = inverse.revert(&mut write_lock(&self.records));
                Err(self.rolled_back(WriteOp::Add, e, rollback))
            }
        }
    }

    /// Patches a record optimistically
    ///
    /// Returns the patched record, or `None` when it was not cached. On failure
    /// the pre-patch snapshot is restored at its original position.
    pub async fn update(&self, id: &str, patch: E::Patch) -> Result<Option<E>, StoreError> {
        let applied = patch_record(&mut write_lock(&self.records), id, &patch);

        match self.remote.update(id, &patch).await {
            Ok(()) => {
                if applied.is_none() {
                    return Ok(None);
                }
                let now = self.clock.now();
                let stored = self.read_back(id).await;
                let mut records = write_lock(&self.records);
                Ok(match stored {
                    Some(record) => replace_record(&mut records, record),
                    None => touch_record(&mut records, id, now),
                })
            }
            Err(e) => {
                let rollback = match applied {
                    Some((_, inverse)) => inverse.revert(&mut write_lock(&self.records)),
                    None => RollbackOutcome::NothingToRevert,
                };
                Err(self.rolled_back(WriteOp::Update, e, rollback))
            }
        }
    }

    /// Deletes a record optimistically
    ///
    /// On failure the record goes back to the index it was removed from.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let removed = remove_record(&mut write_lock(&self.records), id);

        match self.remote.delete(id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let rollback = match removed {
                    Some(inverse) => inverse.revert(&mut write_lock(&self.records)),
                    None => RollbackOutcome::NothingToRevert,
                };
                Err(self.rolled_back(WriteOp::Delete, e, rollback))
            }
        }
    }

    /// The record as the store now holds it, with the store's timestamps
    async fn read_back(&self, id: &str) -> Option<E> {
        match self.remote.get(id).await {
            Ok(record) => record,
            Err(e) => {
                debug!("Could not read back {} {id}: {e}", E::COLLECTION);
                None
            }
        }
    }

    fn rolled_back(
        &self,
        op: WriteOp,
        source: RemoteError,
        rollback: RollbackOutcome,
    ) -> StoreError {
        warn!(
            "Remote {op} on {} failed, rolled back ({rollback:?}): {source}",
            E::COLLECTION
        );
        self.emit(SdkEvent::CacheRolledBack {
            collection: E::COLLECTION,
            op,
        });
        StoreError::Write {
            op,
            source,
            rollback,
        }
    }

    fn emit(&self, event: SdkEvent) {
        if let Some(events) = &self.events {
            events.emit(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_utils::ManualClock;
    use crate::events::test_utils::RecordingListener;
    use crate::models::{NewStage, NewStudent, Stage, Student, StudentPatch};
    use crate::persist::test_utils::FlakyStore;

    fn students(store: &Arc<FlakyStore>) -> EntityCache<Student> {
        EntityCache::new(store.clone(), Arc::new(ManualClock::new()))
    }

    async fn seeded(names: &[&str]) -> (Arc<FlakyStore>, EntityCache<Student>) {
        let store = Arc::new(FlakyStore::new());
        for name in names {
            RemoteStore::<Student>::create(store.inner(), &NewStudent::new(*name))
                .await
                .unwrap();
        }
        let cache = students(&store);
        cache.fetch_all().await.unwrap();
        (store, cache)
    }

    #[tokio::test]
    async fn test_fetch_all_replaces_and_sorts() {
        let (_store, cache) = seeded(&["Carol", "Alice", "Bob"]).await;
        let names: Vec<_> = cache.records().into_iter().map(|s| s.name).collect();
        assert_eq!(vec!["Alice", "Bob", "Carol"], names);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_records() {
        let (store, cache) = seeded(&["Alice", "Bob"]).await;
        let before = cache.records();

        store.set_fail_reads(true);
        let err = cache.fetch_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Fetch(_)));
        assert_eq!(before, cache.records());
    }

    #[tokio::test]
    async fn test_add_confirms_with_remote_id() {
        let (store, cache) = seeded(&[]).await;

        let added = cache.add(NewStudent::new("Alice")).await.unwrap();
        let id = added.id.as_persisted().unwrap().to_string();

        let records = cache.records();
        assert_eq!(1, records.len());
        assert!(records[0].id.is(&id));
        assert!(!records[0].id.is_temporary());

        let remote = RemoteStore::<Student>::get(store.inner(), &id).await.unwrap();
        assert_eq!(Some(added), remote);
        assert_eq!(remote, records.into_iter().next());
    }

    #[tokio::test]
    async fn test_add_falls_back_to_draft_when_read_back_fails() {
        let (store, cache) = seeded(&[]).await;
        let clock = ManualClock::new();

        store.set_fail_reads(true);
        let added = cache.add(NewStudent::new("Alice")).await.unwrap();

        assert!(!added.id.is_temporary());
        assert_eq!(clock.now(), added.created_at);
        assert_eq!(vec![added], cache.records());
    }

    #[tokio::test]
    async fn test_failed_add_leaves_no_trace() {
        let (store, cache) = seeded(&["Bob"]).await;
        let before = cache.records();

        store.set_fail_writes(true);
        let err = cache.add(NewStudent::new("Alice")).await.unwrap_err();

        assert_eq!(Some(500), err.status());
        assert!(matches!(
            err,
            StoreError::Write {
                op: WriteOp::Add,
                rollback: RollbackOutcome::PlaceholderRemoved,
                ..
            }
        ));
        assert_eq!(before, cache.records());
        assert!(cache.filter(|s| s.name == "Alice").is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_visible_while_in_flight() {
        let store = Arc::new(FlakyStore::new());
        let cache = Arc::new(students(&store));
        store.hold_writes();

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.add(NewStudent::new("Alice")).await })
        };

        let mut seen = None;
        for _ in 0..100 {
            if let Some(record) = cache.records().into_iter().next() {
                seen = Some(record);
                break;
            }
            tokio::task::yield_now().await;
        }
        let placeholder = seen.expect("placeholder never appeared");
        assert!(placeholder.id.is_temporary());
        assert_eq!("Alice", placeholder.name);

        store.release_writes();
        let added = task.await.unwrap().unwrap();
        assert_eq!(vec![added], cache.records());
    }

    #[tokio::test]
    async fn test_update_applies_and_stamps() {
        let (store, cache) = seeded(&["Alice"]).await;
        let original = cache.records().remove(0);
        let id = original.id.as_persisted().unwrap().to_string();

        let patch = StudentPatch {
            email: Some("alice@school.test".to_string()),
            ..Default::default()
        };
        let updated = cache.update(&id, patch).await.unwrap().unwrap();

        assert_eq!(Some("alice@school.test".to_string()), updated.email);
        assert_eq!(updated, cache.get(&id).unwrap());

        let remote = RemoteStore::<Student>::get(store.inner(), &id).await.unwrap();
        assert_eq!(Some(updated), remote);
    }

    #[tokio::test]
    async fn test_failed_update_restores_snapshot() {
        let (store, cache) = seeded(&["Alice", "Bob", "Carol"]).await;
        let before = cache.records();
        let id = before[1].id.as_persisted().unwrap().to_string();

        store.set_fail_writes(true);
        let patch = StudentPatch {
            name: Some("Robert".to_string()),
            ..Default::default()
        };
        let err = cache.update(&id, patch).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::Write {
                rollback: RollbackOutcome::SnapshotRestored { index: 1 },
                ..
            }
        ));
        assert_eq!(before, cache.records());
    }

    #[tokio::test]
    async fn test_failed_delete_reinserts_at_original_index() {
        let (store, cache) = seeded(&["Alice", "Bob", "Carol"]).await;
        let before = cache.records();
        let id = before[1].id.as_persisted().unwrap().to_string();

        store.set_fail_writes(true);
        let err = cache.delete(&id).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::Write {
                op: WriteOp::Delete,
                rollback: RollbackOutcome::Reinserted { index: 1 },
                ..
            }
        ));
        assert_eq!(before, cache.records());
    }

    #[tokio::test]
    async fn test_failed_delete_after_reload_keeps_single_copy() {
        let (store, cache) = seeded(&["Alice", "Bob", "Carol"]).await;
        let cache = Arc::new(cache);
        let id = cache.records()[1].id.as_persisted().unwrap().to_string();
        store.hold_writes();

        let task = {
            let cache = cache.clone();
            let id = id.clone();
            tokio::spawn(async move { cache.delete(&id).await })
        };
        for _ in 0..100 {
            if cache.len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(2, cache.len());

        // Bob is still stored remotely, so the reload brings him back.
        cache.fetch_all().await.unwrap();
        store.set_fail_writes(true);
        store.release_writes();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StoreError::Write {
                op: WriteOp::Delete,
                rollback: RollbackOutcome::AlreadyPresent,
                ..
            }
        ));

        let names: Vec<_> = cache.records().into_iter().map(|s| s.name).collect();
        assert_eq!(vec!["Alice", "Bob", "Carol"], names);
        let remote = RemoteStore::<Student>::list_all(store.inner(), Student::SORT)
            .await
            .unwrap();
        assert_eq!(remote, cache.records());
    }

    #[tokio::test]
    async fn test_delete_removes_locally_and_remotely() {
        let (store, cache) = seeded(&["Alice", "Bob"]).await;
        let id = cache.records()[0].id.as_persisted().unwrap().to_string();

        cache.delete(&id).await.unwrap();

        assert!(cache.get(&id).is_none());
        assert_eq!(1, cache.len());
        let remote = RemoteStore::<Student>::get(store.inner(), &id).await.unwrap();
        assert!(remote.is_none());
    }

    #[tokio::test]
    async fn test_write_to_uncached_record() {
        let (store, cache) = seeded(&[]).await;
        store.set_fail_writes(true);

        let err = cache.delete("unknown").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Write {
                rollback: RollbackOutcome::NothingToRevert,
                ..
            }
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_is_reported() {
        let store = Arc::new(FlakyStore::new());
        let emitter = Arc::new(EventEmitter::new());
        let listener = RecordingListener::default();
        emitter.add_listener(Box::new(listener.clone()));

        let cache: EntityCache<Stage> =
            EntityCache::new(store.clone(), Arc::new(ManualClock::new())).with_events(emitter);

        store.set_fail_writes(true);
        let _ = cache.add(NewStage::new("First")).await;

        let events = listener.events();
        assert_eq!(1, events.len());
        assert!(matches!(
            events[0],
            SdkEvent::CacheRolledBack {
                collection: "stages",
                op: WriteOp::Add
            }
        ));
    }
}
