use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::collection::{
    confirm_placeholder, insert_placeholder, patch_record, remove_record, replace_record,
    touch_record, Inverse,
};
use super::entity::{ChildEntity, Entity, EntityId};
use super::{read_lock, write_lock};
use crate::clock::Clock;
use crate::error::{RemoteError, RollbackOutcome, StoreError, WriteOp};
use crate::events::{EventEmitter, SdkEvent};
use crate::persist::ScopedRemoteStore;

/// Local mirror of a nested collection, one ordered bucket per parent
pub struct GroupedCache<E: ChildEntity> {
    remote: Arc<dyn ScopedRemoteStore<E>>,
    clock: Arc<dyn Clock>,
    buckets: RwLock<HashMap<E::ParentKey, Vec<E>>>,
    events: Option<Arc<EventEmitter>>,
}

impl<E: ChildEntity> GroupedCache<E> {
    pub fn new(remote: Arc<dyn ScopedRemoteStore<E>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            clock,
            buckets: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.events = Some(emitter);
        self
    }

    /// Cached records under `parent`, empty if the bucket was never loaded
    pub fn records(&self, parent: &E::ParentKey) -> Vec<E> {
        read_lock(&self.buckets)
            .get(parent)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, parent: &E::ParentKey, id: &str) -> Option<E> {
        read_lock(&self.buckets)
            .get(parent)?
            .iter()
            .find(|record| record.id().is(id))
            .cloned()
    }

    /// Whether the bucket for `parent` exists locally
    pub fn contains(&self, parent: &E::ParentKey) -> bool {
        read_lock(&self.buckets).contains_key(parent)
    }

    /// Replaces the bucket for `parent` with the remote contents
    pub async fn fetch(&self, parent: &E::ParentKey) -> Result<Vec<E>, StoreError> {
        let records = self
            .remote
            .list_all(parent, E::SORT)
            .await
            .map_err(|e| {
                warn!("Failed to fetch {} for {parent}: {e}", E::COLLECTION);
                StoreError::Fetch(e)
            })?;

        write_lock(&self.buckets).insert(parent.clone(), records.clone());
        info!("Loaded {} {} for {parent}", records.len(), E::COLLECTION);
        self.emit(SdkEvent::CacheLoaded {
            collection: E::COLLECTION,
            count: records.len(),
        });

        Ok(records)
    }

    /// Adds a record under `parent` optimistically, creating the bucket if needed
    pub async fn add(&self, parent: &E::ParentKey, draft: E::Draft) -> Result<E, StoreError> {
        let placeholder = E::from_draft(EntityId::temporary(), &draft, self.clock.now());
        let temp_id = placeholder.id().clone();
        let (inverse, created_bucket) = {
            let mut buckets = write_lock(&self.buckets);
            let created_bucket = !buckets.contains_key(parent);
            let inverse =
                insert_placeholder(buckets.entry(parent.clone()).or_default(), placeholder);
            (inverse, created_bucket)
        };

        match self.remote.create(parent, &draft).await {
            Ok(id) => {
                let confirmed = match self.read_back(parent, &id).await {
                    Some(record) => record,
                    None => E::from_draft(EntityId::Persisted(id), &draft, self.clock.now()),
                };
                let mut buckets = write_lock(&self.buckets);
                let confirmed_locally = buckets
                    .get_mut(parent)
                    .map(|bucket| confirm_placeholder(bucket, &temp_id, confirmed.clone()))
                    .unwrap_or(false);
                if !confirmed_locally {
                    debug!(
                        "Placeholder {temp_id} left {} for {parent} before confirmation",
                        E::COLLECTION
                    );
                }
                Ok(confirmed)
            }
            Err(e) => {
                let rollback = self.revert(parent, Some(inverse));
                if created_bucket {
                    let mut buckets = write_lock(&self.buckets);
                    if buckets.get(parent).is_some_and(|bucket| bucket.is_empty()) {
                        buckets.remove(parent);
                    }
                }
                Err(self.rolled_back(parent, WriteOp::Add, e, rollback))
            }
        }
    }

    pub async fn update(
        &self,
        parent: &E::ParentKey,
        id: &str,
        patch: E::Patch,
    ) -> Result<Option<E>, StoreError> {
        let applied = write_lock(&self.buckets)
            .get_mut(parent)
            .and_then(|bucket| patch_record(bucket, id, &patch));

        match self.remote.update(parent, id, &patch).await {
            Ok(()) => {
                if applied.is_none() {
                    return Ok(None);
                }
                let now = self.clock.now();
                let stored = self.read_back(parent, id).await;
                Ok(write_lock(&self.buckets)
                    .get_mut(parent)
                    .and_then(|bucket| match stored {
                        Some(record) => replace_record(bucket, record),
                        None => touch_record(bucket, id, now),
                    }))
            }
            Err(e) => {
                let rollback = self.revert(parent, applied.map(|(_, inverse)| inverse));
                Err(self.rolled_back(parent, WriteOp::Update, e, rollback))
            }
        }
    }

    pub async fn delete(&self, parent: &E::ParentKey, id: &str) -> Result<(), StoreError> {
        let removed = write_lock(&self.buckets)
            .get_mut(parent)
            .and_then(|bucket| remove_record(bucket, id));

        match self.remote.delete(parent, id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let rollback = self.revert(parent, removed);
                Err(self.rolled_back(parent, WriteOp::Delete, e, rollback))
            }
        }
    }

    fn revert(
        &self,
        parent: &E::ParentKey,
        inverse: Option<Inverse<E>>,
    ) -> RollbackOutcome {
        let Some(inverse) = inverse else {
            return RollbackOutcome::NothingToRevert;
        };
        match write_lock(&self.buckets).get_mut(parent) {
            Some(bucket) => inverse.revert(bucket),
            None => RollbackOutcome::NothingToRevert,
        }
    }

    /// The record as the store now holds it, with the store's timestamps
    async fn read_back(&self, parent: &E::ParentKey, id: &str) -> Option<E> {
        match self.remote.get(parent, id).await {
            Ok(record) => record,
            Err(e) => {
                debug!("Could not read back {} {id} for {parent}: {e}", E::COLLECTION);
                None
            }
        }
    }

    fn rolled_back(
        &self,
        parent: &E::ParentKey,
        op: WriteOp,
        source: RemoteError,
        rollback: RollbackOutcome,
    ) -> StoreError {
        warn!(
            "Remote {op} on {} for {parent} failed, rolled back ({rollback:?}): {source}",
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
