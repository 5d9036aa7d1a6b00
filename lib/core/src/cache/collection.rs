use chrono::{DateTime, Utc};

use super::entity::{Entity, EntityId};
use crate::error::RollbackOutcome;

/// Undo step recorded when an optimistic change is applied to a record list
#[derive(Debug)]
pub(crate) enum Inverse<E> {
    RemovePlaceholder(EntityId),
    Restore { index: usize, snapshot: E },
    Reinsert { index: usize, record: E },
}

impl<E: Entity> Inverse<E> {
    /// Puts `records` back to how it was before the change
    pub(crate) fn revert(self, records: &mut Vec<E>) -> RollbackOutcome {
        match self {
            Inverse::RemovePlaceholder(temp_id) => {
                records.retain(|record| record.id() != &temp_id);
                RollbackOutcome::PlaceholderRemoved
            }
            Inverse::Restore { index, snapshot } => {
                let position = if records.get(index).map(|r| r.id()) == Some(snapshot.id()) {
                    Some(index)
                } else {
                    records.iter().position(|r| r.id() == snapshot.id())
                };
                match position {
                    Some(position) => records[position] = snapshot,
                    None => records.insert(index.min(records.len()), snapshot),
                }
                RollbackOutcome::SnapshotRestored { index }
            }
            Inverse::Reinsert { index, record } => {
                if records.iter().any(|r| r.id() == record.id()) {
                    return RollbackOutcome::AlreadyPresent;
                }
                records.insert(index.min(records.len()), record);
                RollbackOutcome::Reinserted { index }
            }
        }
    }
}

pub(crate) fn insert_placeholder<E: Entity>(records: &mut Vec<E>, placeholder: E) -> Inverse<E> {
    let temp_id = placeholder.id().clone();
    records.push(placeholder);
    Inverse::RemovePlaceholder(temp_id)
}

/// Swaps the placeholder for the confirmed record. Returns false when the
/// placeholder is gone, e.g. because a reload replaced the list meanwhile.
pub(crate) fn confirm_placeholder<E: Entity>(
    records: &mut [E],
    temp_id: &EntityId,
    confirmed: E,
) -> bool {
    match records.iter_mut().find(|record| record.id() == temp_id) {
        Some(slot) => {
            *slot = confirmed;
            true
        }
        None => false,
    }
}

/// Applies `patch` in place. `None` if the record is not cached.
pub(crate) fn patch_record<E: Entity>(
    records: &mut [E],
    id: &str,
    patch: &E::Patch,
) -> Option<(E, Inverse<E>)> {
    let index = records.iter().position(|record| record.id().is(id))?;
    let snapshot = records[index].clone();
    records[index].apply_patch(patch);
    Some((records[index].clone(), Inverse::Restore { index, snapshot }))
}

pub(crate) fn touch_record<E: Entity>(
    records: &mut [E],
    id: &str,
    now: DateTime<Utc>,
) -> Option<E> {
    let record = records.iter_mut().find(|record| record.id().is(id))?;
    record.touch(now);
    Some(record.clone())
}

/// Swaps the cached copy of `record` for the given one. `None` if not cached.
pub(crate) fn replace_record<E: Entity>(records: &mut [E], record: E) -> Option<E> {
    let slot = records.iter_mut().find(|r| r.id() == record.id())?;
    *slot = record;
    Some(slot.clone())
}

/// Removes the record, remembering where it was. `None` if not cached.
pub(crate) fn remove_record<E: Entity>(records: &mut Vec<E>, id: &str) -> Option<Inverse<E>> {
    let index = records.iter().position(|record| record.id().is(id))?;
    let record = records.remove(index);
    Some(Inverse::Reinsert { index, record })
}
