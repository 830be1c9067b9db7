//! Placeholder reservations for forward references.

use super::EntityId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    allocated: EntityId,
    promoted: bool,
}

/// Maps ids from the source file to placeholder entities created in the
/// repository.
///
/// A placeholder is *promoted* once the row carrying its original id has
/// been persisted into it. Unpromoted placeholders are deleted when the job
/// finishes. One table holds the reservations of one import job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderTable {
    reservations: BTreeMap<EntityId, Reservation>,
}

impl PlaceholderTable {
    /// Returns the id allocated for `original`, if reserved.
    #[must_use]
    pub fn allocated(&self, original: EntityId) -> Option<EntityId> {
        self.reservations.get(&original).map(|r| r.allocated)
    }

    /// Records a new reservation.
    pub fn reserve(&mut self, original: EntityId, allocated: EntityId) {
        self.reservations.insert(
            original,
            Reservation {
                allocated,
                promoted: false,
            },
        );
    }

    /// Records that the row carrying `original` was created as `allocated`,
    /// so later references to `original` resolve to it.
    pub fn remember(&mut self, original: EntityId, allocated: EntityId) {
        self.reservations.insert(
            original,
            Reservation {
                allocated,
                promoted: true,
            },
        );
    }

    /// Marks the reservation for `original` as filled.
    ///
    /// Returns the allocated id, or `None` if nothing was reserved.
    pub fn promote(&mut self, original: EntityId) -> Option<EntityId> {
        self.reservations.get_mut(&original).map(|r| {
            r.promoted = true;
            r.allocated
        })
    }

    /// Allocated ids that were never promoted.
    #[must_use]
    pub fn unpromoted(&self) -> Vec<EntityId> {
        self.reservations
            .values()
            .filter(|r| !r.promoted)
            .map(|r| r.allocated)
            .collect()
    }

    /// Number of reservations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    /// Returns `true` if nothing is reserved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}
