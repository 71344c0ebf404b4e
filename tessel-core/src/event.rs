//! Change notifications raised by the entity cache.

use crate::{EntityRef, Owner, ShapeConnection};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A change applied to the cache. Raised synchronously after the in-memory
/// mutation, before the mutating call returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    /// Entity inserted, or undeleted.
    Inserted(EntityRef),
    Updated(EntityRef),
    OwnerChanged { entity: EntityRef, owner: Owner },
    Deleted(EntityRef),
    ConnectionInserted(ShapeConnection),
    ConnectionDeleted(ShapeConnection),
    Committed {
        inserted: usize,
        updated: usize,
        deleted: usize,
    },
    Discarded,
}

impl ChangeEvent {
    /// Entity the event is about, if it concerns a single entity.
    pub fn entity(&self) -> Option<EntityRef> {
        match self {
            ChangeEvent::Inserted(entity)
            | ChangeEvent::Updated(entity)
            | ChangeEvent::Deleted(entity)
            | ChangeEvent::OwnerChanged { entity, .. } => Some(*entity),
            _ => None,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityKind, Key, ShapeId};

    #[test]
    fn test_event_entity() {
        let shape = EntityRef::of(EntityKind::Shape, Key::<ShapeId>::fresh());
        assert_eq!(ChangeEvent::Deleted(shape).entity(), Some(shape));
        assert_eq!(
            ChangeEvent::OwnerChanged {
                entity: shape,
                owner: Owner::Project
            }
            .entity(),
            Some(shape)
        );
        assert_eq!(ChangeEvent::Discarded.entity(), None);
    }
}
