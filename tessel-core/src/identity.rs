//! Identity types for tessel entities
//!
//! Every entity carries a [`Key`]: either a process-local [`LocalHandle`]
//! (the entity has never been persisted) or a backend-assigned typed id.
//! Cross-entity references are keys as well, so a shape can point at a
//! template that has not been saved yet.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Generate a new UUIDv7 identity (timestamp-sortable).
pub fn new_entity_id() -> Uuid {
    Uuid::now_v7()
}

/// Common behaviour of the typed persistent identities.
pub trait EntityIdType:
    Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Wrap a raw UUID.
    fn new(uuid: Uuid) -> Self;

    /// The raw UUID behind this id.
    fn as_uuid(&self) -> Uuid;

    /// Fresh timestamp-sortable id.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_entity_id!(
    /// Identity of the project settings record.
    ProjectId, "project"
);
define_entity_id!(
    /// Identity of a design (a named set of styles).
    DesignId, "design"
);
define_entity_id!(StyleId, "style");
define_entity_id!(ModelId, "model");
define_entity_id!(ModelObjectId, "model-object");
define_entity_id!(DiagramModelObjectId, "diagram-model-object");
define_entity_id!(TemplateId, "template");
define_entity_id!(ModelMappingId, "model-mapping");
define_entity_id!(DiagramId, "diagram");
define_entity_id!(ShapeId, "shape");

// ============================================================================
// LOCAL HANDLES
// ============================================================================

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Process-unique reference identity of an entity that has no persistent id
/// yet. Handles are handed out in increasing order, so ordering by handle is
/// ordering by construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalHandle(u64);

impl LocalHandle {
    /// Allocate the next handle.
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// KEYS
// ============================================================================

/// Identity slot of an entity: empty (transient) or filled (persisted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key<I> {
    /// Never persisted; identified by reference identity only.
    Transient(LocalHandle),
    /// Persisted with a backend-assigned identity.
    Persisted(I),
}

/// Key with the kind-specific id type erased.
pub type AnyKey = Key<Uuid>;

impl<I> Key<I> {
    /// Key for a brand new entity.
    pub fn fresh() -> Self {
        Key::Transient(LocalHandle::next())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Key::Transient(_))
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, Key::Persisted(_))
    }
}

impl<I: EntityIdType> Key<I> {
    /// The persistent identity, if assigned.
    pub fn id(&self) -> Option<I> {
        match self {
            Key::Persisted(id) => Some(*id),
            Key::Transient(_) => None,
        }
    }

    pub fn handle(&self) -> Option<LocalHandle> {
        match self {
            Key::Transient(handle) => Some(*handle),
            Key::Persisted(_) => None,
        }
    }

    pub fn erase(&self) -> AnyKey {
        match self {
            Key::Transient(handle) => Key::Transient(*handle),
            Key::Persisted(id) => Key::Persisted(id.as_uuid()),
        }
    }

    /// Re-type an erased key. The caller is responsible for the kind matching.
    pub fn from_any(key: AnyKey) -> Self {
        match key {
            Key::Transient(handle) => Key::Transient(handle),
            Key::Persisted(uuid) => Key::Persisted(I::new(uuid)),
        }
    }

    /// Rewrite a transient key whose handle received an identity.
    pub fn resolve(&self, ids: &IdAssignments) -> Self {
        match self {
            Key::Transient(handle) => match ids.get(*handle) {
                Some(uuid) => Key::Persisted(I::new(uuid)),
                None => *self,
            },
            Key::Persisted(_) => *self,
        }
    }
}

impl<I: fmt::Display> fmt::Display for Key<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Transient(handle) => write!(f, "transient{}", handle),
            Key::Persisted(id) => write!(f, "{}", id),
        }
    }
}

impl<I: EntityIdType> From<I> for Key<I> {
    fn from(id: I) -> Self {
        Key::Persisted(id)
    }
}

/// Identities handed out by a store during a durable write, keyed by the
/// local handle each new entity carried before the write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAssignments {
    assigned: HashMap<LocalHandle, Uuid>,
}

impl IdAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, handle: LocalHandle, id: Uuid) {
        self.assigned.insert(handle, id);
    }

    pub fn get(&self, handle: LocalHandle) -> Option<Uuid> {
        self.assigned.get(&handle).copied()
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    /// Fold another set of assignments into this one.
    pub fn extend(&mut self, other: &IdAssignments) {
        self.assigned.extend(other.assigned.iter().map(|(h, id)| (*h, *id)));
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocalHandle, Uuid)> + '_ {
        self.assigned.iter().map(|(h, id)| (*h, *id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_monotonic() {
        let a = LocalHandle::next();
        let b = LocalHandle::next();
        assert!(b > a);
    }

    #[test]
    fn test_fresh_key_is_transient() {
        let key = Key::<StyleId>::fresh();
        assert!(key.is_transient());
        assert!(key.id().is_none());
        assert!(key.handle().is_some());
    }

    #[test]
    fn test_resolve_fills_identity() {
        let key = Key::<ShapeId>::fresh();
        let uuid = new_entity_id();
        let mut ids = IdAssignments::new();
        ids.assign(key.handle().unwrap(), uuid);

        let resolved = key.resolve(&ids);
        assert_eq!(resolved, Key::Persisted(ShapeId::new(uuid)));
        assert_eq!(resolved.erase(), Key::Persisted(uuid));
        assert_eq!(Key::<ShapeId>::from_any(resolved.erase()), resolved);
    }

    #[test]
    fn test_resolve_leaves_unknown_handles() {
        let key = Key::<ShapeId>::fresh();
        assert_eq!(key.resolve(&IdAssignments::new()), key);
    }

    #[test]
    fn test_key_display() {
        let id = DiagramId::new(Uuid::nil());
        let key: Key<DiagramId> = id.into();
        assert_eq!(
            key.to_string(),
            "diagram:00000000-0000-0000-0000-000000000000"
        );
        assert!(Key::<DiagramId>::fresh().to_string().starts_with("transient#"));
    }

    #[test]
    fn test_new_entity_id_is_v7() {
        assert_eq!(new_entity_id().get_version_num(), 7);
    }
}
