//! Entity contract, ownership links and polymorphic references.

use crate::{
    AnyKey, DesignId, DiagramId, EntityIdType, EntityKind, IdAssignments, Key, ModelId,
    ModelObjectId, ShapeId, TemplateId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A persistable domain object.
///
/// Implementors carry their own [`Key`]; the cache never hands out an entity
/// whose key disagrees with the collection it lives in.
pub trait Entity: Clone + fmt::Debug + 'static {
    /// Typed persistent identity of this kind.
    type Id: EntityIdType;

    /// Kind discriminator; selects the collection in the cache and the table
    /// in a store.
    const KIND: EntityKind;

    fn key(&self) -> Key<Self::Id>;

    fn set_key(&mut self, key: Key<Self::Id>);

    /// Rewrite references to entities that just received an identity.
    fn remap_keys(&mut self, _ids: &IdAssignments) {}

    /// Release hook for kinds holding derived resources. Kinds that do not
    /// opt in keep the default.
    fn releasable(&mut self) -> Option<&mut dyn Releasable> {
        None
    }

    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(Self::KIND, self.key().erase())
    }
}

/// Explicit resource-release capability, called when a session is discarded.
pub trait Releasable {
    fn release(&mut self);
}

/// Reference to an entity by kind and (erased) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub key: AnyKey,
}

impl EntityRef {
    pub fn new(kind: EntityKind, key: AnyKey) -> Self {
        Self { kind, key }
    }

    pub fn of<I: EntityIdType>(kind: EntityKind, key: Key<I>) -> Self {
        Self::new(kind, key.erase())
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Key::Transient(handle) => write!(f, "{} (transient{})", self.kind, handle),
            Key::Persisted(id) => write!(f, "{} {}", self.kind, id),
        }
    }
}

/// Structural owner of an entity. Drives cascade scope; it is not memory
/// ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    /// The single project of the open session.
    Project,
    Design(Key<DesignId>),
    Template(Key<TemplateId>),
    Diagram(Key<DiagramId>),
    Shape(Key<ShapeId>),
    Model(Key<ModelId>),
    ModelObject(Key<ModelObjectId>),
}

impl Owner {
    /// Kind of the owning entity, `None` for the project itself.
    pub fn kind(&self) -> Option<EntityKind> {
        self.entity_ref().map(|r| r.kind)
    }

    pub fn entity_ref(&self) -> Option<EntityRef> {
        match self {
            Owner::Project => None,
            Owner::Design(key) => Some(EntityRef::of(EntityKind::Design, *key)),
            Owner::Template(key) => Some(EntityRef::of(EntityKind::Template, *key)),
            Owner::Diagram(key) => Some(EntityRef::of(EntityKind::Diagram, *key)),
            Owner::Shape(key) => Some(EntityRef::of(EntityKind::Shape, *key)),
            Owner::Model(key) => Some(EntityRef::of(EntityKind::Model, *key)),
            Owner::ModelObject(key) => Some(EntityRef::of(EntityKind::ModelObject, *key)),
        }
    }

    pub fn resolve(&self, ids: &IdAssignments) -> Owner {
        match self {
            Owner::Project => Owner::Project,
            Owner::Design(key) => Owner::Design(key.resolve(ids)),
            Owner::Template(key) => Owner::Template(key.resolve(ids)),
            Owner::Diagram(key) => Owner::Diagram(key.resolve(ids)),
            Owner::Shape(key) => Owner::Shape(key.resolve(ids)),
            Owner::Model(key) => Owner::Model(key.resolve(ids)),
            Owner::ModelObject(key) => Owner::ModelObject(key.resolve(ids)),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity_ref() {
            Some(owner) => write!(f, "{}", owner),
            None => f.write_str("project"),
        }
    }
}
