//! Per-kind entity collections and the bucket state machine.

use crate::{ChangeSet, Changes, Residency};
use std::collections::BTreeMap;
use tessel_core::{
    Design, Diagram, DiagramModelObject, Entity, EntityIdType, EntityRef, IdAssignments,
    ItemState, Key, LocalHandle, Model, ModelMapping, ModelObject, Owner, ProjectSettings, Shape,
    StateError, Style, StyleId, Template, TemplateId,
};
use tracing::trace;

/// A persisted entity with its owner and lifecycle state.
#[derive(Debug, Clone)]
pub struct Bucket<T> {
    pub object: T,
    pub owner: Owner,
    /// Owner as of the last load or save.
    pub stored_owner: Owner,
    pub state: ItemState,
}

#[derive(Debug, Clone)]
struct TransientEntry<T> {
    object: T,
    owner: Owner,
}

/// Outcome of discarding a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscardStats {
    /// Never-persisted entities dropped.
    pub transient: usize,
    /// Persisted entities dropped, deleted ones included.
    pub loaded: usize,
    /// Entities whose derived resources were released.
    pub released: usize,
}

impl std::ops::AddAssign for DiscardStats {
    fn add_assign(&mut self, other: Self) {
        self.transient += other.transient;
        self.loaded += other.loaded;
        self.released += other.released;
    }
}

/// Entities of one kind: persisted ones in buckets keyed by identity,
/// transient ones keyed by local handle.
///
/// Keys passed in must already be resolved against the session's identity
/// assignments; a transient key of a committed entity is not found here.
#[derive(Debug)]
pub struct Collection<T: Entity> {
    buckets: BTreeMap<T::Id, Bucket<T>>,
    transient: BTreeMap<LocalHandle, TransientEntry<T>>,
}

impl<T: Entity> Default for Collection<T> {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            transient: BTreeMap::new(),
        }
    }
}

fn entity_ref<T: Entity>(key: Key<T::Id>) -> EntityRef {
    EntityRef::of(T::KIND, key)
}

impl<T: Entity> Collection<T> {
    /// Lifecycle state, `New` for transient entities.
    pub(crate) fn state(&self, key: Key<T::Id>) -> Option<ItemState> {
        match key {
            Key::Transient(handle) => self.transient.get(&handle).map(|_| ItemState::New),
            Key::Persisted(id) => self.buckets.get(&id).map(|b| b.state),
        }
    }

    pub(crate) fn is_tracked(&self, key: Key<T::Id>) -> bool {
        self.state(key).is_some()
    }

    pub(crate) fn is_live(&self, key: Key<T::Id>) -> bool {
        matches!(self.state(key), Some(state) if state != ItemState::Deleted)
    }

    /// Entity in any state, deleted included.
    pub(crate) fn get_any(&self, key: Key<T::Id>) -> Option<&T> {
        match key {
            Key::Transient(handle) => self.transient.get(&handle).map(|e| &e.object),
            Key::Persisted(id) => self.buckets.get(&id).map(|b| &b.object),
        }
    }

    pub(crate) fn get(&self, key: Key<T::Id>) -> Option<&T> {
        if self.is_live(key) {
            self.get_any(key)
        } else {
            None
        }
    }

    pub(crate) fn owner(&self, key: Key<T::Id>) -> Option<Owner> {
        match key {
            Key::Transient(handle) => self.transient.get(&handle).map(|e| e.owner),
            Key::Persisted(id) => self.buckets.get(&id).map(|b| b.owner),
        }
    }

    /// Non-deleted entities with their owners. Persisted first, then
    /// transient in creation order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&T, Owner)> {
        self.buckets
            .values()
            .filter(|b| b.state != ItemState::Deleted)
            .map(|b| (&b.object, b.owner))
            .chain(self.transient.values().map(|e| (&e.object, e.owner)))
    }

    pub(crate) fn iter_owned_by(&self, owner: Owner) -> impl Iterator<Item = &T> {
        self.iter()
            .filter(move |(_, o)| *o == owner)
            .map(|(object, _)| object)
    }

    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.transient.is_empty()
            || self
                .buckets
                .values()
                .any(|b| b.state != ItemState::Original)
    }

    // === Mutations ===

    pub(crate) fn insert_transient(&mut self, entity: T, owner: Owner) -> Result<(), StateError> {
        let handle = match entity.key() {
            Key::Transient(handle) => handle,
            Key::Persisted(_) => {
                return Err(StateError::AlreadyPersisted {
                    entity: entity.entity_ref(),
                })
            }
        };
        if self.transient.contains_key(&handle) {
            return Err(StateError::AlreadyTracked {
                entity: entity.entity_ref(),
            });
        }
        trace!(entity = %entity.entity_ref(), owner = %owner, "transient entity tracked");
        self.transient
            .insert(handle, TransientEntry { object: entity, owner });
        Ok(())
    }

    /// Track an entity handed over by a loader. Entities already tracked win;
    /// returns whether the entity was taken.
    pub(crate) fn absorb(&mut self, entity: T, owner: Owner) -> bool {
        let Some(id) = entity.key().id() else {
            return false;
        };
        if self.buckets.contains_key(&id) {
            return false;
        }
        self.buckets.insert(
            id,
            Bucket {
                object: entity,
                owner,
                stored_owner: owner,
                state: ItemState::Original,
            },
        );
        true
    }

    fn live_bucket_mut(&mut self, id: T::Id) -> Result<&mut Bucket<T>, StateError> {
        match self.buckets.get_mut(&id) {
            None => Err(StateError::NotFound {
                kind: T::KIND,
                key: Key::Persisted(id).erase(),
            }),
            Some(bucket) if bucket.state == ItemState::Deleted => Err(StateError::AlreadyDeleted {
                entity: entity_ref::<T>(Key::Persisted(id)),
            }),
            Some(bucket) => Ok(bucket),
        }
    }

    fn transient_mut(&mut self, handle: LocalHandle) -> Result<&mut TransientEntry<T>, StateError> {
        self.transient
            .get_mut(&handle)
            .ok_or(StateError::NotFound {
                kind: T::KIND,
                key: Key::<T::Id>::Transient(handle).erase(),
            })
    }

    /// Replace the stored content and mark it modified. An owner-changed
    /// entity stays owner-changed.
    pub(crate) fn update(&mut self, entity: T) -> Result<(), StateError> {
        match entity.key() {
            Key::Transient(handle) => {
                self.transient_mut(handle)?.object = entity;
            }
            Key::Persisted(id) => {
                let bucket = self.live_bucket_mut(id)?;
                bucket.object = entity;
                if bucket.state == ItemState::Original {
                    bucket.state = ItemState::Modified;
                }
                trace!(id = %id, state = %bucket.state, "bucket updated");
            }
        }
        Ok(())
    }

    pub(crate) fn set_owner(&mut self, key: Key<T::Id>, owner: Owner) -> Result<(), StateError> {
        match key {
            Key::Transient(handle) => {
                self.transient_mut(handle)?.owner = owner;
            }
            Key::Persisted(id) => {
                let bucket = self.live_bucket_mut(id)?;
                bucket.owner = owner;
                bucket.state = ItemState::OwnerChanged;
                trace!(id = %id, owner = %owner, "bucket owner changed");
            }
        }
        Ok(())
    }

    /// Persisted entities become `Deleted`; transient ones are dropped.
    pub(crate) fn mark_deleted(&mut self, key: Key<T::Id>) -> Result<(), StateError> {
        match key {
            Key::Transient(handle) => {
                self.transient_mut(handle)?;
                self.transient.remove(&handle);
                trace!(handle = %handle, "transient entity dropped");
            }
            Key::Persisted(id) => {
                self.live_bucket_mut(id)?.state = ItemState::Deleted;
                trace!(id = %id, "bucket deleted");
            }
        }
        Ok(())
    }

    pub(crate) fn undelete(&mut self, key: Key<T::Id>) -> Result<(), StateError> {
        let id = match key {
            Key::Transient(_) => {
                return Err(StateError::NotPersisted {
                    entity: entity_ref::<T>(key),
                })
            }
            Key::Persisted(id) => id,
        };
        match self.buckets.get_mut(&id) {
            None => Err(StateError::NotFound {
                kind: T::KIND,
                key: key.erase(),
            }),
            Some(bucket) if bucket.state != ItemState::Deleted => Err(StateError::NotDeleted {
                entity: entity_ref::<T>(key),
            }),
            Some(bucket) => {
                bucket.state = ItemState::Modified;
                trace!(id = %id, "bucket undeleted");
                Ok(())
            }
        }
    }

    // === Commit / discard ===

    pub(crate) fn changes(&self) -> Changes<'_, T> {
        let mut changes = Changes::default();
        for (handle, entry) in &self.transient {
            changes.inserted.push((*handle, &entry.object, entry.owner));
        }
        for (id, bucket) in &self.buckets {
            match bucket.state {
                ItemState::Original | ItemState::New => {}
                // An undelete after an owner change leaves the bucket
                // `Modified` with the move still unsaved.
                ItemState::Modified if bucket.owner == bucket.stored_owner => {
                    changes.updated.push(&bucket.object)
                }
                ItemState::Modified | ItemState::OwnerChanged => {
                    changes.owner_changed.push((&bucket.object, bucket.owner))
                }
                ItemState::Deleted => changes.deleted.push(*id),
            }
        }
        changes
    }

    /// Apply a successful save: drop deleted buckets, promote everything
    /// else to `Original`, move transient entities into buckets under their
    /// assigned identity, and rewrite references to fresh identities.
    ///
    /// Every transient handle must have an assignment in `ids`.
    pub(crate) fn promote(&mut self, ids: &IdAssignments) {
        self.buckets.retain(|_, b| b.state != ItemState::Deleted);
        for bucket in self.buckets.values_mut() {
            bucket.state = ItemState::Original;
            bucket.owner = bucket.owner.resolve(ids);
            bucket.stored_owner = bucket.owner;
            bucket.object.remap_keys(ids);
        }
        for (handle, mut entry) in std::mem::take(&mut self.transient) {
            let Some(uuid) = ids.get(handle) else {
                self.transient.insert(handle, entry);
                continue;
            };
            let id = T::Id::new(uuid);
            entry.object.set_key(Key::Persisted(id));
            entry.object.remap_keys(ids);
            self.buckets.insert(
                id,
                Bucket {
                    object: entry.object,
                    owner: entry.owner.resolve(ids),
                    stored_owner: entry.owner.resolve(ids),
                    state: ItemState::Original,
                },
            );
        }
    }

    /// Release and drop everything.
    pub(crate) fn discard(&mut self) -> DiscardStats {
        let mut stats = DiscardStats {
            transient: self.transient.len(),
            loaded: self.buckets.len(),
            released: 0,
        };
        let objects = self
            .transient
            .values_mut()
            .map(|e| &mut e.object)
            .chain(self.buckets.values_mut().map(|b| &mut b.object));
        for object in objects {
            if let Some(releasable) = object.releasable() {
                releasable.release();
                stats.released += 1;
            }
        }
        self.transient.clear();
        self.buckets.clear();
        stats
    }
}

// ============================================================================
// ALL KINDS
// ============================================================================

/// One collection per entity kind.
#[derive(Debug, Default)]
pub struct Collections {
    pub(crate) projects: Collection<ProjectSettings>,
    pub(crate) designs: Collection<Design>,
    pub(crate) styles: Collection<Style>,
    pub(crate) models: Collection<Model>,
    pub(crate) model_objects: Collection<ModelObject>,
    pub(crate) diagram_model_objects: Collection<DiagramModelObject>,
    pub(crate) templates: Collection<Template>,
    pub(crate) model_mappings: Collection<ModelMapping>,
    pub(crate) diagrams: Collection<Diagram>,
    pub(crate) shapes: Collection<Shape>,
}

/// Run `$body` with `$c` bound to the collection of `$kind` and `$key`
/// re-typed for it.
macro_rules! with_collection {
    ($cols:expr, $kind:expr, $any:expr, |$c:ident, $key:ident| $body:expr) => {{
        use tessel_core::EntityKind as K;
        let any = $any;
        match $kind {
            K::ProjectSettings => { let $c = &$cols.projects; let $key = Key::from_any(any); $body }
            K::Design => { let $c = &$cols.designs; let $key = Key::from_any(any); $body }
            K::Style => { let $c = &$cols.styles; let $key = Key::from_any(any); $body }
            K::Model => { let $c = &$cols.models; let $key = Key::from_any(any); $body }
            K::ModelObject => { let $c = &$cols.model_objects; let $key = Key::from_any(any); $body }
            K::DiagramModelObject => {
                let $c = &$cols.diagram_model_objects;
                let $key = Key::from_any(any);
                $body
            }
            K::Template => { let $c = &$cols.templates; let $key = Key::from_any(any); $body }
            K::ModelMapping => { let $c = &$cols.model_mappings; let $key = Key::from_any(any); $body }
            K::Diagram => { let $c = &$cols.diagrams; let $key = Key::from_any(any); $body }
            K::Shape => { let $c = &$cols.shapes; let $key = Key::from_any(any); $body }
        }
    }};
}

macro_rules! for_each_collection {
    ($cols:expr, |$c:ident| $body:expr) => {{
        let cols = $cols;
        { let $c = &mut cols.projects; $body; }
        { let $c = &mut cols.designs; $body; }
        { let $c = &mut cols.styles; $body; }
        { let $c = &mut cols.models; $body; }
        { let $c = &mut cols.model_objects; $body; }
        { let $c = &mut cols.diagram_model_objects; $body; }
        { let $c = &mut cols.templates; $body; }
        { let $c = &mut cols.model_mappings; $body; }
        { let $c = &mut cols.diagrams; $body; }
        { let $c = &mut cols.shapes; $body; }
    }};
}

impl Collections {
    pub(crate) fn state_of(&self, entity: EntityRef) -> Option<ItemState> {
        with_collection!(self, entity.kind, entity.key, |c, key| c.state(key))
    }

    pub(crate) fn owner_of(&self, entity: EntityRef) -> Option<Owner> {
        with_collection!(self, entity.kind, entity.key, |c, key| c.owner(key))
    }

    pub(crate) fn is_live(&self, entity: EntityRef) -> bool {
        matches!(self.state_of(entity), Some(state) if state != ItemState::Deleted)
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.projects.has_pending()
            || self.designs.has_pending()
            || self.styles.has_pending()
            || self.models.has_pending()
            || self.model_objects.has_pending()
            || self.diagram_model_objects.has_pending()
            || self.templates.has_pending()
            || self.model_mappings.has_pending()
            || self.diagrams.has_pending()
            || self.shapes.has_pending()
    }

    pub(crate) fn change_set<'a>(
        &'a self,
        connections_added: Vec<tessel_core::ShapeConnection>,
        connections_removed: Vec<tessel_core::ShapeConnection>,
    ) -> ChangeSet<'a> {
        ChangeSet {
            projects: self.projects.changes(),
            designs: self.designs.changes(),
            styles: self.styles.changes(),
            models: self.models.changes(),
            model_objects: self.model_objects.changes(),
            diagram_model_objects: self.diagram_model_objects.changes(),
            templates: self.templates.changes(),
            model_mappings: self.model_mappings.changes(),
            diagrams: self.diagrams.changes(),
            shapes: self.shapes.changes(),
            connections_added,
            connections_removed,
        }
    }

    pub(crate) fn promote(&mut self, ids: &IdAssignments) {
        for_each_collection!(self, |c| c.promote(ids));
    }

    pub(crate) fn discard(&mut self) -> DiscardStats {
        let mut stats = DiscardStats::default();
        for_each_collection!(self, |c| stats += c.discard());
        stats
    }

    /// Live shapes owned directly by `owner`.
    pub(crate) fn shapes_owned_by(&self, owner: Owner) -> impl Iterator<Item = &Shape> {
        self.shapes.iter_owned_by(owner)
    }

    /// Live shapes below `owner`, parents before children.
    pub(crate) fn shape_subtree(&self, owner: Owner) -> Vec<&Shape> {
        let mut out = Vec::new();
        let mut pending: Vec<&Shape> = self.shapes_owned_by(owner).collect();
        pending.reverse();
        while let Some(shape) = pending.pop() {
            out.push(shape);
            let mut children: Vec<&Shape> =
                self.shapes_owned_by(Owner::Shape(shape.key)).collect();
            children.reverse();
            pending.extend(children);
        }
        out
    }

    /// Live model objects below `owner`, parents before children.
    pub(crate) fn model_object_subtree(&self, owner: Owner) -> Vec<&ModelObject> {
        let mut out = Vec::new();
        let mut pending: Vec<&ModelObject> = self.model_objects.iter_owned_by(owner).collect();
        pending.reverse();
        while let Some(object) = pending.pop() {
            out.push(object);
            let mut children: Vec<&ModelObject> = self
                .model_objects
                .iter_owned_by(Owner::ModelObject(object.key))
                .collect();
            children.reverse();
            pending.extend(children);
        }
        out
    }
}

impl Residency for Collections {
    fn is_resident(&self, entity: EntityRef) -> bool {
        self.state_of(entity).is_some()
    }
}

// ============================================================================
// TRACKED KINDS
// ============================================================================

/// Entity kinds the cache tracks. Implemented for every kind in
/// `tessel_core`.
pub trait Tracked: Entity {
    #[doc(hidden)]
    fn collection(cols: &Collections) -> &Collection<Self>;

    #[doc(hidden)]
    fn collection_mut(cols: &mut Collections) -> &mut Collection<Self>;

    /// Whether `owner` is a legal owner for this kind.
    fn accepts_owner(owner: &Owner) -> bool;

    /// Styles that must be live before this entity may be inserted.
    fn required_styles(&self) -> Vec<Key<StyleId>> {
        Vec::new()
    }

    /// Template this entity instantiates, if any.
    fn template_ref(&self) -> Option<Key<TemplateId>> {
        self.as_shape().and_then(|shape| shape.template)
    }

    #[doc(hidden)]
    fn as_shape(&self) -> Option<&Shape> {
        None
    }
}

macro_rules! tracked {
    ($ty:ty => $field:ident, $owners:pat) => {
        impl Tracked for $ty {
            fn collection(cols: &Collections) -> &Collection<Self> {
                &cols.$field
            }

            fn collection_mut(cols: &mut Collections) -> &mut Collection<Self> {
                &mut cols.$field
            }

            fn accepts_owner(owner: &Owner) -> bool {
                matches!(owner, $owners)
            }
        }
    };
    ($ty:ty => $field:ident, $owners:pat, { $($extra:tt)* }) => {
        impl Tracked for $ty {
            fn collection(cols: &Collections) -> &Collection<Self> {
                &cols.$field
            }

            fn collection_mut(cols: &mut Collections) -> &mut Collection<Self> {
                &mut cols.$field
            }

            fn accepts_owner(owner: &Owner) -> bool {
                matches!(owner, $owners)
            }

            $($extra)*
        }
    };
}

tracked!(ProjectSettings => projects, Owner::Project);
tracked!(Design => designs, Owner::Project);
tracked!(Style => styles, Owner::Design(_), {
    fn required_styles(&self) -> Vec<Key<StyleId>> {
        self.referenced_styles()
    }
});
tracked!(Model => models, Owner::Project);
tracked!(ModelObject => model_objects, Owner::Model(_) | Owner::ModelObject(_) | Owner::Template(_));
tracked!(DiagramModelObject => diagram_model_objects, Owner::Model(_));
tracked!(Template => templates, Owner::Project);
tracked!(ModelMapping => model_mappings, Owner::Template(_), {
    fn required_styles(&self) -> Vec<Key<StyleId>> {
        self.referenced_styles()
    }
});
tracked!(Diagram => diagrams, Owner::Project);
tracked!(Shape => shapes, Owner::Diagram(_) | Owner::Shape(_) | Owner::Template(_), {
    fn as_shape(&self) -> Option<&Shape> {
        Some(self)
    }
});

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::{new_entity_id, ShapeId};

    fn persisted_shape() -> Shape {
        let mut shape = Shape::node("Box");
        shape.key = Key::Persisted(ShapeId::now_v7());
        shape
    }

    #[test]
    fn test_state_machine() {
        let mut col = Collection::<Shape>::default();
        let shape = persisted_shape();
        let key = shape.key;
        assert!(col.absorb(shape.clone(), Owner::Project));
        assert_eq!(col.state(key), Some(ItemState::Original));

        col.update(shape.clone()).unwrap();
        assert_eq!(col.state(key), Some(ItemState::Modified));

        col.mark_deleted(key).unwrap();
        assert_eq!(col.state(key), Some(ItemState::Deleted));
        assert!(col.get(key).is_none());
        assert!(col.get_any(key).is_some());
        assert!(matches!(
            col.mark_deleted(key),
            Err(StateError::AlreadyDeleted { .. })
        ));
        assert!(matches!(col.update(shape), Err(StateError::AlreadyDeleted { .. })));

        col.undelete(key).unwrap();
        assert_eq!(col.state(key), Some(ItemState::Modified));
        assert!(matches!(col.undelete(key), Err(StateError::NotDeleted { .. })));
    }

    #[test]
    fn test_owner_change_survives_update() {
        let mut col = Collection::<Shape>::default();
        let shape = persisted_shape();
        let key = shape.key;
        col.absorb(shape.clone(), Owner::Project);
        col.set_owner(key, Owner::Shape(Key::fresh())).unwrap();
        col.update(shape).unwrap();
        assert_eq!(col.state(key), Some(ItemState::OwnerChanged));
    }

    #[test]
    fn test_owner_change_survives_delete_and_undelete() {
        let mut col = Collection::<Shape>::default();
        let shape = persisted_shape();
        let key = shape.key;
        let parent = Owner::Shape(Key::Persisted(ShapeId::now_v7()));
        col.absorb(shape, Owner::Project);
        col.set_owner(key, parent).unwrap();
        col.mark_deleted(key).unwrap();
        col.undelete(key).unwrap();
        assert_eq!(col.state(key), Some(ItemState::Modified));

        let changes = col.changes();
        assert!(changes.updated.is_empty());
        assert_eq!(changes.owner_changed.len(), 1);
        assert_eq!(changes.owner_changed[0].1, parent);

        col.promote(&IdAssignments::new());
        let reloaded = col.get_any(key).cloned().unwrap();
        col.update(reloaded).unwrap();
        let changes = col.changes();
        assert_eq!(changes.updated.len(), 1);
        assert!(changes.owner_changed.is_empty());
    }

    #[test]
    fn test_transient_lifecycle() {
        let mut col = Collection::<Shape>::default();
        let shape = Shape::node("Box");
        let key = shape.key;
        col.insert_transient(shape.clone(), Owner::Project).unwrap();
        assert_eq!(col.state(key), Some(ItemState::New));
        assert!(matches!(
            col.insert_transient(shape, Owner::Project),
            Err(StateError::AlreadyTracked { .. })
        ));
        assert!(matches!(col.undelete(key), Err(StateError::NotPersisted { .. })));

        col.mark_deleted(key).unwrap();
        assert!(!col.is_tracked(key));
        assert!(!col.has_pending());
    }

    #[test]
    fn test_insert_persisted_rejected() {
        let mut col = Collection::<Shape>::default();
        assert!(matches!(
            col.insert_transient(persisted_shape(), Owner::Project),
            Err(StateError::AlreadyPersisted { .. })
        ));
    }

    #[test]
    fn test_absorb_never_overwrites() {
        let mut col = Collection::<Shape>::default();
        let mut shape = persisted_shape();
        col.absorb(shape.clone(), Owner::Project);
        col.mark_deleted(shape.key).unwrap();
        shape.x = 99;
        assert!(!col.absorb(shape.clone(), Owner::Project));
        assert_eq!(col.state(shape.key), Some(ItemState::Deleted));
    }

    #[test]
    fn test_promote_moves_transient_into_buckets() {
        let mut col = Collection::<Shape>::default();
        let template = Template::new("T");
        let shape = Shape::node("Box").with_template(template.key);
        let handle = shape.key.handle().unwrap();
        col.insert_transient(shape, Owner::Template(template.key))
            .unwrap();

        let mut ids = IdAssignments::new();
        let shape_uuid = new_entity_id();
        let template_uuid = new_entity_id();
        ids.assign(handle, shape_uuid);
        ids.assign(template.key.handle().unwrap(), template_uuid);
        col.promote(&ids);

        let key = Key::Persisted(ShapeId::new(shape_uuid));
        let template_key = Key::Persisted(TemplateId::new(template_uuid));
        assert_eq!(col.state(key), Some(ItemState::Original));
        assert_eq!(col.get(key).unwrap().template, Some(template_key));
        assert_eq!(col.owner(key), Some(Owner::Template(template_key)));
        assert!(!col.has_pending());
    }

    #[test]
    fn test_discard_releases_display_caches() {
        let mut col = Collection::<Shape>::default();
        let mut loaded = persisted_shape();
        loaded.display_cache = Some(Default::default());
        col.absorb(loaded, Owner::Project);
        col.insert_transient(Shape::node("Box"), Owner::Project)
            .unwrap();

        let stats = col.discard();
        assert_eq!(
            stats,
            DiscardStats {
                transient: 1,
                loaded: 1,
                released: 2
            }
        );
        assert_eq!(col.len(), 0);
    }

    #[test]
    fn test_owner_rules() {
        assert!(Style::accepts_owner(&Owner::Design(Key::fresh())));
        assert!(!Style::accepts_owner(&Owner::Project));
        assert!(Shape::accepts_owner(&Owner::Template(Key::fresh())));
        assert!(!Shape::accepts_owner(&Owner::Model(Key::fresh())));
        assert!(ModelObject::accepts_owner(&Owner::ModelObject(Key::fresh())));
        assert!(ProjectSettings::accepts_owner(&Owner::Project));
    }
}
