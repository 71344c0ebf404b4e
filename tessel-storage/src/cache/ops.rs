//! Primitive entity operations: stage every item against the batch, check
//! consistency, then apply and notify.

use super::checker::Batch;
use super::{EntityCache, Tracked};
use tessel_core::{
    ChangeEvent, Entity, EntityKind, EntityRef, ItemState, Key, Owner, ShapeConnection, ShapeId,
    StateError, TesselResult, UsageError,
};
use tracing::trace;

fn not_found<T: Entity>(key: Key<T::Id>) -> StateError {
    StateError::NotFound {
        kind: T::KIND,
        key: key.erase(),
    }
}

impl EntityCache {
    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// A non-deleted entity. Loads its kind on first touch.
    pub fn get<T: Tracked>(&mut self, key: Key<T::Id>) -> TesselResult<&T> {
        self.ensure_open()?;
        let key = self.resolve_key(key);
        if !T::collection(&self.cols).is_tracked(key) {
            self.ensure_loaded(T::KIND)?;
        }
        T::collection(&self.cols)
            .get(key)
            .ok_or_else(|| not_found::<T>(key).into())
    }

    /// Every non-deleted entity of a kind.
    pub fn get_all<T: Tracked>(&mut self) -> TesselResult<Vec<&T>> {
        self.ensure_open()?;
        self.ensure_loaded(T::KIND)?;
        Ok(T::collection(&self.cols).iter().map(|(e, _)| e).collect())
    }

    /// Non-deleted entities of a kind directly owned by `owner`.
    pub fn get_all_owned_by<T: Tracked>(&mut self, owner: Owner) -> TesselResult<Vec<&T>> {
        self.ensure_open()?;
        let owner = self.resolve_owner(owner);
        match owner {
            Owner::Diagram(diagram) if T::KIND == EntityKind::Shape => {
                self.ensure_loaded(EntityKind::Diagram)?;
                self.ensure_diagram_shapes(diagram)?;
            }
            _ if T::KIND == EntityKind::Shape => self.ensure_loaded(EntityKind::Template)?,
            _ => self.ensure_loaded(T::KIND)?,
        }
        Ok(T::collection(&self.cols).iter_owned_by(owner).collect())
    }

    /// True if the entity is tracked and not deleted. Never loads.
    pub fn contains<T: Tracked>(&self, key: Key<T::Id>) -> bool {
        T::collection(&self.cols).is_live(self.resolve_key(key))
    }

    // ========================================================================
    // STAGING
    // ========================================================================

    /// Load whatever the owner check of an insert into `owner` needs.
    pub(crate) fn prepare_owner<T: Tracked>(&mut self, owner: Owner) -> TesselResult<()> {
        if !T::accepts_owner(&owner) {
            return Err(UsageError::InvalidOwner {
                kind: T::KIND,
                owner,
            }
            .into());
        }
        match owner {
            Owner::Project | Owner::Shape(_) => {}
            Owner::Diagram(diagram) => {
                self.ensure_loaded(EntityKind::Diagram)?;
                self.ensure_diagram_shapes(diagram)?;
            }
            Owner::Design(_) => self.ensure_loaded(EntityKind::Design)?,
            Owner::Template(_) => self.ensure_loaded(EntityKind::Template)?,
            Owner::Model(_) => self.ensure_loaded(EntityKind::Model)?,
            Owner::ModelObject(_) => self.ensure_loaded(EntityKind::ModelObject)?,
        }
        if T::KIND != EntityKind::Shape {
            self.ensure_loaded(T::KIND)?;
        }
        Ok(())
    }

    /// Load whatever the delete check of `entity` needs to see.
    pub(crate) fn prepare_delete(&mut self, entity: EntityRef) -> TesselResult<()> {
        match entity.kind {
            EntityKind::Diagram => {
                self.ensure_loaded(EntityKind::Diagram)?;
                self.ensure_diagram_shapes(Key::from_any(entity.key))
            }
            EntityKind::Model => {
                self.ensure_loaded(EntityKind::ModelObject)?;
                self.ensure_loaded(EntityKind::DiagramModelObject)
            }
            EntityKind::DiagramModelObject => {
                self.ensure_loaded(EntityKind::DiagramModelObject)?;
                self.ensure_loaded(EntityKind::Diagram)
            }
            // Shapes arrive per diagram; an untracked key needs all of them.
            EntityKind::Shape if self.cols.state_of(entity).is_some() => Ok(()),
            kind => self.ensure_loaded(kind),
        }
    }

    pub(crate) fn stage_insert<'a, T: Tracked>(
        &self,
        batch: &mut Batch<'a>,
        entity: &'a T,
        owner: Owner,
    ) -> TesselResult<()> {
        let subject = entity.entity_ref();
        if entity.key().is_persisted() {
            return Err(StateError::AlreadyPersisted { entity: subject }.into());
        }
        if T::collection(&self.cols).is_tracked(entity.key()) || batch.is_pending(&subject) {
            return Err(StateError::AlreadyTracked { entity: subject }.into());
        }
        if !T::accepts_owner(&owner) {
            return Err(UsageError::InvalidOwner {
                kind: T::KIND,
                owner,
            }
            .into());
        }
        if self.validating() {
            self.checker(batch).check_insert(entity, owner)?;
        }
        batch.inserting.insert(subject, owner);
        if let Some(shape) = entity.as_shape() {
            batch.shapes.insert(shape.key, shape);
        }
        Ok(())
    }

    /// Outer-entity delete: it must be tracked and not deleted.
    pub(crate) fn stage_delete<T: Tracked>(
        &self,
        batch: &mut Batch<'_>,
        key: Key<T::Id>,
    ) -> TesselResult<()> {
        let subject = EntityRef::of(T::KIND, key);
        match T::collection(&self.cols).state(key) {
            None => return Err(not_found::<T>(key).into()),
            Some(ItemState::Deleted) => {
                return Err(StateError::AlreadyDeleted { entity: subject }.into())
            }
            Some(_) if batch.deleting.contains(&subject) => {
                return Err(StateError::AlreadyDeleted { entity: subject }.into())
            }
            Some(_) => {}
        }
        batch.deleting.insert(subject);
        Ok(())
    }

    pub(crate) fn stage_undelete<'a, T: Tracked>(
        &'a self,
        batch: &mut Batch<'a>,
        key: Key<T::Id>,
    ) -> TesselResult<()> {
        let collection = T::collection(&self.cols);
        let subject = EntityRef::of(T::KIND, key);
        if key.is_transient() {
            return Err(StateError::NotPersisted { entity: subject }.into());
        }
        let (Some(entity), Some(owner)) = (collection.get_any(key), collection.owner(key)) else {
            return Err(not_found::<T>(key).into());
        };
        if collection.state(key) != Some(ItemState::Deleted) || batch.undeleting.contains(&subject)
        {
            return Err(StateError::NotDeleted { entity: subject }.into());
        }
        if self.validating() {
            self.checker(batch).check_insert(entity, owner)?;
        }
        batch.undeleting.insert(subject);
        if let Some(shape) = entity.as_shape() {
            batch.shapes.insert(shape.key, shape);
        }
        Ok(())
    }

    pub(crate) fn stage_connection(
        &self,
        batch: &mut Batch<'_>,
        connection: ShapeConnection,
    ) -> TesselResult<()> {
        if self.connections.contains(&connection) || batch.adding_connections.contains(&connection)
        {
            return Err(StateError::ConnectionExists { connection }.into());
        }
        if self.validating() {
            self.checker(batch).check_connection(&connection)?;
        }
        batch.adding_connections.insert(connection);
        Ok(())
    }

    /// Schedule removal of live connections made obsolete by the shapes in
    /// `batch.deleting`: those with both ends deleted, and with
    /// `connector_owned` also those whose connector is deleted.
    pub(crate) fn stage_connection_removals(&self, batch: &mut Batch<'_>, connector_owned: bool) {
        let deleting =
            |key: Key<ShapeId>| batch.deleting.contains(&EntityRef::of(EntityKind::Shape, key));
        let obsolete: Vec<ShapeConnection> = self
            .connections
            .iter()
            .filter(|c| {
                let connector = deleting(c.connector);
                (connector && deleting(c.target)) || (connector_owned && connector)
            })
            .copied()
            .collect();
        batch.removing_connections.extend(obsolete);
    }

    /// Run the delete checks for every staged deletion, in `order`.
    pub(crate) fn check_deletes(&self, batch: &Batch<'_>, order: &[EntityRef]) -> TesselResult<()> {
        if !self.validating() {
            return Ok(());
        }
        let checker = self.checker(batch);
        order.iter().try_for_each(|entity| checker.check_delete(*entity))
    }

    // ========================================================================
    // APPLYING
    // ========================================================================

    pub(crate) fn apply_insert<T: Tracked>(&mut self, entity: T, owner: Owner) -> TesselResult<()> {
        let subject = entity.entity_ref();
        T::collection_mut(&mut self.cols).insert_transient(entity, owner)?;
        self.dirty = true;
        self.emit(ChangeEvent::Inserted(subject));
        Ok(())
    }

    pub(crate) fn apply_delete<T: Tracked>(&mut self, key: Key<T::Id>) -> TesselResult<()> {
        T::collection_mut(&mut self.cols).mark_deleted(key)?;
        self.dirty = true;
        self.emit(ChangeEvent::Deleted(EntityRef::of(T::KIND, key)));
        Ok(())
    }

    pub(crate) fn apply_undelete<T: Tracked>(&mut self, key: Key<T::Id>) -> TesselResult<()> {
        T::collection_mut(&mut self.cols).undelete(key)?;
        self.dirty = true;
        self.emit(ChangeEvent::Inserted(EntityRef::of(T::KIND, key)));
        Ok(())
    }

    pub(crate) fn apply_connection_changes(
        &mut self,
        removing: Vec<ShapeConnection>,
        adding: Vec<ShapeConnection>,
    ) {
        for connection in removing {
            self.connections.remove(&connection);
            self.dirty = true;
            trace!(connection = %connection, "connection removed");
            self.emit(ChangeEvent::ConnectionDeleted(connection));
        }
        for connection in adding {
            self.connections.add(connection);
            self.dirty = true;
            trace!(connection = %connection, "connection added");
            self.emit(ChangeEvent::ConnectionInserted(connection));
        }
    }

    // ========================================================================
    // PUBLIC MUTATIONS
    // ========================================================================

    /// Track a new entity under `owner`. Returns its key.
    pub fn insert<T: Tracked>(&mut self, entity: T, owner: Owner) -> TesselResult<Key<T::Id>> {
        self.ensure_open()?;
        let owner = self.resolve_owner(owner);
        self.prepare_owner::<T>(owner)?;
        let entity = self.normalize(entity);
        let mut batch = Batch::default();
        self.stage_insert(&mut batch, &entity, owner)?;
        let key = entity.key();
        self.apply_insert(entity, owner)?;
        Ok(key)
    }

    /// Insert several entities under one owner; all or nothing.
    pub fn insert_many<T: Tracked>(
        &mut self,
        entities: Vec<T>,
        owner: Owner,
    ) -> TesselResult<Vec<Key<T::Id>>> {
        self.ensure_open()?;
        let owner = self.resolve_owner(owner);
        self.prepare_owner::<T>(owner)?;
        let entities: Vec<T> = entities.into_iter().map(|e| self.normalize(e)).collect();
        let mut batch = Batch::default();
        for entity in &entities {
            self.stage_insert(&mut batch, entity, owner)?;
        }
        let keys = entities.iter().map(Entity::key).collect();
        for entity in entities {
            self.apply_insert(entity, owner)?;
        }
        Ok(keys)
    }

    /// Replace the tracked content of an entity.
    pub fn update<T: Tracked>(&mut self, entity: T) -> TesselResult<()> {
        self.update_many(vec![entity])
    }

    pub fn update_many<T: Tracked>(&mut self, entities: Vec<T>) -> TesselResult<()> {
        self.ensure_open()?;
        self.ensure_loaded(T::KIND)?;
        let entities: Vec<T> = entities.into_iter().map(|e| self.normalize(e)).collect();
        let batch = Batch::default();
        for entity in &entities {
            let key = entity.key();
            let collection = T::collection(&self.cols);
            match collection.state(key) {
                None => return Err(not_found::<T>(key).into()),
                Some(ItemState::Deleted) => {
                    return Err(StateError::AlreadyDeleted {
                        entity: entity.entity_ref(),
                    }
                    .into())
                }
                Some(_) => {}
            }
            if self.validating() {
                if let Some(owner) = collection.owner(key) {
                    self.checker(&batch).check_insert(entity, owner)?;
                }
            }
        }
        for entity in entities {
            let subject = entity.entity_ref();
            T::collection_mut(&mut self.cols).update(entity)?;
            self.dirty = true;
            self.emit(ChangeEvent::Updated(subject));
        }
        Ok(())
    }

    /// Move an entity under a new owner.
    pub fn update_owner<T: Tracked>(&mut self, key: Key<T::Id>, owner: Owner) -> TesselResult<()> {
        self.ensure_open()?;
        let key = self.resolve_key(key);
        let owner = self.resolve_owner(owner);
        self.prepare_owner::<T>(owner)?;
        let subject = EntityRef::of(T::KIND, key);
        let Some(entity) = T::collection(&self.cols).get(key) else {
            return match T::collection(&self.cols).state(key) {
                Some(_) => Err(StateError::AlreadyDeleted { entity: subject }.into()),
                None => Err(not_found::<T>(key).into()),
            };
        };
        let batch = Batch::default();
        let checker = self.checker(&batch);
        if checker.would_cycle(subject, owner) {
            return Err(UsageError::InvalidArgument {
                reason: format!("{} cannot be owned by its own descendant {}", subject, owner),
            }
            .into());
        }
        if self.validating() {
            checker.check_owner_change(entity, owner)?;
        }
        T::collection_mut(&mut self.cols).set_owner(key, owner)?;
        self.dirty = true;
        self.emit(ChangeEvent::OwnerChanged {
            entity: subject,
            owner,
        });
        Ok(())
    }

    pub fn delete<T: Tracked>(&mut self, key: Key<T::Id>) -> TesselResult<()> {
        self.delete_many::<T>(vec![key])
    }

    /// Delete several entities of one kind; validated as one batch, so
    /// entities referencing each other may go together.
    pub fn delete_many<T: Tracked>(&mut self, keys: Vec<Key<T::Id>>) -> TesselResult<()> {
        self.ensure_open()?;
        let keys: Vec<Key<T::Id>> = keys.into_iter().map(|k| self.resolve_key(k)).collect();
        for key in &keys {
            self.prepare_delete(EntityRef::of(T::KIND, *key))?;
        }
        let mut batch = Batch::default();
        for key in &keys {
            self.stage_delete::<T>(&mut batch, *key)?;
        }
        if T::KIND == EntityKind::Shape {
            self.stage_connection_removals(&mut batch, false);
        }
        let order: Vec<EntityRef> = keys.iter().map(|k| EntityRef::of(T::KIND, *k)).collect();
        self.check_deletes(&batch, &order)?;

        let removing: Vec<ShapeConnection> = batch.removing_connections.into_iter().collect();
        self.apply_connection_changes(removing, Vec::new());
        for key in keys {
            self.apply_delete::<T>(key)?;
        }
        Ok(())
    }

    pub fn undelete<T: Tracked>(&mut self, key: Key<T::Id>) -> TesselResult<()> {
        self.undelete_many::<T>(vec![key])
    }

    pub fn undelete_many<T: Tracked>(&mut self, keys: Vec<Key<T::Id>>) -> TesselResult<()> {
        self.ensure_open()?;
        let keys: Vec<Key<T::Id>> = keys.into_iter().map(|k| self.resolve_key(k)).collect();
        let mut batch = Batch::default();
        for key in &keys {
            self.stage_undelete::<T>(&mut batch, *key)?;
        }
        for key in keys {
            self.apply_undelete::<T>(key)?;
        }
        Ok(())
    }

    // ========================================================================
    // CONNECTIONS
    // ========================================================================

    pub fn insert_connection(&mut self, connection: ShapeConnection) -> TesselResult<()> {
        self.ensure_open()?;
        let connection = connection.resolve(&self.assigned);
        let mut batch = Batch::default();
        self.stage_connection(&mut batch, connection)?;
        self.apply_connection_changes(Vec::new(), vec![connection]);
        Ok(())
    }

    pub fn delete_connection(&mut self, connection: ShapeConnection) -> TesselResult<()> {
        self.ensure_open()?;
        let connection = connection.resolve(&self.assigned);
        if !self.connections.contains(&connection) {
            return Err(StateError::ConnectionNotFound { connection }.into());
        }
        if self.validating() {
            let batch = Batch::default();
            self.checker(&batch).check_connection(&connection)?;
        }
        self.apply_connection_changes(vec![connection], Vec::new());
        Ok(())
    }
}
