//! Referential-integrity checks, evaluated before any mutation is applied.
//!
//! A [`Checker`] reads the cache plus the [`Batch`] of mutations staged so
//! far in the current call. Entities pending insertion or undeletion in the
//! batch count as live; entities pending deletion count as gone. Store
//! probes are consulted only for subjects with a persisted identity.

use super::collection::{Collections, Tracked};
use super::connections::ConnectionLedger;
use crate::Store;
use std::collections::{BTreeSet, HashMap, HashSet};
use tessel_core::{
    ConsistencyError, ControlPointCapabilities, DesignId, Entity, EntityKind, EntityRef, ItemState,
    Key, ModelObjectId, Owner, Shape, ShapeConnection, ShapeId, StyleId, TemplateId, TesselResult,
};

/// Mutations staged by one public call, validated as a whole before any of
/// them is applied.
#[derive(Debug, Default)]
pub(crate) struct Batch<'a> {
    pub(crate) inserting: HashMap<EntityRef, Owner>,
    pub(crate) undeleting: HashSet<EntityRef>,
    pub(crate) deleting: HashSet<EntityRef>,
    pub(crate) adding_connections: BTreeSet<ShapeConnection>,
    pub(crate) removing_connections: BTreeSet<ShapeConnection>,
    /// Shapes staged for insertion, needed to check connection capabilities
    /// before they reach the cache.
    pub(crate) shapes: HashMap<Key<ShapeId>, &'a Shape>,
}

impl Batch<'_> {
    pub(crate) fn is_pending(&self, entity: &EntityRef) -> bool {
        self.inserting.contains_key(entity) || self.undeleting.contains(entity)
    }
}

pub(crate) struct Checker<'a> {
    pub(crate) cols: &'a Collections,
    pub(crate) connections: &'a ConnectionLedger,
    pub(crate) store: Option<&'a dyn Store>,
    pub(crate) project_design: Option<Key<DesignId>>,
    pub(crate) batch: &'a Batch<'a>,
}

fn shape_ref(key: Key<ShapeId>) -> EntityRef {
    EntityRef::of(EntityKind::Shape, key)
}

impl<'a> Checker<'a> {
    /// Resident and not deleted, or pending in the batch.
    pub(crate) fn is_live(&self, entity: EntityRef) -> bool {
        if self.batch.deleting.contains(&entity) {
            return false;
        }
        self.batch.is_pending(&entity) || self.cols.is_live(entity)
    }

    fn owner_of(&self, entity: EntityRef) -> Option<Owner> {
        self.batch
            .inserting
            .get(&entity)
            .copied()
            .or_else(|| self.cols.owner_of(entity))
    }

    fn shape(&self, key: Key<ShapeId>) -> Option<&'a Shape> {
        self.batch
            .shapes
            .get(&key)
            .copied()
            .or_else(|| self.cols.shapes.get_any(key))
    }

    /// Template at the top of an owner chain, if the chain ends in one.
    fn enclosing_template(&self, owner: Owner) -> Option<Key<TemplateId>> {
        let mut current = owner;
        // Bounded so a corrupt owner chain cannot spin forever.
        for _ in 0..=self.cols.shapes.len() + self.batch.inserting.len() + 1 {
            match current {
                Owner::Template(key) => return Some(key),
                Owner::Shape(key) => current = self.owner_of(shape_ref(key))?,
                _ => return None,
            }
        }
        None
    }

    /// True if `owner` is `entity` itself or sits below it.
    pub(crate) fn would_cycle(&self, entity: EntityRef, owner: Owner) -> bool {
        let mut current = owner.entity_ref();
        let bound =
            self.cols.shapes.len() + self.cols.model_objects.len() + self.batch.inserting.len() + 2;
        for _ in 0..=bound {
            match current {
                None => return false,
                Some(r) if r == entity => return true,
                Some(r) => current = self.owner_of(r).and_then(|o| o.entity_ref()),
            }
        }
        true
    }

    fn check_owner(&self, entity: EntityRef, owner: Owner) -> Result<(), ConsistencyError> {
        let Some(owner_ref) = owner.entity_ref() else {
            return Ok(());
        };
        if self.is_live(owner_ref) {
            return Ok(());
        }
        if self.cols.state_of(owner_ref).is_some() {
            Err(ConsistencyError::OwnerDeleted { entity, owner })
        } else {
            Err(ConsistencyError::OwnerMissing { entity, owner })
        }
    }

    fn check_template_nesting(
        &self,
        shape: EntityRef,
        template: Option<Key<TemplateId>>,
        owner: Owner,
    ) -> Result<(), ConsistencyError> {
        match template {
            Some(template) if self.enclosing_template(owner).is_some() => {
                Err(ConsistencyError::NestedTemplate {
                    shape,
                    template: EntityRef::of(EntityKind::Template, template),
                })
            }
            _ => Ok(()),
        }
    }

    // ========================================================================
    // INSERT / UNDELETE / OWNER CHANGE
    // ========================================================================

    /// Rules shared by insert and undelete.
    pub(crate) fn check_insert<T: Tracked>(
        &self,
        entity: &T,
        owner: Owner,
    ) -> Result<(), ConsistencyError> {
        let subject = entity.entity_ref();
        self.check_owner(subject, owner)?;
        for style in entity.required_styles() {
            let referenced = EntityRef::of(EntityKind::Style, style);
            if !self.is_live(referenced) {
                return Err(ConsistencyError::MissingStyleReference {
                    style: subject,
                    referenced,
                });
            }
        }
        self.check_template_nesting(subject, entity.template_ref(), owner)
    }

    pub(crate) fn check_owner_change<T: Tracked>(
        &self,
        entity: &T,
        owner: Owner,
    ) -> Result<(), ConsistencyError> {
        let subject = entity.entity_ref();
        self.check_owner(subject, owner)?;
        self.check_template_nesting(subject, entity.template_ref(), owner)?;
        if T::KIND == EntityKind::Shape && self.enclosing_template(owner).is_some() {
            let key = Key::<ShapeId>::from_any(subject.key);
            if let Some(nested) = self
                .cols
                .shape_subtree(Owner::Shape(key))
                .into_iter()
                .find(|s| s.template.is_some())
            {
                return self.check_template_nesting(nested.entity_ref(), nested.template, owner);
            }
        }
        Ok(())
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    pub(crate) fn check_delete(&self, entity: EntityRef) -> TesselResult<()> {
        match entity.kind {
            EntityKind::ProjectSettings => Err(ConsistencyError::ProjectSettingsDeleted.into()),
            EntityKind::Design => self.check_design_delete(entity),
            EntityKind::Style => match self.style_user(Key::from_any(entity.key))? {
                Some(used_by) => Err(ConsistencyError::StyleInUse {
                    style: entity,
                    used_by,
                }
                .into()),
                None => Ok(()),
            },
            EntityKind::Model => self.check_model_delete(entity),
            EntityKind::ModelObject => self.check_model_object_delete(entity),
            EntityKind::DiagramModelObject => self.check_diagram_model_object_delete(entity),
            EntityKind::Template => self.check_template_delete(entity),
            EntityKind::ModelMapping => Ok(()),
            EntityKind::Diagram => {
                let owner = Owner::Diagram(Key::from_any(entity.key));
                match self.first_live_shape(owner) {
                    Some(shape) => Err(ConsistencyError::DiagramHasShapes {
                        diagram: entity,
                        shape,
                    }
                    .into()),
                    None => Ok(()),
                }
            }
            EntityKind::Shape => self.check_shape_delete(entity),
        }
    }

    fn first_live_shape(&self, owner: Owner) -> Option<EntityRef> {
        self.cols
            .shapes_owned_by(owner)
            .map(Entity::entity_ref)
            .find(|r| self.is_live(*r))
    }

    fn check_design_delete(&self, entity: EntityRef) -> TesselResult<()> {
        let key = Key::<DesignId>::from_any(entity.key);
        if self.project_design == Some(key) {
            return Err(ConsistencyError::ProjectDesignDeleted.into());
        }
        if let Some(style) = self
            .cols
            .styles
            .iter_owned_by(Owner::Design(key))
            .map(Entity::entity_ref)
            .find(|r| self.is_live(*r))
        {
            return Err(ConsistencyError::DesignHasStyles {
                design: entity,
                style,
            }
            .into());
        }
        Ok(())
    }

    fn check_model_delete(&self, entity: EntityRef) -> TesselResult<()> {
        let owner = Owner::Model(Key::from_any(entity.key));
        let owned = self
            .cols
            .model_objects
            .iter_owned_by(owner)
            .map(Entity::entity_ref)
            .chain(
                self.cols
                    .diagram_model_objects
                    .iter_owned_by(owner)
                    .map(Entity::entity_ref),
            )
            .find(|r| self.is_live(*r));
        match owned {
            Some(model_object) => Err(ConsistencyError::ModelHasObjects {
                model: entity,
                model_object,
            }
            .into()),
            None => Ok(()),
        }
    }

    fn check_model_object_delete(&self, entity: EntityRef) -> TesselResult<()> {
        let key = Key::<ModelObjectId>::from_any(entity.key);
        let has_children = self
            .cols
            .model_objects
            .iter_owned_by(Owner::ModelObject(key))
            .any(|child| self.is_live(child.entity_ref()));
        if has_children {
            return Err(ConsistencyError::ModelObjectHasChildren {
                model_object: entity,
            }
            .into());
        }
        match self.model_object_user(key)? {
            Some(used_by) => Err(ConsistencyError::ModelObjectInUse {
                model_object: entity,
                used_by,
            }
            .into()),
            None => Ok(()),
        }
    }

    fn check_diagram_model_object_delete(&self, entity: EntityRef) -> TesselResult<()> {
        let key = Key::from_any(entity.key);
        let user = self
            .cols
            .diagrams
            .iter()
            .map(|(diagram, _)| diagram)
            .find(|d| d.model_object == Some(key) && self.is_live(d.entity_ref()));
        match user {
            Some(diagram) => Err(ConsistencyError::ModelObjectInUse {
                model_object: entity,
                used_by: diagram.entity_ref().to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn check_template_delete(&self, entity: EntityRef) -> TesselResult<()> {
        let key = Key::<TemplateId>::from_any(entity.key);
        let owner = Owner::Template(key);
        let content = self
            .cols
            .shapes_owned_by(owner)
            .map(Entity::entity_ref)
            .chain(
                self.cols
                    .model_mappings
                    .iter_owned_by(owner)
                    .map(Entity::entity_ref),
            )
            .chain(
                self.cols
                    .model_objects
                    .iter_owned_by(owner)
                    .map(Entity::entity_ref),
            )
            .find(|r| self.is_live(*r));
        if let Some(child) = content {
            return Err(ConsistencyError::TemplateHasContent {
                template: entity,
                child,
            }
            .into());
        }
        match self.template_user(key)? {
            Some(used_by) => Err(ConsistencyError::TemplateInUse {
                template: entity,
                used_by,
            }
            .into()),
            None => Ok(()),
        }
    }

    fn check_shape_delete(&self, entity: EntityRef) -> TesselResult<()> {
        let key = Key::<ShapeId>::from_any(entity.key);
        if let Some(child) = self.first_live_shape(Owner::Shape(key)) {
            return Err(ConsistencyError::ShapeHasChildren {
                shape: entity,
                child,
            }
            .into());
        }

        let blocking = self.connections.iter().find(|c| {
            !self.batch.removing_connections.contains(c)
                && c.other_end(key)
                    .is_some_and(|other| !self.batch.deleting.contains(&shape_ref(other)))
        });
        if let Some(connection) = blocking {
            return Err(ConsistencyError::ShapeConnected {
                shape: entity,
                connection: *connection,
            }
            .into());
        }

        let attached = self
            .shape(key)
            .and_then(|shape| shape.model_object)
            .map(|mo| EntityRef::of(EntityKind::ModelObject, mo))
            .filter(|mo| {
                // Unloaded model objects still count.
                !self.batch.deleting.contains(mo)
                    && self.cols.state_of(*mo) != Some(ItemState::Deleted)
            });
        if let Some(model_object) = attached {
            return Err(ConsistencyError::ShapeAttached {
                shape: entity,
                model_object,
            }
            .into());
        }
        Ok(())
    }

    // ========================================================================
    // CONNECTIONS
    // ========================================================================

    fn live_shape(&self, key: Key<ShapeId>) -> Option<&'a Shape> {
        if self.is_live(shape_ref(key)) {
            self.shape(key)
        } else {
            None
        }
    }

    pub(crate) fn check_connection(
        &self,
        connection: &ShapeConnection,
    ) -> Result<(), ConsistencyError> {
        let endpoint = |key: Key<ShapeId>| {
            self.live_shape(key)
                .ok_or(ConsistencyError::ConnectionEndpointMissing {
                    connection: *connection,
                    shape: key.erase(),
                })
        };
        let connector = endpoint(connection.connector)?;
        let target = endpoint(connection.target)?;
        if !connector.has_capability(connection.glue_point, ControlPointCapabilities::GLUE) {
            return Err(ConsistencyError::NotAGluePoint {
                connection: *connection,
            });
        }
        if !target.has_capability(connection.target_point, ControlPointCapabilities::CONNECT) {
            return Err(ConsistencyError::NotAConnectionPoint {
                connection: *connection,
            });
        }
        Ok(())
    }

    // ========================================================================
    // USAGE PROBES
    // ========================================================================
    //
    // Each returns a description of the first user found: an entity, or
    // "store" when only the off-cache probe knows of one.

    pub(crate) fn style_user(&self, style: Key<StyleId>) -> TesselResult<Option<String>> {
        let by_style = self
            .cols
            .styles
            .iter()
            .map(|(s, _)| s)
            .find(|s| s.referenced_styles().contains(&style) && self.is_live(s.entity_ref()))
            .map(Entity::entity_ref);
        let by_mapping = || {
            self.cols
                .model_mappings
                .iter()
                .map(|(m, _)| m)
                .find(|m| m.referenced_styles().contains(&style) && self.is_live(m.entity_ref()))
                .map(Entity::entity_ref)
        };
        let by_shape = || {
            self.cols
                .shapes
                .iter()
                .map(|(s, _)| s)
                .find(|s| s.styles.iter().any(|k| k == style) && self.is_live(s.entity_ref()))
                .map(Entity::entity_ref)
        };
        if let Some(user) = by_style.or_else(by_mapping).or_else(by_shape) {
            return Ok(Some(user.to_string()));
        }
        match (style.id(), self.store) {
            (Some(id), Some(store)) if store.is_style_in_use(id, self.cols)? => {
                Ok(Some("store".to_string()))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn template_user(&self, template: Key<TemplateId>) -> TesselResult<Option<String>> {
        let by_shape = self
            .cols
            .shapes
            .iter()
            .map(|(s, _)| s)
            .find(|s| s.template == Some(template) && self.is_live(s.entity_ref()));
        if let Some(shape) = by_shape {
            return Ok(Some(shape.entity_ref().to_string()));
        }
        match (template.id(), self.store) {
            (Some(id), Some(store)) if store.is_template_in_use(id, self.cols)? => {
                Ok(Some("store".to_string()))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn model_object_user(
        &self,
        model_object: Key<ModelObjectId>,
    ) -> TesselResult<Option<String>> {
        let by_shape = self
            .cols
            .shapes
            .iter()
            .map(|(s, _)| s)
            .find(|s| s.model_object == Some(model_object) && self.is_live(s.entity_ref()));
        if let Some(shape) = by_shape {
            return Ok(Some(shape.entity_ref().to_string()));
        }
        match (model_object.id(), self.store) {
            (Some(id), Some(store)) if store.is_model_object_in_use(id, self.cols)? => {
                Ok(Some("store".to_string()))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn shape_type_user(&self, type_name: &str) -> TesselResult<Option<String>> {
        let by_shape = self
            .cols
            .shapes
            .iter()
            .map(|(s, _)| s)
            .find(|s| s.type_name == type_name && self.is_live(s.entity_ref()));
        if let Some(shape) = by_shape {
            return Ok(Some(shape.entity_ref().to_string()));
        }
        match self.store {
            Some(store) if store.is_shape_type_in_use(type_name, self.cols)? => {
                Ok(Some("store".to_string()))
            }
            _ => Ok(None),
        }
    }
}
