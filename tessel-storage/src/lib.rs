//! TESSEL Storage - Store Contract, Reference Store and Entity Cache
//!
//! Defines the persistence contract the entity cache consumes, the data
//! exchanged across it, an in-memory reference store, the entity-type
//! registry, and the change-tracking entity cache itself.

pub mod cache;
pub mod memory;
pub mod registry;

pub use cache::{DiscardStats, EntityCache, Tracked};
pub use cache::{DesignContent, DiagramContent, ModelObjectTree, ShapeTree, TemplateContent};
pub use memory::{MemoryStore, NothingResident, StoreStats, StoredEntity, MEMORY_STORE_VERSION};
pub use registry::{element_name, EntityTypeRegistry};

use tessel_core::{
    Design, Diagram, DiagramId, DiagramModelObject, Entity, EntityRef, IdAssignments,
    LocalHandle, Model, ModelId, ModelMapping, ModelObject, ModelObjectId, Owner,
    ProjectId, ProjectSettings, Shape, ShapeConnection, Style, StyleId, Template, TemplateId,
    TesselResult,
};

// ============================================================================
// LOAD / SAVE EXCHANGE TYPES
// ============================================================================

/// An entity handed over by a loader, together with its owner.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub entity: T,
    pub owner: Owner,
}

impl<T> Loaded<T> {
    pub fn new(entity: T, owner: Owner) -> Self {
        Self { entity, owner }
    }
}

/// Result of a bulk load. Loaders fill the vectors relevant to them.
#[derive(Debug, Clone, Default)]
pub struct LoadBatch {
    pub projects: Vec<Loaded<ProjectSettings>>,
    pub designs: Vec<Loaded<Design>>,
    pub styles: Vec<Loaded<Style>>,
    pub models: Vec<Loaded<Model>>,
    pub model_objects: Vec<Loaded<ModelObject>>,
    pub diagram_model_objects: Vec<Loaded<DiagramModelObject>>,
    pub templates: Vec<Loaded<Template>>,
    pub model_mappings: Vec<Loaded<ModelMapping>>,
    pub diagrams: Vec<Loaded<Diagram>>,
    pub shapes: Vec<Loaded<Shape>>,
    /// Connections already established between the loaded shapes.
    pub connections: Vec<ShapeConnection>,
}

impl LoadBatch {
    /// Total number of entities in the batch (connections excluded).
    pub fn len(&self) -> usize {
        self.projects.len()
            + self.designs.len()
            + self.styles.len()
            + self.models.len()
            + self.model_objects.len()
            + self.diagram_model_objects.len()
            + self.templates.len()
            + self.model_mappings.len()
            + self.diagrams.len()
            + self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.connections.is_empty()
    }

    /// Fold another batch into this one.
    pub fn merge(&mut self, other: LoadBatch) {
        self.projects.extend(other.projects);
        self.designs.extend(other.designs);
        self.styles.extend(other.styles);
        self.models.extend(other.models);
        self.model_objects.extend(other.model_objects);
        self.diagram_model_objects.extend(other.diagram_model_objects);
        self.templates.extend(other.templates);
        self.model_mappings.extend(other.model_mappings);
        self.diagrams.extend(other.diagrams);
        self.shapes.extend(other.shapes);
        self.connections.extend(other.connections);
    }
}

/// Pending changes of one entity kind.
#[derive(Debug)]
pub struct Changes<'a, T: Entity> {
    /// New entities, keyed by the handle the store must assign an id to.
    pub inserted: Vec<(LocalHandle, &'a T, Owner)>,
    pub updated: Vec<&'a T>,
    pub owner_changed: Vec<(&'a T, Owner)>,
    pub deleted: Vec<T::Id>,
}

impl<T: Entity> Default for Changes<'_, T> {
    fn default() -> Self {
        Self {
            inserted: Vec::new(),
            updated: Vec::new(),
            owner_changed: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<T: Entity> Changes<'_, T> {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.updated.is_empty()
            && self.owner_changed.is_empty()
            && self.deleted.is_empty()
    }
}

/// Everything a commit asks the store to make durable.
#[derive(Debug, Default)]
pub struct ChangeSet<'a> {
    pub projects: Changes<'a, ProjectSettings>,
    pub designs: Changes<'a, Design>,
    pub styles: Changes<'a, Style>,
    pub models: Changes<'a, Model>,
    pub model_objects: Changes<'a, ModelObject>,
    pub diagram_model_objects: Changes<'a, DiagramModelObject>,
    pub templates: Changes<'a, Template>,
    pub model_mappings: Changes<'a, ModelMapping>,
    pub diagrams: Changes<'a, Diagram>,
    pub shapes: Changes<'a, Shape>,
    pub connections_added: Vec<ShapeConnection>,
    pub connections_removed: Vec<ShapeConnection>,
}

/// Per-category totals of a change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub connections: usize,
}

macro_rules! for_each_changes {
    ($set:expr, |$changes:ident| $body:expr) => {{
        let set = $set;
        {
            let $changes = &set.projects;
            $body;
        }
        {
            let $changes = &set.designs;
            $body;
        }
        {
            let $changes = &set.styles;
            $body;
        }
        {
            let $changes = &set.models;
            $body;
        }
        {
            let $changes = &set.model_objects;
            $body;
        }
        {
            let $changes = &set.diagram_model_objects;
            $body;
        }
        {
            let $changes = &set.templates;
            $body;
        }
        {
            let $changes = &set.model_mappings;
            $body;
        }
        {
            let $changes = &set.diagrams;
            $body;
        }
        {
            let $changes = &set.shapes;
            $body;
        }
    }};
}

impl ChangeSet<'_> {
    pub fn counts(&self) -> ChangeCounts {
        let mut counts = ChangeCounts {
            connections: self.connections_added.len() + self.connections_removed.len(),
            ..ChangeCounts::default()
        };
        for_each_changes!(self, |changes| {
            counts.inserted += changes.inserted.len();
            counts.updated += changes.updated.len() + changes.owner_changed.len();
            counts.deleted += changes.deleted.len();
        });
        counts
    }

    /// Handles of every inserted entity, across all kinds.
    pub fn inserted_handles(&self) -> Vec<LocalHandle> {
        let mut handles = Vec::new();
        for_each_changes!(self, |changes| {
            handles.extend(changes.inserted.iter().map(|(handle, _, _)| *handle))
        });
        handles
    }

    pub fn is_empty(&self) -> bool {
        let counts = self.counts();
        counts.inserted + counts.updated + counts.deleted + counts.connections == 0
    }
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// What the cache currently holds, as seen by off-cache probes.
pub trait Residency {
    /// True if the entity is tracked by the cache in any state, including
    /// deleted. Probes must skip resident entities; the cache answers for
    /// those itself.
    fn is_resident(&self, entity: EntityRef) -> bool;
}

/// Persistence backend consumed by the entity cache.
///
/// All calls are synchronous. Failures are reported as
/// [`tessel_core::StoreError`] wrapped in `TesselError` and the cache
/// propagates them unmodified.
pub trait Store {
    // === Properties ===

    /// Name of the project the store holds.
    fn project_name(&self) -> String;

    /// Version of the repository format this store writes.
    fn version(&self) -> i32;

    fn can_modify_version(&self) -> bool;

    // === Lifecycle ===

    fn exists(&self) -> TesselResult<bool>;

    /// Version of the repository as found in the backend.
    fn read_version(&self) -> TesselResult<i32>;

    fn open(&mut self) -> TesselResult<()>;

    fn create(&mut self) -> TesselResult<()>;

    fn close(&mut self) -> TesselResult<()>;

    fn erase(&mut self) -> TesselResult<()>;

    /// Make the change set durable and hand out an identity for every
    /// inserted handle.
    fn save_changes(&mut self, changes: &ChangeSet<'_>) -> TesselResult<IdAssignments>;

    // === Loaders ===

    fn load_projects(&mut self) -> TesselResult<LoadBatch>;

    /// Designs of the project with their styles.
    fn load_designs(&mut self, project: ProjectId) -> TesselResult<LoadBatch>;

    /// Templates with their shape trees, model objects and model mappings.
    fn load_templates(&mut self, project: ProjectId) -> TesselResult<LoadBatch>;

    /// Diagram metadata only; shapes are loaded per diagram.
    fn load_diagrams(&mut self, project: ProjectId) -> TesselResult<LoadBatch>;

    /// Shape trees of one diagram and the connections among them.
    fn load_diagram_shapes(&mut self, diagram: DiagramId) -> TesselResult<LoadBatch>;

    fn load_model(&mut self, project: ProjectId) -> TesselResult<LoadBatch>;

    /// Model objects owned directly by the model.
    fn load_model_model_objects(&mut self, model: ModelId) -> TesselResult<LoadBatch>;

    /// Direct children of one model object.
    fn load_child_model_objects(&mut self, parent: ModelObjectId) -> TesselResult<LoadBatch>;

    fn load_diagram_model_objects(&mut self, model: ModelId) -> TesselResult<LoadBatch>;

    /// Every descendant of `parent`. The default walks the tree one parent
    /// at a time; stores able to batch should override it.
    fn load_model_object_subtree(&mut self, parent: ModelObjectId) -> TesselResult<LoadBatch> {
        let mut batch = LoadBatch::default();
        let mut pending = vec![parent];
        while let Some(next) = pending.pop() {
            let children = self.load_child_model_objects(next)?;
            pending.extend(
                children
                    .model_objects
                    .iter()
                    .filter_map(|loaded| loaded.entity.key.id()),
            );
            batch.merge(children);
        }
        Ok(batch)
    }

    // === Off-cache probes ===

    fn is_style_in_use(&self, style: StyleId, residency: &dyn Residency) -> TesselResult<bool>;

    fn is_shape_type_in_use(
        &self,
        type_name: &str,
        residency: &dyn Residency,
    ) -> TesselResult<bool>;

    fn is_template_in_use(
        &self,
        template: TemplateId,
        residency: &dyn Residency,
    ) -> TesselResult<bool>;

    fn is_model_object_in_use(
        &self,
        model_object: ModelObjectId,
        residency: &dyn Residency,
    ) -> TesselResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::{EntityIdType, Key, ShapeId};

    #[test]
    fn test_load_batch_merge() {
        let design = Design::new("Default");
        let mut a = LoadBatch::default();
        a.designs.push(Loaded::new(design.clone(), Owner::Project));
        let mut b = LoadBatch::default();
        b.styles.push(Loaded::new(
            Style::color("Red", 0xFFFF_0000),
            Owner::Design(design.key),
        ));
        b.connections.push(ShapeConnection::new(
            Key::<ShapeId>::fresh(),
            tessel_core::ControlPointId(1),
            Key::fresh(),
            tessel_core::ControlPointId(2),
        ));

        a.merge(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.connections.len(), 1);
        assert!(!a.is_empty());
        assert!(LoadBatch::default().is_empty());
    }

    #[test]
    fn test_change_set_counts() {
        let design = Design::new("Default");
        let style = Style::color("Red", 0xFFFF_0000);
        let mut set = ChangeSet::default();
        assert!(set.is_empty());

        set.designs.inserted.push((
            design.key.handle().unwrap(),
            &design,
            Owner::Project,
        ));
        set.styles.updated.push(&style);
        set.shapes.deleted.push(ShapeId::now_v7());

        let counts = set.counts();
        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.deleted, 1);
        assert_eq!(set.inserted_handles(), vec![design.key.handle().unwrap()]);
    }
}
