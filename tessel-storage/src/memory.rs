//! In-memory reference store.
//!
//! Cloning a [`MemoryStore`] yields another handle onto the same data, so a
//! test can keep one handle for inspection while the cache owns another.

use crate::{ChangeSet, Changes, LoadBatch, Loaded, Residency, Store};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tessel_core::{
    new_entity_id, Design, Diagram, DiagramId, DiagramModelObject, Entity, EntityIdType,
    EntityKind, EntityRef, IdAssignments, Key, Model, ModelId, ModelMapping, ModelObject,
    ModelObjectId, Owner, ProjectId, ProjectSettings, Shape, ShapeConnection, StoreError, Style,
    StyleId, Template, TemplateId, TesselError, TesselResult,
};
use tracing::{debug, trace};

/// Repository format version written by the memory store.
pub const MEMORY_STORE_VERSION: i32 = 3;

/// Per-call counters, for asserting how the cache talks to its store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Loader name → number of calls.
    pub loads: BTreeMap<String, usize>,
    pub probes: usize,
    pub saves: usize,
    /// Entity inserts, updates and deletes written by saves.
    pub entity_writes: usize,
    /// Connection inserts and deletes written by saves.
    pub connection_writes: usize,
}

impl StoreStats {
    pub fn load_count(&self, loader: &str) -> usize {
        self.loads.get(loader).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.loads.values().sum()
    }
}

#[derive(Debug, Clone)]
struct Record<T> {
    entity: T,
    owner: Owner,
}

type Table<T> = BTreeMap<<T as Entity>::Id, Record<T>>;

#[derive(Debug, Default)]
struct MemoryData {
    exists: bool,
    open: bool,
    projects: Table<ProjectSettings>,
    designs: Table<Design>,
    styles: Table<Style>,
    models: Table<Model>,
    model_objects: Table<ModelObject>,
    diagram_model_objects: Table<DiagramModelObject>,
    templates: Table<Template>,
    model_mappings: Table<ModelMapping>,
    diagrams: Table<Diagram>,
    shapes: Table<Shape>,
    connections: BTreeSet<ShapeConnection>,
    stats: StoreStats,
    fail_next_save: Option<String>,
    withhold_next_identity: bool,
    fail_loads: Option<String>,
}

/// Entity kinds the memory store keeps a table for.
trait StoredKind: Entity {
    fn table(data: &MemoryData) -> &Table<Self>;
    fn table_mut(data: &mut MemoryData) -> &mut Table<Self>;
}

/// Entity kinds whose stored records can be inspected through
/// [`MemoryStore::fetch`].
pub trait StoredEntity: Entity {
    fn fetch_record(store: &MemoryStore, id: Self::Id) -> TesselResult<Option<(Self, Owner)>>;
}

macro_rules! stored_kind {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl StoredKind for $ty {
                fn table(data: &MemoryData) -> &Table<Self> {
                    &data.$field
                }

                fn table_mut(data: &mut MemoryData) -> &mut Table<Self> {
                    &mut data.$field
                }
            }

            impl StoredEntity for $ty {
                fn fetch_record(
                    store: &MemoryStore,
                    id: Self::Id,
                ) -> TesselResult<Option<(Self, Owner)>> {
                    let data = store.read()?;
                    Ok(data
                        .$field
                        .get(&id)
                        .map(|record| (record.entity.clone(), record.owner)))
                }
            }
        )*
    };
}

stored_kind! {
    ProjectSettings => projects,
    Design => designs,
    Style => styles,
    Model => models,
    ModelObject => model_objects,
    DiagramModelObject => diagram_model_objects,
    Template => templates,
    ModelMapping => model_mappings,
    Diagram => diagrams,
    Shape => shapes,
}

fn owned_by<T: StoredKind>(data: &MemoryData, owner: Owner) -> Vec<Loaded<T>> {
    T::table(data)
        .values()
        .filter(|record| record.owner == owner)
        .map(|record| Loaded::new(record.entity.clone(), record.owner))
        .collect()
}

fn is_resident<T: Entity>(residency: &dyn Residency, entity: &T) -> bool {
    residency.is_resident(entity.entity_ref())
}

/// Shared in-memory [`Store`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    project_name: String,
    version: i32,
    inner: Arc<RwLock<MemoryData>>,
}

impl MemoryStore {
    /// Create a handle onto an empty, not yet created repository.
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            version: MEMORY_STORE_VERSION,
            inner: Arc::new(RwLock::new(MemoryData::default())),
        }
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    fn read(&self) -> TesselResult<RwLockReadGuard<'_, MemoryData>> {
        self.inner
            .read()
            .map_err(|_| TesselError::Store(StoreError::LockPoisoned))
    }

    fn write(&self) -> TesselResult<RwLockWriteGuard<'_, MemoryData>> {
        self.inner
            .write()
            .map_err(|_| TesselError::Store(StoreError::LockPoisoned))
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> TesselResult<StoreStats> {
        Ok(self.read()?.stats.clone())
    }

    pub fn reset_stats(&self) -> TesselResult<()> {
        self.write()?.stats = StoreStats::default();
        Ok(())
    }

    /// Make the next `save_changes` fail without applying anything.
    pub fn fail_next_save(&self, reason: impl Into<String>) -> TesselResult<()> {
        self.write()?.fail_next_save = Some(reason.into());
        Ok(())
    }

    /// Make the next `save_changes` skip the last inserted entity: it is
    /// neither written nor given an identity.
    pub fn withhold_next_identity(&self) -> TesselResult<()> {
        self.write()?.withhold_next_identity = true;
        Ok(())
    }

    /// Make every loader fail until cleared with `None`.
    pub fn fail_loads(&self, reason: Option<String>) -> TesselResult<()> {
        self.write()?.fail_loads = reason;
        Ok(())
    }

    /// Number of stored entities of `kind`.
    pub fn entity_count(&self, kind: EntityKind) -> TesselResult<usize> {
        let data = self.read()?;
        Ok(match kind {
            EntityKind::ProjectSettings => data.projects.len(),
            EntityKind::Design => data.designs.len(),
            EntityKind::Style => data.styles.len(),
            EntityKind::Model => data.models.len(),
            EntityKind::ModelObject => data.model_objects.len(),
            EntityKind::DiagramModelObject => data.diagram_model_objects.len(),
            EntityKind::Template => data.templates.len(),
            EntityKind::ModelMapping => data.model_mappings.len(),
            EntityKind::Diagram => data.diagrams.len(),
            EntityKind::Shape => data.shapes.len(),
        })
    }

    pub fn connection_count(&self) -> TesselResult<usize> {
        Ok(self.read()?.connections.len())
    }

    /// Stored copy of an entity, as the last save left it.
    pub fn fetch<T: StoredEntity>(&self, id: T::Id) -> TesselResult<Option<T>> {
        Ok(T::fetch_record(self, id)?.map(|(entity, _)| entity))
    }

    /// Owner recorded for a stored entity.
    pub fn fetch_owner<T: StoredEntity>(&self, id: T::Id) -> TesselResult<Option<Owner>> {
        Ok(T::fetch_record(self, id)?.map(|(_, owner)| owner))
    }

    fn begin_load(&self, loader: &str) -> TesselResult<RwLockWriteGuard<'_, MemoryData>> {
        let mut data = self.write()?;
        if !data.open {
            return Err(StoreError::NotOpen.into());
        }
        *data.stats.loads.entry(loader.to_string()).or_insert(0) += 1;
        if let Some(reason) = data.fail_loads.clone() {
            return Err(StoreError::LoadFailed { reason }.into());
        }
        Ok(data)
    }

    fn begin_probe(&self) -> TesselResult<RwLockWriteGuard<'_, MemoryData>> {
        let mut data = self.write()?;
        if !data.open {
            return Err(StoreError::NotOpen.into());
        }
        data.stats.probes += 1;
        Ok(data)
    }
}

// ============================================================================
// SAVE
// ============================================================================

fn apply_changes<T: StoredKind>(
    data: &mut MemoryData,
    changes: &Changes<'_, T>,
    ids: &IdAssignments,
) -> usize {
    let mut writes = 0;
    for id in &changes.deleted {
        T::table_mut(data).remove(id);
        writes += 1;
    }
    for (handle, entity, owner) in &changes.inserted {
        let Some(uuid) = ids.get(*handle) else {
            continue;
        };
        let id = T::Id::new(uuid);
        let mut stored = (*entity).clone();
        stored.set_key(Key::Persisted(id));
        stored.remap_keys(ids);
        T::table_mut(data).insert(
            id,
            Record {
                entity: stored,
                owner: owner.resolve(ids),
            },
        );
        writes += 1;
    }
    for entity in &changes.updated {
        if let Some(id) = entity.key().id() {
            let mut stored = (*entity).clone();
            stored.remap_keys(ids);
            let table = T::table_mut(data);
            let owner = table.get(&id).map(|r| r.owner).unwrap_or(Owner::Project);
            table.insert(id, Record { entity: stored, owner });
            writes += 1;
        }
    }
    for (entity, owner) in &changes.owner_changed {
        if let Some(id) = entity.key().id() {
            let mut stored = (*entity).clone();
            stored.remap_keys(ids);
            T::table_mut(data).insert(
                id,
                Record {
                    entity: stored,
                    owner: owner.resolve(ids),
                },
            );
            writes += 1;
        }
    }
    writes
}

impl Store for MemoryStore {
    fn project_name(&self) -> String {
        self.project_name.clone()
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn can_modify_version(&self) -> bool {
        true
    }

    fn exists(&self) -> TesselResult<bool> {
        Ok(self.read()?.exists)
    }

    fn read_version(&self) -> TesselResult<i32> {
        if !self.read()?.exists {
            return Err(StoreError::DoesNotExist.into());
        }
        Ok(self.version)
    }

    fn open(&mut self) -> TesselResult<()> {
        let mut data = self.write()?;
        if !data.exists {
            return Err(StoreError::DoesNotExist.into());
        }
        data.open = true;
        debug!(project = %self.project_name, "memory store opened");
        Ok(())
    }

    fn create(&mut self) -> TesselResult<()> {
        let mut data = self.write()?;
        if data.exists {
            return Err(StoreError::AlreadyExists.into());
        }
        let stats = std::mem::take(&mut data.stats);
        *data = MemoryData {
            exists: true,
            open: true,
            stats,
            ..MemoryData::default()
        };
        debug!(project = %self.project_name, "memory store created");
        Ok(())
    }

    fn close(&mut self) -> TesselResult<()> {
        self.write()?.open = false;
        Ok(())
    }

    fn erase(&mut self) -> TesselResult<()> {
        let mut data = self.write()?;
        if !data.exists {
            return Err(StoreError::DoesNotExist.into());
        }
        let stats = std::mem::take(&mut data.stats);
        *data = MemoryData {
            stats,
            ..MemoryData::default()
        };
        debug!(project = %self.project_name, "memory store erased");
        Ok(())
    }

    fn save_changes(&mut self, changes: &ChangeSet<'_>) -> TesselResult<IdAssignments> {
        let mut data = self.write()?;
        if !data.open {
            return Err(StoreError::NotOpen.into());
        }
        if let Some(reason) = data.fail_next_save.take() {
            return Err(StoreError::SaveFailed { reason }.into());
        }

        let mut handles = changes.inserted_handles();
        if std::mem::take(&mut data.withhold_next_identity) {
            handles.pop();
        }
        let mut ids = IdAssignments::new();
        for handle in handles {
            ids.assign(handle, new_entity_id());
        }

        let mut writes = 0;
        writes += apply_changes(&mut data, &changes.projects, &ids);
        writes += apply_changes(&mut data, &changes.designs, &ids);
        writes += apply_changes(&mut data, &changes.styles, &ids);
        writes += apply_changes(&mut data, &changes.models, &ids);
        writes += apply_changes(&mut data, &changes.model_objects, &ids);
        writes += apply_changes(&mut data, &changes.diagram_model_objects, &ids);
        writes += apply_changes(&mut data, &changes.templates, &ids);
        writes += apply_changes(&mut data, &changes.model_mappings, &ids);
        writes += apply_changes(&mut data, &changes.diagrams, &ids);
        writes += apply_changes(&mut data, &changes.shapes, &ids);

        let saved_at = Utc::now();
        for record in data.projects.values_mut() {
            record.entity.last_saved = Some(saved_at);
        }

        for connection in &changes.connections_removed {
            data.connections.remove(&connection.resolve(&ids));
        }
        for connection in &changes.connections_added {
            let connection = connection.resolve(&ids);
            if connection.connector.is_persisted() && connection.target.is_persisted() {
                data.connections.insert(connection);
            }
        }
        let deleted_shapes: BTreeSet<Key<_>> = changes
            .shapes
            .deleted
            .iter()
            .map(|id| Key::Persisted(*id))
            .collect();
        data.connections
            .retain(|c| !deleted_shapes.contains(&c.connector) && !deleted_shapes.contains(&c.target));

        let connection_writes = changes.connections_added.len() + changes.connections_removed.len();
        data.stats.saves += 1;
        data.stats.entity_writes += writes;
        data.stats.connection_writes += connection_writes;
        debug!(
            entities = writes,
            connections = connection_writes,
            assigned = ids.len(),
            "memory store saved changes"
        );
        Ok(ids)
    }

    fn load_projects(&mut self) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_projects")?;
        Ok(LoadBatch {
            projects: owned_by(&data, Owner::Project),
            ..LoadBatch::default()
        })
    }

    fn load_designs(&mut self, _project: ProjectId) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_designs")?;
        let designs: Vec<Loaded<Design>> = owned_by(&data, Owner::Project);
        let styles = designs
            .iter()
            .flat_map(|d| owned_by(&data, Owner::Design(d.entity.key)))
            .collect();
        Ok(LoadBatch {
            designs,
            styles,
            ..LoadBatch::default()
        })
    }

    fn load_templates(&mut self, _project: ProjectId) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_templates")?;
        let templates: Vec<Loaded<Template>> = owned_by(&data, Owner::Project);
        let mut batch = LoadBatch::default();
        for template in &templates {
            let owner = Owner::Template(template.entity.key);
            batch.model_objects.extend(owned_by(&data, owner));
            batch.model_mappings.extend(owned_by(&data, owner));
            let mut pending: Vec<Loaded<Shape>> = owned_by(&data, owner);
            while let Some(shape) = pending.pop() {
                pending.extend(owned_by(&data, Owner::Shape(shape.entity.key)));
                batch.shapes.push(shape);
            }
        }
        batch.templates = templates;
        Ok(batch)
    }

    fn load_diagrams(&mut self, _project: ProjectId) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_diagrams")?;
        Ok(LoadBatch {
            diagrams: owned_by(&data, Owner::Project),
            ..LoadBatch::default()
        })
    }

    fn load_diagram_shapes(&mut self, diagram: DiagramId) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_diagram_shapes")?;
        let mut batch = LoadBatch::default();
        let mut keys = BTreeSet::new();
        let mut pending: Vec<Loaded<Shape>> = owned_by(&data, Owner::Diagram(diagram.into()));
        while let Some(shape) = pending.pop() {
            pending.extend(owned_by(&data, Owner::Shape(shape.entity.key)));
            keys.insert(shape.entity.key);
            batch.shapes.push(shape);
        }
        batch.connections = data
            .connections
            .iter()
            .filter(|c| keys.contains(&c.connector) || keys.contains(&c.target))
            .copied()
            .collect();
        trace!(diagram = %diagram, shapes = batch.shapes.len(), "diagram shapes loaded");
        Ok(batch)
    }

    fn load_model(&mut self, _project: ProjectId) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_model")?;
        Ok(LoadBatch {
            models: owned_by(&data, Owner::Project),
            ..LoadBatch::default()
        })
    }

    fn load_model_model_objects(&mut self, model: ModelId) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_model_model_objects")?;
        Ok(LoadBatch {
            model_objects: owned_by(&data, Owner::Model(model.into())),
            ..LoadBatch::default()
        })
    }

    fn load_child_model_objects(&mut self, parent: ModelObjectId) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_child_model_objects")?;
        Ok(LoadBatch {
            model_objects: owned_by(&data, Owner::ModelObject(parent.into())),
            ..LoadBatch::default()
        })
    }

    fn load_diagram_model_objects(&mut self, model: ModelId) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_diagram_model_objects")?;
        Ok(LoadBatch {
            diagram_model_objects: owned_by(&data, Owner::Model(model.into())),
            ..LoadBatch::default()
        })
    }

    fn load_model_object_subtree(&mut self, parent: ModelObjectId) -> TesselResult<LoadBatch> {
        let data = self.begin_load("load_model_object_subtree")?;
        let mut batch = LoadBatch::default();
        let mut pending: Vec<Loaded<ModelObject>> =
            owned_by(&data, Owner::ModelObject(parent.into()));
        while let Some(child) = pending.pop() {
            pending.extend(owned_by(&data, Owner::ModelObject(child.entity.key)));
            batch.model_objects.push(child);
        }
        Ok(batch)
    }

    fn is_style_in_use(&self, style: StyleId, residency: &dyn Residency) -> TesselResult<bool> {
        let data = self.begin_probe()?;
        let key = Key::Persisted(style);
        let by_style = data.styles.values().any(|r| {
            !is_resident(residency, &r.entity) && r.entity.referenced_styles().contains(&key)
        });
        let by_mapping = data.model_mappings.values().any(|r| {
            !is_resident(residency, &r.entity) && r.entity.referenced_styles().contains(&key)
        });
        let by_shape = data.shapes.values().any(|r| {
            !is_resident(residency, &r.entity) && r.entity.styles.iter().any(|s| s == key)
        });
        Ok(by_style || by_mapping || by_shape)
    }

    fn is_shape_type_in_use(
        &self,
        type_name: &str,
        residency: &dyn Residency,
    ) -> TesselResult<bool> {
        let data = self.begin_probe()?;
        Ok(data
            .shapes
            .values()
            .any(|r| !is_resident(residency, &r.entity) && r.entity.type_name == type_name))
    }

    fn is_template_in_use(
        &self,
        template: TemplateId,
        residency: &dyn Residency,
    ) -> TesselResult<bool> {
        let data = self.begin_probe()?;
        let key = Some(Key::Persisted(template));
        Ok(data
            .shapes
            .values()
            .any(|r| !is_resident(residency, &r.entity) && r.entity.template == key))
    }

    fn is_model_object_in_use(
        &self,
        model_object: ModelObjectId,
        residency: &dyn Residency,
    ) -> TesselResult<bool> {
        let data = self.begin_probe()?;
        let key = Key::Persisted(model_object);
        let by_shape = data.shapes.values().any(|r| {
            !is_resident(residency, &r.entity) && r.entity.model_object == Some(key)
        });
        let by_child = data.model_objects.values().any(|r| {
            !is_resident(residency, &r.entity) && r.owner == Owner::ModelObject(key)
        });
        Ok(by_shape || by_child)
    }
}

/// Residency that claims nothing is resident; every stored entity counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NothingResident;

impl Residency for NothingResident {
    fn is_resident(&self, _entity: EntityRef) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::{ControlPointId, LocalHandle};

    fn open_store() -> MemoryStore {
        let mut store = MemoryStore::new("Demo");
        store.create().unwrap();
        store
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut store = MemoryStore::new("Demo");
        assert!(!store.exists().unwrap());
        assert_eq!(
            store.open(),
            Err(TesselError::Store(StoreError::DoesNotExist))
        );
        assert_eq!(
            store.load_projects().unwrap_err(),
            TesselError::Store(StoreError::NotOpen)
        );

        store.create().unwrap();
        assert_eq!(
            store.create(),
            Err(TesselError::Store(StoreError::AlreadyExists))
        );
        assert_eq!(store.read_version().unwrap(), MEMORY_STORE_VERSION);

        store.erase().unwrap();
        assert!(!store.exists().unwrap());
    }

    #[test]
    fn test_save_assigns_ids_and_remaps_references() {
        let mut store = open_store();
        let design = Design::new("Demo");
        let red = Style::color("Red", 0xFFFF_0000);
        let line = Style::line("Thin", red.key, 1);

        let mut set = ChangeSet::default();
        set.designs
            .inserted
            .push((design.key.handle().unwrap(), &design, Owner::Project));
        set.styles
            .inserted
            .push((red.key.handle().unwrap(), &red, Owner::Design(design.key)));
        set.styles
            .inserted
            .push((line.key.handle().unwrap(), &line, Owner::Design(design.key)));
        let ids = store.save_changes(&set).unwrap();
        assert_eq!(ids.len(), 3);

        let red_id = StyleId::new(ids.get(red.key.handle().unwrap()).unwrap());
        let line_id = StyleId::new(ids.get(line.key.handle().unwrap()).unwrap());
        let stored = store.fetch::<Style>(line_id).unwrap().unwrap();
        assert_eq!(stored.referenced_styles(), vec![Key::Persisted(red_id)]);
        assert_eq!(stored.key, Key::Persisted(line_id));

        let stats = store.stats().unwrap();
        assert_eq!(stats.saves, 1);
        assert_eq!(stats.entity_writes, 3);
    }

    #[test]
    fn test_fail_next_save_applies_nothing() {
        let mut store = open_store();
        store.fail_next_save("disk full").unwrap();
        let design = Design::new("Demo");
        let mut set = ChangeSet::default();
        set.designs
            .inserted
            .push((design.key.handle().unwrap(), &design, Owner::Project));

        let err = store.save_changes(&set).unwrap_err();
        assert_eq!(
            err,
            TesselError::Store(StoreError::SaveFailed {
                reason: "disk full".to_string()
            })
        );
        assert_eq!(store.entity_count(EntityKind::Design).unwrap(), 0);
        assert!(store.save_changes(&set).is_ok());
    }

    #[test]
    fn test_probes_skip_resident_entities() {
        struct Everything;
        impl Residency for Everything {
            fn is_resident(&self, _entity: EntityRef) -> bool {
                true
            }
        }

        let mut store = open_store();
        let design = Design::new("Demo");
        let red = Style::color("Red", 0xFFFF_0000);
        let diagram = Diagram::new("Main");
        let shape = Shape::node("Box").with_styles(tessel_core::ShapeStyles {
            fill: Some(red.key),
            ..Default::default()
        });
        let mut set = ChangeSet::default();
        set.designs
            .inserted
            .push((design.key.handle().unwrap(), &design, Owner::Project));
        set.styles
            .inserted
            .push((red.key.handle().unwrap(), &red, Owner::Design(design.key)));
        set.diagrams
            .inserted
            .push((diagram.key.handle().unwrap(), &diagram, Owner::Project));
        set.shapes.inserted.push((
            shape.key.handle().unwrap(),
            &shape,
            Owner::Diagram(diagram.key),
        ));
        let ids = store.save_changes(&set).unwrap();
        let red_id = StyleId::new(ids.get(red.key.handle().unwrap()).unwrap());

        assert!(store.is_style_in_use(red_id, &NothingResident).unwrap());
        assert!(!store.is_style_in_use(red_id, &Everything).unwrap());
        assert!(store.is_shape_type_in_use("Box", &NothingResident).unwrap());
        assert!(!store.is_shape_type_in_use("Ellipse", &NothingResident).unwrap());
        assert_eq!(store.stats().unwrap().probes, 4);
    }

    #[test]
    fn test_diagram_shapes_come_with_connections() {
        let mut store = open_store();
        let diagram = Diagram::new("Main");
        let a = Shape::node("Box");
        let b = Shape::node("Box");
        let line = Shape::connector("Line");
        let conn = ShapeConnection::new(line.key, ControlPointId(1), a.key, ControlPointId(5));
        let handles: Vec<LocalHandle> = [a.key, b.key, line.key]
            .iter()
            .filter_map(|k| k.handle())
            .collect();

        let mut set = ChangeSet::default();
        set.diagrams
            .inserted
            .push((diagram.key.handle().unwrap(), &diagram, Owner::Project));
        for (shape, handle) in [&a, &b, &line].into_iter().zip(handles) {
            set.shapes
                .inserted
                .push((handle, shape, Owner::Diagram(diagram.key)));
        }
        set.connections_added.push(conn);
        let ids = store.save_changes(&set).unwrap();

        let diagram_id = DiagramId::new(ids.get(diagram.key.handle().unwrap()).unwrap());
        let batch = store.load_diagram_shapes(diagram_id).unwrap();
        assert_eq!(batch.shapes.len(), 3);
        assert_eq!(batch.connections, vec![conn.resolve(&ids)]);
        assert_eq!(store.stats().unwrap().load_count("load_diagram_shapes"), 1);
        assert_eq!(store.stats().unwrap().connection_writes, 1);
    }

    #[test]
    fn test_fail_loads() {
        let mut store = open_store();
        store.fail_loads(Some("unreachable".to_string())).unwrap();
        assert!(matches!(
            store.load_projects(),
            Err(TesselError::Store(StoreError::LoadFailed { .. }))
        ));
        store.fail_loads(None).unwrap();
        assert!(store.load_projects().unwrap().is_empty());
    }
}
