//! Lazy loading: each kind is fetched from the store on first touch.

use super::{Collection, EntityCache};
use crate::{LoadBatch, Loaded};
use std::collections::{BTreeSet, HashSet};
use tessel_core::{
    ChildLoading, DesignId, DiagramId, Entity, EntityKind, Key, ModelId, ModelObjectId, ProjectId,
    TesselResult, UsageError,
};
use tracing::{debug, warn};

/// What has been fetched from the store this session.
#[derive(Debug, Default)]
pub(crate) struct LoadTracker {
    kinds: BTreeSet<EntityKind>,
    diagrams: HashSet<DiagramId>,
    /// Fresh repository: there is nothing in the store to load.
    everything: bool,
}

impl LoadTracker {
    pub(crate) fn is_loaded(&self, kind: EntityKind) -> bool {
        self.everything || self.kinds.contains(&kind)
    }

    pub(crate) fn mark(&mut self, kind: EntityKind) {
        self.kinds.insert(kind);
    }

    pub(crate) fn diagram_loaded(&self, diagram: DiagramId) -> bool {
        self.everything || self.diagrams.contains(&diagram)
    }

    pub(crate) fn mark_diagram(&mut self, diagram: DiagramId) {
        self.diagrams.insert(diagram);
    }

    pub(crate) fn mark_everything(&mut self) {
        self.everything = true;
    }

    pub(crate) fn clear(&mut self) {
        self.kinds.clear();
        self.diagrams.clear();
        self.everything = false;
    }
}

fn absorb_all<T: Entity>(collection: &mut Collection<T>, loaded: Vec<Loaded<T>>) -> usize {
    loaded
        .into_iter()
        .map(|Loaded { entity, owner }| collection.absorb(entity, owner))
        .filter(|taken| *taken)
        .count()
}

impl EntityCache {
    /// Track everything in a load batch that is not tracked yet. Returns the
    /// number of entities taken.
    pub(crate) fn absorb(&mut self, batch: LoadBatch) -> usize {
        let cols = &mut self.cols;
        let taken = absorb_all(&mut cols.projects, batch.projects)
            + absorb_all(&mut cols.designs, batch.designs)
            + absorb_all(&mut cols.styles, batch.styles)
            + absorb_all(&mut cols.models, batch.models)
            + absorb_all(&mut cols.model_objects, batch.model_objects)
            + absorb_all(&mut cols.diagram_model_objects, batch.diagram_model_objects)
            + absorb_all(&mut cols.templates, batch.templates)
            + absorb_all(&mut cols.model_mappings, batch.model_mappings)
            + absorb_all(&mut cols.diagrams, batch.diagrams)
            + absorb_all(&mut cols.shapes, batch.shapes);
        for connection in batch.connections {
            self.connections.establish(connection);
        }
        taken
    }

    /// Eager part of `open`: the single project settings record, every
    /// design with its styles, and the design named after the project.
    pub(crate) fn load_project(&mut self) -> TesselResult<()> {
        let batch = self.store_mut()?.load_projects()?;
        match batch.projects.len() {
            0 => return Err(UsageError::ProjectNotFound.into()),
            1 => {}
            count => return Err(UsageError::AmbiguousProject { count }.into()),
        }
        self.absorb(batch);
        let project = self.project_id()?;

        let batch = self.store_mut()?.load_designs(project)?;
        let taken = self.absorb(batch);
        debug!(project = %project, count = taken, "Loaded designs and styles");

        let name = self.store_ref()?.project_name();
        let named: Vec<Key<DesignId>> = self
            .cols
            .designs
            .iter()
            .map(|(design, _)| design)
            .filter(|design| design.name == name)
            .map(|design| design.key)
            .collect();
        let design = match named.as_slice() {
            [] => return Err(UsageError::MissingProjectDesign { project: name }.into()),
            [design] => *design,
            _ => {
                return Err(UsageError::AmbiguousProjectDesign {
                    project: name,
                    count: named.len(),
                }
                .into())
            }
        };
        self.project_design = Some(design);
        if let Some((extra, _)) = self.cols.designs.iter().find(|(d, _)| d.key != design) {
            warn!(design = %extra.name, "Project holds designs besides the project design");
        }

        self.loads.mark(EntityKind::ProjectSettings);
        self.loads.mark(EntityKind::Design);
        self.loads.mark(EntityKind::Style);
        Ok(())
    }

    pub(crate) fn project_id(&self) -> TesselResult<ProjectId> {
        self.cols
            .projects
            .iter()
            .find_map(|(settings, _)| settings.key.id())
            .ok_or_else(|| UsageError::ProjectNotFound.into())
    }

    /// Load `kind` unless it was loaded already this session. A failed load
    /// leaves the kind unloaded so the next touch retries.
    pub(crate) fn ensure_loaded(&mut self, kind: EntityKind) -> TesselResult<()> {
        if self.loads.is_loaded(kind) {
            return Ok(());
        }
        match kind {
            // Loaded eagerly by `open`.
            EntityKind::ProjectSettings | EntityKind::Design | EntityKind::Style => {}
            EntityKind::Template | EntityKind::ModelMapping => {
                let project = self.project_id()?;
                let batch = self.store_mut()?.load_templates(project)?;
                let taken = self.absorb(batch);
                debug!(kind = %kind, project = %project, count = taken, "Loaded templates");
                self.loads.mark(EntityKind::Template);
                self.loads.mark(EntityKind::ModelMapping);
            }
            EntityKind::Diagram => {
                let project = self.project_id()?;
                let batch = self.store_mut()?.load_diagrams(project)?;
                let taken = self.absorb(batch);
                debug!(kind = %kind, project = %project, count = taken, "Loaded diagrams");
            }
            EntityKind::Model => {
                let project = self.project_id()?;
                let batch = self.store_mut()?.load_model(project)?;
                let taken = self.absorb(batch);
                debug!(kind = %kind, project = %project, count = taken, "Loaded model");
            }
            EntityKind::DiagramModelObject => {
                self.ensure_loaded(EntityKind::Model)?;
                for model in self.persisted_models() {
                    let batch = self.store_mut()?.load_diagram_model_objects(model)?;
                    let taken = self.absorb(batch);
                    debug!(kind = %kind, model = %model, count = taken, "Loaded diagram model objects");
                }
            }
            EntityKind::ModelObject => {
                self.ensure_loaded(EntityKind::Model)?;
                self.ensure_loaded(EntityKind::Template)?;
                for model in self.persisted_models() {
                    self.load_model_objects(model)?;
                }
            }
            EntityKind::Shape => {
                self.ensure_loaded(EntityKind::Template)?;
                self.ensure_loaded(EntityKind::Diagram)?;
                let diagrams: Vec<Key<DiagramId>> =
                    self.cols.diagrams.iter().map(|(d, _)| d.key).collect();
                for diagram in diagrams {
                    self.ensure_diagram_shapes(diagram)?;
                }
            }
        }
        self.loads.mark(kind);
        Ok(())
    }

    fn persisted_models(&self) -> Vec<ModelId> {
        self.cols
            .models
            .iter()
            .filter_map(|(model, _)| model.key.id())
            .collect()
    }

    /// Model-level objects of one model, then their descendants.
    fn load_model_objects(&mut self, model: ModelId) -> TesselResult<()> {
        let batch = self.store_mut()?.load_model_model_objects(model)?;
        let parents: Vec<ModelObjectId> = batch
            .model_objects
            .iter()
            .filter_map(|loaded| loaded.entity.key.id())
            .collect();
        let taken = self.absorb(batch);
        debug!(model = %model, count = taken, "Loaded model objects");

        match self.config.child_loading {
            ChildLoading::Subtree => {
                for parent in parents {
                    let batch = self.store_mut()?.load_model_object_subtree(parent)?;
                    let taken = self.absorb(batch);
                    debug!(parent = %parent, count = taken, "Loaded model object subtree");
                }
            }
            ChildLoading::PerParent => {
                let mut pending = parents;
                while let Some(parent) = pending.pop() {
                    let batch = self.store_mut()?.load_child_model_objects(parent)?;
                    pending.extend(
                        batch
                            .model_objects
                            .iter()
                            .filter_map(|loaded| loaded.entity.key.id()),
                    );
                    let taken = self.absorb(batch);
                    debug!(parent = %parent, count = taken, "Loaded child model objects");
                }
            }
        }
        Ok(())
    }

    /// Load the shapes of one diagram. Transient diagrams have nothing in
    /// the store.
    pub(crate) fn ensure_diagram_shapes(&mut self, diagram: Key<DiagramId>) -> TesselResult<()> {
        let Some(id) = self.resolve_key(diagram).id() else {
            return Ok(());
        };
        if self.loads.diagram_loaded(id) {
            return Ok(());
        }
        let batch = self.store_mut()?.load_diagram_shapes(id)?;
        let connections = batch.connections.len();
        let taken = self.absorb(batch);
        self.loads.mark_diagram(id);
        debug!(diagram = %id, count = taken, connections, "Loaded diagram shapes");
        Ok(())
    }
}
