//! Compound operations over ownership hierarchies ("with content").
//!
//! Inserts and undeletes go owner first, so every child finds its owner
//! already staged; connections come last, once every shape they touch is
//! staged. Deletes go the other way: connections, then children in
//! post-order, then the entity the caller named. Only that outer entity has
//! to be in the right state; descendants already gone are passed over.

use super::checker::Batch;
use super::{EntityCache, Tracked};
use std::collections::HashSet;
use tessel_core::{
    ControlPointCapabilities, Design, DesignId, Diagram, DiagramId, Entity, EntityKind, EntityRef,
    ItemState, Key, ModelMapping, ModelObject, ModelObjectId, Owner, Shape, ShapeConnection,
    ShapeId, StateError, Style, Template, TemplateId, TesselResult,
};
use tracing::debug;

// ============================================================================
// CONTENT TYPES
// ============================================================================

/// A design together with the styles it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignContent {
    pub design: Design,
    pub styles: Vec<Style>,
}

/// A shape and its nested child shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeTree {
    pub shape: Shape,
    pub children: Vec<ShapeTree>,
}

impl ShapeTree {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: ShapeTree) -> Self {
        self.children.push(child);
        self
    }

    /// Number of shapes in the tree, the root included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(ShapeTree::size).sum::<usize>()
    }

    /// Parents before children, each with its owner; `owner` owns the root.
    pub fn flatten(self, owner: Owner) -> Vec<(Shape, Owner)> {
        let mut out = Vec::with_capacity(self.size());
        self.flatten_into(owner, &mut out);
        out
    }

    fn flatten_into(self, owner: Owner, out: &mut Vec<(Shape, Owner)>) {
        let parent = Owner::Shape(self.shape.key);
        out.push((self.shape, owner));
        for child in self.children {
            child.flatten_into(parent, out);
        }
    }
}

/// A model object and its descendants.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelObjectTree {
    pub model_object: ModelObject,
    pub children: Vec<ModelObjectTree>,
}

impl ModelObjectTree {
    pub fn new(model_object: ModelObject) -> Self {
        Self {
            model_object,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: ModelObjectTree) -> Self {
        self.children.push(child);
        self
    }

    pub fn flatten(self, owner: Owner) -> Vec<(ModelObject, Owner)> {
        let mut out = Vec::new();
        self.flatten_into(owner, &mut out);
        out
    }

    fn flatten_into(self, owner: Owner, out: &mut Vec<(ModelObject, Owner)>) {
        let parent = Owner::ModelObject(self.model_object.key);
        out.push((self.model_object, owner));
        for child in self.children {
            child.flatten_into(parent, out);
        }
    }
}

/// A template with its prototype shape, model object and mappings.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateContent {
    pub template: Template,
    pub shape: Option<ShapeTree>,
    pub model_object: Option<ModelObject>,
    pub model_mappings: Vec<ModelMapping>,
}

impl TemplateContent {
    pub fn new(template: Template) -> Self {
        Self {
            template,
            shape: None,
            model_object: None,
            model_mappings: Vec::new(),
        }
    }
}

/// A diagram with its shape trees and the connections among them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramContent {
    pub diagram: Diagram,
    pub shapes: Vec<ShapeTree>,
    pub connections: Vec<ShapeConnection>,
}

impl DiagramContent {
    pub fn new(diagram: Diagram) -> Self {
        Self {
            diagram,
            shapes: Vec::new(),
            connections: Vec::new(),
        }
    }
}

// ============================================================================
// STAGING HELPERS
// ============================================================================

/// What restoring one entity amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Never persisted and no longer tracked: insert it again.
    Insert,
    Undelete,
    /// Descendant that is already live.
    Skip,
}

/// Colors first: every other style points at them.
fn colors_first(styles: &mut [Style]) {
    styles.sort_by_key(|style| style.category().rank());
}

fn shape_refs<'a>(keys: impl IntoIterator<Item = &'a Key<ShapeId>>) -> Vec<EntityRef> {
    keys.into_iter()
        .map(|key| EntityRef::of(EntityKind::Shape, *key))
        .collect()
}

impl EntityCache {
    fn normalize_all<T: Entity>(&self, entities: Vec<(T, Owner)>) -> Vec<(T, Owner)> {
        entities
            .into_iter()
            .map(|(entity, owner)| (self.normalize(entity), self.resolve_owner(owner)))
            .collect()
    }

    /// Keep the half of a connection whose own point is a glue point. A
    /// connector that cannot be found is kept so the checker reports it.
    fn glue_side(&self, staged: &[(Shape, Owner)], connection: &ShapeConnection) -> bool {
        let connector = staged
            .iter()
            .map(|(shape, _)| shape)
            .find(|shape| shape.key == connection.connector)
            .or_else(|| self.cols.shapes.get_any(connection.connector));
        match connector {
            Some(shape) => {
                shape.has_capability(connection.glue_point, ControlPointCapabilities::GLUE)
            }
            None => true,
        }
    }

    fn glue_connections(
        &self,
        staged: &[(Shape, Owner)],
        connections: Vec<ShapeConnection>,
    ) -> Vec<ShapeConnection> {
        let mut seen = HashSet::new();
        connections
            .into_iter()
            .map(|c| c.resolve(&self.assigned))
            .filter(|c| self.glue_side(staged, c) && seen.insert(*c))
            .collect()
    }

    fn stage_insert_all<'a, T: Tracked>(
        &self,
        batch: &mut Batch<'a>,
        entities: &'a [(T, Owner)],
    ) -> TesselResult<()> {
        for (entity, owner) in entities {
            self.stage_insert(batch, entity, *owner)?;
        }
        Ok(())
    }

    fn apply_insert_all<T: Tracked>(&mut self, entities: Vec<(T, Owner)>) -> TesselResult<()> {
        for (entity, owner) in entities {
            self.apply_insert(entity, owner)?;
        }
        Ok(())
    }

    fn stage_restore<'a, T: Tracked>(
        &'a self,
        batch: &mut Batch<'a>,
        entity: &'a T,
        owner: Owner,
        outer: bool,
    ) -> TesselResult<Step> {
        let key = entity.key();
        let subject = entity.entity_ref();
        match (key, T::collection(&self.cols).state(key)) {
            (Key::Transient(_), None) => {
                self.stage_insert(batch, entity, owner)?;
                Ok(Step::Insert)
            }
            (Key::Persisted(_), Some(ItemState::Deleted)) => {
                self.stage_undelete::<T>(batch, key)?;
                Ok(Step::Undelete)
            }
            (Key::Persisted(_), None) => Err(StateError::NotFound {
                kind: T::KIND,
                key: key.erase(),
            }
            .into()),
            (_, Some(_)) if outer => Err(StateError::NotDeleted { entity: subject }.into()),
            (_, Some(_)) => Ok(Step::Skip),
        }
    }

    fn stage_restore_all<'a, T: Tracked>(
        &'a self,
        batch: &mut Batch<'a>,
        entities: &'a [(T, Owner)],
        outer: bool,
    ) -> TesselResult<Vec<Step>> {
        entities
            .iter()
            .map(|(entity, owner)| self.stage_restore(batch, entity, *owner, outer))
            .collect()
    }

    fn apply_restore_all<T: Tracked>(
        &mut self,
        entities: Vec<(T, Owner)>,
        steps: Vec<Step>,
    ) -> TesselResult<()> {
        for ((entity, owner), step) in entities.into_iter().zip(steps) {
            match step {
                Step::Insert => self.apply_insert(entity, owner)?,
                Step::Undelete => self.apply_undelete::<T>(entity.key())?,
                Step::Skip => {}
            }
        }
        Ok(())
    }

    /// Stage connections to re-establish, skipping those still live.
    fn stage_restored_connections(
        &self,
        batch: &mut Batch<'_>,
        connections: &[ShapeConnection],
    ) -> TesselResult<Vec<ShapeConnection>> {
        let mut restored = Vec::new();
        for connection in connections {
            if self.connections.contains(connection) {
                continue;
            }
            self.stage_connection(batch, *connection)?;
            restored.push(*connection);
        }
        Ok(restored)
    }

    /// Stage the deletion of `root` and its live descendants; returns them
    /// children first, `root` last, leaving out any already staged.
    fn stage_subtree_delete<T: Tracked>(
        &self,
        batch: &mut Batch<'_>,
        root: Key<T::Id>,
        descendants: Vec<Key<T::Id>>,
    ) -> TesselResult<Vec<Key<T::Id>>> {
        self.stage_delete::<T>(batch, root)?;
        let mut order: Vec<Key<T::Id>> = descendants
            .into_iter()
            .rev()
            .filter(|key| batch.deleting.insert(EntityRef::of(T::KIND, *key)))
            .collect();
        order.push(root);
        Ok(order)
    }

    fn shape_descendants(&self, shape: Key<ShapeId>) -> Vec<Key<ShapeId>> {
        self.cols
            .shape_subtree(Owner::Shape(shape))
            .into_iter()
            .map(|shape| shape.key)
            .collect()
    }

    fn apply_delete_all<T: Tracked>(&mut self, keys: Vec<Key<T::Id>>) -> TesselResult<()> {
        for key in keys {
            self.apply_delete::<T>(key)?;
        }
        Ok(())
    }

    // ========================================================================
    // DESIGNS
    // ========================================================================

    /// Insert a design and its styles, color styles first.
    pub fn insert_design_with_content(
        &mut self,
        content: DesignContent,
    ) -> TesselResult<Key<DesignId>> {
        self.ensure_open()?;
        self.prepare_owner::<Design>(Owner::Project)?;
        let design = self.normalize(content.design);
        let owner = Owner::Design(design.key);
        let mut styles = content.styles;
        colors_first(&mut styles);
        let styles = self.normalize_all(styles.into_iter().map(|s| (s, owner)).collect());

        let mut batch = Batch::default();
        self.stage_insert(&mut batch, &design, Owner::Project)?;
        self.stage_insert_all(&mut batch, &styles)?;

        let key = design.key;
        self.apply_insert(design, Owner::Project)?;
        self.apply_insert_all(styles)?;
        Ok(key)
    }

    /// Delete a design and its styles. Colors go last.
    pub fn delete_design_with_content(&mut self, design: Key<DesignId>) -> TesselResult<()> {
        self.ensure_open()?;
        let design = self.resolve_key(design);
        self.prepare_delete(EntityRef::of(EntityKind::Design, design))?;

        let mut styles: Vec<&Style> = self
            .cols
            .styles
            .iter_owned_by(Owner::Design(design))
            .collect();
        styles.sort_by_key(|style| std::cmp::Reverse(style.category().rank()));
        let styles: Vec<Key<_>> = styles.into_iter().map(|style| style.key).collect();

        let mut batch = Batch::default();
        self.stage_delete::<Design>(&mut batch, design)?;
        batch.deleting.extend(
            styles
                .iter()
                .map(|style| EntityRef::of(EntityKind::Style, *style)),
        );
        let mut order: Vec<EntityRef> = styles
            .iter()
            .map(|style| EntityRef::of(EntityKind::Style, *style))
            .collect();
        order.push(EntityRef::of(EntityKind::Design, design));
        self.check_deletes(&batch, &order)?;

        self.apply_delete_all::<Style>(styles)?;
        self.apply_delete::<Design>(design)?;
        debug!(design = %design, "Deleted design with content");
        Ok(())
    }

    pub fn undelete_design_with_content(&mut self, content: DesignContent) -> TesselResult<()> {
        self.ensure_open()?;
        let design = self.normalize(content.design);
        let owner = Owner::Design(design.key);
        let mut styles = content.styles;
        colors_first(&mut styles);
        let styles = self.normalize_all(styles.into_iter().map(|s| (s, owner)).collect());

        let mut batch = Batch::default();
        let design_step = self.stage_restore(&mut batch, &design, Owner::Project, true)?;
        let style_steps = self.stage_restore_all(&mut batch, &styles, false)?;

        self.apply_restore_all(vec![(design, Owner::Project)], vec![design_step])?;
        self.apply_restore_all(styles, style_steps)
    }

    /// Snapshot of a design and its live styles, for a later undelete.
    pub fn design_content(&mut self, design: Key<DesignId>) -> TesselResult<DesignContent> {
        let design = self.get::<Design>(design)?.clone();
        let styles = self
            .cols
            .styles
            .iter_owned_by(Owner::Design(design.key))
            .cloned()
            .collect();
        Ok(DesignContent { design, styles })
    }

    // ========================================================================
    // TEMPLATES
    // ========================================================================

    /// Insert a template, then its model object, prototype shape tree and
    /// model mappings.
    pub fn insert_template_with_content(
        &mut self,
        content: TemplateContent,
    ) -> TesselResult<Key<TemplateId>> {
        self.ensure_open()?;
        self.prepare_owner::<Template>(Owner::Project)?;
        let template = self.normalize(content.template);
        let owner = Owner::Template(template.key);
        self.prepare_owner::<ModelObject>(owner)?;
        let model_object = self.normalize_all(
            content
                .model_object
                .into_iter()
                .map(|mo| (mo, owner))
                .collect(),
        );
        let shapes = self.normalize_all(
            content
                .shape
                .map(|tree| tree.flatten(owner))
                .unwrap_or_default(),
        );
        let mappings = self.normalize_all(
            content
                .model_mappings
                .into_iter()
                .map(|m| (m, owner))
                .collect(),
        );

        let mut batch = Batch::default();
        self.stage_insert(&mut batch, &template, Owner::Project)?;
        self.stage_insert_all(&mut batch, &model_object)?;
        self.stage_insert_all(&mut batch, &shapes)?;
        self.stage_insert_all(&mut batch, &mappings)?;

        let key = template.key;
        self.apply_insert(template, Owner::Project)?;
        self.apply_insert_all(model_object)?;
        self.apply_insert_all(shapes)?;
        self.apply_insert_all(mappings)?;
        Ok(key)
    }

    /// Delete a template with everything it owns: mappings, then the shape
    /// tree bottom-up, then model objects, then the template.
    pub fn delete_template_with_content(&mut self, template: Key<TemplateId>) -> TesselResult<()> {
        self.ensure_open()?;
        let template = self.resolve_key(template);
        self.prepare_delete(EntityRef::of(EntityKind::Template, template))?;
        let owner = Owner::Template(template);

        let mappings: Vec<Key<_>> = self
            .cols
            .model_mappings
            .iter_owned_by(owner)
            .map(|m| m.key)
            .collect();
        let shapes: Vec<Key<ShapeId>> = self
            .cols
            .shape_subtree(owner)
            .into_iter()
            .rev()
            .map(|s| s.key)
            .collect();
        let model_objects: Vec<Key<ModelObjectId>> = self
            .cols
            .model_object_subtree(owner)
            .into_iter()
            .rev()
            .map(|mo| mo.key)
            .collect();

        let mut batch = Batch::default();
        self.stage_delete::<Template>(&mut batch, template)?;
        let mut order: Vec<EntityRef> = mappings
            .iter()
            .map(|m| EntityRef::of(EntityKind::ModelMapping, *m))
            .chain(shape_refs(&shapes))
            .chain(
                model_objects
                    .iter()
                    .map(|mo| EntityRef::of(EntityKind::ModelObject, *mo)),
            )
            .collect();
        batch.deleting.extend(order.iter().copied());
        order.push(EntityRef::of(EntityKind::Template, template));
        self.stage_connection_removals(&mut batch, true);
        self.check_deletes(&batch, &order)?;

        let removing: Vec<ShapeConnection> = batch.removing_connections.into_iter().collect();
        self.apply_connection_changes(removing, Vec::new());
        self.apply_delete_all::<ModelMapping>(mappings)?;
        self.apply_delete_all::<Shape>(shapes)?;
        self.apply_delete_all::<ModelObject>(model_objects)?;
        self.apply_delete::<Template>(template)?;
        debug!(template = %template, "Deleted template with content");
        Ok(())
    }

    pub fn undelete_template_with_content(&mut self, content: TemplateContent) -> TesselResult<()> {
        self.ensure_open()?;
        self.ensure_loaded(EntityKind::Template)?;
        let template = self.normalize(content.template);
        let owner = Owner::Template(template.key);
        let model_object = self.normalize_all(
            content
                .model_object
                .into_iter()
                .map(|mo| (mo, owner))
                .collect(),
        );
        let shapes = self.normalize_all(
            content
                .shape
                .map(|tree| tree.flatten(owner))
                .unwrap_or_default(),
        );
        let mappings = self.normalize_all(
            content
                .model_mappings
                .into_iter()
                .map(|m| (m, owner))
                .collect(),
        );

        let mut batch = Batch::default();
        let template_step = self.stage_restore(&mut batch, &template, Owner::Project, true)?;
        let model_object_steps = self.stage_restore_all(&mut batch, &model_object, false)?;
        let shape_steps = self.stage_restore_all(&mut batch, &shapes, false)?;
        let mapping_steps = self.stage_restore_all(&mut batch, &mappings, false)?;

        self.apply_restore_all(vec![(template, Owner::Project)], vec![template_step])?;
        self.apply_restore_all(model_object, model_object_steps)?;
        self.apply_restore_all(shapes, shape_steps)?;
        self.apply_restore_all(mappings, mapping_steps)
    }

    pub fn template_content(&mut self, template: Key<TemplateId>) -> TesselResult<TemplateContent> {
        let template = self.get::<Template>(template)?.clone();
        let owner = Owner::Template(template.key);
        let shape = self
            .cols
            .shapes_owned_by(owner)
            .next()
            .map(|root| self.shape_tree_of(root));
        let model_object = self.cols.model_objects.iter_owned_by(owner).next().cloned();
        let model_mappings = self
            .cols
            .model_mappings
            .iter_owned_by(owner)
            .cloned()
            .collect();
        Ok(TemplateContent {
            template,
            shape,
            model_object,
            model_mappings,
        })
    }

    // ========================================================================
    // DIAGRAMS
    // ========================================================================

    /// Insert a diagram with its shape trees, then the connections among
    /// them. Only the glue-point half of each connection is inserted.
    pub fn insert_diagram_with_content(
        &mut self,
        content: DiagramContent,
    ) -> TesselResult<Key<DiagramId>> {
        self.ensure_open()?;
        self.prepare_owner::<Diagram>(Owner::Project)?;
        let diagram = self.normalize(content.diagram);
        let owner = Owner::Diagram(diagram.key);
        let shapes = self.normalize_all(
            content
                .shapes
                .into_iter()
                .flat_map(|tree| tree.flatten(owner))
                .collect(),
        );
        let connections = self.glue_connections(&shapes, content.connections);

        let mut batch = Batch::default();
        self.stage_insert(&mut batch, &diagram, Owner::Project)?;
        self.stage_insert_all(&mut batch, &shapes)?;
        for connection in &connections {
            self.stage_connection(&mut batch, *connection)?;
        }

        let key = diagram.key;
        self.apply_insert(diagram, Owner::Project)?;
        self.apply_insert_all(shapes)?;
        self.apply_connection_changes(Vec::new(), connections);
        Ok(key)
    }

    /// Delete a diagram, its shapes bottom-up and their connections.
    pub fn delete_diagram_with_content(&mut self, diagram: Key<DiagramId>) -> TesselResult<()> {
        self.ensure_open()?;
        let diagram = self.resolve_key(diagram);
        self.prepare_delete(EntityRef::of(EntityKind::Diagram, diagram))?;
        let shapes: Vec<Key<ShapeId>> = self
            .cols
            .shape_subtree(Owner::Diagram(diagram))
            .into_iter()
            .rev()
            .map(|s| s.key)
            .collect();

        let mut batch = Batch::default();
        self.stage_delete::<Diagram>(&mut batch, diagram)?;
        let mut order = shape_refs(&shapes);
        batch.deleting.extend(order.iter().copied());
        order.push(EntityRef::of(EntityKind::Diagram, diagram));
        self.stage_connection_removals(&mut batch, true);
        self.check_deletes(&batch, &order)?;

        let removing: Vec<ShapeConnection> = batch.removing_connections.into_iter().collect();
        let connections = removing.len();
        self.apply_connection_changes(removing, Vec::new());
        let count = shapes.len();
        self.apply_delete_all::<Shape>(shapes)?;
        self.apply_delete::<Diagram>(diagram)?;
        debug!(diagram = %diagram, shapes = count, connections, "Deleted diagram with content");
        Ok(())
    }

    pub fn undelete_diagram_with_content(&mut self, content: DiagramContent) -> TesselResult<()> {
        self.ensure_open()?;
        self.ensure_loaded(EntityKind::Diagram)?;
        let diagram = self.normalize(content.diagram);
        let owner = Owner::Diagram(diagram.key);
        let shapes = self.normalize_all(
            content
                .shapes
                .into_iter()
                .flat_map(|tree| tree.flatten(owner))
                .collect(),
        );
        let connections = self.glue_connections(&shapes, content.connections);

        let mut batch = Batch::default();
        let diagram_step = self.stage_restore(&mut batch, &diagram, Owner::Project, true)?;
        let shape_steps = self.stage_restore_all(&mut batch, &shapes, false)?;
        let restored = self.stage_restored_connections(&mut batch, &connections)?;

        self.apply_restore_all(vec![(diagram, Owner::Project)], vec![diagram_step])?;
        self.apply_restore_all(shapes, shape_steps)?;
        self.apply_connection_changes(Vec::new(), restored);
        Ok(())
    }

    /// Snapshot of a diagram, its live shape trees and their connections.
    pub fn diagram_content(&mut self, diagram: Key<DiagramId>) -> TesselResult<DiagramContent> {
        let diagram = self.get::<Diagram>(diagram)?.clone();
        self.ensure_diagram_shapes(diagram.key)?;
        let shapes: Vec<ShapeTree> = self
            .cols
            .shapes_owned_by(Owner::Diagram(diagram.key))
            .map(|root| self.shape_tree_of(root))
            .collect();
        let members: HashSet<Key<ShapeId>> = self
            .cols
            .shape_subtree(Owner::Diagram(diagram.key))
            .into_iter()
            .map(|s| s.key)
            .collect();
        let connections = self
            .connections
            .iter()
            .filter(|c| members.contains(&c.connector) || members.contains(&c.target))
            .copied()
            .collect();
        Ok(DiagramContent {
            diagram,
            shapes,
            connections,
        })
    }

    // ========================================================================
    // SHAPES
    // ========================================================================

    /// Insert shape trees under `owner`, then the given connections. Returns
    /// the keys of the roots.
    pub fn insert_shapes_with_content(
        &mut self,
        trees: Vec<ShapeTree>,
        owner: Owner,
        connections: Vec<ShapeConnection>,
    ) -> TesselResult<Vec<Key<ShapeId>>> {
        self.ensure_open()?;
        let owner = self.resolve_owner(owner);
        self.prepare_owner::<Shape>(owner)?;
        let roots: Vec<Key<ShapeId>> = trees
            .iter()
            .map(|tree| self.resolve_key(tree.shape.key))
            .collect();
        let shapes = self.normalize_all(
            trees
                .into_iter()
                .flat_map(|tree| tree.flatten(owner))
                .collect(),
        );
        let connections = self.glue_connections(&shapes, connections);

        let mut batch = Batch::default();
        self.stage_insert_all(&mut batch, &shapes)?;
        for connection in &connections {
            self.stage_connection(&mut batch, *connection)?;
        }

        self.apply_insert_all(shapes)?;
        self.apply_connection_changes(Vec::new(), connections);
        Ok(roots)
    }

    /// Delete shapes with their descendants and the connections they own.
    /// Keys already covered as a descendant of another key are skipped.
    pub fn delete_shapes_with_content(&mut self, shapes: Vec<Key<ShapeId>>) -> TesselResult<()> {
        self.ensure_open()?;
        let shapes: Vec<Key<ShapeId>> = shapes.into_iter().map(|k| self.resolve_key(k)).collect();
        for shape in &shapes {
            self.prepare_delete(EntityRef::of(EntityKind::Shape, *shape))?;
        }

        let mut batch = Batch::default();
        let mut order = Vec::new();
        for shape in shapes {
            if batch.deleting.contains(&EntityRef::of(EntityKind::Shape, shape)) {
                continue;
            }
            let descendants = self.shape_descendants(shape);
            order.extend(self.stage_subtree_delete::<Shape>(&mut batch, shape, descendants)?);
        }
        self.stage_connection_removals(&mut batch, true);
        self.check_deletes(&batch, &shape_refs(&order))?;

        let removing: Vec<ShapeConnection> = batch.removing_connections.into_iter().collect();
        self.apply_connection_changes(removing, Vec::new());
        self.apply_delete_all::<Shape>(order)
    }

    /// Restore shape trees under `owner`, then the given connections.
    pub fn undelete_shapes_with_content(
        &mut self,
        trees: Vec<ShapeTree>,
        owner: Owner,
        connections: Vec<ShapeConnection>,
    ) -> TesselResult<()> {
        self.ensure_open()?;
        let owner = self.resolve_owner(owner);
        self.prepare_owner::<Shape>(owner)?;
        let mut shapes = Vec::new();
        let mut outer = Vec::new();
        for tree in trees {
            let flat = self.normalize_all(tree.flatten(owner));
            outer.extend((0..flat.len()).map(|i| i == 0));
            shapes.extend(flat);
        }
        let connections = self.glue_connections(&shapes, connections);

        let mut batch = Batch::default();
        let mut steps = Vec::with_capacity(shapes.len());
        for ((shape, parent), is_outer) in shapes.iter().zip(&outer) {
            steps.push(self.stage_restore(&mut batch, shape, *parent, *is_outer)?);
        }
        let restored = self.stage_restored_connections(&mut batch, &connections)?;

        self.apply_restore_all(shapes, steps)?;
        self.apply_connection_changes(Vec::new(), restored);
        Ok(())
    }

    /// Snapshot of a live shape and its descendants.
    pub fn shape_tree(&mut self, shape: Key<ShapeId>) -> TesselResult<ShapeTree> {
        let shape = self.get::<Shape>(shape)?.key;
        let root = self.cols.shapes.get_any(shape).ok_or(StateError::NotFound {
            kind: EntityKind::Shape,
            key: shape.erase(),
        })?;
        Ok(self.shape_tree_of(root))
    }

    fn shape_tree_of(&self, shape: &Shape) -> ShapeTree {
        ShapeTree {
            shape: shape.clone(),
            children: self
                .cols
                .shapes_owned_by(Owner::Shape(shape.key))
                .map(|child| self.shape_tree_of(child))
                .collect(),
        }
    }

    // ========================================================================
    // MODEL OBJECTS
    // ========================================================================

    pub fn insert_model_objects_with_content(
        &mut self,
        trees: Vec<ModelObjectTree>,
        owner: Owner,
    ) -> TesselResult<Vec<Key<ModelObjectId>>> {
        self.ensure_open()?;
        let owner = self.resolve_owner(owner);
        self.prepare_owner::<ModelObject>(owner)?;
        let roots: Vec<Key<ModelObjectId>> = trees
            .iter()
            .map(|tree| self.resolve_key(tree.model_object.key))
            .collect();
        let objects = self.normalize_all(
            trees
                .into_iter()
                .flat_map(|tree| tree.flatten(owner))
                .collect(),
        );

        let mut batch = Batch::default();
        self.stage_insert_all(&mut batch, &objects)?;
        self.apply_insert_all(objects)?;
        Ok(roots)
    }

    /// Delete model objects with all of their descendants.
    pub fn delete_model_objects_with_content(
        &mut self,
        model_objects: Vec<Key<ModelObjectId>>,
    ) -> TesselResult<()> {
        self.ensure_open()?;
        let model_objects: Vec<Key<ModelObjectId>> = model_objects
            .into_iter()
            .map(|k| self.resolve_key(k))
            .collect();
        for model_object in &model_objects {
            self.prepare_delete(EntityRef::of(EntityKind::ModelObject, *model_object))?;
        }

        let mut batch = Batch::default();
        let mut order = Vec::new();
        for model_object in model_objects {
            let subject = EntityRef::of(EntityKind::ModelObject, model_object);
            if batch.deleting.contains(&subject) {
                continue;
            }
            let descendants: Vec<Key<ModelObjectId>> = self
                .cols
                .model_object_subtree(Owner::ModelObject(model_object))
                .into_iter()
                .map(|mo| mo.key)
                .collect();
            order.extend(self.stage_subtree_delete::<ModelObject>(
                &mut batch,
                model_object,
                descendants,
            )?);
        }
        let refs: Vec<EntityRef> = order
            .iter()
            .map(|mo| EntityRef::of(EntityKind::ModelObject, *mo))
            .collect();
        self.check_deletes(&batch, &refs)?;
        self.apply_delete_all::<ModelObject>(order)
    }

    pub fn undelete_model_objects_with_content(
        &mut self,
        trees: Vec<ModelObjectTree>,
        owner: Owner,
    ) -> TesselResult<()> {
        self.ensure_open()?;
        let owner = self.resolve_owner(owner);
        self.prepare_owner::<ModelObject>(owner)?;
        let mut objects = Vec::new();
        let mut outer = Vec::new();
        for tree in trees {
            let flat = self.normalize_all(tree.flatten(owner));
            outer.extend((0..flat.len()).map(|i| i == 0));
            objects.extend(flat);
        }

        let mut batch = Batch::default();
        let mut steps = Vec::with_capacity(objects.len());
        for ((object, parent), is_outer) in objects.iter().zip(&outer) {
            steps.push(self.stage_restore(&mut batch, object, *parent, *is_outer)?);
        }
        self.apply_restore_all(objects, steps)
    }
}
