//! Read-side helpers built on the collections.

use super::checker::Batch;
use super::{EntityCache, Tracked};
use tessel_core::{
    Design, DesignId, DiagramId, EntityKind, ItemState, Key, ModelMapping, ModelObject,
    ModelObjectId, Owner, ProjectSettings, Shape, ShapeConnection, ShapeId, StateError, Style,
    StyleId, TemplateId, TesselResult, UsageError,
};

impl EntityCache {
    // ========================================================================
    // OWNED CONTENT
    // ========================================================================

    /// Top-level shapes of a diagram, loading them on first touch.
    pub fn get_diagram_shapes(&mut self, diagram: Key<DiagramId>) -> TesselResult<Vec<&Shape>> {
        self.ensure_open()?;
        self.ensure_loaded(EntityKind::Diagram)?;
        let diagram = self.resolve_key(diagram);
        if !self.cols.diagrams.is_live(diagram) {
            return Err(StateError::NotFound {
                kind: EntityKind::Diagram,
                key: diagram.erase(),
            }
            .into());
        }
        self.ensure_diagram_shapes(diagram)?;
        Ok(self.cols.shapes_owned_by(Owner::Diagram(diagram)).collect())
    }

    pub fn get_shape_children(&self, shape: Key<ShapeId>) -> Vec<&Shape> {
        let owner = Owner::Shape(self.resolve_key(shape));
        self.cols.shapes_owned_by(owner).collect()
    }

    pub fn get_child_model_objects(
        &mut self,
        parent: Key<ModelObjectId>,
    ) -> TesselResult<Vec<&ModelObject>> {
        self.get_all_owned_by::<ModelObject>(Owner::ModelObject(parent))
    }

    /// The prototype shape of a template.
    pub fn template_shape(&mut self, template: Key<TemplateId>) -> TesselResult<Option<&Shape>> {
        Ok(self
            .get_all_owned_by::<Shape>(Owner::Template(template))?
            .into_iter()
            .next())
    }

    pub fn template_model_object(
        &mut self,
        template: Key<TemplateId>,
    ) -> TesselResult<Option<&ModelObject>> {
        self.ensure_open()?;
        self.ensure_loaded(EntityKind::Template)?;
        let owner = Owner::Template(self.resolve_key(template));
        Ok(self.cols.model_objects.iter_owned_by(owner).next())
    }

    pub fn template_model_mappings(
        &mut self,
        template: Key<TemplateId>,
    ) -> TesselResult<Vec<&ModelMapping>> {
        self.get_all_owned_by::<ModelMapping>(Owner::Template(template))
    }

    pub fn design_styles(&mut self, design: Key<DesignId>) -> TesselResult<Vec<&Style>> {
        self.get_all_owned_by::<Style>(Owner::Design(design))
    }

    pub fn project_settings(&self) -> TesselResult<&ProjectSettings> {
        self.ensure_open()?;
        self.cols
            .projects
            .iter()
            .map(|(settings, _)| settings)
            .next()
            .ok_or_else(|| UsageError::ProjectNotFound.into())
    }

    /// The design named after the project.
    pub fn project_design(&self) -> TesselResult<&Design> {
        self.ensure_open()?;
        let project = self.project_name()?;
        self.project_design
            .and_then(|key| self.cols.designs.get(key))
            .ok_or_else(|| UsageError::MissingProjectDesign { project }.into())
    }

    /// Designs other than the project design. They are loaded and tracked
    /// like any other entity; nothing treats them specially.
    pub fn extra_designs(&self) -> Vec<&Design> {
        self.cols
            .designs
            .iter()
            .map(|(design, _)| design)
            .filter(|design| Some(design.key) != self.project_design)
            .collect()
    }

    // ========================================================================
    // STATE
    // ========================================================================

    pub fn connections_of(&self, shape: Key<ShapeId>) -> Vec<ShapeConnection> {
        self.connections.of_shape(self.resolve_key(shape))
    }

    /// Every live connection, established and pending.
    pub fn connections(&self) -> Vec<ShapeConnection> {
        self.connections.iter().copied().collect()
    }

    /// (pending additions, pending removals)
    pub fn pending_connection_counts(&self) -> (usize, usize) {
        self.connections.pending_counts()
    }

    /// Lifecycle state of a tracked entity, deleted ones included.
    pub fn state_of<T: Tracked>(&self, key: Key<T::Id>) -> Option<ItemState> {
        T::collection(&self.cols).state(self.resolve_key(key))
    }

    pub fn owner_of<T: Tracked>(&self, key: Key<T::Id>) -> Option<Owner> {
        T::collection(&self.cols).owner(self.resolve_key(key))
    }

    /// True if anything, including connections, awaits a commit.
    pub fn has_pending_changes(&self) -> bool {
        self.cols.has_pending() || self.connections.has_pending()
    }

    // ========================================================================
    // Z-ORDER
    // ========================================================================

    /// A z-order above every top-level shape of the diagram.
    pub fn obtain_new_top_z_order(&mut self, diagram: Key<DiagramId>) -> TesselResult<i32> {
        let step = self.config.z_order_step;
        let top = self
            .get_diagram_shapes(diagram)?
            .iter()
            .map(|shape| shape.z_order)
            .max();
        Ok(top.map_or(0, |z| z.saturating_add(step)))
    }

    /// A z-order below every top-level shape of the diagram.
    pub fn obtain_new_bottom_z_order(&mut self, diagram: Key<DiagramId>) -> TesselResult<i32> {
        let step = self.config.z_order_step;
        let bottom = self
            .get_diagram_shapes(diagram)?
            .iter()
            .map(|shape| shape.z_order)
            .min();
        Ok(bottom.map_or(0, |z| z.saturating_sub(step)))
    }

    // ========================================================================
    // USAGE PROBES
    // ========================================================================
    //
    // The same answers the delete checks rely on, for callers deciding
    // whether an entity can go.

    pub fn is_style_in_use(&self, style: Key<StyleId>) -> TesselResult<bool> {
        self.ensure_open()?;
        let batch = Batch::default();
        Ok(self
            .checker(&batch)
            .style_user(self.resolve_key(style))?
            .is_some())
    }

    pub fn is_template_in_use(&self, template: Key<TemplateId>) -> TesselResult<bool> {
        self.ensure_open()?;
        let batch = Batch::default();
        Ok(self
            .checker(&batch)
            .template_user(self.resolve_key(template))?
            .is_some())
    }

    pub fn is_model_object_in_use(&self, model_object: Key<ModelObjectId>) -> TesselResult<bool> {
        self.ensure_open()?;
        let batch = Batch::default();
        Ok(self
            .checker(&batch)
            .model_object_user(self.resolve_key(model_object))?
            .is_some())
    }

    pub fn is_shape_type_in_use(&self, type_name: &str) -> TesselResult<bool> {
        self.ensure_open()?;
        let batch = Batch::default();
        Ok(self.checker(&batch).shape_type_user(type_name)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::{EntityCache, MemoryStore};
    use tessel_core::{CacheConfig, Diagram, Owner, Shape, Style, TesselError};

    fn created() -> EntityCache {
        let mut cache = EntityCache::with_config(
            Some(Box::new(MemoryStore::new("Demo"))),
            CacheConfig::default().with_z_order_step(5),
        );
        cache.create().unwrap();
        cache
    }

    #[test]
    fn test_z_order_extrema() {
        let mut cache = created();
        let diagram = cache.insert(Diagram::new("D"), Owner::Project).unwrap();
        assert_eq!(cache.obtain_new_top_z_order(diagram).unwrap(), 0);
        assert_eq!(cache.obtain_new_bottom_z_order(diagram).unwrap(), 0);

        cache
            .insert(Shape::node("Box").with_z_order(10), Owner::Diagram(diagram))
            .unwrap();
        cache
            .insert(Shape::node("Box").with_z_order(-3), Owner::Diagram(diagram))
            .unwrap();
        assert_eq!(cache.obtain_new_top_z_order(diagram).unwrap(), 15);
        assert_eq!(cache.obtain_new_bottom_z_order(diagram).unwrap(), -8);
    }

    #[test]
    fn test_z_order_of_unknown_diagram() {
        let mut cache = created();
        assert!(matches!(
            cache.obtain_new_top_z_order(tessel_core::Key::fresh()),
            Err(TesselError::State(_))
        ));
    }

    #[test]
    fn test_style_usage_probe() {
        let mut cache = created();
        let design = cache.project_design().unwrap().key;
        let red = cache
            .insert(Style::color("Red", 0xFFFF_0000), Owner::Design(design))
            .unwrap();
        assert!(!cache.is_style_in_use(red).unwrap());

        let line = cache
            .insert(Style::line("Thin", red, 1), Owner::Design(design))
            .unwrap();
        assert!(cache.is_style_in_use(red).unwrap());
        assert!(!cache.is_style_in_use(line).unwrap());
        assert!(cache.design_styles(design).unwrap().len() == 2);
    }

    #[test]
    fn test_shape_type_probe_and_extra_designs() {
        let mut cache = created();
        let diagram = cache.insert(Diagram::new("D"), Owner::Project).unwrap();
        cache
            .insert(Shape::node("Ellipse"), Owner::Diagram(diagram))
            .unwrap();
        assert!(cache.is_shape_type_in_use("Ellipse").unwrap());
        assert!(!cache.is_shape_type_in_use("Polyline").unwrap());
        assert!(cache.extra_designs().is_empty());
    }
}
