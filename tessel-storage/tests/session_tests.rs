//! End-to-end session tests for the entity cache over the memory store.
//!
//! Each test drives a full session: create or open, mutate, commit, and
//! where durability matters close and reopen over the same store.

use std::cell::RefCell;
use std::rc::Rc;

use tessel_core::{
    ChangeEvent, ChildLoading, ConsistencyError, Design, Diagram, DiagramId, DiagramModelObject,
    EntityKind, EntityRef, ItemState, Key, Model, ModelObject, ModelObjectId, Shape, ShapeId,
    ShapeStyles, StateError, Style, Template, TesselError, TesselResult, UsageError,
};
use tessel_storage::{EntityCache, MemoryStore, ModelObjectTree, Store};
use tessel_test_utils::{assertions, fixtures, init_test_tracing, Owner};

fn recorded(cache: &mut EntityCache) -> Rc<RefCell<Vec<ChangeEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    cache.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    events
}

// ============================================================================
// ROUND TRIP & COMMIT
// ============================================================================

#[test]
fn test_insert_commit_round_trip() -> TesselResult<()> {
    init_test_tracing();
    let (mut cache, store) = fixtures::committed_session()?;
    let events = recorded(&mut cache);

    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let shape = Shape::node("Box").at(40, 60).with_z_order(7);
    let key = cache.insert(shape.clone(), Owner::Diagram(diagram))?;
    assert!(key.is_transient());
    assert!(cache.is_modified());

    cache.commit()?;
    assert!(!cache.is_modified());
    let key = cache.resolve_key(key);
    assert!(key.is_persisted());

    let tracked = cache.get::<Shape>(key)?;
    assert_eq!(tracked.key, key);
    assert_eq!((tracked.x, tracked.y, tracked.z_order), (40, 60, 7));
    assert_eq!(tracked.control_points, shape.control_points);
    assertions::assert_item_state::<Shape>(&cache, key, Some(ItemState::Original));

    let stored = store.fetch::<Shape>(key.id().expect("committed shape has an id"))?;
    assert_eq!(stored.map(|s| s.x), Some(40));
    assert!(matches!(
        events.borrow().last(),
        Some(ChangeEvent::Committed { inserted: 2, .. })
    ));
    Ok(())
}

#[test]
fn test_committed_content_survives_reopen() -> TesselResult<()> {
    init_test_tracing();
    let (mut cache, store) = fixtures::committed_session()?;
    let palette = fixtures::palette(&mut cache)?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let styles = ShapeStyles {
        line: Some(palette.thin),
        fill: Some(palette.solid),
        ..ShapeStyles::default()
    };
    let shape = cache.insert(
        Shape::node("Box").with_styles(styles),
        Owner::Diagram(diagram),
    )?;
    cache.commit()?;
    let (diagram, shape, thin) = (
        cache.resolve_key(diagram),
        cache.resolve_key(shape),
        cache.resolve_key(palette.thin),
    );
    cache.close()?;

    let mut cache = fixtures::reopen(&store)?;
    let design = cache.project_design()?.key;
    assert_eq!(cache.design_styles(design)?.len(), 4);
    let shapes = cache.get_diagram_shapes(diagram)?;
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].key, shape);
    assert_eq!(shapes[0].styles.line, Some(thin));
    assert_eq!(cache.owner_of::<Shape>(shape), Some(Owner::Diagram(diagram)));
    assertions::assert_clean(&cache);
    Ok(())
}

#[test]
fn test_commit_twice_is_a_no_op() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    cache.insert(Design::new("Print"), Owner::Project)?;
    cache.commit()?;
    let saves = store.stats()?.saves;

    cache.commit()?;
    assert!(!cache.is_modified());
    cache.commit()?;
    assert!(!cache.is_modified());
    assert_eq!(store.stats()?.saves, saves);
    Ok(())
}

#[test]
fn test_failed_save_keeps_everything_pending() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let pair = fixtures::connected_pair(&mut cache, diagram)?;
    store.fail_next_save("disk full")?;

    assertions::assert_store_error(&cache.commit());
    assert!(cache.is_modified());
    assert_eq!(cache.pending_connection_counts(), (2, 0));
    assert_eq!(store.entity_count(EntityKind::Shape)?, 0);

    cache.commit()?;
    assertions::assert_clean(&cache);
    assert_eq!(store.entity_count(EntityKind::Shape)?, 3);
    assert_eq!(store.connection_count()?, 2);
    assert!(cache.resolve_key(pair.connector).is_persisted());
    Ok(())
}

// ============================================================================
// DELETE / UNDELETE
// ============================================================================

#[test]
fn test_delete_then_undelete_issues_no_backend_delete() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let design = cache.project_design()?.key;
    let red = cache.insert(Style::color("Red", 0xFFFF_0000), Owner::Design(design))?;
    cache.commit()?;
    let red = cache.resolve_key(red);

    cache.delete::<Style>(red)?;
    assert!(!cache.contains::<Style>(red));
    assert!(cache.design_styles(design)?.iter().all(|s| s.key != red));

    cache.undelete::<Style>(red)?;
    assert!(cache.contains::<Style>(red));
    assert!(cache.design_styles(design)?.iter().any(|s| s.key == red));
    assert!(cache.get_all::<Style>()?.iter().any(|s| s.key == red));

    cache.commit()?;
    let id = red.id().expect("committed style has an id");
    assert!(store.fetch::<Style>(id)?.is_some());
    assert_eq!(store.entity_count(EntityKind::Style)?, 1);
    assertions::assert_item_state::<Style>(&cache, red, Some(ItemState::Original));
    Ok(())
}

#[test]
fn test_double_delete_rejected() -> TesselResult<()> {
    let (mut cache, _store) = fixtures::committed_session()?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let shape = cache.insert(Shape::node("Box"), Owner::Diagram(diagram))?;
    cache.commit()?;
    let shape = cache.resolve_key(shape);

    cache.delete::<Shape>(shape)?;
    let second = cache.delete::<Shape>(shape);
    assert!(matches!(
        second,
        Err(TesselError::State(StateError::AlreadyDeleted { .. }))
    ));
    assertions::assert_item_state::<Shape>(&cache, shape, Some(ItemState::Deleted));
    assert!(!cache.contains::<Shape>(shape));
    Ok(())
}

#[test]
fn test_undelete_of_transient_entity_rejected() -> TesselResult<()> {
    let (mut cache, _store) = fixtures::created_session()?;
    let extra = cache.insert(Design::new("Scratch"), Owner::Project)?;
    cache.delete::<Design>(extra)?;
    assertions::assert_item_state::<Design>(&cache, extra, None);
    assert!(matches!(
        cache.undelete::<Design>(extra),
        Err(TesselError::State(StateError::NotPersisted { .. }))
    ));
    Ok(())
}

// ============================================================================
// CASCADE ORDER & REFERENTIAL INTEGRITY
// ============================================================================

#[test]
fn test_diagram_delete_waits_for_its_shapes() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let pair = fixtures::connected_pair(&mut cache, diagram)?;
    cache.commit()?;

    let blocked = cache.delete::<Diagram>(diagram);
    assert!(matches!(
        blocked,
        Err(TesselError::Consistency(ConsistencyError::DiagramHasShapes { .. }))
    ));
    assert!(cache.contains::<Diagram>(diagram));

    cache.delete_many::<Shape>(vec![pair.source, pair.target, pair.connector])?;
    assert!(cache.connections().is_empty());
    cache.delete::<Diagram>(diagram)?;
    cache.commit()?;

    assert_eq!(store.entity_count(EntityKind::Diagram)?, 0);
    assert_eq!(store.entity_count(EntityKind::Shape)?, 0);
    assert_eq!(store.connection_count()?, 0);
    Ok(())
}

#[test]
fn test_connected_shape_cannot_go_alone() -> TesselResult<()> {
    let (mut cache, _store) = fixtures::committed_session()?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let pair = fixtures::connected_pair(&mut cache, diagram)?;

    assert!(matches!(
        cache.delete::<Shape>(pair.source),
        Err(TesselError::Consistency(ConsistencyError::ShapeConnected { .. }))
    ));
    cache.delete_connection(pair.connections()[0])?;
    cache.delete::<Shape>(pair.source)?;
    assert_eq!(cache.connections_of(pair.connector).len(), 1);
    Ok(())
}

#[test]
fn test_style_delete_blocked_while_referenced() -> TesselResult<()> {
    let (mut cache, _store) = fixtures::committed_session()?;
    let palette = fixtures::palette(&mut cache)?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let styles = ShapeStyles {
        line: Some(palette.thin),
        ..ShapeStyles::default()
    };
    let shape = cache.insert(
        Shape::node("Box").with_styles(styles),
        Owner::Diagram(diagram),
    )?;

    // thin is used by the shape, black by thin.
    let by_shape = cache.delete::<Style>(palette.thin);
    assert!(matches!(
        by_shape,
        Err(TesselError::Consistency(ConsistencyError::StyleInUse { .. }))
    ));
    assertions::assert_consistency_error(&cache.delete::<Style>(palette.black));

    cache.delete::<Shape>(shape)?;
    cache.delete::<Style>(palette.thin)?;
    cache.delete::<Style>(palette.black)?;
    assert!(!cache.contains::<Style>(palette.black));
    Ok(())
}

#[test]
fn test_style_delete_probes_store_for_unloaded_users() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let palette = fixtures::palette(&mut cache)?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let styles = ShapeStyles {
        line: Some(palette.thin),
        ..ShapeStyles::default()
    };
    cache.insert(
        Shape::node("Box").with_styles(styles),
        Owner::Diagram(diagram),
    )?;
    cache.commit()?;
    let thin = cache.resolve_key(palette.thin);
    cache.close()?;

    let mut cache = fixtures::reopen(&store)?;
    store.reset_stats()?;
    assertions::assert_consistency_error(&cache.delete::<Style>(thin));
    assert!(store.stats()?.probes >= 1);
    assert_eq!(store.stats()?.load_count("load_diagram_shapes"), 0);
    assert!(cache.contains::<Style>(thin));
    Ok(())
}

// ============================================================================
// CONNECTIONS
// ============================================================================

#[test]
fn test_connection_toggle_before_commit_writes_nothing() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let pair = fixtures::connected_pair(&mut cache, diagram)?;
    for connection in pair.connections() {
        cache.delete_connection(connection)?;
    }
    cache.commit()?;
    assert_eq!(store.stats()?.connection_writes, 0);

    let [first, _] = pair.connections();
    cache.insert_connection(first)?;
    cache.delete_connection(first)?;
    assert_eq!(cache.pending_connection_counts(), (0, 0));
    cache.commit()?;
    assert_eq!(store.stats()?.connection_writes, 0);
    assert_eq!(store.connection_count()?, 0);
    Ok(())
}

#[test]
fn test_established_connection_removed_and_restored() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let pair = fixtures::connected_pair(&mut cache, diagram)?;
    cache.commit()?;
    let (diagram, connector) = (cache.resolve_key(diagram), cache.resolve_key(pair.connector));
    cache.close()?;

    let mut cache = fixtures::reopen(&store)?;
    cache.get_diagram_shapes(diagram)?;
    let established = cache.connections();
    assert_eq!(established.len(), 2);
    store.reset_stats()?;

    cache.delete_connection(established[0])?;
    cache.insert_connection(established[0])?;
    assert_eq!(cache.pending_connection_counts(), (0, 0));
    cache.commit()?;
    assert_eq!(store.stats()?.connection_writes, 0);
    assert_eq!(store.connection_count()?, 2);
    assert_eq!(cache.connections_of(connector).len(), 2);
    Ok(())
}

// ============================================================================
// LAZY LOADING
// ============================================================================

#[test]
fn test_templates_load_once_per_session() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    cache.insert(Template::new("Process"), Owner::Project)?;
    cache.commit()?;
    cache.close()?;

    let mut cache = fixtures::reopen(&store)?;
    store.reset_stats()?;
    assert_eq!(cache.get_all::<Template>()?.len(), 1);
    assert_eq!(cache.get_all::<Template>()?.len(), 1);
    assert_eq!(store.stats()?.load_count("load_templates"), 1);
    Ok(())
}

#[test]
fn test_fresh_repository_never_loads() -> TesselResult<()> {
    let (mut cache, store) = fixtures::created_session()?;
    assert!(cache.get_all::<Template>()?.is_empty());
    assert!(cache.get_all::<Shape>()?.is_empty());
    assert_eq!(store.stats()?.total_loads(), 0);
    Ok(())
}

#[test]
fn test_failed_load_is_retried() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    cache.insert(Template::new("Process"), Owner::Project)?;
    cache.commit()?;
    cache.close()?;

    let mut cache = fixtures::reopen(&store)?;
    store.fail_loads(Some("backend offline".to_string()))?;
    assertions::assert_store_error(&cache.get_all::<Template>());
    store.fail_loads(None)?;
    assert_eq!(cache.get_all::<Template>()?.len(), 1);
    Ok(())
}

// ============================================================================
// OPEN
// ============================================================================

#[test]
fn test_open_without_project_settings() -> TesselResult<()> {
    let mut raw = MemoryStore::new("Empty");
    raw.create()?;
    raw.close()?;

    let mut cache = EntityCache::with_config(Some(Box::new(raw)), fixtures::test_config());
    assert!(matches!(
        cache.open(),
        Err(TesselError::Usage(UsageError::ProjectNotFound))
    ));
    assert!(!cache.is_open());
    Ok(())
}

#[test]
fn test_open_without_project_design() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let mut design = cache.project_design()?.clone();
    design.name = "Renamed".to_string();
    cache.update(design)?;
    cache.commit()?;
    cache.close()?;

    let reopened = fixtures::reopen(&store);
    assert!(matches!(
        reopened,
        Err(TesselError::Usage(UsageError::MissingProjectDesign { .. }))
    ));
    Ok(())
}

#[test]
fn test_open_missing_repository() {
    let store = MemoryStore::new("Nowhere");
    assertions::assert_store_error(&fixtures::reopen(&store));
}

// ============================================================================
// SCENARIO
// ============================================================================

#[test]
fn test_design_with_style_end_to_end() -> TesselResult<()> {
    init_test_tracing();
    let (mut cache, store) = fixtures::committed_session()?;
    cache.close()?;
    let mut cache = fixtures::reopen(&store)?;

    let design = cache.insert(Design::new("Print"), Owner::Project)?;
    let style = cache.insert(Style::color("Ink", 0xFF10_1010), Owner::Design(design))?;
    cache.commit()?;
    let (design, style) = (cache.resolve_key(design), cache.resolve_key(style));
    assert!(design.is_persisted());
    assert!(style.is_persisted());
    assert!(!cache.is_modified());

    cache.delete::<Style>(style)?;
    assert!(cache.is_modified());
    cache.commit()?;
    assert!(!cache.is_modified());

    let designs = cache.get_all::<Design>()?;
    assert!(designs.iter().any(|d| d.key == design));
    assert!(cache.design_styles(design)?.is_empty());
    assert_eq!(cache.extra_designs().len(), 1);
    assert_eq!(store.entity_count(EntityKind::Style)?, 0);
    Ok(())
}

// ============================================================================
// OWNERSHIP
// ============================================================================

#[test]
fn test_owner_change_survives_delete_and_undelete() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let group = cache.insert(Shape::node("Group"), Owner::Diagram(diagram))?;
    let member = cache.insert(Shape::node("Box"), Owner::Diagram(diagram))?;
    cache.commit()?;
    let (diagram, group, member) = (
        cache.resolve_key(diagram),
        cache.resolve_key(group),
        cache.resolve_key(member),
    );

    cache.update_owner::<Shape>(member, Owner::Shape(group))?;
    cache.delete::<Shape>(member)?;
    cache.undelete::<Shape>(member)?;
    assertions::assert_item_state::<Shape>(&cache, member, Some(ItemState::Modified));
    cache.commit()?;

    let id = member.id().expect("committed shape has an id");
    assert_eq!(store.fetch_owner::<Shape>(id)?, Some(Owner::Shape(group)));
    assert_eq!(cache.owner_of::<Shape>(member), Some(Owner::Shape(group)));
    cache.close()?;

    let mut cache = fixtures::reopen(&store)?;
    cache.get_diagram_shapes(diagram)?;
    assert_eq!(cache.get_shape_children(group).len(), 1);
    Ok(())
}

#[test]
fn test_save_stamps_project_settings() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    assert!(cache.project_settings()?.last_saved.is_none());
    cache.close()?;

    let cache = fixtures::reopen(&store)?;
    assert!(cache.project_settings()?.last_saved.is_some());
    Ok(())
}

// ============================================================================
// DELETE RULES AGAINST THE STORE
// ============================================================================

type AttachedShape = (MemoryStore, Key<DiagramId>, Key<ShapeId>, Key<ModelObjectId>);

/// A committed diagram shape attached to a model object, with the session
/// closed so a reopen starts with nothing but the project loaded.
fn committed_attached_shape() -> TesselResult<AttachedShape> {
    let (mut cache, store) = fixtures::committed_session()?;
    let model = cache.insert(Model::new("Plant"), Owner::Project)?;
    let pump = cache.insert(ModelObject::new("Pump", "P1"), Owner::Model(model))?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let shape = cache.insert(
        Shape::node("Box").with_model_object(pump),
        Owner::Diagram(diagram),
    )?;
    cache.commit()?;
    let keys = (
        cache.resolve_key(diagram),
        cache.resolve_key(shape),
        cache.resolve_key(pump),
    );
    cache.close()?;
    Ok((store, keys.0, keys.1, keys.2))
}

#[test]
fn test_attached_shape_blocked_without_loading_model_objects() -> TesselResult<()> {
    let (store, diagram, shape, pump) = committed_attached_shape()?;
    let mut cache = fixtures::reopen(&store)?;
    cache.get_diagram_shapes(diagram)?;
    store.reset_stats()?;

    assert!(matches!(
        cache.delete::<Shape>(shape),
        Err(TesselError::Consistency(ConsistencyError::ShapeAttached { .. }))
    ));
    assert_eq!(store.stats()?.load_count("load_model"), 0);

    assert_eq!(cache.get_all::<ModelObject>()?.len(), 1);
    assertions::assert_consistency_error(&cache.delete::<Shape>(shape));

    let mut detached = cache.get::<Shape>(shape)?.clone();
    detached.model_object = None;
    cache.update(detached)?;
    cache.delete::<Shape>(shape)?;
    cache.delete::<ModelObject>(pump)?;
    cache.commit()?;
    assert_eq!(store.entity_count(EntityKind::Shape)?, 0);
    assert_eq!(store.entity_count(EntityKind::ModelObject)?, 0);
    Ok(())
}

#[test]
fn test_model_object_delete_sees_unloaded_and_loaded_shapes() -> TesselResult<()> {
    let (store, diagram, shape, pump) = committed_attached_shape()?;
    let mut cache = fixtures::reopen(&store)?;
    store.reset_stats()?;

    match cache.delete::<ModelObject>(pump) {
        Err(TesselError::Consistency(ConsistencyError::ModelObjectInUse { used_by, .. })) => {
            assert_eq!(used_by, "store")
        }
        other => panic!("Expected model object in use, got: {:?}", other),
    }
    assert!(store.stats()?.probes >= 1);
    assert_eq!(store.stats()?.load_count("load_diagram_shapes"), 0);

    cache.get_diagram_shapes(diagram)?;
    match cache.delete::<ModelObject>(pump) {
        Err(TesselError::Consistency(ConsistencyError::ModelObjectInUse { used_by, .. })) => {
            assert_eq!(used_by, EntityRef::of(EntityKind::Shape, shape).to_string())
        }
        other => panic!("Expected model object in use, got: {:?}", other),
    }
    assert!(cache.contains::<ModelObject>(pump));
    Ok(())
}

#[test]
fn test_template_delete_asks_store_for_unloaded_users() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let template = cache.insert(Template::new("Pump"), Owner::Project)?;
    let diagram = cache.insert(Diagram::new("Main"), Owner::Project)?;
    let shape = cache.insert(
        Shape::node("Box").with_template(template),
        Owner::Diagram(diagram),
    )?;
    cache.commit()?;
    let (template, diagram, shape) = (
        cache.resolve_key(template),
        cache.resolve_key(diagram),
        cache.resolve_key(shape),
    );
    cache.close()?;

    let mut cache = fixtures::reopen(&store)?;
    match cache.delete::<Template>(template) {
        Err(TesselError::Consistency(ConsistencyError::TemplateInUse { used_by, .. })) => {
            assert_eq!(used_by, "store")
        }
        other => panic!("Expected template in use, got: {:?}", other),
    }
    assert_eq!(store.stats()?.load_count("load_diagram_shapes"), 0);

    cache.get_diagram_shapes(diagram)?;
    cache.delete::<Shape>(shape)?;
    cache.delete::<Template>(template)?;
    cache.commit()?;
    assert_eq!(store.entity_count(EntityKind::Template)?, 0);
    Ok(())
}

#[test]
fn test_model_delete_waits_for_its_objects() -> TesselResult<()> {
    let (mut cache, _store) = fixtures::created_session()?;
    let model = cache.insert(Model::new("Plant"), Owner::Project)?;
    let pump = cache.insert(ModelObject::new("Pump", "P1"), Owner::Model(model))?;
    let view = cache.insert(DiagramModelObject::new("View", "V1"), Owner::Model(model))?;
    let mut diagram = Diagram::new("Main");
    diagram.model_object = Some(view);
    let diagram = cache.insert(diagram, Owner::Project)?;

    assert!(matches!(
        cache.delete::<Model>(model),
        Err(TesselError::Consistency(ConsistencyError::ModelHasObjects { .. }))
    ));
    assert!(matches!(
        cache.delete::<DiagramModelObject>(view),
        Err(TesselError::Consistency(ConsistencyError::ModelObjectInUse { .. }))
    ));

    cache.delete::<ModelObject>(pump)?;
    assertions::assert_consistency_error(&cache.delete::<Model>(model));
    cache.delete::<Diagram>(diagram)?;
    cache.delete::<DiagramModelObject>(view)?;
    cache.delete::<Model>(model)?;
    assert!(cache.get_all::<Model>()?.is_empty());
    Ok(())
}

#[test]
fn test_design_delete_waits_for_its_styles() -> TesselResult<()> {
    let (mut cache, store) = fixtures::committed_session()?;
    let print = cache.insert(Design::new("Print"), Owner::Project)?;
    let ink = cache.insert(Style::color("Ink", 0xFF10_1010), Owner::Design(print))?;
    cache.commit()?;
    let (print, ink) = (cache.resolve_key(print), cache.resolve_key(ink));

    assert!(matches!(
        cache.delete::<Design>(print),
        Err(TesselError::Consistency(ConsistencyError::DesignHasStyles { .. }))
    ));
    cache.delete::<Style>(ink)?;
    cache.delete::<Design>(print)?;
    cache.commit()?;
    assert_eq!(store.entity_count(EntityKind::Design)?, 1);
    Ok(())
}

// ============================================================================
// CHILD LOADING
// ============================================================================

/// A committed model holding A { A1 { A11 }, A2 }.
fn committed_model_tree() -> TesselResult<MemoryStore> {
    let (mut cache, store) = fixtures::committed_session()?;
    let model = cache.insert(Model::new("Plant"), Owner::Project)?;
    let tree = ModelObjectTree::new(ModelObject::new("Area", "A"))
        .with_child(
            ModelObjectTree::new(ModelObject::new("Unit", "A1"))
                .with_child(ModelObjectTree::new(ModelObject::new("Pump", "A11"))),
        )
        .with_child(ModelObjectTree::new(ModelObject::new("Unit", "A2")));
    cache.insert_model_objects_with_content(vec![tree], Owner::Model(model))?;
    cache.commit()?;
    cache.close()?;
    Ok(store)
}

#[test]
fn test_child_model_objects_load_per_parent() -> TesselResult<()> {
    let store = committed_model_tree()?;
    let mut cache = fixtures::reopen(&store)?;
    store.reset_stats()?;

    assert_eq!(cache.get_all::<ModelObject>()?.len(), 4);
    let stats = store.stats()?;
    assert_eq!(stats.load_count("load_model_model_objects"), 1);
    assert_eq!(stats.load_count("load_child_model_objects"), 4);
    assert_eq!(stats.load_count("load_model_object_subtree"), 0);

    assert_eq!(cache.get_all::<ModelObject>()?.len(), 4);
    assert_eq!(store.stats()?.load_count("load_child_model_objects"), 4);
    Ok(())
}

#[test]
fn test_subtree_loading_uses_one_call_per_root() -> TesselResult<()> {
    let store = committed_model_tree()?;
    let config = fixtures::test_config().with_child_loading(ChildLoading::Subtree);
    let mut cache = fixtures::reopen_with(&store, config)?;
    store.reset_stats()?;

    assert_eq!(cache.get_all::<ModelObject>()?.len(), 4);
    let stats = store.stats()?;
    assert_eq!(stats.load_count("load_model_object_subtree"), 1);
    assert_eq!(stats.load_count("load_child_model_objects"), 0);
    Ok(())
}
