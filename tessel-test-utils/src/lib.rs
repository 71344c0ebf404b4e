//! TESSEL Test Utilities
//!
//! Shared test infrastructure for the TESSEL workspace:
//! - Proptest generators for entities, shape trees and configuration
//! - Fixtures that build ready-to-use sessions over a [`MemoryStore`]
//! - Assertions for the TESSEL error taxonomy
//! - Tracing setup for tests

// Re-export the reference store from its source crate
pub use tessel_storage::{EntityCache, MemoryStore, ShapeTree, StoreStats};

// Re-export core types for convenience
pub use tessel_core::{
    CacheConfig, CapShape, ChildLoading, ConfigError, ConsistencyError, ControlPointId, Design,
    Diagram, EntityKind, ItemState, Key, Model, ModelObject, Owner, Shape, ShapeConnection,
    StateError, StoreError, Style, StyleCategory, TesselError, TesselResult, UsageError,
    ValidationMode,
};

use tracing_subscriber::EnvFilter;

/// Route `tracing` output of the crates under test to the test harness.
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tessel_storage=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating TESSEL entity types.

    use super::*;
    use proptest::prelude::*;

    // === Enum Generators ===

    /// Generate an EntityKind variant.
    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop::sample::select(EntityKind::ALL.to_vec())
    }

    pub fn arb_style_category() -> impl Strategy<Value = StyleCategory> {
        prop_oneof![
            Just(StyleCategory::Color),
            Just(StyleCategory::Fill),
            Just(StyleCategory::Line),
            Just(StyleCategory::Cap),
            Just(StyleCategory::Character),
            Just(StyleCategory::Paragraph),
        ]
    }

    pub fn arb_cap_shape() -> impl Strategy<Value = CapShape> {
        prop_oneof![
            Just(CapShape::None),
            Just(CapShape::Arrow),
            Just(CapShape::Circle),
            Just(CapShape::Diamond),
            Just(CapShape::Square),
        ]
    }

    // === Entity Generators ===

    /// Generate an opaque ARGB color.
    pub fn arb_argb() -> impl Strategy<Value = u32> {
        any::<u32>().prop_map(|rgb| 0xFF00_0000 | (rgb & 0x00FF_FFFF))
    }

    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,10}"
    }

    /// Generate a transient color style.
    pub fn arb_color_style() -> impl Strategy<Value = Style> {
        (arb_name(), arb_argb()).prop_map(|(name, argb)| Style::color(name, argb))
    }

    /// Generate a transient planar shape somewhere on the canvas.
    pub fn arb_node_shape() -> impl Strategy<Value = Shape> {
        (
            prop::sample::select(vec!["Box", "Ellipse", "Diamond", "Note"]),
            -500i32..500,
            -500i32..500,
            -100i32..100,
        )
            .prop_map(|(type_name, x, y, z)| Shape::node(type_name).at(x, y).with_z_order(z))
    }

    /// Generate a shape tree up to three levels deep.
    pub fn arb_shape_tree() -> impl Strategy<Value = ShapeTree> {
        let leaf = arb_node_shape().prop_map(ShapeTree::new);
        leaf.prop_recursive(3, 16, 3, |inner| {
            (arb_node_shape(), prop::collection::vec(inner, 0..3)).prop_map(|(shape, children)| {
                children
                    .into_iter()
                    .fold(ShapeTree::new(shape), ShapeTree::with_child)
            })
        })
    }

    pub fn arb_diagram() -> impl Strategy<Value = Diagram> {
        (arb_name(), 100i32..4000, 100i32..4000).prop_map(|(name, width, height)| {
            let mut diagram = Diagram::new(name);
            diagram.width = width;
            diagram.height = height;
            diagram
        })
    }

    /// Generate a CacheConfig that passes validation.
    pub fn arb_valid_config() -> impl Strategy<Value = CacheConfig> {
        (
            prop_oneof![Just(ValidationMode::Enabled), Just(ValidationMode::Disabled)],
            1i32..100,
            prop_oneof![Just(ChildLoading::PerParent), Just(ChildLoading::Subtree)],
        )
            .prop_map(|(validation, step, child_loading)| {
                CacheConfig::default()
                    .with_validation(validation)
                    .with_z_order_step(step)
                    .with_child_loading(child_loading)
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built sessions and content for common testing scenarios.

    use super::*;

    /// Project name used by the fixtures.
    pub const PROJECT: &str = "Fixture";

    /// Explicit configuration, independent of the environment.
    pub fn test_config() -> CacheConfig {
        CacheConfig::default()
    }

    /// A cache over a freshly created repository, plus a handle onto the
    /// same store for inspection.
    pub fn created_session() -> TesselResult<(EntityCache, MemoryStore)> {
        let store = MemoryStore::new(PROJECT);
        let mut cache = EntityCache::with_config(Some(Box::new(store.clone())), test_config());
        cache.create()?;
        Ok((cache, store))
    }

    /// Like [`created_session`], committed once so the project settings and
    /// project design are persisted.
    pub fn committed_session() -> TesselResult<(EntityCache, MemoryStore)> {
        let (mut cache, store) = created_session()?;
        cache.commit()?;
        Ok((cache, store))
    }

    /// A fresh cache opened over an existing store.
    pub fn reopen(store: &MemoryStore) -> TesselResult<EntityCache> {
        reopen_with(store, test_config())
    }

    pub fn reopen_with(store: &MemoryStore, config: CacheConfig) -> TesselResult<EntityCache> {
        let mut cache = EntityCache::with_config(Some(Box::new(store.clone())), config);
        cache.open()?;
        Ok(cache)
    }

    /// Styles most shapes use.
    #[derive(Debug, Clone, Copy)]
    pub struct Palette {
        pub black: Key<tessel_core::StyleId>,
        pub white: Key<tessel_core::StyleId>,
        pub thin: Key<tessel_core::StyleId>,
        pub solid: Key<tessel_core::StyleId>,
    }

    /// Insert a small palette into the project design.
    pub fn palette(cache: &mut EntityCache) -> TesselResult<Palette> {
        let design = Owner::Design(cache.project_design()?.key);
        let black = cache.insert(Style::color("Black", 0xFF00_0000), design)?;
        let white = cache.insert(Style::color("White", 0xFFFF_FFFF), design)?;
        let thin = cache.insert(Style::line("Thin", black, 1), design)?;
        let solid = cache.insert(Style::fill("Solid", white), design)?;
        Ok(Palette {
            black,
            white,
            thin,
            solid,
        })
    }

    /// Two boxes and a connector gluing them together.
    #[derive(Debug, Clone, Copy)]
    pub struct ConnectedPair {
        pub source: Key<tessel_core::ShapeId>,
        pub target: Key<tessel_core::ShapeId>,
        pub connector: Key<tessel_core::ShapeId>,
    }

    impl ConnectedPair {
        /// Connector point 1 on the source, point 2 on the target.
        pub fn connections(&self) -> [ShapeConnection; 2] {
            [
                ShapeConnection::new(
                    self.connector,
                    ControlPointId(1),
                    self.source,
                    ControlPointId(1),
                ),
                ShapeConnection::new(
                    self.connector,
                    ControlPointId(2),
                    self.target,
                    ControlPointId(3),
                ),
            ]
        }
    }

    /// Insert a connected pair on `diagram`, connections included.
    pub fn connected_pair(
        cache: &mut EntityCache,
        diagram: Key<tessel_core::DiagramId>,
    ) -> TesselResult<ConnectedPair> {
        let owner = Owner::Diagram(diagram);
        let source = cache.insert(Shape::node("Box").at(0, 0).with_z_order(10), owner)?;
        let target = cache.insert(Shape::node("Box").at(300, 0).with_z_order(20), owner)?;
        let connector = cache.insert(Shape::connector("Line").with_z_order(30), owner)?;
        let pair = ConnectedPair {
            source,
            target,
            connector,
        };
        for connection in pair.connections() {
            cache.insert_connection(connection)?;
        }
        Ok(pair)
    }

    /// A group shape holding two boxes, the second with a label inside.
    pub fn grouped_shapes() -> ShapeTree {
        ShapeTree::new(Shape::node("Group").with_z_order(5))
            .with_child(ShapeTree::new(Shape::node("Box").at(10, 10)))
            .with_child(
                ShapeTree::new(Shape::node("Box").at(60, 10))
                    .with_child(ShapeTree::new(Shape::new("Label"))),
            )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion functions for TESSEL-specific validation.

    use super::*;
    use tessel_storage::Tracked;

    /// Assert that a TesselResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TesselResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_usage_error<T: std::fmt::Debug>(result: &TesselResult<T>) {
        match result {
            Err(TesselError::Usage(_)) => {}
            other => panic!("Expected Usage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_state_error<T: std::fmt::Debug>(result: &TesselResult<T>) {
        match result {
            Err(TesselError::State(_)) => {}
            other => panic!("Expected State error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_consistency_error<T: std::fmt::Debug>(result: &TesselResult<T>) {
        match result {
            Err(TesselError::Consistency(_)) => {}
            other => panic!("Expected Consistency error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &TesselResult<T>) {
        match result {
            Err(TesselError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that a TesselResult is a NotFound state error for `kind`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TesselResult<T>, kind: EntityKind) {
        match result {
            Err(TesselError::State(StateError::NotFound { kind: k, .. })) => {
                assert_eq!(*k, kind, "Wrong entity kind in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", kind, other),
        }
    }

    /// Assert the lifecycle state of a tracked entity.
    #[track_caller]
    pub fn assert_item_state<T: Tracked>(
        cache: &EntityCache,
        key: Key<T::Id>,
        expected: Option<ItemState>,
    ) {
        assert_eq!(
            cache.state_of::<T>(key),
            expected,
            "Unexpected state for {} {}",
            T::KIND,
            key
        );
    }

    /// Assert that nothing awaits a commit.
    #[track_caller]
    pub fn assert_clean(cache: &EntityCache) {
        assert!(!cache.is_modified(), "Session is still modified");
        assert!(!cache.has_pending_changes(), "Pending changes remain");
        assert_eq!(cache.pending_connection_counts(), (0, 0));
    }
}

// ============================================================================
// TESTS
// ============================================================================
