//! Change-tracking entity cache.
//!
//! The cache is the in-memory unit of work between the application's object
//! graph and a [`Store`]. It buffers inserts, updates, owner changes and
//! deletes; checks referential integrity before anything is applied; loads
//! entity kinds lazily on first touch; and either commits the buffered
//! changes in one store call or discards them.
//!
//! # Batches
//!
//! Every mutating call validates all of its items first and only then
//! applies them, so a failing call leaves the cache untouched. Items staged
//! earlier in the same call count as present for the ones after them, which
//! is what makes ordered cascades (colors before the styles using them,
//! owners before children) work.
//!
//! # Example
//!
//! ```ignore
//! let mut cache = EntityCache::new(Box::new(MemoryStore::new("Demo")));
//! cache.create()?;
//! let design = cache.project_design()?.key;
//! let red = cache.insert(Style::color("Red", 0xFFFF_0000), Owner::Design(design))?;
//! cache.commit()?;
//! assert!(cache.resolve_key(red).is_persisted());
//! ```

mod cascade;
mod checker;
mod collection;
mod commit;
mod connections;
mod loader;
mod ops;
mod queries;

pub use cascade::{DesignContent, DiagramContent, ModelObjectTree, ShapeTree, TemplateContent};
pub use collection::{Bucket, Collection, Collections, DiscardStats, Tracked};

use crate::registry::EntityTypeRegistry;
use crate::Store;
use checker::{Batch, Checker};
use connections::ConnectionLedger;
use loader::LoadTracker;
use std::fmt;
use tessel_core::{
    CacheConfig, ChangeEvent, Design, DesignId, Entity, EntityIdType, IdAssignments, Key, Owner,
    ProjectSettings, SubscriptionId, TesselResult, UsageError,
};
use tracing::{info, warn};

type Subscriber = Box<dyn FnMut(&ChangeEvent)>;

/// In-memory staging layer over one attached store.
pub struct EntityCache {
    config: CacheConfig,
    store: Option<Box<dyn Store>>,
    open: bool,
    dirty: bool,
    cols: Collections,
    connections: ConnectionLedger,
    loads: LoadTracker,
    /// Every identity handed out by the store this session.
    assigned: IdAssignments,
    project_design: Option<Key<DesignId>>,
    registry: EntityTypeRegistry,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("open", &self.open)
            .field("dirty", &self.dirty)
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("connections", &self.connections.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl EntityCache {
    /// Create a closed cache over `store` with configuration from the
    /// environment.
    pub fn new(store: Box<dyn Store>) -> Self {
        Self::with_config(Some(store), CacheConfig::from_env())
    }

    /// Create a closed cache with explicit configuration. The store may be
    /// attached later with [`EntityCache::set_store`].
    pub fn with_config(store: Option<Box<dyn Store>>, config: CacheConfig) -> Self {
        Self {
            config,
            store,
            open: false,
            dirty: false,
            cols: Collections::default(),
            connections: ConnectionLedger::default(),
            loads: LoadTracker::default(),
            assigned: IdAssignments::new(),
            project_design: None,
            registry: EntityTypeRegistry::new(),
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// True while uncommitted mutations exist.
    pub fn is_modified(&self) -> bool {
        self.dirty
    }

    // ========================================================================
    // STORE ATTACHMENT
    // ========================================================================

    /// Attach a store, returning the previous one.
    pub fn set_store(&mut self, store: Box<dyn Store>) -> TesselResult<Option<Box<dyn Store>>> {
        self.ensure_swappable()?;
        Ok(self.store.replace(store))
    }

    /// Detach the store.
    pub fn take_store(&mut self) -> TesselResult<Option<Box<dyn Store>>> {
        self.ensure_swappable()?;
        Ok(self.store.take())
    }

    fn ensure_swappable(&self) -> TesselResult<()> {
        if self.dirty {
            return Err(UsageError::PendingChanges.into());
        }
        if self.open {
            return Err(UsageError::AlreadyOpen.into());
        }
        Ok(())
    }

    pub(crate) fn store_ref(&self) -> TesselResult<&dyn Store> {
        self.store
            .as_deref()
            .ok_or_else(|| UsageError::NoStore.into())
    }

    pub(crate) fn store_mut(&mut self) -> TesselResult<&mut (dyn Store + 'static)> {
        self.store
            .as_deref_mut()
            .ok_or_else(|| UsageError::NoStore.into())
    }

    pub fn project_name(&self) -> TesselResult<String> {
        Ok(self.store_ref()?.project_name())
    }

    pub fn version(&self) -> TesselResult<i32> {
        Ok(self.store_ref()?.version())
    }

    pub fn can_modify_version(&self) -> TesselResult<bool> {
        Ok(self.store_ref()?.can_modify_version())
    }

    pub fn exists(&self) -> TesselResult<bool> {
        self.store_ref()?.exists()
    }

    pub fn read_version(&self) -> TesselResult<i32> {
        self.store_ref()?.read_version()
    }

    // ========================================================================
    // SESSION LIFECYCLE
    // ========================================================================

    /// Open an existing repository: project settings and the project design
    /// are loaded eagerly, everything else on first touch.
    pub fn open(&mut self) -> TesselResult<()> {
        if self.open {
            return Err(UsageError::AlreadyOpen.into());
        }
        self.config.validate()?;
        self.store_mut()?.open()?;
        if let Err(err) = self.load_project() {
            self.reset_session();
            if let Err(close_err) = self.store_mut()?.close() {
                warn!(error = %close_err, "Store close failed after aborted open");
            }
            return Err(err);
        }
        self.open = true;
        info!(
            project = %self.store_ref()?.project_name(),
            designs = self.cols.designs.len(),
            styles = self.cols.styles.len(),
            "Project opened"
        );
        Ok(())
    }

    /// Create a new repository holding fresh project settings and a project
    /// design named after the project. The session is dirty until the first
    /// commit.
    pub fn create(&mut self) -> TesselResult<()> {
        if self.open {
            return Err(UsageError::AlreadyOpen.into());
        }
        self.config.validate()?;
        let store = self.store_mut()?;
        store.create()?;
        let name = store.project_name();

        let settings = ProjectSettings::new(name.clone());
        let design = Design::new(name.clone());
        let settings_ref = settings.entity_ref();
        let design_ref = design.entity_ref();
        self.project_design = Some(design.key);
        self.cols.projects.insert_transient(settings, Owner::Project)?;
        self.cols.designs.insert_transient(design, Owner::Project)?;
        self.loads.mark_everything();
        self.open = true;
        self.dirty = true;
        self.emit(ChangeEvent::Inserted(settings_ref));
        self.emit(ChangeEvent::Inserted(design_ref));
        info!(project = %name, "Project created");
        Ok(())
    }

    /// Discard the session and close the store. Unsaved changes are lost.
    pub fn close(&mut self) -> TesselResult<DiscardStats> {
        self.ensure_open()?;
        if self.dirty {
            warn!("Closing with unsaved changes; they are discarded");
        }
        let stats = self.reset_session();
        self.emit(ChangeEvent::Discarded);
        self.store_mut()?.close()?;
        info!(
            transient = stats.transient,
            loaded = stats.loaded,
            released = stats.released,
            "Session closed"
        );
        Ok(stats)
    }

    /// Remove the repository. The cache must be closed.
    pub fn erase(&mut self) -> TesselResult<()> {
        if self.open {
            return Err(UsageError::AlreadyOpen.into());
        }
        self.store_mut()?.erase()?;
        info!("Repository erased");
        Ok(())
    }

    fn reset_session(&mut self) -> DiscardStats {
        let stats = self.cols.discard();
        self.connections.clear();
        self.loads.clear();
        self.assigned = IdAssignments::new();
        self.project_design = None;
        self.open = false;
        self.dirty = false;
        stats
    }

    pub(crate) fn ensure_open(&self) -> TesselResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(UsageError::NotOpen.into())
        }
    }

    // ========================================================================
    // CHANGE NOTIFICATIONS
    // ========================================================================

    /// Register a callback invoked synchronously after every applied change.
    pub fn subscribe(&mut self, callback: impl FnMut(&ChangeEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub(crate) fn emit(&mut self, event: ChangeEvent) {
        for (_, callback) in &mut self.subscribers {
            callback(&event);
        }
    }

    // ========================================================================
    // ENTITY-TYPE REGISTRY
    // ========================================================================

    /// Register an entity type name; returns its persistence element name.
    pub fn register_entity_type(&mut self, full_name: &str) -> TesselResult<String> {
        self.registry.register(full_name)
    }

    pub fn unregister_entity_type(&mut self, full_name: &str) -> TesselResult<()> {
        self.registry.unregister(full_name)
    }

    pub fn clear_entity_types(&mut self) {
        self.registry.clear();
    }

    pub fn entity_types(&self) -> &EntityTypeRegistry {
        &self.registry
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    pub(crate) fn validating(&self) -> bool {
        self.config.validation_enabled()
    }

    pub(crate) fn checker<'a>(&'a self, batch: &'a Batch<'a>) -> Checker<'a> {
        Checker {
            cols: &self.cols,
            connections: &self.connections,
            store: self.store.as_deref(),
            project_design: self.project_design,
            batch,
        }
    }

    /// Current form of a key: transient keys of committed entities become
    /// persisted.
    pub fn resolve_key<I: EntityIdType>(&self, key: Key<I>) -> Key<I> {
        key.resolve(&self.assigned)
    }

    pub(crate) fn resolve_owner(&self, owner: Owner) -> Owner {
        owner.resolve(&self.assigned)
    }

    /// Bring a caller-supplied entity up to date with identities assigned
    /// since it was cloned.
    pub(crate) fn normalize<T: Entity>(&self, mut entity: T) -> T {
        let key = entity.key().resolve(&self.assigned);
        entity.set_key(key);
        entity.remap_keys(&self.assigned);
        entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tessel_core::{StateError, Style, TesselError, ValidationMode};

    fn cache() -> EntityCache {
        EntityCache::with_config(
            Some(Box::new(MemoryStore::new("Demo"))),
            CacheConfig::default(),
        )
    }

    #[test]
    fn test_operations_require_open_session() {
        let mut cache = cache();
        assert!(matches!(
            cache.commit(),
            Err(TesselError::Usage(UsageError::NotOpen))
        ));
        assert!(matches!(
            cache.insert(Style::color("Red", 0), Owner::Project),
            Err(TesselError::Usage(UsageError::NotOpen))
        ));
        assert!(matches!(
            cache.close(),
            Err(TesselError::Usage(UsageError::NotOpen))
        ));
    }

    #[test]
    fn test_create_makes_project_and_design() {
        let mut cache = cache();
        cache.create().unwrap();
        assert!(cache.is_open());
        assert!(cache.is_modified());
        assert_eq!(cache.project_design().unwrap().name, "Demo");
        assert_eq!(cache.project_settings().unwrap().name, "Demo");
        assert!(matches!(
            cache.create(),
            Err(TesselError::Usage(UsageError::AlreadyOpen))
        ));
    }

    #[test]
    fn test_store_swap_guarded() {
        let mut cache = cache();
        cache.create().unwrap();
        assert!(matches!(
            cache.take_store(),
            Err(TesselError::Usage(UsageError::PendingChanges))
        ));
        cache.commit().unwrap();
        assert!(matches!(
            cache.take_store(),
            Err(TesselError::Usage(UsageError::AlreadyOpen))
        ));
        cache.close().unwrap();
        assert!(cache.take_store().unwrap().is_some());
        assert!(matches!(
            cache.open(),
            Err(TesselError::Usage(UsageError::NoStore))
        ));
    }

    #[test]
    fn test_subscribers_see_events_in_order() {
        let mut cache = cache();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = cache.subscribe(move |event| sink.borrow_mut().push(event.clone()));
        cache.create().unwrap();
        cache.commit().unwrap();

        let events = seen.borrow().clone();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ChangeEvent::Inserted(_)));
        assert!(matches!(
            events[2],
            ChangeEvent::Committed { inserted: 2, .. }
        ));

        assert!(cache.unsubscribe(id));
        assert!(!cache.unsubscribe(id));
        cache.close().unwrap();
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn test_registry_delegation() {
        let mut cache = cache();
        assert_eq!(
            cache.register_entity_type("Core.RoundedBox").unwrap(),
            "rounded_box"
        );
        assert!(matches!(
            cache.register_entity_type("Core.RoundedBox"),
            Err(TesselError::State(StateError::TypeAlreadyRegistered { .. }))
        ));
        cache.clear_entity_types();
        assert!(cache.entity_types().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected_on_open() {
        let mut cache = EntityCache::with_config(
            Some(Box::new(MemoryStore::new("Demo"))),
            CacheConfig::default()
                .with_z_order_step(0)
                .with_validation(ValidationMode::Disabled),
        );
        assert!(matches!(cache.create(), Err(TesselError::Config(_))));
        assert!(!cache.is_open());
    }
}
