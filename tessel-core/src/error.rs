//! Error types for tessel operations

use crate::{AnyKey, EntityKind, EntityRef, Owner, ShapeConnection};
use thiserror::Error;

/// Misuse of the cache API. Always raised before any state change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("Cache is not open")]
    NotOpen,

    #[error("Cache is already open")]
    AlreadyOpen,

    #[error("No store attached")]
    NoStore,

    #[error("Cannot swap the store while unsaved changes are pending")]
    PendingChanges,

    #[error("Invalid owner for {kind}: {owner}")]
    InvalidOwner { kind: EntityKind, owner: Owner },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Store holds no project settings")]
    ProjectNotFound,

    #[error("Store holds {count} project settings records, expected one")]
    AmbiguousProject { count: usize },

    #[error("No design named after project '{project}'")]
    MissingProjectDesign { project: String },

    #[error("Found {count} designs named after project '{project}'")]
    AmbiguousProjectDesign { project: String, count: usize },
}

/// Lifecycle state violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Entity not found: {kind} with key {key}")]
    NotFound { kind: EntityKind, key: AnyKey },

    #[error("{entity} is already deleted")]
    AlreadyDeleted { entity: EntityRef },

    #[error("{entity} was not deleted")]
    NotDeleted { entity: EntityRef },

    #[error("{entity} has never been persisted")]
    NotPersisted { entity: EntityRef },

    #[error("{entity} already has a persistent identity")]
    AlreadyPersisted { entity: EntityRef },

    #[error("{entity} is already tracked")]
    AlreadyTracked { entity: EntityRef },

    #[error("Connection {connection} already exists")]
    ConnectionExists { connection: ShapeConnection },

    #[error("Connection {connection} does not exist")]
    ConnectionNotFound { connection: ShapeConnection },

    #[error("Entity type already registered: {name}")]
    TypeAlreadyRegistered { name: String },

    #[error("Entity type not registered: {name}")]
    TypeNotRegistered { name: String },
}

/// Referential-integrity violations found by the consistency checker.
///
/// `used_by` fields name the blocking entity, or "store" when the answer came
/// from an off-cache probe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("{style} is still used by {used_by}")]
    StyleInUse { style: EntityRef, used_by: String },

    #[error("{style} references {referenced}, which is neither resident nor pending")]
    MissingStyleReference {
        style: EntityRef,
        referenced: EntityRef,
    },

    #[error("{model_object} still has child model objects")]
    ModelObjectHasChildren { model_object: EntityRef },

    #[error("{model_object} is still used by {used_by}")]
    ModelObjectInUse {
        model_object: EntityRef,
        used_by: String,
    },

    #[error("{template} still owns {child}")]
    TemplateHasContent { template: EntityRef, child: EntityRef },

    #[error("{template} is still used by {used_by}")]
    TemplateInUse { template: EntityRef, used_by: String },

    #[error("{diagram} still owns {shape}")]
    DiagramHasShapes { diagram: EntityRef, shape: EntityRef },

    #[error("{design} still owns {style}")]
    DesignHasStyles { design: EntityRef, style: EntityRef },

    #[error("The project design cannot be deleted")]
    ProjectDesignDeleted,

    #[error("Project settings cannot be deleted")]
    ProjectSettingsDeleted,

    #[error("{model} still owns {model_object}")]
    ModelHasObjects {
        model: EntityRef,
        model_object: EntityRef,
    },

    #[error("{shape} still has child {child}")]
    ShapeHasChildren { shape: EntityRef, child: EntityRef },

    #[error("{shape} is still connected through {connection}")]
    ShapeConnected {
        shape: EntityRef,
        connection: ShapeConnection,
    },

    #[error("{shape} is still attached to {model_object}")]
    ShapeAttached {
        shape: EntityRef,
        model_object: EntityRef,
    },

    #[error("Owner {owner} of {entity} does not exist")]
    OwnerMissing { entity: EntityRef, owner: Owner },

    #[error("Owner {owner} of {entity} is deleted")]
    OwnerDeleted { entity: EntityRef, owner: Owner },

    #[error("{shape} references {template}; templates cannot nest")]
    NestedTemplate { shape: EntityRef, template: EntityRef },

    #[error("Connection {connection}: shape {shape} is not in the cache")]
    ConnectionEndpointMissing {
        connection: ShapeConnection,
        shape: AnyKey,
    },

    #[error("Connection {connection}: connector point is not a glue point")]
    NotAGluePoint { connection: ShapeConnection },

    #[error("Connection {connection}: target point is not a connection point")]
    NotAConnectionPoint { connection: ShapeConnection },
}

/// Failures reported by a store. The cache propagates these unmodified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store is not open")]
    NotOpen,

    #[error("Repository already exists")]
    AlreadyExists,

    #[error("Repository does not exist")]
    DoesNotExist,

    #[error("Save failed: {reason}")]
    SaveFailed { reason: String },

    #[error("Load failed: {reason}")]
    LoadFailed { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Backend error: {reason}")]
    Backend { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all tessel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesselError {
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for tessel operations.
pub type TesselResult<T> = Result<T, TesselError>;
