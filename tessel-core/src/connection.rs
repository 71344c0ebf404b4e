//! Control points and shape connections.

use crate::{IdAssignments, Key, ShapeId};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape-local identifier of a control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlPointId(pub i32);

impl ControlPointId {
    /// Placeholder for "no point".
    pub const NONE: ControlPointId = ControlPointId(0);
}

impl fmt::Display for ControlPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cp{}", self.0)
    }
}

bitflags! {
    /// Roles a control point can play.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlPointCapabilities: u8 {
        /// Point can be dragged to resize the shape
        const RESIZE = 0b0000_0001;
        /// Point can be glued onto another shape (connector end)
        const GLUE = 0b0000_0010;
        /// Other shapes can glue onto this point
        const CONNECT = 0b0000_0100;
        /// Rotation handle
        const ROTATE = 0b0000_1000;
        /// Reference point of the shape (its position)
        const REFERENCE = 0b0001_0000;
    }
}

impl Default for ControlPointCapabilities {
    fn default() -> Self {
        Self::empty()
    }
}

impl Serialize for ControlPointCapabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ControlPointCapabilities {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid ControlPointCapabilities bits: {:#04x}",
                bits
            ))
        })
    }
}

/// A control point of a shape together with its capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlPoint {
    pub id: ControlPointId,
    pub capabilities: ControlPointCapabilities,
}

impl ControlPoint {
    pub fn new(id: i32, capabilities: ControlPointCapabilities) -> Self {
        Self {
            id: ControlPointId(id),
            capabilities,
        }
    }
}

/// Glue relation between two shapes.
///
/// Connections have no identity of their own: two connections are the same
/// connection exactly when all four fields are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShapeConnection {
    /// Shape whose glue point is attached.
    pub connector: Key<ShapeId>,
    pub glue_point: ControlPointId,
    /// Shape the glue point is attached to.
    pub target: Key<ShapeId>,
    pub target_point: ControlPointId,
}

impl ShapeConnection {
    pub fn new(
        connector: Key<ShapeId>,
        glue_point: ControlPointId,
        target: Key<ShapeId>,
        target_point: ControlPointId,
    ) -> Self {
        Self {
            connector,
            glue_point,
            target,
            target_point,
        }
    }

    pub fn involves(&self, shape: Key<ShapeId>) -> bool {
        self.connector == shape || self.target == shape
    }

    /// The endpoint that is not `shape`, if `shape` is an endpoint.
    pub fn other_end(&self, shape: Key<ShapeId>) -> Option<Key<ShapeId>> {
        if self.connector == shape {
            Some(self.target)
        } else if self.target == shape {
            Some(self.connector)
        } else {
            None
        }
    }

    pub fn resolve(&self, ids: &IdAssignments) -> Self {
        Self {
            connector: self.connector.resolve(ids),
            glue_point: self.glue_point,
            target: self.target.resolve(ids),
            target_point: self.target_point,
        }
    }
}

impl fmt::Display for ShapeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.connector, self.glue_point, self.target, self.target_point
        )
    }
}
