//! Enum types for tessel entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CORE ENUMS
// ============================================================================

/// Entity kind discriminator. Each kind has its own collections in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    ProjectSettings,
    Design,
    Style,
    Model,
    ModelObject,
    DiagramModelObject,
    Template,
    ModelMapping,
    Diagram,
    Shape,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::ProjectSettings,
        EntityKind::Design,
        EntityKind::Style,
        EntityKind::Model,
        EntityKind::ModelObject,
        EntityKind::DiagramModelObject,
        EntityKind::Template,
        EntityKind::ModelMapping,
        EntityKind::Diagram,
        EntityKind::Shape,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ProjectSettings => "project-settings",
            EntityKind::Design => "design",
            EntityKind::Style => "style",
            EntityKind::Model => "model",
            EntityKind::ModelObject => "model-object",
            EntityKind::DiagramModelObject => "diagram-model-object",
            EntityKind::Template => "template",
            EntityKind::ModelMapping => "model-mapping",
            EntityKind::Diagram => "diagram",
            EntityKind::Shape => "shape",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = EntityKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| EntityKindParseError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKindParseError(pub String);

impl fmt::Display for EntityKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid entity kind: {}", self.0)
    }
}

impl std::error::Error for EntityKindParseError {}

/// Lifecycle state of a tracked entity.
///
/// `New` is only ever reported for transient entities; persisted entities
/// live in buckets in one of the other four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    Original,
    Modified,
    OwnerChanged,
    Deleted,
    New,
}

impl ItemState {
    /// True for states that must be written by the next commit.
    pub fn is_pending(&self) -> bool {
        !matches!(self, ItemState::Original)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ItemState::Original => "original",
            ItemState::Modified => "modified",
            ItemState::OwnerChanged => "owner-changed",
            ItemState::Deleted => "deleted",
            ItemState::New => "new",
        };
        f.write_str(value)
    }
}

/// Style family. Colors are the leaves every other style points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StyleCategory {
    Color,
    Fill,
    Line,
    Cap,
    Character,
    Paragraph,
}

impl StyleCategory {
    /// Colors first: a style may only reference styles of lower rank.
    pub fn rank(&self) -> u8 {
        match self {
            StyleCategory::Color => 0,
            _ => 1,
        }
    }
}

/// Shape drawn at the end of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CapShape {
    #[default]
    None,
    Arrow,
    Circle,
    Diamond,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LineDash {
    #[default]
    Solid,
    Dash,
    Dot,
    DashDot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextAlignment {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FillMode {
    #[default]
    Solid,
    Gradient,
    Pattern,
}

/// How a model mapping turns a model property into a shape property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MappingKind {
    Numeric,
    Format,
    Style,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_entity_kind_parse_error() {
        let err = "gizmo".parse::<EntityKind>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid entity kind: gizmo");
    }

    #[test]
    fn test_item_state_pending() {
        assert!(!ItemState::Original.is_pending());
        assert!(ItemState::Modified.is_pending());
        assert!(ItemState::Deleted.is_pending());
        assert!(ItemState::New.is_pending());
    }

    #[test]
    fn test_colors_rank_first() {
        assert!(StyleCategory::Color.rank() < StyleCategory::Line.rank());
        assert_eq!(StyleCategory::Fill.rank(), StyleCategory::Paragraph.rank());
    }
}
