//! Core entity structures

use crate::{
    CapShape, ControlPoint, ControlPointCapabilities, ControlPointId, DesignId, DiagramId,
    DiagramModelObjectId, Entity, EntityKind, FillMode, IdAssignments, Key, LineDash,
    MappingKind, ModelId, ModelMappingId, ModelObjectId, ProjectId, Releasable, ShapeId,
    StyleCategory, StyleId, TemplateId, TextAlignment, Timestamp,
};
use serde::{Deserialize, Serialize};

macro_rules! key_accessors {
    () => {
        fn key(&self) -> Key<Self::Id> {
            self.key
        }

        fn set_key(&mut self, key: Key<Self::Id>) {
            self.key = key;
        }
    };
}

fn resolve_opt<I: crate::EntityIdType>(key: &mut Option<Key<I>>, ids: &IdAssignments) {
    if let Some(k) = key {
        *k = k.resolve(ids);
    }
}

// ============================================================================
// PROJECT
// ============================================================================

/// Project-wide settings. Exactly one per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub key: Key<ProjectId>,
    pub name: String,
    pub description: String,
    /// Names of the shape libraries the project depends on.
    pub libraries: Vec<String>,
    pub last_saved: Option<Timestamp>,
}

impl ProjectSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            key: Key::fresh(),
            name: name.into(),
            description: String::new(),
            libraries: Vec::new(),
            last_saved: None,
        }
    }

    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.libraries.push(library.into());
        self
    }
}

impl Entity for ProjectSettings {
    type Id = ProjectId;
    const KIND: EntityKind = EntityKind::ProjectSettings;
    key_accessors!();
}

// ============================================================================
// DESIGNS & STYLES
// ============================================================================

/// A named set of styles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Design {
    pub key: Key<DesignId>,
    pub name: String,
    pub title: String,
    pub description: String,
}

impl Design {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: Key::fresh(),
            title: name.clone(),
            name,
            description: String::new(),
        }
    }
}

impl Entity for Design {
    type Id = DesignId;
    const KIND: EntityKind = EntityKind::Design;
    key_accessors!();
}

/// Visual style. Non-color styles point at color styles of the same design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub key: Key<StyleId>,
    pub name: String,
    pub title: String,
    pub body: StyleBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StyleBody {
    Color {
        argb: u32,
        convert_to_gray: bool,
    },
    Fill {
        base_color: Key<StyleId>,
        additional_color: Option<Key<StyleId>>,
        mode: FillMode,
    },
    Line {
        color: Key<StyleId>,
        width: i32,
        dash: LineDash,
    },
    Cap {
        color: Key<StyleId>,
        shape: CapShape,
        size: i16,
    },
    Character {
        color: Key<StyleId>,
        font_name: String,
        size: u16,
    },
    Paragraph {
        alignment: TextAlignment,
        padding: i32,
        word_wrap: bool,
    },
}

impl Style {
    fn with_body(name: impl Into<String>, body: StyleBody) -> Self {
        let name = name.into();
        Self {
            key: Key::fresh(),
            title: name.clone(),
            name,
            body,
        }
    }

    pub fn color(name: impl Into<String>, argb: u32) -> Self {
        Self::with_body(
            name,
            StyleBody::Color {
                argb,
                convert_to_gray: false,
            },
        )
    }

    pub fn fill(name: impl Into<String>, base_color: Key<StyleId>) -> Self {
        Self::with_body(
            name,
            StyleBody::Fill {
                base_color,
                additional_color: None,
                mode: FillMode::Solid,
            },
        )
    }

    pub fn line(name: impl Into<String>, color: Key<StyleId>, width: i32) -> Self {
        Self::with_body(
            name,
            StyleBody::Line {
                color,
                width,
                dash: LineDash::Solid,
            },
        )
    }

    pub fn cap(name: impl Into<String>, color: Key<StyleId>, shape: CapShape) -> Self {
        Self::with_body(name, StyleBody::Cap { color, shape, size: 10 })
    }

    pub fn character(name: impl Into<String>, color: Key<StyleId>, font_name: &str) -> Self {
        Self::with_body(
            name,
            StyleBody::Character {
                color,
                font_name: font_name.to_string(),
                size: 10,
            },
        )
    }

    pub fn paragraph(name: impl Into<String>) -> Self {
        Self::with_body(
            name,
            StyleBody::Paragraph {
                alignment: TextAlignment::Left,
                padding: 2,
                word_wrap: true,
            },
        )
    }

    pub fn category(&self) -> StyleCategory {
        match self.body {
            StyleBody::Color { .. } => StyleCategory::Color,
            StyleBody::Fill { .. } => StyleCategory::Fill,
            StyleBody::Line { .. } => StyleCategory::Line,
            StyleBody::Cap { .. } => StyleCategory::Cap,
            StyleBody::Character { .. } => StyleCategory::Character,
            StyleBody::Paragraph { .. } => StyleCategory::Paragraph,
        }
    }

    /// Styles this style depends on (its color sub-references).
    pub fn referenced_styles(&self) -> Vec<Key<StyleId>> {
        match &self.body {
            StyleBody::Color { .. } | StyleBody::Paragraph { .. } => Vec::new(),
            StyleBody::Fill {
                base_color,
                additional_color,
                ..
            } => {
                let mut refs = vec![*base_color];
                refs.extend(additional_color.iter().copied());
                refs
            }
            StyleBody::Line { color, .. }
            | StyleBody::Cap { color, .. }
            | StyleBody::Character { color, .. } => vec![*color],
        }
    }
}

impl Entity for Style {
    type Id = StyleId;
    const KIND: EntityKind = EntityKind::Style;
    key_accessors!();

    fn remap_keys(&mut self, ids: &IdAssignments) {
        match &mut self.body {
            StyleBody::Color { .. } | StyleBody::Paragraph { .. } => {}
            StyleBody::Fill {
                base_color,
                additional_color,
                ..
            } => {
                *base_color = base_color.resolve(ids);
                resolve_opt(additional_color, ids);
            }
            StyleBody::Line { color, .. }
            | StyleBody::Cap { color, .. }
            | StyleBody::Character { color, .. } => *color = color.resolve(ids),
        }
    }
}

// ============================================================================
// MODEL
// ============================================================================

/// Root of the project's model object tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub key: Key<ModelId>,
    pub name: String,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            key: Key::fresh(),
            name: name.into(),
        }
    }
}

impl Entity for Model {
    type Id = ModelId;
    const KIND: EntityKind = EntityKind::Model;
    key_accessors!();
}

/// Domain object represented by shapes. Owned by the model, a parent model
/// object, or a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelObject {
    pub key: Key<ModelObjectId>,
    pub name: String,
    pub type_name: String,
}

impl ModelObject {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: Key::fresh(),
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

impl Entity for ModelObject {
    type Id = ModelObjectId;
    const KIND: EntityKind = EntityKind::ModelObject;
    key_accessors!();
}

/// Model-side representation of a diagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramModelObject {
    pub key: Key<DiagramModelObjectId>,
    pub name: String,
    pub type_name: String,
}

impl DiagramModelObject {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: Key::fresh(),
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

impl Entity for DiagramModelObject {
    type Id = DiagramModelObjectId;
    const KIND: EntityKind = EntityKind::DiagramModelObject;
    key_accessors!();
}

// ============================================================================
// TEMPLATES
// ============================================================================

/// Reusable shape prototype. Owns one shape, optionally a model object, and
/// the model mappings binding them together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub key: Key<TemplateId>,
    pub name: String,
    pub title: String,
    pub description: String,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: Key::fresh(),
            title: name.clone(),
            name,
            description: String::new(),
        }
    }
}

impl Entity for Template {
    type Id = TemplateId;
    const KIND: EntityKind = EntityKind::Template;
    key_accessors!();
}

/// Maps a model object property onto a shape property of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMapping {
    pub key: Key<ModelMappingId>,
    pub shape_property_id: i32,
    pub model_property_id: i32,
    pub rule: MappingRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MappingRule {
    Numeric { factor: f64, intercept: f64 },
    Format { format: String },
    Style {
        default_style: Option<Key<StyleId>>,
        /// Lower bound of the model value → style used from there on.
        ranges: Vec<(f64, Key<StyleId>)>,
    },
}

impl ModelMapping {
    pub fn new(shape_property_id: i32, model_property_id: i32, rule: MappingRule) -> Self {
        Self {
            key: Key::fresh(),
            shape_property_id,
            model_property_id,
            rule,
        }
    }

    pub fn kind(&self) -> MappingKind {
        match self.rule {
            MappingRule::Numeric { .. } => MappingKind::Numeric,
            MappingRule::Format { .. } => MappingKind::Format,
            MappingRule::Style { .. } => MappingKind::Style,
        }
    }

    pub fn referenced_styles(&self) -> Vec<Key<StyleId>> {
        match &self.rule {
            MappingRule::Style {
                default_style,
                ranges,
            } => default_style
                .iter()
                .copied()
                .chain(ranges.iter().map(|(_, style)| *style))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Entity for ModelMapping {
    type Id = ModelMappingId;
    const KIND: EntityKind = EntityKind::ModelMapping;
    key_accessors!();

    fn remap_keys(&mut self, ids: &IdAssignments) {
        if let MappingRule::Style {
            default_style,
            ranges,
        } = &mut self.rule
        {
            resolve_opt(default_style, ids);
            for (_, style) in ranges.iter_mut() {
                *style = style.resolve(ids);
            }
        }
    }
}

// ============================================================================
// DIAGRAMS & SHAPES
// ============================================================================

/// Geometry derived from an entity for drawing. Never persisted; dropped
/// when the entity is released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayCache {
    pub bounds: (i32, i32, i32, i32),
    pub outline: Vec<(i32, i32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagram {
    pub key: Key<DiagramId>,
    pub name: String,
    pub title: String,
    pub width: i32,
    pub height: i32,
    pub background_argb: u32,
    pub model_object: Option<Key<DiagramModelObjectId>>,
    #[serde(skip)]
    pub display_cache: Option<DisplayCache>,
}

impl Diagram {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: Key::fresh(),
            title: name.clone(),
            name,
            width: 1000,
            height: 1000,
            background_argb: 0xFFFF_FFFF,
            model_object: None,
            display_cache: None,
        }
    }
}

impl Entity for Diagram {
    type Id = DiagramId;
    const KIND: EntityKind = EntityKind::Diagram;
    key_accessors!();

    fn remap_keys(&mut self, ids: &IdAssignments) {
        resolve_opt(&mut self.model_object, ids);
    }

    fn releasable(&mut self) -> Option<&mut dyn Releasable> {
        Some(self)
    }
}

impl Releasable for Diagram {
    fn release(&mut self) {
        self.display_cache = None;
    }
}

/// Style slots of a shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeStyles {
    pub line: Option<Key<StyleId>>,
    pub fill: Option<Key<StyleId>>,
    pub cap: Option<Key<StyleId>>,
    pub character: Option<Key<StyleId>>,
    pub paragraph: Option<Key<StyleId>>,
}

impl ShapeStyles {
    pub fn iter(&self) -> impl Iterator<Item = Key<StyleId>> + '_ {
        [
            self.line,
            self.fill,
            self.cap,
            self.character,
            self.paragraph,
        ]
        .into_iter()
        .flatten()
    }

    fn resolve(&mut self, ids: &IdAssignments) {
        resolve_opt(&mut self.line, ids);
        resolve_opt(&mut self.fill, ids);
        resolve_opt(&mut self.cap, ids);
        resolve_opt(&mut self.character, ids);
        resolve_opt(&mut self.paragraph, ids);
    }
}

/// A shape placed on a diagram, inside another shape, or as a template's
/// prototype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub key: Key<ShapeId>,
    pub type_name: String,
    pub template: Option<Key<TemplateId>>,
    pub model_object: Option<Key<ModelObjectId>>,
    pub x: i32,
    pub y: i32,
    pub z_order: i32,
    pub layers: u32,
    pub styles: ShapeStyles,
    pub control_points: Vec<ControlPoint>,
    #[serde(skip)]
    pub display_cache: Option<DisplayCache>,
}

impl Shape {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            key: Key::fresh(),
            type_name: type_name.into(),
            template: None,
            model_object: None,
            x: 0,
            y: 0,
            z_order: 0,
            layers: 0,
            styles: ShapeStyles::default(),
            control_points: Vec::new(),
            display_cache: None,
        }
    }

    /// Two-ended line shape: points 1 and 2 glue onto other shapes.
    pub fn connector(type_name: impl Into<String>) -> Self {
        let both = ControlPointCapabilities::GLUE | ControlPointCapabilities::RESIZE;
        Self::new(type_name)
            .with_control_point(ControlPoint::new(1, both))
            .with_control_point(ControlPoint::new(2, both))
    }

    /// Planar shape: four connection points plus a reference point.
    pub fn node(type_name: impl Into<String>) -> Self {
        let mut shape = Self::new(type_name);
        for id in 1..=4 {
            shape = shape.with_control_point(ControlPoint::new(
                id,
                ControlPointCapabilities::RESIZE | ControlPointCapabilities::CONNECT,
            ));
        }
        shape.with_control_point(ControlPoint::new(
            5,
            ControlPointCapabilities::REFERENCE | ControlPointCapabilities::CONNECT,
        ))
    }

    pub fn with_control_point(mut self, point: ControlPoint) -> Self {
        self.control_points.retain(|p| p.id != point.id);
        self.control_points.push(point);
        self
    }

    pub fn with_template(mut self, template: Key<TemplateId>) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_model_object(mut self, model_object: Key<ModelObjectId>) -> Self {
        self.model_object = Some(model_object);
        self
    }

    pub fn with_styles(mut self, styles: ShapeStyles) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_z_order(mut self, z_order: i32) -> Self {
        self.z_order = z_order;
        self
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Capabilities of `point`; empty if the shape has no such point.
    pub fn capabilities(&self, point: ControlPointId) -> ControlPointCapabilities {
        self.control_points
            .iter()
            .find(|p| p.id == point)
            .map(|p| p.capabilities)
            .unwrap_or_default()
    }

    pub fn has_capability(&self, point: ControlPointId, cap: ControlPointCapabilities) -> bool {
        self.capabilities(point).contains(cap)
    }
}

impl Entity for Shape {
    type Id = ShapeId;
    const KIND: EntityKind = EntityKind::Shape;
    key_accessors!();

    fn remap_keys(&mut self, ids: &IdAssignments) {
        resolve_opt(&mut self.template, ids);
        resolve_opt(&mut self.model_object, ids);
        self.styles.resolve(ids);
    }

    fn releasable(&mut self) -> Option<&mut dyn Releasable> {
        Some(self)
    }
}

impl Releasable for Shape {
    fn release(&mut self) {
        self.display_cache = None;
    }
}
