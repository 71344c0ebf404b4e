//! TESSEL Core - Entity Types
//!
//! Pure data structures for the diagram entity cache: typed identities,
//! the transient/persisted `Key`, entity kinds, ownership links, shape
//! connections, change events, configuration and the error taxonomy.
//! All other crates depend on this.

use chrono::{DateTime, Utc};

mod config;
mod connection;
mod entities;
mod entity;
mod enums;
mod error;
mod event;
mod identity;

pub use config::*;
pub use connection::*;
pub use entities::*;
pub use entity::*;
pub use enums::*;
pub use error::*;
pub use event::*;
pub use identity::*;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_maps_to_one_entity_type() {
        let kinds = [
            ProjectSettings::KIND,
            Design::KIND,
            Style::KIND,
            Model::KIND,
            ModelObject::KIND,
            DiagramModelObject::KIND,
            Template::KIND,
            ModelMapping::KIND,
            Diagram::KIND,
            Shape::KIND,
        ];
        assert_eq!(kinds, EntityKind::ALL);
    }

    #[test]
    fn test_entity_ref_tracks_key() {
        let mut shape = Shape::node("Box");
        let before = shape.entity_ref();
        assert_eq!(before.kind, EntityKind::Shape);
        assert!(before.key.is_transient());

        let id = ShapeId::now_v7();
        shape.set_key(Key::Persisted(id));
        assert_eq!(shape.entity_ref().key, Key::Persisted(id.as_uuid()));
    }

    #[test]
    fn test_remap_rewrites_only_assigned_handles() {
        let template = Template::new("Process");
        let model_object = ModelObject::new("Generic", "MO");
        let mut shape = Shape::node("Box")
            .with_template(template.key)
            .with_model_object(model_object.key);

        let mut ids = IdAssignments::new();
        let uuid = new_entity_id();
        if let Some(handle) = template.key.handle() {
            ids.assign(handle, uuid);
        }
        shape.remap_keys(&ids);

        assert_eq!(shape.template, Some(Key::Persisted(TemplateId::new(uuid))));
        assert_eq!(shape.model_object, Some(model_object.key));
    }
}
