//! Entity-type registry.
//!
//! Maps fully qualified entity type names (e.g. `Core.RoundedBox`) to the
//! element names a store persists them under. The transform is fixed: stores
//! written by one build must be readable by the next.

use std::collections::BTreeMap;
use tessel_core::{StateError, TesselResult};

/// Namespace prefixes dropped from type names.
pub const KNOWN_PREFIXES: [&str; 3] = ["Core.", "GeneralShapes.", "GeneralModelObjects."];

/// Persistence element name for a fully qualified entity type name.
///
/// Strips one known namespace prefix, turns space, `/`, `<` and `>` into
/// `_`, then splits camel case into lower-case words joined by `_`. Never
/// produces a doubled underscore.
///
/// An upper-case letter starts a new word when it follows a lower-case
/// letter or a digit, or when it is the last capital of a run that is
/// followed by a lower-case letter. Capital runs stay one word, so
/// `XMLNode` becomes `xml_node` and `ABC` becomes `abc`. Changing these
/// rules renames elements in existing stores.
pub fn element_name(full_name: &str) -> String {
    let name = KNOWN_PREFIXES
        .iter()
        .find_map(|prefix| full_name.strip_prefix(prefix))
        .unwrap_or(full_name);
    let chars: Vec<char> = name
        .chars()
        .map(|c| match c {
            ' ' | '/' | '<' | '>' => '_',
            c => c,
        })
        .collect();

    let mut out = String::with_capacity(chars.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Registered entity types, keyed by full name.
#[derive(Debug, Clone, Default)]
pub struct EntityTypeRegistry {
    types: BTreeMap<String, String>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type and return its element name. Fails if the name, or a
    /// name mapping to the same element, is already registered.
    pub fn register(&mut self, full_name: &str) -> TesselResult<String> {
        if self.types.contains_key(full_name) {
            return Err(StateError::TypeAlreadyRegistered {
                name: full_name.to_string(),
            }
            .into());
        }
        let element = element_name(full_name);
        if let Some((existing, _)) = self.types.iter().find(|(_, e)| **e == element) {
            return Err(StateError::TypeAlreadyRegistered {
                name: format!("{} (collides with {})", full_name, existing),
            }
            .into());
        }
        self.types.insert(full_name.to_string(), element.clone());
        Ok(element)
    }

    pub fn unregister(&mut self, full_name: &str) -> TesselResult<()> {
        match self.types.remove(full_name) {
            Some(_) => Ok(()),
            None => Err(StateError::TypeNotRegistered {
                name: full_name.to_string(),
            }
            .into()),
        }
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }

    pub fn element_name(&self, full_name: &str) -> Option<&str> {
        self.types.get(full_name).map(String::as_str)
    }

    pub fn is_registered(&self, full_name: &str) -> bool {
        self.types.contains_key(full_name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
