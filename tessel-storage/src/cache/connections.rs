//! Shape connections with net-effect change tracking.

use std::collections::BTreeSet;
use tessel_core::{IdAssignments, Key, ShapeConnection, ShapeId};

/// Established connections plus the pending add/remove lists.
///
/// Adding a connection cancels a pending removal of the same connection and
/// vice versa, so a commit only ever sends the net effect.
#[derive(Debug, Default)]
pub(crate) struct ConnectionLedger {
    established: BTreeSet<ShapeConnection>,
    to_add: Vec<ShapeConnection>,
    to_remove: Vec<ShapeConnection>,
}

impl ConnectionLedger {
    /// Record a connection read from the store.
    pub(crate) fn establish(&mut self, connection: ShapeConnection) {
        if !self.to_remove.contains(&connection) {
            self.established.insert(connection);
        }
    }

    pub(crate) fn contains(&self, connection: &ShapeConnection) -> bool {
        self.established.contains(connection) || self.to_add.contains(connection)
    }

    pub(crate) fn add(&mut self, connection: ShapeConnection) {
        if let Some(pos) = self.to_remove.iter().position(|c| *c == connection) {
            self.to_remove.remove(pos);
            self.established.insert(connection);
        } else {
            self.to_add.push(connection);
        }
    }

    pub(crate) fn remove(&mut self, connection: &ShapeConnection) {
        if let Some(pos) = self.to_add.iter().position(|c| c == connection) {
            self.to_add.remove(pos);
        } else if self.established.remove(connection) {
            self.to_remove.push(*connection);
        }
    }

    /// Live connections: established and pending additions.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &ShapeConnection> {
        self.established.iter().chain(self.to_add.iter())
    }

    pub(crate) fn of_shape(&self, shape: Key<ShapeId>) -> Vec<ShapeConnection> {
        self.iter().filter(|c| c.involves(shape)).copied().collect()
    }

    pub(crate) fn pending_counts(&self) -> (usize, usize) {
        (self.to_add.len(), self.to_remove.len())
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.to_add.is_empty() || !self.to_remove.is_empty()
    }

    pub(crate) fn to_add(&self) -> Vec<ShapeConnection> {
        self.to_add.clone()
    }

    pub(crate) fn to_remove(&self) -> Vec<ShapeConnection> {
        self.to_remove.clone()
    }

    /// Fold the pending lists into the established set after a successful
    /// save, rewriting endpoints that just received an identity.
    pub(crate) fn commit(&mut self, ids: &IdAssignments) {
        let established = std::mem::take(&mut self.established);
        let (saved, unsaved): (Vec<_>, Vec<_>) = established
            .into_iter()
            .chain(self.to_add.drain(..))
            .map(|c| c.resolve(ids))
            .partition(|c| c.connector.is_persisted() && c.target.is_persisted());
        self.established = saved.into_iter().collect();
        // Endpoints the store gave no identity keep the connection pending.
        self.to_add = unsaved.into_iter().collect();
        self.to_remove.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.established.len() + self.to_add.len()
    }

    pub(crate) fn clear(&mut self) {
        self.established.clear();
        self.to_add.clear();
        self.to_remove.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::{new_entity_id, ControlPointId, EntityIdType};

    fn connection() -> ShapeConnection {
        ShapeConnection::new(
            Key::fresh(),
            ControlPointId(1),
            Key::fresh(),
            ControlPointId(5),
        )
    }

    #[test]
    fn test_add_then_remove_is_net_zero() {
        let mut ledger = ConnectionLedger::default();
        let c = connection();
        ledger.add(c);
        assert!(ledger.contains(&c));
        ledger.remove(&c);
        assert!(!ledger.contains(&c));
        assert!(!ledger.has_pending());
    }

    #[test]
    fn test_remove_then_add_is_net_zero() {
        let mut ledger = ConnectionLedger::default();
        let c = connection();
        ledger.establish(c);
        ledger.remove(&c);
        assert_eq!(ledger.pending_counts(), (0, 1));
        assert!(!ledger.contains(&c));

        ledger.add(c);
        assert!(ledger.contains(&c));
        assert!(!ledger.has_pending());
    }

    #[test]
    fn test_of_shape() {
        let mut ledger = ConnectionLedger::default();
        let c = connection();
        ledger.add(c);
        ledger.add(connection());
        assert_eq!(ledger.of_shape(c.target), vec![c]);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_commit_resolves_endpoints() {
        let mut ledger = ConnectionLedger::default();
        let c = connection();
        ledger.add(c);

        let mut ids = IdAssignments::new();
        let connector = new_entity_id();
        let target = new_entity_id();
        ids.assign(c.connector.handle().unwrap(), connector);
        ids.assign(c.target.handle().unwrap(), target);
        ledger.commit(&ids);

        assert!(!ledger.has_pending());
        let resolved = ShapeConnection {
            connector: Key::Persisted(ShapeId::new(connector)),
            target: Key::Persisted(ShapeId::new(target)),
            ..c
        };
        assert!(ledger.contains(&resolved));
        assert!(!ledger.contains(&c));
    }

    #[test]
    fn test_commit_keeps_unassigned_endpoints_pending() {
        let mut ledger = ConnectionLedger::default();
        let c = connection();
        ledger.add(c);

        let mut ids = IdAssignments::new();
        let uuid = new_entity_id();
        ids.assign(c.connector.handle().unwrap(), uuid);
        ledger.commit(&ids);

        assert_eq!(ledger.pending_counts(), (1, 0));
        let partly = ShapeConnection {
            connector: Key::Persisted(ShapeId::new(uuid)),
            ..c
        };
        assert!(ledger.contains(&partly));
    }
}
