//! Commit: one durable store write, then promotion of every bucket.

use super::EntityCache;
use tessel_core::{ChangeEvent, DiagramId, EntityIdType, StoreError, TesselResult, UsageError};
use tracing::{debug, info, warn};

impl EntityCache {
    /// Make every buffered change durable.
    ///
    /// On success deleted buckets are dropped, everything else becomes
    /// `Original`, transient entities move under the identities the store
    /// assigned, and the pending connection lists are folded in. If the store
    /// write fails the cache is left exactly as it was, still dirty. Entities the store
    /// gave no identity stay pending for the next commit; everything else is
    /// promoted and the commit reports the shortfall as a store error.
    pub fn commit(&mut self) -> TesselResult<()> {
        self.ensure_open()?;
        if !self.dirty {
            debug!("Commit skipped, nothing to save");
            return Ok(());
        }

        let store = self
            .store
            .as_deref_mut()
            .ok_or(UsageError::NoStore)?;
        let changes = self
            .cols
            .change_set(self.connections.to_add(), self.connections.to_remove());
        let counts = changes.counts();
        let ids = store.save_changes(&changes)?;

        let unassigned: Vec<_> = changes
            .inserted_handles()
            .into_iter()
            .filter(|handle| ids.get(*handle).is_none())
            .collect();
        let new_diagrams: Vec<DiagramId> = changes
            .diagrams
            .inserted
            .iter()
            .filter_map(|(handle, _, _)| ids.get(*handle))
            .map(DiagramId::new)
            .collect();

        self.cols.promote(&ids);
        self.connections.commit(&ids);
        self.assigned.extend(&ids);
        self.project_design = self.project_design.map(|key| key.resolve(&ids));
        // A diagram created this session has all of its shapes resident.
        for diagram in new_diagrams {
            self.loads.mark_diagram(diagram);
        }
        if let Some(first) = unassigned.first() {
            warn!(
                unassigned = unassigned.len(),
                "Store assigned no identity to some new entities, keeping them pending"
            );
            return Err(StoreError::SaveFailed {
                reason: format!(
                    "no identity assigned to {} transient entities, first {}",
                    unassigned.len(),
                    first
                ),
            }
            .into());
        }
        self.dirty = false;

        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            deleted = counts.deleted,
            connections = counts.connections,
            "Committed changes"
        );
        self.emit(ChangeEvent::Committed {
            inserted: counts.inserted,
            updated: counts.updated,
            deleted: counts.deleted,
        });
        Ok(())
    }
}
