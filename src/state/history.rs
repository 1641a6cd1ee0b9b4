//! In-memory listing of stored scans and the current selection

use tracing::{debug, warn};

use super::data::{ScanRecord, ScanRecordId};
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
pub struct ScanHistory {
    entries: Vec<ScanRecord>,
    selected: Option<ScanRecordId>,
    /// Bumped for every listing request and every local removal;
    /// a listing only lands if nothing happened since it was requested
    generation: u64,
}

impl ScanHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a fresh listing from the store (most recent first)
    ///
    /// The selection survives only if its record is still listed.
    pub fn replace(&mut self, entries: Vec<ScanRecord>) {
        self.entries = entries;
        if let Some(id) = self.selected {
            if self.get(id).is_none() {
                self.selected = None;
            }
        }
    }

    /// Start a listing request; hand the token back to [`Self::finish_load`]
    pub fn begin_load(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Apply a listing unless a newer load or a removal superseded it
    pub fn finish_load(&mut self, generation: u64, entries: Vec<ScanRecord>) -> bool {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Dropping stale history listing");
            return false;
        }
        self.replace(entries);
        true
    }

    pub fn entries(&self) -> &[ScanRecord] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ScanRecordId) -> Option<&ScanRecord> {
        self.entries.iter().find(|r| r.id == id)
    }

    /// Select a listed record; unknown ids leave the selection untouched
    pub fn select(&mut self, id: ScanRecordId) -> Option<&ScanRecord> {
        let index = self.entries.iter().position(|r| r.id == id)?;
        self.selected = Some(id);
        self.entries.get(index)
    }

    pub fn selected(&self) -> Option<&ScanRecord> {
        self.selected.and_then(|id| self.get(id))
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Drop an entry from the listing, clearing the selection if it was this one
    pub fn remove(&mut self, id: ScanRecordId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.id != id);
        if self.selected == Some(id) {
            self.selected = None;
        }
        let removed = self.entries.len() != before;
        if removed {
            self.generation += 1;
        }
        removed
    }

    /// Reflect the store's answer to a delete request
    ///
    /// A record the store no longer has is gone either way, so `NotFound`
    /// removes the entry too. Other failures leave the listing as it was.
    pub fn apply_deletion(&mut self, id: ScanRecordId, result: &Result<(), StoreError>) -> bool {
        match result {
            Ok(()) | Err(StoreError::NotFound(_)) => self.remove(id),
            Err(e) => {
                warn!("⚠️  Could not delete scan {}: {}", id, e);
                false
            }
        }
    }
}
