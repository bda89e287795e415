//! Per-session feature table.
//!
//! The device assigns each feature a short index at connect time and those
//! indices are NOT stable across sessions: a reconnect after a firmware hiccup
//! or a host switch can reshuffle the whole table.  The table is therefore
//! rebuilt from scratch by feature discovery on every connect and never
//! persisted or cached anywhere else.

use std::collections::HashMap;

/// Maps feature ids to the index the device assigned them this session.
///
/// Also keeps the reverse mapping so an inbound notification's feature index
/// can be resolved back to the feature id it belongs to.
#[derive(Debug, Default, Clone)]
pub struct FeatureTable {
    by_id: HashMap<u16, u8>,
    by_index: HashMap<u8, u16>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a discovered feature.  A feature id seen twice keeps the last
    /// index the device reported.
    pub fn insert(&mut self, feature_id: u16, index: u8) {
        if let Some(old) = self.by_id.insert(feature_id, index) {
            self.by_index.remove(&old);
        }
        self.by_index.insert(index, feature_id);
    }

    /// The session index for a feature id, if the device advertises it.
    pub fn index_of(&self, feature_id: u16) -> Option<u8> {
        self.by_id.get(&feature_id).copied()
    }

    /// The feature id behind a session index (for classifying notifications).
    pub fn id_at(&self, index: u8) -> Option<u16> {
        self.by_index.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Discards all entries; called before rediscovery on reconnect.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_index.clear();
    }
}
