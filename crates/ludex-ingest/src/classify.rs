//! Change detection against the pre-run fingerprint snapshot
//!
//! The index is read once at run start and never refreshed during the run,
//! so two updates to the same entity within one run are both classified
//! relative to the pre-run state and resolve last-write-wins by page order.
//! UNCHANGED records are filtered out here and never reach the Reconciler.

use crate::types::{ChangeEvent, ChangeKind, GameRecord};
use ludex_common::Fingerprint;
use std::collections::HashMap;

/// Read-only snapshot of entity fingerprints at run start
#[derive(Debug, Clone, Default)]
pub struct FingerprintIndex {
    by_id: HashMap<i64, Fingerprint>,
}

impl FingerprintIndex {
    pub fn new(by_id: HashMap<i64, Fingerprint>) -> Self {
        Self { by_id }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Classify a candidate record:
    /// no known fingerprint means NEW, a differing one means UPDATED,
    /// an identical one means UNCHANGED.
    pub fn classify(&self, candidate: &GameRecord) -> ChangeEvent {
        let previous = self.by_id.get(&candidate.id);
        let kind = match previous {
            None => ChangeKind::New,
            Some(known) if *known == candidate.content_fingerprint => ChangeKind::Unchanged,
            Some(_) => ChangeKind::Updated,
        };

        ChangeEvent {
            entity_id: candidate.id,
            kind,
            previous_fingerprint: previous.cloned(),
            new_fingerprint: candidate.content_fingerprint.clone(),
        }
    }
}

/// Split a page of candidates into records that need writing and counters for
/// the rest. Unchanged candidates are dropped here.
pub fn partition_changed(
    index: &FingerprintIndex,
    records: Vec<GameRecord>,
) -> (Vec<GameRecord>, PageChanges) {
    let mut changed = Vec::new();
    let mut counts = PageChanges::default();

    for record in records {
        match index.classify(&record).kind {
            ChangeKind::New => {
                counts.new += 1;
                changed.push(record);
            }
            ChangeKind::Updated => {
                counts.updated += 1;
                changed.push(record);
            }
            ChangeKind::Unchanged => counts.unchanged += 1,
        }
    }

    (changed, counts)
}

/// Per-page classification counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageChanges {
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
}
