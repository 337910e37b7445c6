//! Deployment resource ledger.
//!
//! Each (phase, instance) pair owns one segment with a single writer. The
//! merged ledger orders segments by phase, then by the instance's position
//! in the plan; rollback consumes the merged ledger strictly in reverse.

use std::collections::BTreeMap;

use bulwark_common::{LedgerEntry, Phase};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLedger {
    segments: BTreeMap<(Phase, usize), Vec<LedgerEntry>>,
}

impl ResourceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entries` to the segment for `phase` and plan position `slot`.
    pub fn append(&mut self, phase: Phase, slot: usize, entries: impl IntoIterator<Item = LedgerEntry>) {
        self.segments.entry((phase, slot)).or_default().extend(entries);
    }

    /// Merged entries in effect order.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.segments.values().flatten().cloned().collect()
    }

    /// Merged entries in teardown order.
    #[must_use]
    pub fn rollback_order(&self) -> Vec<LedgerEntry> {
        let mut entries = self.entries();
        entries.reverse();
        entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
