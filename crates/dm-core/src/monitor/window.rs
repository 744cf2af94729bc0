//! Bounded sliding window over the ingested stream.

use dm_common::Record;
use std::collections::VecDeque;

/// FIFO accumulator of the most recent records.
///
/// Appends never drop rows; the window only shrinks through [`trim`],
/// which evicts from the head. `pending_new_rows` counts rows appended
/// since they were last folded into an evaluation.
///
/// [`trim`]: WindowBuffer::trim
#[derive(Debug, Clone, Default)]
pub struct WindowBuffer {
    rows: VecDeque<Record>,
    pending_new_rows: usize,
}

impl WindowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A window pre-filled with seed rows. Seeds do not count as new rows.
    pub fn seeded(rows: impl IntoIterator<Item = Record>) -> Self {
        WindowBuffer {
            rows: rows.into_iter().collect(),
            pending_new_rows: 0,
        }
    }

    /// Append rows to the tail in order. Returns how many were appended.
    pub fn append(&mut self, rows: impl IntoIterator<Item = Record>) -> usize {
        let before = self.rows.len();
        self.rows.extend(rows);
        let appended = self.rows.len() - before;
        self.pending_new_rows += appended;
        appended
    }

    /// Evict from the head until at most `target_size` rows remain.
    /// Returns the number of rows evicted.
    pub fn trim(&mut self, target_size: usize) -> usize {
        let excess = self.rows.len().saturating_sub(target_size);
        if excess > 0 {
            self.rows.drain(..excess);
        }
        excess
    }

    /// Mark `count` new rows as incorporated into an evaluation.
    pub fn consume(&mut self, count: usize) {
        self.pending_new_rows = self.pending_new_rows.saturating_sub(count);
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn pending_new_rows(&self) -> usize {
        self.pending_new_rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter()
    }

    /// Copy the window out oldest-first for the engine.
    pub fn snapshot(&self) -> Vec<Record> {
        self.rows.iter().cloned().collect()
    }
}
