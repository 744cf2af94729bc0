//! Reference dataset and its identity fingerprint.

use dm_common::{Error, Record, Result, Schema};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use super::window::WindowBuffer;

/// Hex SHA-256 over the canonical encoding of a dataset's rows.
///
/// Order and content sensitive: the same rows in another order hash
/// differently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(rows: &[Record]) -> Self {
        let mut hasher = Sha256::new();
        let mut buf = Vec::with_capacity(256);
        hasher.update((rows.len() as u64).to_le_bytes());
        for row in rows {
            buf.clear();
            buf.extend_from_slice(&(row.len() as u64).to_le_bytes());
            for (column, value) in row.iter() {
                buf.extend_from_slice(&(column.len() as u64).to_le_bytes());
                buf.extend_from_slice(column.as_bytes());
                value.write_canonical(&mut buf);
            }
            hasher.update(&buf);
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable baseline the window is compared against.
///
/// Rows are shared behind an `Arc` so a replacement is a pointer swap and
/// an in-flight evaluation keeps its own copy alive.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    rows: Arc<[Record]>,
    fingerprint: Fingerprint,
}

impl ReferenceSet {
    pub fn new(rows: Vec<Record>) -> Self {
        let fingerprint = Fingerprint::of(&rows);
        ReferenceSet {
            rows: rows.into(),
            fingerprint,
        }
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn shared_rows(&self) -> Arc<[Record]> {
        Arc::clone(&self.rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Fail when fewer than `min_rows` rows remain.
    pub fn ensure_min_size(&self, min_rows: usize) -> Result<()> {
        if self.len() < min_rows {
            return Err(Error::ReferenceTooSmall {
                rows: self.len(),
                required: min_rows,
            });
        }
        Ok(())
    }
}

/// Reference, initial window and the schema both are held to.
#[derive(Debug)]
pub struct SeededState {
    pub reference: ReferenceSet,
    pub window: WindowBuffer,
    pub schema: Schema,
}

/// Split a historical dataset into reference and initial window.
///
/// With `use_reference`, the last `window_size` rows seed the window and the
/// rest become the reference; a dataset no longer than the window leaves
/// the reference empty. Without it the whole dataset is the reference and
/// the window starts empty. Every row must share the first row's columns.
pub fn seed(mut history: Vec<Record>, window_size: usize, use_reference: bool) -> Result<SeededState> {
    let schema = history.first().map(Record::schema).unwrap_or_default();
    schema
        .check_rows(&history)
        .map_err(|e| Error::ReferenceLoad(e.to_string()))?;

    let window = if use_reference {
        let split_at = history.len().saturating_sub(window_size);
        WindowBuffer::seeded(history.split_off(split_at))
    } else {
        WindowBuffer::new()
    };

    Ok(SeededState {
        reference: ReferenceSet::new(history),
        window,
        schema,
    })
}
