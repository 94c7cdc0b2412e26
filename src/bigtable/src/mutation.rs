// Copyright 2025 The Cumulus Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Row mutations and their idempotency classification.
//!
//! Bulk writes are batches of independent row mutations. Each row mutation
//! carries an ordered list of cell-level edits. The idempotency of a row
//! mutation is computed from its edits: writing a cell at a server-assigned
//! timestamp produces a different cell on every send, so such writes are not
//! safe to retry.

use cumulus_gax::error::rpc::Status;

/// The server assigns the cell timestamp when the write commits.
pub const SERVER_ASSIGNED_TIMESTAMP: i64 = -1;

/// A single cell-level edit within a row.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    /// Writes one cell value.
    SetCell {
        family: String,
        qualifier: String,
        /// Microseconds since the epoch, or [SERVER_ASSIGNED_TIMESTAMP] to
        /// let the server choose the commit time.
        timestamp_micros: i64,
        value: Vec<u8>,
    },

    /// Deletes the cells in one column, optionally restricted to a
    /// `[start, end)` timestamp range in microseconds.
    DeleteFromColumn {
        family: String,
        qualifier: String,
        time_range: Option<(i64, i64)>,
    },

    /// Deletes all cells in one column family.
    DeleteFromFamily { family: String },

    /// Deletes all cells in the row.
    DeleteFromRow,
}

impl Mutation {
    /// Whether resending this edit produces the same row state.
    ///
    /// Deletes and writes at a client-chosen timestamp are idempotent. A
    /// write at a server-assigned timestamp creates a new cell version on
    /// every send.
    pub fn is_idempotent(&self) -> bool {
        match self {
            Mutation::SetCell {
                timestamp_micros, ..
            } => *timestamp_micros >= 0,
            Mutation::DeleteFromColumn { .. }
            | Mutation::DeleteFromFamily { .. }
            | Mutation::DeleteFromRow => true,
        }
    }
}

/// All the edits applied atomically to one row.
#[derive(Clone, Debug, PartialEq)]
pub struct RowMutation {
    row_key: String,
    mutations: Vec<Mutation>,
}

impl RowMutation {
    pub fn new<K: Into<String>, I: IntoIterator<Item = Mutation>>(row_key: K, mutations: I) -> Self {
        Self {
            row_key: row_key.into(),
            mutations: mutations.into_iter().collect(),
        }
    }

    pub fn row_key(&self) -> &str {
        &self.row_key
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// A row mutation is idempotent only when every edit is.
    pub fn is_idempotent(&self) -> bool {
        self.mutations.iter().all(Mutation::is_idempotent)
    }
}

/// A batch of independent row mutations submitted as one logical operation.
///
/// The outcome of each entry is tracked individually: some entries may
/// succeed while others fail, and only failed retryable entries are resent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkMutation {
    entries: Vec<RowMutation>,
}

impl BulkMutation {
    pub fn new<I: IntoIterator<Item = RowMutation>>(entries: I) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn into_entries(self) -> Vec<RowMutation> {
        self.entries
    }
}

impl FromIterator<RowMutation> for BulkMutation {
    fn from_iter<I: IntoIterator<Item = RowMutation>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// One row mutation that did not complete successfully.
///
/// The index refers to the entry's position in the original [BulkMutation],
/// regardless of how many attempts were made or how the batch was split
/// across them.
#[derive(Clone, Debug, PartialEq)]
pub struct FailedMutation {
    index: usize,
    status: Status,
}

impl FailedMutation {
    pub(crate) fn new(index: usize, status: Status) -> Self {
        Self { index, status }
    }

    /// The position of the failed entry in the original batch.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The final status of the failed entry.
    pub fn status(&self) -> &Status {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_cell(timestamp_micros: i64) -> Mutation {
        Mutation::SetCell {
            family: "fam".to_string(),
            qualifier: "col".to_string(),
            timestamp_micros,
            value: b"value".to_vec(),
        }
    }

    #[test]
    fn set_cell_idempotency() {
        assert!(set_cell(10_000).is_idempotent());
        assert!(set_cell(0).is_idempotent());
        assert!(!set_cell(SERVER_ASSIGNED_TIMESTAMP).is_idempotent());
    }

    #[test]
    fn deletes_are_idempotent() {
        assert!(
            Mutation::DeleteFromColumn {
                family: "fam".to_string(),
                qualifier: "col".to_string(),
                time_range: Some((0, 10_000)),
            }
            .is_idempotent()
        );
        assert!(
            Mutation::DeleteFromFamily {
                family: "fam".to_string()
            }
            .is_idempotent()
        );
        assert!(Mutation::DeleteFromRow.is_idempotent());
    }

    #[test]
    fn row_mutation_idempotency() {
        let row = RowMutation::new("r1", [set_cell(10_000), Mutation::DeleteFromRow]);
        assert!(row.is_idempotent());

        let row = RowMutation::new(
            "r2",
            [set_cell(10_000), set_cell(SERVER_ASSIGNED_TIMESTAMP)],
        );
        assert!(!row.is_idempotent());
    }

    #[test]
    fn bulk_mutation_collects() {
        let bulk = [
            RowMutation::new("r1", [set_cell(0)]),
            RowMutation::new("r2", [set_cell(0)]),
        ]
        .into_iter()
        .collect::<BulkMutation>();
        assert_eq!(bulk.len(), 2);
        assert!(!bulk.is_empty());
    }
}
