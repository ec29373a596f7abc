use serde::Serialize;

/// A row the target store rejected. `offset` is the row's position in the
/// table's input order (zero-based), not its position inside the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub message: String,
    pub offset: usize,
}

/// Result of one batch-execute call. Offsets in `errors` are batch-relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub row_counts: Vec<u64>,
    pub errors: Vec<RowError>,
}

impl BatchOutcome {
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            row_counts: Vec::with_capacity(rows),
            errors: Vec::new(),
        }
    }

    pub fn rows_affected(&self) -> u64 {
        self.row_counts.iter().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub rows_submitted: usize,
    pub rows_affected: u64,
    pub batches: usize,
    pub row_errors: Vec<RowError>,
}

impl LoadReport {
    /// Fold a batch outcome in; `batch_start` is the input offset of the batch's first row.
    pub fn absorb(&mut self, batch_start: usize, batch_len: usize, outcome: BatchOutcome) {
        self.batches += 1;
        self.rows_submitted += batch_len;
        self.rows_affected += outcome.rows_affected();
        self.row_errors
            .extend(outcome.errors.into_iter().map(|e| RowError {
                message: e.message,
                offset: batch_start + e.offset,
            }));
    }

    pub fn has_row_errors(&self) -> bool {
        !self.row_errors.is_empty()
    }
}
