//! I/O-efficient lookup planning for unordered read-id queries.
//!
//! Visiting rows in `(batch, row)` order means each record batch is
//! deserialized once, so a plan is computed up front: the query ids are
//! sorted and merge-walked against a sorted view of every batch's read-id
//! column.

use uuid::Uuid;

use crate::error::Result;
use crate::read_table::ReadTableReader;

/// One visit of the plan: a row to read, and which query id it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalStep {
    /// Read-table batch to visit.
    pub batch: usize,
    /// Row within the batch.
    pub batch_row: usize,
    /// Position of the matched id in the original query slice.
    pub input_index: usize,
}

/// A read-order-efficient visit plan over the read table.
#[derive(Debug, Clone, Default)]
pub struct TraversalPlan {
    steps: Vec<TraversalStep>,
    batch_counts: Vec<u32>,
    input_count: usize,
}

impl TraversalPlan {
    /// Steps sorted by `(batch, batch_row)`.
    pub fn steps(&self) -> &[TraversalStep] {
        &self.steps
    }

    /// Number of plan entries per read-table batch.
    pub fn batch_counts(&self) -> &[u32] {
        &self.batch_counts
    }

    /// How many query ids were found.
    pub fn find_success_count(&self) -> usize {
        self.steps.len()
    }

    /// How many query ids were not present in the file.
    pub fn missing_count(&self) -> usize {
        self.input_count - self.steps.len()
    }
}

pub(crate) fn search_for_read_ids(
    reader: &mut ReadTableReader,
    read_ids: &[Uuid],
) -> Result<TraversalPlan> {
    // Pair each query id with its input position, sorted by id.
    let mut sorted_input: Vec<([u8; 16], usize)> = read_ids
        .iter()
        .enumerate()
        .map(|(index, id)| (*id.as_bytes(), index))
        .collect();
    sorted_input.sort_unstable();

    let mut plan = TraversalPlan {
        steps: Vec::new(),
        batch_counts: Vec::with_capacity(reader.num_record_batches()),
        input_count: read_ids.len(),
    };

    for batch_index in 0..reader.num_record_batches() {
        let batch = reader.read_record_batch(batch_index)?;
        let column = batch.read_id_column()?;

        // The column is unordered in general; build a sorted view lazily.
        let mut batch_ids: Vec<(&[u8], usize)> = (0..column.len())
            .map(|row| (column.value(row), row))
            .collect();
        batch_ids.sort_unstable();

        let mut hits: Vec<(usize, usize)> = Vec::new();
        let mut input_iter = sorted_input.iter().peekable();
        let mut batch_iter = batch_ids.iter().peekable();
        while let (Some(&&(input_id, input_index)), Some(&&(batch_id, row))) =
            (input_iter.peek(), batch_iter.peek())
        {
            match input_id.as_slice().cmp(batch_id) {
                std::cmp::Ordering::Less => {
                    input_iter.next();
                }
                std::cmp::Ordering::Greater => {
                    batch_iter.next();
                }
                std::cmp::Ordering::Equal => {
                    hits.push((row, input_index));
                    input_iter.next();
                }
            }
        }

        hits.sort_unstable();
        plan.batch_counts.push(hits.len() as u32);
        plan.steps.extend(hits.into_iter().map(|(row, input_index)| {
            TraversalStep {
                batch: batch_index,
                batch_row: row,
                input_index,
            }
        }));
    }

    Ok(plan)
}
