// Cell by target count matrices.

use log::info;
use ndarray::{Array2, ArrayView2};
use regex::Regex;

use crate::assign::{CellAssignments, CellIndex, BACKGROUND_CELL};
use crate::decode::DecodedIntensityTable;
use crate::error::{IssError, Result};

/// Counts of decoded spots per (cell, target).
///
/// Rows follow `cells` (sorted), columns follow `targets` (codebook order).
#[derive(Clone, Debug)]
pub struct ExpressionMatrix {
    cells: Vec<CellIndex>,
    targets: Vec<String>,
    counts: Array2<u32>,
}

impl ExpressionMatrix {
    /// Count spots that pass thresholds, decode to a target and are assigned
    /// to a cell. Targets matching `excluded_targets` get no column.
    pub fn from_decoded(
        decoded: &DecodedIntensityTable,
        assignments: &CellAssignments,
        excluded_targets: Option<&Regex>,
    ) -> Result<Self> {
        if assignments.len() != decoded.len() {
            return Err(IssError::ColumnLength {
                column: "cell",
                expected: decoded.len(),
                found: assignments.len(),
            });
        }

        let mut targets = Vec::new();
        let mut column_of = Vec::with_capacity(decoded.target_names().len());
        for name in decoded.target_names() {
            if excluded_targets.is_some_and(|re| re.is_match(name)) {
                column_of.push(None);
            } else {
                column_of.push(Some(targets.len()));
                targets.push(name.clone());
            }
        }

        let cells = assignments.cell_labels();
        let mut counts = Array2::<u32>::zeros((cells.len(), targets.len()));
        for (spot, &cell) in assignments.cells().iter().enumerate() {
            if cell == BACKGROUND_CELL || !decoded.passes_thresholds(spot) {
                continue;
            }
            let Some(target) = decoded.target_index(spot) else {
                continue;
            };
            let Some(col) = column_of[target as usize] else {
                continue;
            };
            // cell_labels is sorted and contains every assigned cell.
            if let Ok(row) = cells.binary_search(&cell) {
                counts[[row, col]] += 1;
            }
        }

        let matrix = ExpressionMatrix {
            cells,
            targets,
            counts,
        };
        info!(
            "Expression matrix: {} cells x {} targets, {} spots counted",
            matrix.ncells(),
            matrix.ntargets(),
            matrix.total()
        );

        Ok(matrix)
    }

    pub fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn counts(&self) -> ArrayView2<'_, u32> {
        self.counts.view()
    }

    pub fn ncells(&self) -> usize {
        self.cells.len()
    }

    pub fn ntargets(&self) -> usize {
        self.targets.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }
}
