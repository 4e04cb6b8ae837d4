// Assigning decoded spots to cells with a segmentation label image.

use itertools::Itertools;
use log::info;
use ndarray::ArrayView2;

use crate::decode::DecodedIntensityTable;

pub type CellIndex = u32;

/// Cell index of spots that fall on background or outside the label image.
pub const BACKGROUND_CELL: CellIndex = u32::MAX;

/// The cell each decoded spot belongs to, in spot order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellAssignments {
    cells: Vec<CellIndex>,
}

impl CellAssignments {
    pub fn new(cells: Vec<CellIndex>) -> Self {
        CellAssignments { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, spot: usize) -> CellIndex {
        self.cells[spot]
    }

    pub fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    pub fn nassigned(&self) -> usize {
        self.cells.iter().filter(|&&c| c != BACKGROUND_CELL).count()
    }

    /// Sorted distinct cells with at least one spot.
    pub fn cell_labels(&self) -> Vec<CellIndex> {
        self.cells
            .iter()
            .copied()
            .filter(|&c| c != BACKGROUND_CELL)
            .sorted()
            .dedup()
            .collect()
    }
}

/// Assign each spot to the label under its rounded (y, x) position. Label 0
/// is background.
pub fn assign_by_label(decoded: &DecodedIntensityTable, labels: ArrayView2<u32>) -> CellAssignments {
    let (ny, nx) = labels.dim();
    let cells: Vec<CellIndex> = decoded
        .table()
        .positions()
        .iter()
        .map(|position| {
            let y = position.y.round();
            let x = position.x.round();
            if !(y >= 0.0 && x >= 0.0 && (y as usize) < ny && (x as usize) < nx) {
                return BACKGROUND_CELL;
            }
            match labels[[y as usize, x as usize]] {
                0 => BACKGROUND_CELL,
                label => label,
            }
        })
        .collect();

    let assignments = CellAssignments { cells };
    info!(
        "Assigned {} of {} spots to {} cells",
        assignments.nassigned(),
        assignments.len(),
        assignments.cell_labels().len()
    );

    assignments
}
