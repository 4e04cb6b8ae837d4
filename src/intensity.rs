// Spot-by-round-by-channel intensity tables assembled from spot finding results.

use itertools::Itertools;
use log::{info, warn};
use ndarray::{Array3, ArrayView2, ArrayView3};

use crate::axes::RoundChannelKey;
use crate::error::{IssError, Result};
use crate::spots::SpotFindingResults;

/// Where a spot sits in the field of view.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SpotPosition {
    pub y: f32,
    pub x: f32,
    pub z: f32,
    pub radius: f32,
}

/// Per-spot intensities over every (round, channel) combination.
///
/// `intensities` has shape (spots, rounds, channels). Round and channel axis
/// positions follow `round_labels` and `ch_labels`, which are sorted.
/// Tables merged from spots with ids keep one id per row.
#[derive(Clone, Debug)]
pub struct IntensityTable {
    positions: Vec<SpotPosition>,
    spot_ids: Option<Vec<u64>>,
    round_labels: Vec<usize>,
    ch_labels: Vec<usize>,
    intensities: Array3<f32>,
}

impl IntensityTable {
    pub fn new(
        positions: Vec<SpotPosition>,
        round_labels: Vec<usize>,
        ch_labels: Vec<usize>,
        intensities: Array3<f32>,
    ) -> Result<Self> {
        let (nspots, nrounds, nchannels) = intensities.dim();
        for (column, expected, found) in [
            ("positions", nspots, positions.len()),
            ("round_labels", nrounds, round_labels.len()),
            ("ch_labels", nchannels, ch_labels.len()),
        ] {
            if expected != found {
                return Err(IssError::ColumnLength {
                    column,
                    expected,
                    found,
                });
            }
        }

        Ok(IntensityTable {
            positions,
            spot_ids: None,
            round_labels,
            ch_labels,
            intensities,
        })
    }

    pub fn zeros(positions: Vec<SpotPosition>, round_labels: Vec<usize>, ch_labels: Vec<usize>) -> Self {
        let intensities = Array3::zeros((positions.len(), round_labels.len(), ch_labels.len()));
        IntensityTable {
            positions,
            spot_ids: None,
            round_labels,
            ch_labels,
            intensities,
        }
    }

    /// Attach one spot id per row.
    pub fn with_spot_ids(mut self, spot_ids: Vec<u64>) -> Result<Self> {
        if spot_ids.len() != self.nspots() {
            return Err(IssError::ColumnLength {
                column: "spot_ids",
                expected: self.nspots(),
                found: spot_ids.len(),
            });
        }
        self.spot_ids = Some(spot_ids);
        Ok(self)
    }

    /// Merge results in which every (round, ch) entry measured the same spots
    /// in the same order, as happens when spots are found once on a reference
    /// image and measured in each tile.
    ///
    /// Positions are taken from the first entry. Combinations missing from the
    /// results stay at zero. When spots carry ids, every entry must list the
    /// same ids in the same order and no id may repeat.
    pub fn from_spot_results_exact_match(results: &SpotFindingResults) -> Result<Self> {
        let round_labels = results.round_labels();
        let ch_labels = results.ch_labels();

        let Some((_, reference)) = results.iter().next() else {
            return Ok(IntensityTable::zeros(Vec::new(), round_labels, ch_labels));
        };
        let nspots = reference.len();

        for (key, spots) in results.iter() {
            if spots.len() != nspots {
                return Err(IssError::SpotCountMismatch {
                    round: key.round,
                    ch: key.ch,
                    expected: nspots,
                    found: spots.len(),
                });
            }
        }

        for (key, spots) in results.iter() {
            if spots.ids() != reference.ids() {
                return Err(IssError::SpotIdMismatch {
                    round: key.round,
                    ch: key.ch,
                });
            }
        }

        if let (Some((key, _)), Some(ids)) = (results.iter().next(), reference.ids()) {
            if let Some(&spot_id) = ids.iter().duplicates().next() {
                return Err(IssError::DuplicateSpotId {
                    round: key.round,
                    ch: key.ch,
                    spot_id,
                });
            }
        }

        let positions = reference
            .iter()
            .map(|s| SpotPosition {
                y: s.y,
                x: s.x,
                z: s.z,
                radius: s.radius,
            })
            .collect();

        let mut table = IntensityTable::zeros(positions, round_labels, ch_labels);
        table.spot_ids = reference.ids().map(|ids| ids.to_vec());
        let nexpected = table.nrounds() * table.nchannels();
        if results.len() < nexpected {
            warn!(
                "Spot results cover {} of {} (round, channel) combinations; missing intensities are zero",
                results.len(),
                nexpected
            );
        }

        for (key, spots) in results.iter() {
            let (r, c) = table.axis_positions(key);
            for (i, intensity) in spots.intensities().enumerate() {
                table.intensities[[i, r, c]] = intensity;
            }
        }

        info!(
            "Built intensity table: {} spots x {} rounds x {} channels",
            table.nspots(),
            table.nrounds(),
            table.nchannels()
        );

        Ok(table)
    }

    /// Merge results where every (round, ch) entry found its own spots: each
    /// spot becomes a row with only its own (round, ch) intensity set.
    pub fn from_spot_results_sequential(results: &SpotFindingResults) -> Result<Self> {
        let positions = results
            .values()
            .flat_map(|spots| spots.iter())
            .map(|s| SpotPosition {
                y: s.y,
                x: s.x,
                z: s.z,
                radius: s.radius,
            })
            .collect();

        let mut table =
            IntensityTable::zeros(positions, results.round_labels(), results.ch_labels());

        let mut i = 0;
        for (key, spots) in results.iter() {
            let (r, c) = table.axis_positions(key);
            for intensity in spots.intensities() {
                table.intensities[[i, r, c]] = intensity;
                i += 1;
            }
        }

        Ok(table)
    }

    // Every key of the results this table was built from has a position.
    fn axis_positions(&self, key: &RoundChannelKey) -> (usize, usize) {
        let r = self.round_labels.binary_search(&key.round).unwrap_or_default();
        let c = self.ch_labels.binary_search(&key.ch).unwrap_or_default();
        (r, c)
    }

    pub fn nspots(&self) -> usize {
        self.positions.len()
    }

    pub fn nrounds(&self) -> usize {
        self.round_labels.len()
    }

    pub fn nchannels(&self) -> usize {
        self.ch_labels.len()
    }

    pub fn round_labels(&self) -> &[usize] {
        &self.round_labels
    }

    pub fn ch_labels(&self) -> &[usize] {
        &self.ch_labels
    }

    pub fn positions(&self) -> &[SpotPosition] {
        &self.positions
    }

    pub fn spot_ids(&self) -> Option<&[u64]> {
        self.spot_ids.as_deref()
    }

    pub fn intensities(&self) -> ArrayView3<'_, f32> {
        self.intensities.view()
    }

    /// The (rounds, channels) intensity matrix of one spot.
    pub fn trace(&self, spot: usize) -> Result<ArrayView2<'_, f32>> {
        if spot >= self.nspots() {
            return Err(IssError::SpotIndexOutOfRange {
                index: spot,
                nspots: self.nspots(),
            });
        }
        Ok(self.intensities.index_axis(ndarray::Axis(0), spot))
    }
}
