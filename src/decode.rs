// Per-round-max decoding of intensity tables against a codebook.

use itertools::Itertools;
use log::info;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::collections::HashMap;

use crate::codebook::{Codebook, TargetIndex};
use crate::error::{IssError, Result};
use crate::intensity::IntensityTable;

/// Target label written for spots whose code is not in the codebook.
pub const NO_MATCH_TARGET: &str = "nan";

/// What a threshold policy gets to see for a single spot.
pub struct SpotTrace<'a> {
    /// (rounds, channels) intensities.
    pub intensities: ArrayView2<'a, f32>,
    /// Selected channel per round.
    pub max_channels: &'a [u8],
    /// Intensity of the selected channel per round.
    pub max_intensities: &'a [f32],
}

/// Decides whether a decoded spot passes quality thresholds.
///
/// Called once per spot, possibly from several threads. Any
/// `Fn(&SpotTrace) -> bool + Sync` closure is a policy.
pub trait ThresholdPolicy: Sync {
    fn passes(&self, trace: &SpotTrace<'_>) -> bool;
}

impl<F> ThresholdPolicy for F
where
    F: Fn(&SpotTrace<'_>) -> bool + Sync,
{
    fn passes(&self, trace: &SpotTrace<'_>) -> bool {
        self(trace)
    }
}

/// Every spot passes.
#[derive(Copy, Clone, Debug, Default)]
pub struct AcceptAll;

impl ThresholdPolicy for AcceptAll {
    fn passes(&self, _trace: &SpotTrace<'_>) -> bool {
        true
    }
}

/// Magnitude and distinctness requirements applied to every round.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct QualityThresholds {
    /// Minimum intensity of the selected channel.
    pub min_intensity: Option<f32>,

    /// Minimum ratio of the selected intensity to the L2 norm of the round's
    /// channel intensities. 1.0 means no signal in any other channel.
    pub min_distinctness: Option<f32>,
}

impl ThresholdPolicy for QualityThresholds {
    fn passes(&self, trace: &SpotTrace<'_>) -> bool {
        if let Some(min_intensity) = self.min_intensity {
            if !trace.max_intensities.iter().all(|&v| v >= min_intensity) {
                return false;
            }
        }

        if let Some(min_distinctness) = self.min_distinctness {
            let distinct = trace
                .intensities
                .outer_iter()
                .zip(trace.max_intensities)
                .all(|(round, &max)| {
                    let norm = round.iter().map(|v| v * v).sum::<f32>().sqrt();
                    norm > 0.0 && max / norm >= min_distinctness
                });
            if !distinct {
                return false;
            }
        }

        true
    }
}

/// Passes only if every inner policy passes.
pub struct AllOf(pub Vec<Box<dyn ThresholdPolicy>>);

impl ThresholdPolicy for AllOf {
    fn passes(&self, trace: &SpotTrace<'_>) -> bool {
        self.0.iter().all(|policy| policy.passes(trace))
    }
}

// Channel with the greatest intensity; ties and NaNs resolve to the lowest
// channel.
fn argmax_channel(round: ArrayView1<f32>) -> (u8, f32) {
    let mut best = 0;
    let mut best_value = round.first().copied().unwrap_or(f32::NAN);
    for (c, &v) in round.iter().enumerate().skip(1) {
        if v > best_value || (best_value.is_nan() && !v.is_nan()) {
            best = c;
            best_value = v;
        }
    }
    (best as u8, best_value)
}

/// An intensity table after decoding. Holds every spot of the input table.
#[derive(Clone, Debug)]
pub struct DecodedIntensityTable {
    table: IntensityTable,
    target_names: Vec<String>,
    codes: Array2<u8>,
    max_intensities: Array2<f32>,
    targets: Vec<Option<TargetIndex>>,
    passes_thresholds: Vec<bool>,
}

impl Codebook {
    /// Decode each spot by taking, in every round, the channel with maximum
    /// intensity and looking the resulting code up in the codebook.
    ///
    /// Fails with `ShapeMismatch` before decoding anything if the table's
    /// rounds and channels do not match the codebook. Spots whose code is not
    /// in the codebook get no target; whether a spot passes is decided by
    /// `policy` alone.
    pub fn decode_per_round_max(
        &self,
        table: IntensityTable,
        policy: &dyn ThresholdPolicy,
    ) -> Result<DecodedIntensityTable> {
        if table.nrounds() != self.nrounds() || table.nchannels() != self.nchannels() {
            return Err(IssError::ShapeMismatch {
                table_rounds: table.nrounds(),
                table_channels: table.nchannels(),
                codebook_rounds: self.nrounds(),
                codebook_channels: self.nchannels(),
            });
        }

        let nspots = table.nspots();
        let nrounds = table.nrounds();

        let decoded: Vec<(Vec<u8>, Vec<f32>, Option<TargetIndex>, bool)> = table
            .intensities()
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|trace| {
                let (max_channels, max_intensities): (Vec<u8>, Vec<f32>) =
                    trace.outer_iter().map(argmax_channel).unzip();
                let target = self.lookup_index(&max_channels);
                let passes = policy.passes(&SpotTrace {
                    intensities: trace.view(),
                    max_channels: &max_channels,
                    max_intensities: &max_intensities,
                });
                (max_channels, max_intensities, target, passes)
            })
            .collect();

        let mut codes = Array2::zeros((nspots, nrounds));
        let mut max_intensities = Array2::zeros((nspots, nrounds));
        let mut targets = Vec::with_capacity(nspots);
        let mut passes_thresholds = Vec::with_capacity(nspots);
        for (i, (code, maxima, target, passes)) in decoded.into_iter().enumerate() {
            codes.row_mut(i).assign(&ArrayView1::from(&code));
            max_intensities.row_mut(i).assign(&ArrayView1::from(&maxima));
            targets.push(target);
            passes_thresholds.push(passes);
        }

        let decoded = DecodedIntensityTable {
            table,
            target_names: self.targets().to_vec(),
            codes,
            max_intensities,
            targets,
            passes_thresholds,
        };

        info!(
            "Decoded {} spots: {} matched a codeword, {} pass thresholds",
            decoded.len(),
            decoded.nmatched(),
            decoded.npassing()
        );

        Ok(decoded)
    }
}

impl DecodedIntensityTable {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn table(&self) -> &IntensityTable {
        &self.table
    }

    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    /// Decoded code of each spot, shape (spots, rounds).
    pub fn codes(&self) -> ArrayView2<'_, u8> {
        self.codes.view()
    }

    pub fn code(&self, spot: usize) -> ArrayView1<'_, u8> {
        self.codes.row(spot)
    }

    /// Selected-channel intensity of each spot, shape (spots, rounds).
    pub fn max_intensities(&self) -> ArrayView2<'_, f32> {
        self.max_intensities.view()
    }

    pub fn target_index(&self, spot: usize) -> Option<TargetIndex> {
        self.targets[spot]
    }

    pub fn target(&self, spot: usize) -> Option<&str> {
        self.targets[spot].map(|t| self.target_names[t as usize].as_str())
    }

    /// Target name, or `NO_MATCH_TARGET` for spots without a codebook match.
    pub fn target_label(&self, spot: usize) -> &str {
        self.target(spot).unwrap_or(NO_MATCH_TARGET)
    }

    pub fn passes_thresholds(&self, spot: usize) -> bool {
        self.passes_thresholds[spot]
    }

    pub fn nmatched(&self) -> usize {
        self.targets.iter().filter(|t| t.is_some()).count()
    }

    pub fn npassing(&self) -> usize {
        self.passes_thresholds.iter().filter(|&&p| p).count()
    }

    /// Number of spots per decoded target, most frequent first (ties by name).
    /// Spots without a target are not counted.
    pub fn target_counts(&self, passing_only: bool) -> Vec<(String, usize)> {
        let mut counts: HashMap<TargetIndex, usize> = HashMap::new();
        for (target, &passes) in self.targets.iter().zip(&self.passes_thresholds) {
            if let Some(target) = target {
                if passes || !passing_only {
                    *counts.entry(*target).or_insert(0) += 1;
                }
            }
        }

        counts
            .into_iter()
            .map(|(t, count)| (self.target_names[t as usize].clone(), count))
            .sorted_by(|(a_name, a), (b_name, b)| b.cmp(a).then_with(|| a_name.cmp(b_name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intensity::SpotPosition;
    use ndarray::Array3;
    use rand::Rng;

    fn iss_codebook() -> Codebook {
        let mut codebook = Codebook::new(4, 4).unwrap();
        codebook.add(vec![2, 0, 1, 3], "GENE_A").unwrap();
        codebook.add(vec![0, 1, 2, 3], "GENE_B").unwrap();
        codebook
    }

    fn table_from(intensities: Array3<f32>) -> IntensityTable {
        let (nspots, nrounds, nchannels) = intensities.dim();
        let positions = (0..nspots)
            .map(|i| SpotPosition {
                y: i as f32,
                x: i as f32,
                z: 0.0,
                radius: 1.0,
            })
            .collect();
        IntensityTable::new(
            positions,
            (0..nrounds).collect(),
            (0..nchannels).collect(),
            intensities,
        )
        .unwrap()
    }

    // One spot whose maximum in round r sits at channel code[r].
    fn one_hot_trace(code: &[usize], nchannels: usize, high: f32, low: f32) -> Array2<f32> {
        let mut trace = Array2::from_elem((code.len(), nchannels), low);
        for (r, &c) in code.iter().enumerate() {
            trace[[r, c]] = high;
        }
        trace
    }

    fn stack_traces(traces: &[Array2<f32>]) -> Array3<f32> {
        let views: Vec<_> = traces.iter().map(|t| t.view()).collect();
        ndarray::stack(Axis(0), &views).unwrap()
    }

    #[test]
    fn test_decode_known_code() {
        let table = table_from(stack_traces(&[one_hot_trace(&[2, 0, 1, 3], 4, 0.9, 0.1)]));
        let decoded = iss_codebook().decode_per_round_max(table, &AcceptAll).unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.code(0).to_vec(), vec![2, 0, 1, 3]);
        assert_eq!(decoded.target(0), Some("GENE_A"));
        assert_eq!(decoded.target_label(0), "GENE_A");
        assert!(decoded.passes_thresholds(0));
        assert_eq!(decoded.max_intensities().row(0).to_vec(), vec![0.9; 4]);
    }

    #[test]
    fn test_tie_breaks_to_lowest_channel() {
        let mut trace = Array2::zeros((4, 4));
        trace[[0, 1]] = 0.5;
        trace[[0, 3]] = 0.5;
        trace[[1, 1]] = 0.7;
        trace[[2, 2]] = 0.7;
        trace[[3, 3]] = 0.7;

        for _ in 0..10 {
            let table = table_from(stack_traces(&[trace.clone(), trace.clone()]));
            let decoded = iss_codebook().decode_per_round_max(table, &AcceptAll).unwrap();
            for spot in 0..2 {
                assert_eq!(decoded.code(spot)[0], 1);
                assert_eq!(decoded.code(spot).to_vec(), vec![1, 1, 2, 3]);
            }
        }
    }

    #[test]
    fn test_all_equal_round_selects_channel_zero() {
        let mut trace = Array2::from_elem((4, 4), 0.25);
        trace[[1, 1]] = 1.0;
        trace[[2, 2]] = 1.0;
        trace[[3, 3]] = 1.0;
        let table = table_from(stack_traces(&[trace]));
        let decoded = iss_codebook().decode_per_round_max(table, &AcceptAll).unwrap();
        assert_eq!(decoded.target(0), Some("GENE_B"));
    }

    #[test]
    fn test_nan_never_wins() {
        let mut trace = Array2::zeros((4, 4));
        trace[[0, 0]] = f32::NAN;
        trace[[0, 2]] = 0.4;
        trace[[1, 0]] = 0.4;
        trace[[2, 1]] = 0.4;
        trace[[3, 3]] = 0.4;
        let table = table_from(stack_traces(&[trace]));
        let decoded = iss_codebook().decode_per_round_max(table, &AcceptAll).unwrap();
        assert_eq!(decoded.target(0), Some("GENE_A"));
    }

    #[test]
    fn test_unmatched_code_keeps_row() {
        let table = table_from(stack_traces(&[
            one_hot_trace(&[3, 3, 3, 3], 4, 1.0, 0.0),
            one_hot_trace(&[0, 1, 2, 3], 4, 1.0, 0.0),
            one_hot_trace(&[1, 1, 1, 1], 4, 1.0, 0.0),
        ]));
        let nrows = table.nspots();
        let decoded = iss_codebook().decode_per_round_max(table, &AcceptAll).unwrap();

        assert_eq!(decoded.len(), nrows);
        assert_eq!(decoded.target(0), None);
        assert_eq!(decoded.target_label(0), NO_MATCH_TARGET);
        assert_eq!(decoded.target(1), Some("GENE_B"));
        assert_eq!(decoded.target(2), None);
        assert_eq!(decoded.nmatched(), 1);
        assert_eq!(decoded.table().nspots(), nrows);
    }

    #[test]
    fn test_shape_mismatch() {
        let table = table_from(Array3::zeros((5, 3, 4)));
        match iss_codebook().decode_per_round_max(table, &AcceptAll) {
            Err(IssError::ShapeMismatch {
                table_rounds,
                codebook_rounds,
                ..
            }) => assert_eq!((table_rounds, codebook_rounds), (3, 4)),
            other => panic!("expected ShapeMismatch, got {:?}", other.map(|d| d.len())),
        }

        let table = table_from(Array3::zeros((5, 4, 3)));
        assert!(matches!(
            iss_codebook().decode_per_round_max(table, &AcceptAll),
            Err(IssError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_quality_thresholds() {
        let table = table_from(stack_traces(&[
            one_hot_trace(&[2, 0, 1, 3], 4, 0.9, 0.0),
            one_hot_trace(&[2, 0, 1, 3], 4, 0.05, 0.0),
            one_hot_trace(&[2, 0, 1, 3], 4, 0.9, 0.8),
            Array2::zeros((4, 4)),
        ]));

        let policy = QualityThresholds {
            min_intensity: Some(0.1),
            min_distinctness: Some(0.8),
        };
        let decoded = iss_codebook().decode_per_round_max(table, &policy).unwrap();

        assert!(decoded.passes_thresholds(0));
        assert!(!decoded.passes_thresholds(1));
        // 0.9 / sqrt(0.81 + 3 * 0.64) ~= 0.54
        assert!(!decoded.passes_thresholds(2));
        assert!(!decoded.passes_thresholds(3));
        // Failing spots keep their target.
        assert_eq!(decoded.target(2), Some("GENE_A"));
        assert_eq!(decoded.npassing(), 1);
    }

    #[test]
    fn test_closure_and_combined_policies() {
        let table = table_from(stack_traces(&[
            one_hot_trace(&[2, 0, 1, 3], 4, 0.9, 0.0),
            one_hot_trace(&[0, 1, 2, 3], 4, 0.3, 0.0),
        ]));

        let first_round_bright = |trace: &SpotTrace<'_>| trace.max_intensities[0] > 0.5;
        let decoded = iss_codebook()
            .decode_per_round_max(table.clone(), &first_round_bright)
            .unwrap();
        assert!(decoded.passes_thresholds(0));
        assert!(!decoded.passes_thresholds(1));

        let never_channel_zero = |trace: &SpotTrace<'_>| !trace.max_channels.contains(&0);
        let policies: Vec<Box<dyn ThresholdPolicy>> = vec![
            Box::new(AcceptAll) as Box<dyn ThresholdPolicy>,
            Box::new(never_channel_zero) as Box<dyn ThresholdPolicy>,
        ];
        let combined = AllOf(policies);
        let decoded = iss_codebook().decode_per_round_max(table, &combined).unwrap();
        assert!(!decoded.passes_thresholds(0));
        assert!(!decoded.passes_thresholds(1));
    }

    #[test]
    fn test_target_counts() {
        let table = table_from(stack_traces(&[
            one_hot_trace(&[2, 0, 1, 3], 4, 0.9, 0.0),
            one_hot_trace(&[0, 1, 2, 3], 4, 0.9, 0.0),
            one_hot_trace(&[0, 1, 2, 3], 4, 0.9, 0.0),
            one_hot_trace(&[0, 1, 2, 3], 4, 0.05, 0.0),
            one_hot_trace(&[3, 3, 3, 3], 4, 0.9, 0.0),
        ]));
        let policy = QualityThresholds {
            min_intensity: Some(0.1),
            min_distinctness: None,
        };
        let decoded = iss_codebook().decode_per_round_max(table, &policy).unwrap();

        assert_eq!(
            decoded.target_counts(true),
            vec![("GENE_B".to_string(), 2), ("GENE_A".to_string(), 1)]
        );
        assert_eq!(
            decoded.target_counts(false),
            vec![("GENE_B".to_string(), 3), ("GENE_A".to_string(), 1)]
        );
    }

    #[test]
    fn test_parallel_decode_matches_serial_argmax() {
        let mut rng = rand::rng();
        let nspots = 500;
        let intensities = Array3::from_shape_fn((nspots, 4, 4), |_| {
            // Coarse values so ties are common.
            rng.random_range(0..4) as f32 / 4.0
        });
        let table = table_from(intensities.clone());
        let decoded = iss_codebook().decode_per_round_max(table, &AcceptAll).unwrap();

        for i in 0..nspots {
            for r in 0..4 {
                let round = intensities.slice(ndarray::s![i, r, ..]);
                let max = round.iter().cloned().fold(f32::MIN, f32::max);
                let expected = round.iter().position(|&v| v == max).unwrap();
                assert_eq!(decoded.code(i)[r] as usize, expected);
            }
        }
    }
}
