use std::collections::BTreeMap;

use itertools::Itertools;
use log::debug;

use crate::axes::{AxisIndices, RoundChannelKey};
use crate::error::{IssError, Result};

/// A single detected spot and the intensity measured for it in one tile.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Spot {
    pub y: f32,
    pub x: f32,
    pub z: f32,
    pub radius: f32,
    pub intensity: f32,
}

impl Spot {
    pub fn new(y: f32, x: f32, z: f32, radius: f32, intensity: f32) -> Self {
        Spot {
            y,
            x,
            z,
            radius,
            intensity,
        }
    }

    pub fn with_intensity(&self, intensity: f32) -> Self {
        Spot { intensity, ..*self }
    }
}

/// Spots found in one (round, channel) tile. Immutable once constructed.
///
/// Spots may carry ids, which identify the same physical spot across tiles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpotAttributes {
    spots: Vec<Spot>,
    ids: Option<Vec<u64>>,
}

impl SpotAttributes {
    pub fn new(spots: Vec<Spot>) -> Self {
        SpotAttributes { spots, ids: None }
    }

    /// Attach one id per spot.
    pub fn with_ids(self, ids: Vec<u64>) -> Result<Self> {
        if ids.len() != self.spots.len() {
            return Err(IssError::ColumnLength {
                column: "spot_id",
                expected: self.spots.len(),
                found: ids.len(),
            });
        }
        Ok(SpotAttributes {
            spots: self.spots,
            ids: Some(ids),
        })
    }

    /// Build from parallel columns, which must all have the same length.
    pub fn from_columns(
        y: &[f32],
        x: &[f32],
        z: &[f32],
        radius: &[f32],
        intensity: &[f32],
    ) -> Result<Self> {
        let n = y.len();
        for (column, len) in [
            ("x", x.len()),
            ("z", z.len()),
            ("radius", radius.len()),
            ("intensity", intensity.len()),
        ] {
            if len != n {
                return Err(IssError::ColumnLength {
                    column,
                    expected: n,
                    found: len,
                });
            }
        }

        let spots = itertools::izip!(y, x, z, radius, intensity)
            .map(|(&y, &x, &z, &radius, &intensity)| Spot::new(y, x, z, radius, intensity))
            .collect();
        Ok(SpotAttributes { spots, ids: None })
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    pub fn ids(&self) -> Option<&[u64]> {
        self.ids.as_deref()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Spot> {
        self.spots.iter()
    }

    pub fn intensities(&self) -> impl Iterator<Item = f32> + '_ {
        self.spots.iter().map(|s| s.intensity)
    }
}

impl FromIterator<Spot> for SpotAttributes {
    fn from_iter<I: IntoIterator<Item = Spot>>(iter: I) -> Self {
        SpotAttributes {
            spots: iter.into_iter().collect(),
            ids: None,
        }
    }
}

/// Results of a spot finding method: one `SpotAttributes` per (round, ch).
///
/// Entries are keyed by `RoundChannelKey`, so every index mapping passed in is
/// reduced to its round and channel (any z-plane is ignored) and a second
/// insert for the same pair replaces the first. Iteration follows key order.
#[derive(Clone, Debug, Default)]
pub struct SpotFindingResults {
    results: BTreeMap<RoundChannelKey, SpotAttributes>,
}

impl SpotFindingResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(indices, spots)` pairs, inserted in order. Later pairs for
    /// the same (round, ch) replace earlier ones.
    pub fn from_batch<I>(spot_attributes_list: I) -> Result<Self>
    where
        I: IntoIterator<Item = (AxisIndices, SpotAttributes)>,
    {
        let mut results = SpotFindingResults::new();
        for (indices, spots) in spot_attributes_list {
            results.insert(&indices, spots)?;
        }
        Ok(results)
    }

    pub fn insert(&mut self, indices: &AxisIndices, spots: SpotAttributes) -> Result<()> {
        let key = RoundChannelKey::try_from(indices)?;
        self.insert_key(key, spots);
        Ok(())
    }

    pub fn insert_key(&mut self, key: RoundChannelKey, spots: SpotAttributes) {
        if self.results.insert(key, spots).is_some() {
            debug!("Replaced spots for {}", key);
        }
    }

    pub fn get(&self, indices: &AxisIndices) -> Result<&SpotAttributes> {
        let key = RoundChannelKey::try_from(indices)?;
        self.get_key(&key)
    }

    pub fn get_key(&self, key: &RoundChannelKey) -> Result<&SpotAttributes> {
        self.results.get(key).ok_or(IssError::KeyNotFound {
            round: key.round,
            ch: key.ch,
        })
    }

    pub fn contains(&self, indices: &AxisIndices) -> Result<bool> {
        let key = RoundChannelKey::try_from(indices)?;
        Ok(self.results.contains_key(&key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &RoundChannelKey> + '_ {
        self.results.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &SpotAttributes> + '_ {
        self.results.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RoundChannelKey, &SpotAttributes)> + '_ {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn total_spots(&self) -> usize {
        self.results.values().map(|spots| spots.len()).sum()
    }

    pub fn round_labels(&self) -> Vec<usize> {
        self.results.keys().map(|k| k.round).sorted().dedup().collect()
    }

    pub fn ch_labels(&self) -> Vec<usize> {
        self.results.keys().map(|k| k.ch).sorted().dedup().collect()
    }
}
