// Axis identifiers and the typed index mappings built on them. Callers never
// pass (round, ch) as a bare positional tuple; they build an `AxisIndices`
// and let `RoundChannelKey` pull the two axes out in a fixed order.

use std::fmt;

use crate::error::{IssError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    Round,
    Ch,
    ZPlane,
}

impl Axis {
    pub fn name(&self) -> &'static str {
        match self {
            Axis::Round => "r",
            Axis::Ch => "c",
            Axis::ZPlane => "z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Order in which axes are read when normalizing an index mapping into a key.
pub const ROUND_CH_AXES: [Axis; 2] = [Axis::Round, Axis::Ch];

/// A mapping from axis to index value.
///
/// Any subset of the recognized axes may be set. Setting an axis twice keeps
/// the last value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AxisIndices {
    round: Option<usize>,
    ch: Option<usize>,
    zplane: Option<usize>,
}

impl AxisIndices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: Axis, value: usize) -> Self {
        self.set(axis, value);
        self
    }

    pub fn set(&mut self, axis: Axis, value: usize) {
        let slot = match axis {
            Axis::Round => &mut self.round,
            Axis::Ch => &mut self.ch,
            Axis::ZPlane => &mut self.zplane,
        };
        *slot = Some(value);
    }

    pub fn get(&self, axis: Axis) -> Option<usize> {
        match axis {
            Axis::Round => self.round,
            Axis::Ch => self.ch,
            Axis::ZPlane => self.zplane,
        }
    }

    /// Value for `axis`, or `MissingAxis` if it was never set.
    pub fn require(&self, axis: Axis) -> Result<usize> {
        self.get(axis).ok_or(IssError::MissingAxis { axis })
    }
}

impl FromIterator<(Axis, usize)> for AxisIndices {
    fn from_iter<I: IntoIterator<Item = (Axis, usize)>>(iter: I) -> Self {
        let mut indices = AxisIndices::new();
        for (axis, value) in iter {
            indices.set(axis, value);
        }
        indices
    }
}

impl<const N: usize> From<[(Axis, usize); N]> for AxisIndices {
    fn from(pairs: [(Axis, usize); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Canonical key for one spot-detection pass: always (round, channel).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundChannelKey {
    pub round: usize,
    pub ch: usize,
}

impl RoundChannelKey {
    pub fn new(round: usize, ch: usize) -> Self {
        RoundChannelKey { round, ch }
    }

    pub fn indices(&self) -> AxisIndices {
        AxisIndices::new()
            .with(Axis::Round, self.round)
            .with(Axis::Ch, self.ch)
    }
}

impl TryFrom<&AxisIndices> for RoundChannelKey {
    type Error = IssError;

    fn try_from(indices: &AxisIndices) -> Result<Self> {
        let [round, ch] = ROUND_CH_AXES;
        Ok(RoundChannelKey {
            round: indices.require(round)?,
            ch: indices.require(ch)?,
        })
    }
}

impl fmt::Display for RoundChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(r={}, c={})", self.round, self.ch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_assembly_order() {
        let a = AxisIndices::from([(Axis::Ch, 3), (Axis::Round, 1)]);
        let b = AxisIndices::new().with(Axis::Round, 1).with(Axis::Ch, 3);
        let ka = RoundChannelKey::try_from(&a).unwrap();
        let kb = RoundChannelKey::try_from(&b).unwrap();
        assert_eq!(ka, kb);
        assert_eq!(ka, RoundChannelKey::new(1, 3));
    }

    #[test]
    fn test_key_ignores_zplane() {
        let indices = AxisIndices::from([(Axis::Round, 2), (Axis::Ch, 0), (Axis::ZPlane, 7)]);
        let key = RoundChannelKey::try_from(&indices).unwrap();
        assert_eq!(key, RoundChannelKey::new(2, 0));
    }

    #[test]
    fn test_missing_axis() {
        let indices = AxisIndices::from([(Axis::Round, 2), (Axis::ZPlane, 0)]);
        match RoundChannelKey::try_from(&indices) {
            Err(IssError::MissingAxis { axis }) => assert_eq!(axis, Axis::Ch),
            other => panic!("expected MissingAxis, got {:?}", other),
        }

        let indices = AxisIndices::from([(Axis::Ch, 2)]);
        match RoundChannelKey::try_from(&indices) {
            Err(IssError::MissingAxis { axis }) => assert_eq!(axis, Axis::Round),
            other => panic!("expected MissingAxis, got {:?}", other),
        }
    }

    #[test]
    fn test_last_value_wins() {
        let indices: AxisIndices = vec![(Axis::Round, 0), (Axis::Round, 4), (Axis::Ch, 1)]
            .into_iter()
            .collect();
        assert_eq!(indices.get(Axis::Round), Some(4));
    }

    #[test]
    fn test_key_ordering_is_round_major() {
        let mut keys = vec![
            RoundChannelKey::new(1, 0),
            RoundChannelKey::new(0, 3),
            RoundChannelKey::new(0, 1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                RoundChannelKey::new(0, 1),
                RoundChannelKey::new(0, 3),
                RoundChannelKey::new(1, 0),
            ]
        );
    }
}
