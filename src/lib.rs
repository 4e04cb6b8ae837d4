pub mod assign;
pub mod axes;
pub mod codebook;
pub mod decode;
pub mod error;
pub mod expression;
pub mod image;
pub mod input;
pub mod intensity;
pub mod output;
pub mod providers;
pub mod schemas;
pub mod spots;

pub use assign::{assign_by_label, CellAssignments, CellIndex, BACKGROUND_CELL};
pub use axes::{Axis, AxisIndices, RoundChannelKey};
pub use codebook::Codebook;
pub use decode::{AcceptAll, DecodedIntensityTable, QualityThresholds, SpotTrace, ThresholdPolicy};
pub use error::{IssError, Result};
pub use expression::ExpressionMatrix;
pub use image::{measure_spot_intensities, ImageStack, Measurement};
pub use intensity::IntensityTable;
pub use providers::{FetchedTile, TileFetcher};
pub use spots::{Spot, SpotAttributes, SpotFindingResults};
