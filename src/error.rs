use thiserror::Error;

use crate::axes::Axis;

pub type Result<T> = std::result::Result<T, IssError>;

/// Errors raised by spot aggregation, decoding, and the surrounding I/O.
///
/// Structural problems (a missing axis, an unknown key, a table that does not
/// fit the codebook) are always errors. A code that is absent from the
/// codebook is not: it is recorded per spot as a no-match target.
#[derive(Error, Debug)]
pub enum IssError {
    #[error("index mapping is missing required axis '{axis}'")]
    MissingAxis { axis: Axis },

    #[error("no spots registered for round {round}, channel {ch}")]
    KeyNotFound { round: usize, ch: usize },

    #[error(
        "intensity table has {table_rounds} rounds x {table_channels} channels, \
         codebook expects {codebook_rounds} rounds x {codebook_channels} channels"
    )]
    ShapeMismatch {
        table_rounds: usize,
        table_channels: usize,
        codebook_rounds: usize,
        codebook_channels: usize,
    },

    #[error("round {round}, channel {ch} has {found} spots, expected {expected}")]
    SpotCountMismatch {
        round: usize,
        ch: usize,
        expected: usize,
        found: usize,
    },

    #[error("round {round}, channel {ch} does not list the same spot ids as the other tiles")]
    SpotIdMismatch { round: usize, ch: usize },

    #[error("spot id {spot_id} appears more than once in round {round}, channel {ch}")]
    DuplicateSpotId { round: usize, ch: usize, spot_id: u64 },

    #[error("invalid codeword for target '{target}': {reason}")]
    InvalidCodeword { target: String, reason: String },

    #[error("code '{code}' is assigned to both '{first}' and '{second}'")]
    DuplicateCode {
        code: String,
        first: String,
        second: String,
    },

    #[error("invalid codebook: {0}")]
    InvalidCodebook(String),

    #[error("column '{column}' has {found} values, expected {expected}")]
    ColumnLength {
        column: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("image format {0:?} is not supported for tile decoding")]
    UnsupportedImageFormat(crate::providers::ImageFormat),

    #[error("tile (round {round}, ch {ch}, z {z}) has shape {found:?}, expected {expected:?}")]
    TileShapeMismatch {
        round: usize,
        ch: usize,
        z: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("tile data has {found} bytes, expected {expected}")]
    TileDataLength { expected: usize, found: usize },

    #[error("{axis} index {index} is out of range (size {size})")]
    IndexOutOfRange { axis: Axis, index: usize, size: usize },

    #[error("spot {index} has a non-finite {field}")]
    NonFiniteSpot { index: usize, field: &'static str },

    #[error("spot index {index} is out of range ({nspots} spots)")]
    SpotIndexOutOfRange { index: usize, nspots: usize },

    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("unable to parse '{value}' in column '{column}' on line {line}")]
    Parse {
        column: String,
        value: String,
        line: u64,
    },

    #[error("unknown file format: {0}")]
    UnknownFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] json::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}
