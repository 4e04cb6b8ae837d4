// Schemas of the tables written by output.rs.

use arrow::datatypes::{DataType, Field, Schema};
use clap::ValueEnum;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    Infer,
    Csv,
    CsvGz,
    Parquet,
}

pub fn large_utf8_if_parquet(fmt: OutputFormat) -> DataType {
    match fmt {
        OutputFormat::Parquet => DataType::LargeUtf8,
        _ => DataType::Utf8,
    }
}

pub fn intensity_column_name(round: usize, ch: usize) -> String {
    format!("intensity_r{}_c{}", round, ch)
}

/// One row per decoded spot, followed by one intensity column per
/// (round, channel) in round-major order.
pub fn decoded_spots_schema(fmt: OutputFormat, round_labels: &[usize], ch_labels: &[usize]) -> Schema {
    let mut fields = vec![
        Field::new("spot_id", DataType::UInt64, false),
        Field::new("y", DataType::Float32, false),
        Field::new("x", DataType::Float32, false),
        Field::new("z", DataType::Float32, false),
        Field::new("radius", DataType::Float32, false),
        Field::new("code", large_utf8_if_parquet(fmt), false),
        Field::new("target", large_utf8_if_parquet(fmt), false),
        Field::new("passes_thresholds", DataType::Boolean, false),
    ];
    for &round in round_labels {
        for &ch in ch_labels {
            fields.push(Field::new(intensity_column_name(round, ch), DataType::Float32, false));
        }
    }
    Schema::new(fields)
}

pub fn target_counts_schema(fmt: OutputFormat) -> Schema {
    Schema::new(vec![
        Field::new("target", large_utf8_if_parquet(fmt), false),
        Field::new("count", DataType::UInt64, false),
    ])
}

pub fn expression_matrix_schema(targets: &[String]) -> Schema {
    let mut fields = vec![Field::new("cell", DataType::UInt32, false)];
    fields.extend(
        targets
            .iter()
            .map(|name| Field::new(name, DataType::UInt32, false)),
    );
    Schema::new(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoded_spots_schema_columns() {
        let schema = decoded_spots_schema(OutputFormat::Csv, &[0, 2], &[1, 3]);
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names[5..8], ["code", "target", "passes_thresholds"]);
        assert_eq!(
            names[8..],
            ["intensity_r0_c1", "intensity_r0_c3", "intensity_r2_c1", "intensity_r2_c3"]
        );
        assert_eq!(schema.field(6).data_type(), &DataType::Utf8);

        let schema = decoded_spots_schema(OutputFormat::Parquet, &[0], &[0]);
        assert_eq!(schema.field(6).data_type(), &DataType::LargeUtf8);
    }
}
