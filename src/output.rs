use arrow::array::{
    ArrayRef, BooleanArray, Float32Array, LargeStringArray, RecordBatch, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::csv;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use ndarray::s;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression::ZSTD, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use crate::codebook::code_string;
use crate::decode::DecodedIntensityTable;
use crate::error::{IssError, Result};
use crate::expression::ExpressionMatrix;
use crate::schemas::{
    decoded_spots_schema, expression_matrix_schema, target_counts_schema, OutputFormat,
};

/// Resolve `Infer` from the filename suffix.
pub fn determine_format(filename: &str, fmt: OutputFormat) -> Result<OutputFormat> {
    if fmt != OutputFormat::Infer {
        return Ok(fmt);
    }

    if filename.ends_with(".csv.gz") {
        Ok(OutputFormat::CsvGz)
    } else if filename.ends_with(".csv") {
        Ok(OutputFormat::Csv)
    } else if filename.ends_with(".parquet") {
        Ok(OutputFormat::Parquet)
    } else {
        Err(IssError::UnknownFormat(filename.to_string()))
    }
}

/// Write a record batch as csv, gzipped csv or parquet. `fmt` must already be
/// resolved by `determine_format`.
pub fn write_table(filename: &str, fmt: OutputFormat, batch: &RecordBatch) -> Result<()> {
    let file = File::create(filename)?;

    match fmt {
        OutputFormat::Csv => write_table_csv(file, batch)?,
        OutputFormat::CsvGz => {
            let mut encoder = GzEncoder::new(file, Compression::default());
            write_table_csv(&mut encoder, batch)?;
            encoder.finish()?;
        }
        OutputFormat::Parquet => write_table_parquet(file, batch)?,
        OutputFormat::Infer => return Err(IssError::UnknownFormat(filename.to_string())),
    }

    info!("Wrote {} rows to {}", batch.num_rows(), filename);
    Ok(())
}

fn write_table_csv<W: Write>(output: W, batch: &RecordBatch) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().with_header(true).build(output);
    writer.write(batch)?;
    Ok(())
}

fn write_table_parquet(output: File, batch: &RecordBatch) -> Result<()> {
    let props = WriterProperties::builder()
        .set_compression(ZSTD(ZstdLevel::try_new(3)?))
        .build();

    let mut writer = ArrowWriter::try_new(output, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn string_array<I, S>(fmt: OutputFormat, values: I) -> ArrayRef
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    match fmt {
        OutputFormat::Parquet => Arc::new(LargeStringArray::from_iter_values(values)),
        _ => Arc::new(StringArray::from_iter_values(values)),
    }
}

/// Every decoded spot, matched or not, with its code, target, pass flag and
/// full intensity trace.
pub fn write_decoded_spots(filename: &str, fmt: OutputFormat, decoded: &DecodedIntensityTable) -> Result<()> {
    let fmt = determine_format(filename, fmt)?;
    let table = decoded.table();
    let positions = table.positions();
    let nchannels = table.nchannels();
    let schema = decoded_spots_schema(fmt, table.round_labels(), table.ch_labels());

    // Tables merged without ids are numbered by row.
    let spot_ids: UInt64Array = match table.spot_ids() {
        Some(ids) => ids.iter().copied().collect(),
        None => (0..decoded.len() as u64).collect(),
    };

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(spot_ids),
        Arc::new(positions.iter().map(|p| p.y).collect::<Float32Array>()),
        Arc::new(positions.iter().map(|p| p.x).collect::<Float32Array>()),
        Arc::new(positions.iter().map(|p| p.z).collect::<Float32Array>()),
        Arc::new(positions.iter().map(|p| p.radius).collect::<Float32Array>()),
        string_array(
            fmt,
            decoded
                .codes()
                .rows()
                .into_iter()
                .map(|code| code_string(&code.to_vec(), nchannels)),
        ),
        string_array(fmt, (0..decoded.len()).map(|i| decoded.target_label(i))),
        Arc::new(
            (0..decoded.len())
                .map(|i| Some(decoded.passes_thresholds(i)))
                .collect::<BooleanArray>(),
        ),
    ];

    let intensities = table.intensities();
    for r in 0..table.nrounds() {
        for c in 0..nchannels {
            columns.push(Arc::new(
                intensities
                    .slice(s![.., r, c])
                    .iter()
                    .copied()
                    .collect::<Float32Array>(),
            ));
        }
    }

    let batch = RecordBatch::try_new(Arc::new(schema), columns)?;
    write_table(filename, fmt, &batch)
}

pub fn write_target_counts(filename: &str, fmt: OutputFormat, counts: &[(String, usize)]) -> Result<()> {
    let fmt = determine_format(filename, fmt)?;
    let columns: Vec<ArrayRef> = vec![
        string_array(fmt, counts.iter().map(|(target, _)| target)),
        Arc::new(counts.iter().map(|(_, count)| *count as u64).collect::<UInt64Array>()),
    ];

    let batch = RecordBatch::try_new(Arc::new(target_counts_schema(fmt)), columns)?;
    write_table(filename, fmt, &batch)
}

pub fn write_expression_matrix(filename: &str, fmt: OutputFormat, matrix: &ExpressionMatrix) -> Result<()> {
    let fmt = determine_format(filename, fmt)?;
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(matrix.ntargets() + 1);
    columns.push(Arc::new(matrix.cells().iter().copied().collect::<UInt32Array>()));
    for col in matrix.counts().columns() {
        columns.push(Arc::new(col.iter().copied().collect::<UInt32Array>()));
    }

    let batch = RecordBatch::try_new(Arc::new(expression_matrix_schema(matrix.targets())), columns)?;
    write_table(filename, fmt, &batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::CellAssignments;
    use crate::codebook::Codebook;
    use crate::decode::AcceptAll;
    use crate::intensity::{IntensityTable, SpotPosition};
    use flate2::read::GzDecoder;
    use ndarray::Array3;
    use std::io::Read;

    fn decoded() -> DecodedIntensityTable {
        decode(table())
    }

    fn decode(table: IntensityTable) -> DecodedIntensityTable {
        let mut codebook = Codebook::new(2, 2).unwrap();
        codebook.add(vec![0, 1], "GENE_A").unwrap();
        codebook.decode_per_round_max(table, &AcceptAll).unwrap()
    }

    fn table() -> IntensityTable {
        let positions = vec![
            SpotPosition {
                y: 1.0,
                x: 2.0,
                z: 0.0,
                radius: 1.5,
            },
            SpotPosition {
                y: 3.0,
                x: 4.0,
                z: 0.0,
                radius: 1.5,
            },
        ];
        let intensities = Array3::from_shape_vec(
            (2, 2, 2),
            vec![0.9, 0.1, 0.2, 0.8, 0.5, 0.6, 0.7, 0.3],
        )
        .unwrap();
        IntensityTable::new(positions, vec![0, 1], vec![0, 1], intensities).unwrap()
    }

    #[test]
    fn test_determine_format() {
        assert_eq!(
            determine_format("out.csv.gz", OutputFormat::Infer).unwrap(),
            OutputFormat::CsvGz
        );
        assert_eq!(determine_format("out.csv", OutputFormat::Infer).unwrap(), OutputFormat::Csv);
        assert_eq!(
            determine_format("out.parquet", OutputFormat::Infer).unwrap(),
            OutputFormat::Parquet
        );
        assert_eq!(determine_format("out.txt", OutputFormat::Csv).unwrap(), OutputFormat::Csv);
        assert!(matches!(
            determine_format("out.txt", OutputFormat::Infer),
            Err(IssError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_write_decoded_spots_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spots.csv");
        let path = path.to_str().unwrap();
        write_decoded_spots(path, OutputFormat::Infer, &decoded()).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "spot_id,y,x,z,radius,code,target,passes_thresholds,\
             intensity_r0_c0,intensity_r0_c1,intensity_r1_c0,intensity_r1_c1"
        );
        assert!(lines[1].starts_with("0,"));
        assert!(lines[1].contains(",01,GENE_A,true,"));
        assert!(lines[2].contains(",10,nan,true,"));
    }

    #[test]
    fn test_write_decoded_spots_keeps_spot_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spots.csv");
        let path = path.to_str().unwrap();
        let decoded = decode(table().with_spot_ids(vec![10, 20]).unwrap());
        write_decoded_spots(path, OutputFormat::Csv, &decoded).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let ids: Vec<&str> = content
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap())
            .collect();
        assert_eq!(ids, vec!["10", "20"]);
    }

    #[test]
    fn test_write_target_counts_gz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.csv.gz");
        let path = path.to_str().unwrap();
        write_target_counts(path, OutputFormat::Infer, &decoded().target_counts(true)).unwrap();

        let mut content = String::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "target,count\nGENE_A,1\n");
    }

    #[test]
    fn test_write_expression_matrix() {
        let decoded = decoded();
        let assignments = CellAssignments::new(vec![5, 5]);
        let matrix = ExpressionMatrix::from_decoded(&decoded, &assignments, None).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("expression.csv");
        write_expression_matrix(csv_path.to_str().unwrap(), OutputFormat::Csv, &matrix).unwrap();
        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(content, "cell,GENE_A\n5,1\n");

        let parquet_path = dir.path().join("expression.parquet");
        write_expression_matrix(parquet_path.to_str().unwrap(), OutputFormat::Infer, &matrix).unwrap();
        let file = File::open(&parquet_path).unwrap();
        let reader = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let nrows: usize = reader.map(|batch| batch.unwrap().num_rows()).sum();
        assert_eq!(nrows, 1);
    }
}
