// Reading long-format spot tables: one row per (spot, round, channel).

use flate2::read::GzDecoder;
use log::info;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::File;
use std::str::FromStr;

use crate::axes::RoundChannelKey;
use crate::error::{IssError, Result};
use crate::spots::{Spot, SpotAttributes, SpotFindingResults};

pub const DEFAULT_SPOT_RADIUS: f32 = 1.0;

/// Column names of a spot table.
#[derive(Clone, Debug)]
pub struct SpotTableColumns {
    pub spot_id: String,
    pub round: String,
    pub ch: String,
    pub y: String,
    pub x: String,
    pub intensity: String,
    pub z: Option<String>,
    pub radius: Option<String>,
}

impl Default for SpotTableColumns {
    fn default() -> Self {
        SpotTableColumns {
            spot_id: "spot_id".to_string(),
            round: "round".to_string(),
            ch: "ch".to_string(),
            y: "y".to_string(),
            x: "x".to_string(),
            intensity: "intensity".to_string(),
            z: Some("z".to_string()),
            radius: Some("radius".to_string()),
        }
    }
}

pub fn find_column(headers: &csv::StringRecord, column: &str) -> Result<usize> {
    headers
        .iter()
        .position(|x| x == column)
        .ok_or_else(|| IssError::MissingColumn(column.to_string()))
}

fn parse_field<F: FromStr>(row: &csv::StringRecord, col: usize, column: &str) -> Result<F> {
    let value = &row[col];
    value.trim().parse::<F>().map_err(|_| IssError::Parse {
        column: column.to_string(),
        value: value.to_string(),
        line: row.position().map(|p| p.line()).unwrap_or(0),
    })
}

/// Read a spot table (csv, or csv.gz) into per-(round, ch) spot attributes.
///
/// Within each (round, ch) spots are ordered by spot id, so tables written
/// for every tile from the same reference spots line up row for row.
/// `z` and `radius` columns are optional and default to 0 and
/// `DEFAULT_SPOT_RADIUS`.
pub fn read_spot_table(path: &str, columns: &SpotTableColumns) -> Result<SpotFindingResults> {
    let file = File::open(path)?;
    let results = if path.ends_with(".gz") {
        read_spot_table_from_reader(&mut csv::Reader::from_reader(GzDecoder::new(file)), columns)?
    } else {
        read_spot_table_from_reader(&mut csv::Reader::from_reader(file), columns)?
    };

    info!(
        "Read {} spots over {} (round, channel) tiles from {}",
        results.total_spots(),
        results.len(),
        path
    );

    Ok(results)
}

pub fn read_spot_table_from_reader<T>(
    rdr: &mut csv::Reader<T>,
    columns: &SpotTableColumns,
) -> Result<SpotFindingResults>
where
    T: std::io::Read,
{
    let headers = rdr.headers()?.clone();
    let spot_id_col = find_column(&headers, &columns.spot_id)?;
    let round_col = find_column(&headers, &columns.round)?;
    let ch_col = find_column(&headers, &columns.ch)?;
    let y_col = find_column(&headers, &columns.y)?;
    let x_col = find_column(&headers, &columns.x)?;
    let intensity_col = find_column(&headers, &columns.intensity)?;

    // Optional columns are used only when present in the header.
    let z_col = columns
        .z
        .as_deref()
        .and_then(|z| find_column(&headers, z).ok().map(|col| (col, z)));
    let radius_col = columns
        .radius
        .as_deref()
        .and_then(|radius| find_column(&headers, radius).ok().map(|col| (col, radius)));

    let mut tiles: BTreeMap<RoundChannelKey, Vec<(u64, Spot)>> = BTreeMap::new();

    for result in rdr.records() {
        let row = result?;

        let spot_id = parse_field::<u64>(&row, spot_id_col, &columns.spot_id)?;
        let round = parse_field::<usize>(&row, round_col, &columns.round)?;
        let ch = parse_field::<usize>(&row, ch_col, &columns.ch)?;
        let y = parse_field::<f32>(&row, y_col, &columns.y)?;
        let x = parse_field::<f32>(&row, x_col, &columns.x)?;
        let intensity = parse_field::<f32>(&row, intensity_col, &columns.intensity)?;
        let z = match z_col {
            Some((col, name)) => parse_field::<f32>(&row, col, name)?,
            None => 0.0,
        };
        let radius = match radius_col {
            Some((col, name)) => parse_field::<f32>(&row, col, name)?,
            None => DEFAULT_SPOT_RADIUS,
        };

        tiles
            .entry(RoundChannelKey::new(round, ch))
            .or_default()
            .push((spot_id, Spot::new(y, x, z, radius, intensity)));
    }

    let mut results = SpotFindingResults::new();
    for (key, mut spots) in tiles {
        spots.sort_by_key(|(spot_id, _)| *spot_id);
        if let Some(pair) = spots.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(IssError::DuplicateSpotId {
                round: key.round,
                ch: key.ch,
                spot_id: pair[0].0,
            });
        }

        let (ids, spots): (Vec<u64>, Vec<Spot>) = spots.into_iter().unzip();
        results.insert_key(key, SpotAttributes::new(spots).with_ids(ids)?);
    }

    Ok(results)
}

/// Read a segmentation label image stored as a headerless csv (or csv.gz)
/// grid of unsigned integers, one row per y. Label 0 is background.
pub fn read_label_image(path: &str) -> Result<Array2<u32>> {
    let file = File::open(path)?;
    let labels = if path.ends_with(".gz") {
        read_label_image_from_reader(&mut label_reader(GzDecoder::new(file)))?
    } else {
        read_label_image_from_reader(&mut label_reader(file))?
    };

    info!(
        "Read {} x {} label image from {}",
        labels.nrows(),
        labels.ncols(),
        path
    );

    Ok(labels)
}

fn label_reader<T: std::io::Read>(input: T) -> csv::Reader<T> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(input)
}

pub fn read_label_image_from_reader<T>(rdr: &mut csv::Reader<T>) -> Result<Array2<u32>>
where
    T: std::io::Read,
{
    let mut ncols = None;
    let mut nrows = 0;
    let mut labels = Vec::new();

    for result in rdr.records() {
        let row = result?;
        let expected = *ncols.get_or_insert(row.len());
        if row.len() != expected {
            return Err(IssError::ColumnLength {
                column: "labels",
                expected,
                found: row.len(),
            });
        }
        for col in 0..row.len() {
            labels.push(parse_field::<u32>(&row, col, "labels")?);
        }
        nrows += 1;
    }

    let ncols = ncols.unwrap_or(0);
    let found = labels.len();
    Array2::from_shape_vec((nrows, ncols), labels).map_err(|_| IssError::ColumnLength {
        column: "labels",
        expected: nrows * ncols,
        found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::{Axis, AxisIndices};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const TABLE: &str = "\
spot_id,round,ch,y,x,intensity
1,0,0,5.0,6.0,0.25
0,0,0,1.0,2.0,0.5
0,0,1,1.0,2.0,0.75
1,0,1,5.0,6.0,0.125
";

    fn read_str(content: &str) -> Result<SpotFindingResults> {
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        read_spot_table_from_reader(&mut rdr, &SpotTableColumns::default())
    }

    #[test]
    fn test_read_groups_and_orders_by_spot_id() {
        let results = read_str(TABLE).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results.round_labels(), vec![0]);
        assert_eq!(results.ch_labels(), vec![0, 1]);

        let tile = results
            .get(&AxisIndices::from([(Axis::Round, 0), (Axis::Ch, 0)]))
            .unwrap();
        assert_eq!(tile.len(), 2);
        assert_eq!(tile.spots()[0], Spot::new(1.0, 2.0, 0.0, DEFAULT_SPOT_RADIUS, 0.5));
        assert_eq!(tile.spots()[1].intensity, 0.25);
        assert_eq!(tile.ids(), Some(&[0, 1][..]));
    }

    #[test]
    fn test_duplicate_spot_id_in_tile() {
        let content = "spot_id,round,ch,y,x,intensity\n4,0,1,1.0,1.0,1.0\n4,0,1,2.0,2.0,2.0\n";
        assert!(matches!(
            read_str(content),
            Err(IssError::DuplicateSpotId {
                round: 0,
                ch: 1,
                spot_id: 4
            })
        ));
    }

    #[test]
    fn test_optional_columns() {
        let content = "spot_id,round,ch,y,x,z,radius,intensity\n0,1,2,3.0,4.0,2.0,1.5,9.0\n";
        let results = read_str(content).unwrap();
        let tile = results
            .get(&AxisIndices::from([(Axis::Round, 1), (Axis::Ch, 2)]))
            .unwrap();
        assert_eq!(tile.spots()[0], Spot::new(3.0, 4.0, 2.0, 1.5, 9.0));
    }

    #[test]
    fn test_missing_column() {
        let content = "spot_id,round,y,x,intensity\n0,0,1.0,1.0,1.0\n";
        match read_str(content) {
            Err(IssError::MissingColumn(column)) => assert_eq!(column, "ch"),
            other => panic!("expected MissingColumn, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_parse_error_reports_line() {
        let content = "spot_id,round,ch,y,x,intensity\n0,0,0,1.0,1.0,1.0\n1,0,zero,1.0,1.0,1.0\n";
        match read_str(content) {
            Err(IssError::Parse { column, value, line }) => {
                assert_eq!(column, "ch");
                assert_eq!(value, "zero");
                assert_eq!(line, 3);
            }
            other => panic!("expected Parse, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_read_gzipped_file() {
        let file = tempfile::Builder::new().suffix(".csv.gz").tempfile().unwrap();
        let mut encoder = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        encoder.write_all(TABLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let results =
            read_spot_table(file.path().to_str().unwrap(), &SpotTableColumns::default()).unwrap();
        assert_eq!(results.total_spots(), 4);
    }

    #[test]
    fn test_read_label_image() {
        let mut rdr = label_reader("0,0,7\n3,3,7\n".as_bytes());
        let labels = read_label_image_from_reader(&mut rdr).unwrap();
        assert_eq!(labels, ndarray::array![[0u32, 0, 7], [3, 3, 7]]);

        let mut rdr = label_reader("0,0,7\n3,3\n".as_bytes());
        assert!(read_label_image_from_reader(&mut rdr).is_err());
    }
}
