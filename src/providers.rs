// Contracts for supplying tile data to an experiment. Data-source adapters
// implement `TileFetcher`; the rest of the crate only calls these traits.

use std::collections::HashMap;
use std::io::Read;

use crate::error::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Tiff,
    Numpy,
    /// Little-endian f32 pixels, row-major (y, x).
    RawF32,
    /// Little-endian u16 pixels, row-major (y, x).
    RawU16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Coordinate {
    X,
    Y,
    Z,
}

/// Physical position of a tile along one coordinate: a point or a
/// (min, max) range.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CoordinateValue {
    Point(f64),
    Range(f64, f64),
}

impl CoordinateValue {
    pub fn min(&self) -> f64 {
        match *self {
            CoordinateValue::Point(v) => v,
            CoordinateValue::Range(min, _) => min,
        }
    }

    pub fn max(&self) -> f64 {
        match *self {
            CoordinateValue::Point(v) => v,
            CoordinateValue::Range(_, max) => max,
        }
    }
}

/// One tile of image data.
pub trait FetchedTile {
    /// Tile shape in (y, x).
    fn shape(&self) -> (usize, usize);

    /// The tile's extent in the global coordinate space.
    fn coordinates(&self) -> HashMap<Coordinate, CoordinateValue>;

    fn format(&self) -> ImageFormat;

    /// A reader over the tile's encoded bytes.
    fn tile_data_handle(&self) -> Result<Box<dyn Read + '_>>;
}

/// Source of tiles for every (fov, round, ch, z).
pub trait TileFetcher {
    fn get_tile(&self, fov: usize, round: usize, ch: usize, z: usize) -> Result<Box<dyn FetchedTile + '_>>;
}

/// A tile held in memory as raw f32 pixels.
#[derive(Clone, Debug)]
pub struct InMemoryTile {
    pub shape: (usize, usize),
    pub coordinates: HashMap<Coordinate, CoordinateValue>,
    pub pixels: Vec<f32>,
}

impl InMemoryTile {
    pub fn new(shape: (usize, usize), pixels: Vec<f32>) -> Self {
        let coordinates = HashMap::from([
            (Coordinate::Y, CoordinateValue::Range(0.0, shape.0 as f64)),
            (Coordinate::X, CoordinateValue::Range(0.0, shape.1 as f64)),
            (Coordinate::Z, CoordinateValue::Point(0.0)),
        ]);
        InMemoryTile {
            shape,
            coordinates,
            pixels,
        }
    }
}

impl FetchedTile for InMemoryTile {
    fn shape(&self) -> (usize, usize) {
        self.shape
    }

    fn coordinates(&self) -> HashMap<Coordinate, CoordinateValue> {
        self.coordinates.clone()
    }

    fn format(&self) -> ImageFormat {
        ImageFormat::RawF32
    }

    fn tile_data_handle(&self) -> Result<Box<dyn Read + '_>> {
        let bytes: Vec<u8> = self.pixels.iter().flat_map(|v| v.to_le_bytes()).collect();
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }
}

/// Serves tiles from a closure, which is handy for synthetic data.
pub struct FnTileFetcher<F> {
    shape: (usize, usize),
    pixel: F,
}

impl<F> FnTileFetcher<F>
where
    F: Fn(usize, usize, usize, usize, usize, usize) -> f32,
{
    /// `pixel(fov, round, ch, z, y, x)` gives each pixel value.
    pub fn new(shape: (usize, usize), pixel: F) -> Self {
        FnTileFetcher { shape, pixel }
    }
}

impl<F> TileFetcher for FnTileFetcher<F>
where
    F: Fn(usize, usize, usize, usize, usize, usize) -> f32,
{
    fn get_tile(&self, fov: usize, round: usize, ch: usize, z: usize) -> Result<Box<dyn FetchedTile + '_>> {
        let (ny, nx) = self.shape;
        let mut pixels = Vec::with_capacity(ny * nx);
        for y in 0..ny {
            for x in 0..nx {
                pixels.push((self.pixel)(fov, round, ch, z, y, x));
            }
        }
        Ok(Box::new(InMemoryTile::new(self.shape, pixels)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_tile_bytes() {
        let tile = InMemoryTile::new((1, 2), vec![1.5, -2.0]);
        let mut bytes = Vec::new();
        tile.tile_data_handle().unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), -2.0);
        assert_eq!(tile.coordinates()[&Coordinate::X].max(), 2.0);
    }

    #[test]
    fn test_fn_fetcher() {
        let fetcher = FnTileFetcher::new((2, 3), |_, r, c, _, y, x| (r * 100 + c * 10 + y * 3 + x) as f32);
        let tile = fetcher.get_tile(0, 1, 2, 0).unwrap();
        assert_eq!(tile.shape(), (2, 3));
        assert_eq!(tile.format(), ImageFormat::RawF32);
    }
}
