// In-memory (round, ch, z, y, x) image tensors and spot intensity measurement.

use log::{debug, info};
use ndarray::{s, Array2, Array5, ArrayView2, ArrayView5};
use rayon::prelude::*;
use std::io::Read;

use crate::axes::{Axis, AxisIndices, RoundChannelKey};
use crate::error::{IssError, Result};
use crate::providers::{FetchedTile, ImageFormat, TileFetcher};
use crate::spots::{Spot, SpotAttributes, SpotFindingResults};

fn array_axis(axis: Axis) -> ndarray::Axis {
    match axis {
        Axis::Round => ndarray::Axis(0),
        Axis::Ch => ndarray::Axis(1),
        Axis::ZPlane => ndarray::Axis(2),
    }
}

#[derive(Clone, Debug)]
pub struct ImageStack {
    data: Array5<f32>,
}

impl ImageStack {
    pub fn new(data: Array5<f32>) -> Self {
        ImageStack { data }
    }

    /// Assemble one field of view from a tile fetcher. Every tile must have
    /// the same (y, x) shape.
    pub fn from_fetcher(
        fetcher: &dyn TileFetcher,
        fov: usize,
        nrounds: usize,
        nchannels: usize,
        nzplanes: usize,
    ) -> Result<Self> {
        let mut data: Option<Array5<f32>> = None;

        for round in 0..nrounds {
            for ch in 0..nchannels {
                for z in 0..nzplanes {
                    let tile = fetcher.get_tile(fov, round, ch, z)?;
                    let pixels = decode_tile(tile.as_ref())?;
                    let shape = pixels.dim();

                    let data = data.get_or_insert_with(|| {
                        Array5::zeros((nrounds, nchannels, nzplanes, shape.0, shape.1))
                    });
                    let expected = (data.shape()[3], data.shape()[4]);
                    if shape != expected {
                        return Err(IssError::TileShapeMismatch {
                            round,
                            ch,
                            z,
                            expected,
                            found: shape,
                        });
                    }

                    data.slice_mut(s![round, ch, z, .., ..]).assign(&pixels);
                }
            }
        }

        let data = data.unwrap_or_else(|| Array5::zeros((nrounds, nchannels, nzplanes, 0, 0)));
        info!(
            "Loaded fov {}: {} rounds x {} channels x {} z-planes of {} x {} pixels",
            fov,
            nrounds,
            nchannels,
            nzplanes,
            data.shape()[3],
            data.shape()[4]
        );

        Ok(ImageStack { data })
    }

    /// (rounds, channels, z-planes, y, x)
    pub fn shape(&self) -> (usize, usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn size(&self, axis: Axis) -> usize {
        self.data.len_of(array_axis(axis))
    }

    pub fn data(&self) -> ArrayView5<'_, f32> {
        self.data.view()
    }

    /// The (y, x) plane at a round, channel and z-plane.
    pub fn sel(&self, indices: &AxisIndices) -> Result<ArrayView2<'_, f32>> {
        let mut position = [0; 3];
        for (i, axis) in [Axis::Round, Axis::Ch, Axis::ZPlane].into_iter().enumerate() {
            let index = indices.require(axis)?;
            let size = self.size(axis);
            if index >= size {
                return Err(IssError::IndexOutOfRange { axis, index, size });
            }
            position[i] = index;
        }
        let [r, c, z] = position;
        Ok(self.data.slice(s![r, c, z, .., ..]))
    }

    /// Collapse the given axes by maximum. Collapsed axes are kept with size 1.
    pub fn max_proj(&self, axes: &[Axis]) -> ImageStack {
        let mut data = self.data.clone();
        for &axis in axes {
            let ax = array_axis(axis);
            if data.len_of(ax) == 1 {
                continue;
            }
            data = data
                .fold_axis(ax, f32::NEG_INFINITY, |&acc, &v| acc.max(v))
                .insert_axis(ax);
        }
        ImageStack { data }
    }
}

fn decode_tile(tile: &dyn FetchedTile) -> Result<Array2<f32>> {
    let (ny, nx) = tile.shape();
    let bytes_per_pixel = match tile.format() {
        ImageFormat::RawF32 => 4,
        ImageFormat::RawU16 => 2,
        format => return Err(IssError::UnsupportedImageFormat(format)),
    };

    let expected = ny.saturating_mul(nx).saturating_mul(bytes_per_pixel);
    let mut bytes = Vec::new();
    tile.tile_data_handle()?.read_to_end(&mut bytes)?;
    if bytes.len() != expected {
        return Err(IssError::TileDataLength {
            expected,
            found: bytes.len(),
        });
    }

    let pixels: Vec<f32> = if bytes_per_pixel == 4 {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    } else {
        bytes
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as f32 / u16::MAX as f32)
            .collect()
    };

    let found = pixels.len() * bytes_per_pixel;
    Array2::from_shape_vec((ny, nx), pixels)
        .map_err(|_| IssError::TileDataLength { expected, found })
}

/// How spot intensity is summarized over the pixels a spot covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Measurement {
    #[default]
    Mean,
    Max,
}

// Summarize the disk of `spot.radius` around the spot's rounded position.
// The centre pixel is always included when it lies inside the plane. The scan
// never leaves the plane, however large the radius.
fn measure_spot(plane: ArrayView2<f32>, spot: &Spot, measurement: Measurement) -> f32 {
    let (ny, nx) = plane.dim();
    let cy = spot.y.round() as i64;
    let cx = spot.x.round() as i64;
    let radius = spot.radius.max(0.0);
    let r = radius.ceil() as i64;

    let (y_lo, y_hi) = (cy.saturating_sub(r).max(0), cy.saturating_add(r).min(ny as i64 - 1));
    let (x_lo, x_hi) = (cx.saturating_sub(r).max(0), cx.saturating_add(r).min(nx as i64 - 1));

    let mut sum = 0.0;
    let mut max = f32::NEG_INFINITY;
    let mut n = 0;
    for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            let (dy, dx) = ((y - cy) as f32, (x - cx) as f32);
            if dy * dy + dx * dx > radius * radius {
                continue;
            }
            let v = plane[[y as usize, x as usize]];
            sum += v;
            max = max.max(v);
            n += 1;
        }
    }

    if n == 0 {
        return 0.0;
    }

    match measurement {
        Measurement::Mean => sum / n as f32,
        Measurement::Max => max,
    }
}

/// Measure every reference spot in every (round, ch) of the stack, after a
/// maximum projection over z. The result has one entry per (round, ch), each
/// listing the reference spots in order, ready for exact-match merging.
///
/// Reference spots must have a finite position and radius.
pub fn measure_spot_intensities(
    stack: &ImageStack,
    reference: &SpotAttributes,
    measurement: Measurement,
) -> Result<SpotFindingResults> {
    for (index, spot) in reference.iter().enumerate() {
        let fields = [("y", spot.y), ("x", spot.x), ("radius", spot.radius)];
        if let Some((field, _)) = fields.into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(IssError::NonFiniteSpot { index, field });
        }
    }

    let projected = stack.max_proj(&[Axis::ZPlane]);
    let (nrounds, nchannels, _, _, _) = projected.shape();

    let measured: Vec<(RoundChannelKey, SpotAttributes)> = (0..nrounds * nchannels)
        .into_par_iter()
        .map(|i| {
            let (round, ch) = (i / nchannels, i % nchannels);
            let plane = projected.data.slice(s![round, ch, 0, .., ..]);
            let spots = reference
                .iter()
                .map(|spot| spot.with_intensity(measure_spot(plane, spot, measurement)))
                .collect();
            (RoundChannelKey::new(round, ch), spots)
        })
        .collect();

    let mut results = SpotFindingResults::new();
    for (key, spots) in measured {
        results.insert_key(key, spots);
    }

    debug!(
        "Measured {} reference spots in {} tiles",
        reference.len(),
        results.len()
    );

    Ok(results)
}
