//! # GeoTIFF Sampling
//!
//! Reads point values out of single band GeoTIFF rasters without decoding the full image.
//!
//! The georeferencing comes from the GeoTIFF model tags (`ModelPixelScale` with
//! `ModelTiepoint`, or `ModelTransformation`) and the no-data value from the
//! `GDAL_NODATA` tag. Pixel data is decoded one strip or tile at a time, on demand,
//! with a bounded cache that lives as long as the opened raster.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Seek};
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError};

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const GEO_KEY_RASTER_TYPE: u16 = 1025;
const RASTER_PIXEL_IS_POINT: u16 = 2;

/// Decoded chunks kept per raster.
const CACHED_CHUNKS: usize = 64;

/// Largest pixel window edge accepted by [`GeoRaster::window_mean`].
pub const MAX_PIXEL_WINDOW: u32 = 101;

/// Whether `size` is an odd window edge between 1 and [`MAX_PIXEL_WINDOW`].
pub fn is_valid_window(size: u32) -> bool {
    size % 2 == 1 && size <= MAX_PIXEL_WINDOW
}

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    #[error("Raster has no georeferencing (ModelPixelScale/ModelTiepoint or ModelTransformation)")]
    MissingGeoreference,

    #[error("Raster geotransform is degenerate: {0:?}")]
    DegenerateTransform([f64; 6]),

    #[error("Unsupported raster color type {0} (expected a single gray band)")]
    UnsupportedColorType(String),

    #[error("Pixel window must be an odd number between 1 and {max}, got {0}", max = MAX_PIXEL_WINDOW)]
    InvalidWindow(u32),
}

pub type RasterResult<T> = Result<T, RasterError>;

/// Affine pixel to map transform with the GDAL coefficient order:
/// `x = c[0] + col * c[1] + row * c[2]`, `y = c[3] + col * c[4] + row * c[5]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform from a tiepoint `[i, j, k, x, y, z]` and a pixel scale `[sx, sy, sz]`.
    pub fn from_tiepoint(tiepoint: &[f64], scale: &[f64], pixel_is_point: bool) -> RasterResult<Self> {
        if tiepoint.len() < 6 || scale.len() < 2 {
            return Err(RasterError::MissingGeoreference);
        }
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        let (sx, sy) = (scale[0], scale[1]);

        let mut origin_x = x - i * sx;
        let mut origin_y = y + j * sy;
        if pixel_is_point {
            origin_x -= sx / 2.0;
            origin_y += sy / 2.0;
        }
        GeoTransform([origin_x, sx, 0.0, origin_y, 0.0, -sy]).checked()
    }

    /// Transform from the 4x4 row-major `ModelTransformation` matrix.
    pub fn from_matrix(matrix: &[f64]) -> RasterResult<Self> {
        if matrix.len() < 8 {
            return Err(RasterError::MissingGeoreference);
        }
        GeoTransform([matrix[3], matrix[0], matrix[1], matrix[7], matrix[4], matrix[5]]).checked()
    }

    fn checked(self) -> RasterResult<Self> {
        let c = self.0;
        let det = c[1] * c[5] - c[2] * c[4];
        if !det.is_finite() || det == 0.0 || c.iter().any(|v| !v.is_finite()) {
            return Err(RasterError::DegenerateTransform(c));
        }
        Ok(self)
    }

    /// `(row, col)` of the pixel containing the map coordinate.
    ///
    /// Pixels are half-open: a point on the boundary between two pixels belongs to the
    /// one to its lower right. The result may lie outside the raster.
    pub fn index(&self, x: f64, y: f64) -> (i64, i64) {
        let c = self.0;
        let det = c[1] * c[5] - c[2] * c[4];
        let dx = x - c[0];
        let dy = y - c[3];
        let col = (dx * c[5] - dy * c[2]) / det;
        let row = (dy * c[1] - dx * c[4]) / det;
        (row.floor() as i64, col.floor() as i64)
    }

    /// Map coordinate of a pixel centre.
    pub fn pixel_center(&self, row: i64, col: i64) -> (f64, f64) {
        let c = self.0;
        let col = col as f64 + 0.5;
        let row = row as f64 + 0.5;
        (
            c[0] + col * c[1] + row * c[2],
            c[3] + col * c[4] + row * c[5],
        )
    }

    /// `[min_x, min_y, max_x, max_y]` covered by a `width` x `height` raster.
    pub fn bounds(&self, width: u32, height: u32) -> [f64; 4] {
        let c = self.0;
        let (w, h) = (width as f64, height as f64);
        let corners = [
            (c[0], c[3]),
            (c[0] + w * c[1], c[3] + w * c[4]),
            (c[0] + h * c[2], c[3] + h * c[5]),
            (c[0] + w * c[1] + h * c[2], c[3] + w * c[4] + h * c[5]),
        ];
        corners.iter().fold(
            [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
            |acc, &(x, y)| [acc[0].min(x), acc[1].min(y), acc[2].max(x), acc[3].max(y)],
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChunkLayout {
    Strips { rows_per_strip: u32 },
    Tiles { tile_width: u32, tile_height: u32, tiles_across: u32 },
}

/// Descriptive metadata of an opened raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    pub width: u32,
    pub height: u32,
    pub transform: GeoTransform,
    pub bounds: [f64; 4],
    pub pixel_size: (f64, f64),
    pub nodata: Option<f64>,
    pub sample_format: String,
    pub layout: String,
}

/// A single band GeoTIFF opened for point sampling.
pub struct GeoRaster<R: Read + Seek> {
    decoder: Decoder<R>,
    width: u32,
    height: u32,
    transform: GeoTransform,
    nodata: Option<f64>,
    sample_format: String,
    layout: ChunkLayout,
    chunks: HashMap<u32, Vec<f64>>,
    chunk_order: VecDeque<u32>,
}

impl<R: Read + Seek> GeoRaster<R> {
    /// Reads the first image directory: size, georeferencing, no-data and chunk layout.
    pub fn open(reader: R) -> RasterResult<Self> {
        let mut decoder = Decoder::new(reader)?;
        let (width, height) = decoder.dimensions()?;

        let color_type = decoder.colortype()?;
        let bits = match color_type {
            ColorType::Gray(bits) => bits,
            other => return Err(RasterError::UnsupportedColorType(format!("{:?}", other))),
        };
        let sample_format = match decoder.get_tag_u32(Tag::SampleFormat).unwrap_or(1) {
            2 => format!("int{}", bits),
            3 => format!("float{}", bits),
            _ => format!("uint{}", bits),
        };

        let transform = read_transform(&mut decoder)?;
        let nodata = read_nodata(&mut decoder, &sample_format);

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let layout = if chunk_width >= width {
            ChunkLayout::Strips {
                rows_per_strip: chunk_height.max(1),
            }
        } else {
            ChunkLayout::Tiles {
                tile_width: chunk_width,
                tile_height: chunk_height,
                tiles_across: width.div_ceil(chunk_width),
            }
        };

        debug!(
            "Opened {}x{} {} raster, transform {:?}, nodata {:?}, {:?}",
            width, height, sample_format, transform.0, nodata, layout
        );

        Ok(GeoRaster {
            decoder,
            width,
            height,
            transform,
            nodata,
            sample_format,
            layout,
            chunks: HashMap::new(),
            chunk_order: VecDeque::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn metadata(&self) -> RasterMetadata {
        let c = self.transform.0;
        let layout = match self.layout {
            ChunkLayout::Strips { rows_per_strip } => format!("strips of {} rows", rows_per_strip),
            ChunkLayout::Tiles {
                tile_width,
                tile_height,
                ..
            } => format!("tiles of {}x{}", tile_width, tile_height),
        };
        RasterMetadata {
            width: self.width,
            height: self.height,
            transform: self.transform,
            bounds: self.transform.bounds(self.width, self.height),
            pixel_size: (c[1], c[5]),
            nodata: self.nodata,
            sample_format: self.sample_format.clone(),
            layout,
        }
    }

    /// Value of the pixel containing `(lon, lat)`; `None` outside the raster or on no-data.
    pub fn sample(&mut self, lon: f64, lat: f64) -> RasterResult<Option<f64>> {
        let (row, col) = self.transform.index(lon, lat);
        self.pixel(row, col)
    }

    /// Mean of the valid pixels in the `size` x `size` window centred on the pixel
    /// containing `(lon, lat)`.
    ///
    /// Window pixels outside the raster and no-data pixels are left out of the mean.
    /// A point outside the raster yields `None` whatever the window size.
    pub fn window_mean(&mut self, lon: f64, lat: f64, size: u32) -> RasterResult<Option<f64>> {
        if !is_valid_window(size) {
            return Err(RasterError::InvalidWindow(size));
        }
        let (row, col) = self.transform.index(lon, lat);
        if !self.contains(row, col) {
            return Ok(None);
        }
        if size == 1 {
            return self.pixel(row, col);
        }

        // Off-raster window pixels never count, so only the overlap is visited
        let half = (size / 2) as i64;
        let rows = (row - half).max(0)..=(row + half).min(self.height as i64 - 1);
        let cols = (col - half).max(0)..=(col + half).min(self.width as i64 - 1);
        let mut sum = 0.0;
        let mut count = 0usize;
        for r in rows {
            for c in cols.clone() {
                if let Some(value) = self.pixel(r, c)? {
                    sum += value;
                    count += 1;
                }
            }
        }
        Ok((count > 0).then(|| sum / count as f64))
    }

    fn contains(&self, row: i64, col: i64) -> bool {
        row >= 0 && col >= 0 && row < self.height as i64 && col < self.width as i64
    }

    fn pixel(&mut self, row: i64, col: i64) -> RasterResult<Option<f64>> {
        if !self.contains(row, col) {
            return Ok(None);
        }
        let (row, col) = (row as u32, col as u32);

        let (chunk_index, local_row, local_col) = match self.layout {
            ChunkLayout::Strips { rows_per_strip } => {
                (row / rows_per_strip, row % rows_per_strip, col)
            }
            ChunkLayout::Tiles {
                tile_width,
                tile_height,
                tiles_across,
            } => (
                (row / tile_height) * tiles_across + col / tile_width,
                row % tile_height,
                col % tile_width,
            ),
        };

        let (stride, _) = self.decoder.chunk_data_dimensions(chunk_index);
        let chunk = self.chunk(chunk_index)?;
        let value = chunk
            .get(local_row as usize * stride as usize + local_col as usize)
            .copied();

        Ok(value.filter(|v| !v.is_nan() && Some(*v) != self.nodata))
    }

    fn chunk(&mut self, index: u32) -> RasterResult<&Vec<f64>> {
        if !self.chunks.contains_key(&index) {
            let data = to_f64(self.decoder.read_chunk(index)?);
            if self.chunk_order.len() >= CACHED_CHUNKS
                && let Some(evicted) = self.chunk_order.pop_front()
            {
                self.chunks.remove(&evicted);
            }
            self.chunk_order.push_back(index);
            self.chunks.insert(index, data);
        }
        Ok(&self.chunks[&index])
    }
}

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> RasterResult<GeoTransform> {
    if let Ok(matrix) = decoder.get_tag_f64_vec(tag(TAG_MODEL_TRANSFORMATION)) {
        return GeoTransform::from_matrix(&matrix);
    }

    let tiepoint = decoder
        .get_tag_f64_vec(tag(TAG_MODEL_TIEPOINT))
        .map_err(|_| RasterError::MissingGeoreference)?;
    let scale = decoder
        .get_tag_f64_vec(tag(TAG_MODEL_PIXEL_SCALE))
        .map_err(|_| RasterError::MissingGeoreference)?;

    let pixel_is_point = decoder
        .get_tag_u16_vec(tag(TAG_GEO_KEY_DIRECTORY))
        .map(|keys| raster_type(&keys) == Some(RASTER_PIXEL_IS_POINT))
        .unwrap_or(false);

    GeoTransform::from_tiepoint(&tiepoint, &scale, pixel_is_point)
}

/// Value of the `GTRasterTypeGeoKey` in a GeoKey directory, when stored inline.
fn raster_type(keys: &[u16]) -> Option<u16> {
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| entry[0] == GEO_KEY_RASTER_TYPE && entry[1] == 0)
        .map(|entry| entry[3])
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>, sample_format: &str) -> Option<f64> {
    let text = decoder.get_tag_ascii_string(tag(TAG_GDAL_NODATA)).ok()?;
    let value: f64 = text.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok()?;
    // Pixels are widened from f32, so the marker must be too
    if sample_format == "float32" {
        Some(value as f32 as f64)
    } else {
        Some(value)
    }
}

fn to_f64(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::F64(data) => data,
    }
}
