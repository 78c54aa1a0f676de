//! # Value Extraction
//!
//! Samples WorldClim layers at every coordinate of a table and appends one column per
//! layer.
//!
//! ## Key Components
//!
//! - [`ExtractionRequest`]: what to sample (columns, variable, resolution, layers, window, archive)
//! - [`read_coordinates`]: validated `(longitude, latitude)` pairs from a DataFrame
//! - [`extract_layers`]: opens the archive once and builds the output table

use crate::archive::{ArchiveError, ZipRasterArchive};
use crate::catalog::{CatalogError, LayerSelection, Resolution, Variable, DEFAULT_BASE_URL};
use crate::raster::{is_valid_window, GeoRaster, RasterError, MAX_PIXEL_WINDOW};
use crate::storage::{HttpConfig, StorageError, StorageFactory};
use crate::vsi::{ArchiveLocation, RasterPath};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use polars::prelude::*;
use thiserror::Error;

pub const DEFAULT_LON_COLUMN: &str = "Longitude";
pub const DEFAULT_LAT_COLUMN: &str = "Latitude";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Raster error in {member}: {source}")]
    Raster {
        member: String,
        #[source]
        source: RasterError,
    },

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Column '{column}' not found in input table (available: {available})")]
    ColumnNotFound { column: String, available: String },

    #[error("Row {row}: missing value in column '{column}'")]
    MissingCoordinate { row: usize, column: String },

    #[error("Row {row}: value {value} in column '{column}' is not a finite number")]
    InvalidCoordinate {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Row {row}: {value} in column '{column}' is outside [{min}, {max}]")]
    CoordinateOutOfRange {
        row: usize,
        column: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Pixel window must be an odd number between 1 and {max}, got {0}", max = MAX_PIXEL_WINDOW)]
    InvalidWindow(u32),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

/// Everything needed to sample one variable for a table of coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub lon_column: String,
    pub lat_column: String,
    pub variable: Variable,
    pub resolution: Resolution,
    pub layers: LayerSelection,
    /// Odd window edge in pixels; 1 samples the containing pixel only
    pub pixel_window: u32,
    pub archive: ArchiveLocation,
    pub progress: bool,
}

impl ExtractionRequest {
    /// Every layer of `variable`, default column names, single pixel, WorldClim host.
    pub fn new(variable: Variable, resolution: Resolution) -> ExtractResult<Self> {
        Ok(ExtractionRequest {
            lon_column: DEFAULT_LON_COLUMN.to_string(),
            lat_column: DEFAULT_LAT_COLUMN.to_string(),
            variable,
            resolution,
            layers: LayerSelection::resolve(variable, None)?,
            pixel_window: 1,
            archive: ArchiveLocation::for_selection(DEFAULT_BASE_URL, variable, resolution),
            progress: false,
        })
    }

    pub fn with_layers(mut self, layers: &[u32]) -> ExtractResult<Self> {
        self.layers = LayerSelection::resolve(self.variable, Some(layers))?;
        Ok(self)
    }

    pub fn with_columns(mut self, lon_column: &str, lat_column: &str) -> Self {
        self.lon_column = lon_column.to_string();
        self.lat_column = lat_column.to_string();
        self
    }

    pub fn with_pixel_window(mut self, pixel_window: u32) -> Self {
        self.pixel_window = pixel_window;
        self
    }

    pub fn with_archive(mut self, archive: ArchiveLocation) -> Self {
        self.archive = archive;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Virtual paths of the selected layers.
    pub fn raster_paths(&self) -> Vec<RasterPath> {
        self.layers
            .layers()
            .iter()
            .map(|layer| RasterPath::for_layer(&self.archive, layer, self.resolution))
            .collect()
    }

    /// Names of the columns appended to the output.
    pub fn column_names(&self) -> Vec<String> {
        self.layers.column_names(self.resolution)
    }

    pub fn validate(&self) -> ExtractResult<()> {
        validate_pixel_window(self.pixel_window)?;
        if self.layers.variable() != self.variable {
            return Err(CatalogError::EmptySelection(self.variable).into());
        }
        Ok(())
    }
}

/// A pixel window must be odd so it can be centred on the containing pixel, and no
/// wider than [`MAX_PIXEL_WINDOW`].
pub fn validate_pixel_window(size: u32) -> ExtractResult<()> {
    if !is_valid_window(size) {
        return Err(ExtractError::InvalidWindow(size));
    }
    Ok(())
}

/// Reads and validates the coordinate columns.
///
/// Rows are numbered from 1 (the first data row) in error messages. A missing,
/// non-numeric or non-finite value, or one outside the geographic range, fails the
/// whole table.
pub fn read_coordinates(df: &DataFrame, lon_column: &str, lat_column: &str) -> ExtractResult<Vec<(f64, f64)>> {
    let lons = coordinate_column(df, lon_column, 180.0)?;
    let lats = coordinate_column(df, lat_column, 90.0)?;
    Ok(lons.into_iter().zip(lats).collect())
}

fn coordinate_column(df: &DataFrame, name: &str, limit: f64) -> ExtractResult<Vec<f64>> {
    let column = df.column(name).map_err(|_| ExtractError::ColumnNotFound {
        column: name.to_string(),
        available: df
            .get_column_names()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })?;

    let cast = column.cast(&DataType::Float64)?;
    let numbers = cast.f64()?;

    let mut values = Vec::with_capacity(numbers.len());
    for (index, number) in numbers.into_iter().enumerate() {
        let row = index + 1;
        let value = match number {
            Some(value) => value,
            None => {
                let original = column.get(index)?;
                if original.is_null() {
                    return Err(ExtractError::MissingCoordinate {
                        row,
                        column: name.to_string(),
                    });
                }
                return Err(ExtractError::InvalidCoordinate {
                    row,
                    column: name.to_string(),
                    value: original.to_string(),
                });
            }
        };
        if !value.is_finite() {
            return Err(ExtractError::InvalidCoordinate {
                row,
                column: name.to_string(),
                value: value.to_string(),
            });
        }
        if !(-limit..=limit).contains(&value) {
            return Err(ExtractError::CoordinateOutOfRange {
                row,
                column: name.to_string(),
                value,
                min: -limit,
                max: limit,
            });
        }
        values.push(value);
    }
    Ok(values)
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}/{len:3} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Returns `df` with one `Float64` column appended per selected layer.
///
/// The archive is opened once and each member in turn. Cells are null where the
/// coordinate falls outside the raster or on a masked pixel. Row count and order are
/// those of `df`.
pub fn extract_layers(df: &DataFrame, request: &ExtractionRequest, http: &HttpConfig) -> ExtractResult<DataFrame> {
    request.validate()?;
    let coordinates = read_coordinates(df, &request.lon_column, &request.lat_column)?;

    let mut output = df.clone();
    for name in request.column_names() {
        if df.column(&name).is_ok() {
            warn!("Input column '{}' will be replaced by extracted values", name);
        }
    }

    if coordinates.is_empty() {
        info!("Input table has no rows, nothing to sample");
        for name in request.column_names() {
            output.with_column(Series::new(name.as_str().into(), Vec::<Option<f64>>::new()))?;
        }
        return Ok(output);
    }

    info!("Opening archive {}", request.archive);
    let storage = StorageFactory::from_location(&request.archive, http)?;
    let mut archive = ZipRasterArchive::open(storage)?;

    for layer in request.layers.layers() {
        let member = layer.member_name(request.resolution);
        if !archive.contains(&member) {
            return Err(ArchiveError::MemberNotFound {
                member,
                available: archive.member_names().join(", "),
            }
            .into());
        }
    }

    let progress = if request.progress {
        let pb = ProgressBar::new(request.layers.len() as u64);
        pb.set_style(progress_style());
        pb
    } else {
        ProgressBar::hidden()
    };

    for (layer, path) in request.layers.layers().iter().zip(request.raster_paths()) {
        let column = layer.column_name(request.resolution);
        progress.set_message(column.clone());
        debug!("Sampling {} at {} points into '{}'", path, coordinates.len(), column);

        let values = sample_member(&mut archive, &path.member, &coordinates, request.pixel_window)?;
        let missing = values.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            info!("{}: {} of {} points have no data", column, missing, values.len());
        }

        output.with_column(Series::new(column.as_str().into(), values))?;
        progress.inc(1);
    }

    progress.finish_with_message("done");
    Ok(output)
}

fn sample_member(
    archive: &mut ZipRasterArchive,
    member: &str,
    coordinates: &[(f64, f64)],
    pixel_window: u32,
) -> ExtractResult<Vec<Option<f64>>> {
    let raster_error = |source: RasterError| ExtractError::Raster {
        member: member.to_string(),
        source,
    };

    let reader = archive.open_member(member)?;
    let mut raster = GeoRaster::open(reader).map_err(raster_error)?;

    coordinates
        .iter()
        .map(|&(lon, lat)| {
            let value = if pixel_window == 1 {
                raster.sample(lon, lat)
            } else {
                raster.window_mean(lon, lat, pixel_window)
            };
            value.map_err(raster_error)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_server::serve;
    use crate::tests::fixtures::{layer_archive, write_file};
    use approx::assert_relative_eq;
    use tempfile::TempDir;
    use ::zip::CompressionMethod;

    fn points() -> DataFrame {
        df! {
            "site" => ["a", "b", "c"],
            "Longitude" => [5.0, 25.0, -100.0],
            "Latitude" => [45.0, 35.0, 0.0],
        }
        .unwrap()
    }

    fn local_request(dir: &TempDir, variable: Variable, layers: &[u32]) -> ExtractionRequest {
        let bytes = layer_archive(variable, Resolution::TenMinutes, layers, CompressionMethod::Stored);
        let path = write_file(dir.path(), "wc2.1_10m_archive.zip", &bytes);
        ExtractionRequest::new(variable, Resolution::TenMinutes)
            .unwrap()
            .with_archive(ArchiveLocation::Local(path))
    }

    fn values(df: &DataFrame, column: &str) -> Vec<Option<f64>> {
        df.column(column).unwrap().f64().unwrap().into_iter().collect()
    }

    #[test]
    fn test_read_coordinates() {
        let coordinates = read_coordinates(&points(), "Longitude", "Latitude").unwrap();
        assert_eq!(coordinates, vec![(5.0, 45.0), (25.0, 35.0), (-100.0, 0.0)]);
    }

    #[test]
    fn test_read_coordinates_from_integers_and_strings() {
        let df = df! {
            "lon" => ["10.5", "-3"],
            "lat" => [1i64, 2],
        }
        .unwrap();
        let coordinates = read_coordinates(&df, "lon", "lat").unwrap();
        assert_eq!(coordinates, vec![(10.5, 1.0), (-3.0, 2.0)]);
    }

    #[test]
    fn test_read_coordinates_errors() {
        let missing = df! {
            "Longitude" => [Some(1.0), Some(2.0)],
            "Latitude" => [Some(1.0), None],
        }
        .unwrap();
        match read_coordinates(&missing, "Longitude", "Latitude") {
            Err(ExtractError::MissingCoordinate { row, column }) => {
                assert_eq!(row, 2);
                assert_eq!(column, "Latitude");
            }
            other => panic!("Expected MissingCoordinate, got {:?}", other),
        }

        let text = df! {
            "Longitude" => ["1.0", "east"],
            "Latitude" => [1.0, 2.0],
        }
        .unwrap();
        assert!(matches!(
            read_coordinates(&text, "Longitude", "Latitude"),
            Err(ExtractError::InvalidCoordinate { row: 2, .. })
        ));

        let nan = df! {
            "Longitude" => [f64::NAN],
            "Latitude" => [1.0],
        }
        .unwrap();
        assert!(matches!(
            read_coordinates(&nan, "Longitude", "Latitude"),
            Err(ExtractError::InvalidCoordinate { row: 1, .. })
        ));

        let range = df! {
            "Longitude" => [10.0, 200.0],
            "Latitude" => [1.0, 2.0],
        }
        .unwrap();
        assert!(matches!(
            read_coordinates(&range, "Longitude", "Latitude"),
            Err(ExtractError::CoordinateOutOfRange { row: 2, .. })
        ));

        assert!(matches!(
            read_coordinates(&points(), "lon", "Latitude"),
            Err(ExtractError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_pixel_window_validation() {
        assert!(validate_pixel_window(1).is_ok());
        assert!(validate_pixel_window(5).is_ok());
        assert!(matches!(validate_pixel_window(0), Err(ExtractError::InvalidWindow(0))));
        assert!(matches!(validate_pixel_window(4), Err(ExtractError::InvalidWindow(4))));
        assert!(validate_pixel_window(MAX_PIXEL_WINDOW).is_ok());
        assert!(matches!(
            validate_pixel_window(MAX_PIXEL_WINDOW + 2),
            Err(ExtractError::InvalidWindow(_))
        ));
        assert!(matches!(
            validate_pixel_window(200_001),
            Err(ExtractError::InvalidWindow(200_001))
        ));
    }

    #[test]
    fn test_request_paths_and_columns() {
        let request = ExtractionRequest::new(Variable::Tmin, Resolution::TwoAndHalfMinutes)
            .unwrap()
            .with_layers(&[7, 1, 7])
            .unwrap();
        assert_eq!(request.column_names(), vec!["tmin_2.5m_07", "tmin_2.5m_01"]);
        assert_eq!(
            request.raster_paths()[0].to_string(),
            "/vsizip/vsicurl/https://geodata.ucdavis.edu/climate/worldclim/2_1/base/wc2.1_2.5m_tmin.zip/wc2.1_2.5m_tmin_07.tif"
        );
        assert!(request.clone().with_layers(&[13]).is_err());
    }

    #[test]
    fn test_extract_layers_local() -> ExtractResult<()> {
        let dir = TempDir::new().unwrap();
        let request = local_request(&dir, Variable::Bio, &[1, 5]).with_layers(&[5, 1])?;

        let result = extract_layers(&points(), &request, &HttpConfig::default())?;
        assert_eq!(result.height(), 3);
        assert_eq!(
            result.get_column_names_str(),
            vec!["site", "Longitude", "Latitude", "bio_10m_5", "bio_10m_1"]
        );
        assert_eq!(values(&result, "bio_10m_1"), vec![Some(100.0), Some(106.0), None]);
        assert_eq!(values(&result, "bio_10m_5"), vec![Some(500.0), Some(506.0), None]);

        let sites: Vec<_> = result.column("site")?.str()?.into_iter().collect();
        assert_eq!(sites, vec![Some("a"), Some("b"), Some("c")]);
        Ok(())
    }

    #[test]
    fn test_extract_single_layer_elevation() -> ExtractResult<()> {
        let dir = TempDir::new().unwrap();
        let request = local_request(&dir, Variable::Elev, &[1]);
        let result = extract_layers(&points(), &request, &HttpConfig::default())?;
        assert_eq!(values(&result, "elev_10m"), vec![Some(100.0), Some(106.0), None]);
        Ok(())
    }

    #[test]
    fn test_extract_with_window() -> ExtractResult<()> {
        let dir = TempDir::new().unwrap();
        let request = local_request(&dir, Variable::Prec, &[3])
            .with_layers(&[3])?
            .with_pixel_window(3);
        let df = df! {
            "Longitude" => [15.0],
            "Latitude" => [45.0],
        }?;
        let result = extract_layers(&df, &request, &HttpConfig::default())?;
        let mean = values(&result, "prec_10m_03")[0].unwrap();
        assert_relative_eq!(mean, 300.0 + (0.0 + 1.0 + 2.0 + 4.0 + 5.0 + 6.0) / 6.0);
        Ok(())
    }

    #[test]
    fn test_extract_even_window_fails_before_io() {
        let request = ExtractionRequest::new(Variable::Bio, Resolution::TenMinutes)
            .unwrap()
            .with_archive(ArchiveLocation::parse("/nonexistent/archive.zip"))
            .with_pixel_window(2);
        assert!(matches!(
            extract_layers(&points(), &request, &HttpConfig::default()),
            Err(ExtractError::InvalidWindow(2))
        ));
    }

    #[test]
    fn test_extract_missing_member() {
        let dir = TempDir::new().unwrap();
        let request = local_request(&dir, Variable::Tmax, &[1]).with_layers(&[1, 2]).unwrap();
        match extract_layers(&points(), &request, &HttpConfig::default()) {
            Err(ExtractError::Archive(ArchiveError::MemberNotFound { member, .. })) => {
                assert_eq!(member, "wc2.1_10m_tmax_02.tif");
            }
            other => panic!("Expected MemberNotFound, got {:?}", other.map(|df| df.shape())),
        }
    }

    #[test]
    fn test_extract_empty_table_skips_archive() -> ExtractResult<()> {
        let request = ExtractionRequest::new(Variable::Wind, Resolution::FiveMinutes)?
            .with_archive(ArchiveLocation::parse("/nonexistent/archive.zip"))
            .with_layers(&[1])?;
        let df = df! {
            "Longitude" => Vec::<f64>::new(),
            "Latitude" => Vec::<f64>::new(),
        }?;
        let result = extract_layers(&df, &request, &HttpConfig::default())?;
        assert_eq!(result.shape(), (0, 3));
        Ok(())
    }

    #[test]
    fn test_extract_layers_remote() -> ExtractResult<()> {
        let bytes = layer_archive(Variable::Tavg, Resolution::TenMinutes, &[1, 12], CompressionMethod::Stored);
        let server = serve("wc2.1_10m_tavg.zip", bytes);
        let base = server.url.trim_end_matches("/wc2.1_10m_tavg.zip").to_string();

        let request = ExtractionRequest::new(Variable::Tavg, Resolution::TenMinutes)?
            .with_layers(&[12])?
            .with_archive(ArchiveLocation::for_selection(&base, Variable::Tavg, Resolution::TenMinutes));
        let http = HttpConfig {
            block_size: 4096,
            ..HttpConfig::default()
        };

        let result = extract_layers(&points(), &request, &http)?;
        assert_eq!(values(&result, "tavg_10m_12"), vec![Some(1200.0), Some(1206.0), None]);
        Ok(())
    }

    #[test]
    fn test_extract_deflated_archive() -> ExtractResult<()> {
        let dir = TempDir::new().unwrap();
        let bytes = layer_archive(Variable::Srad, Resolution::TenMinutes, &[6], CompressionMethod::Deflated);
        let path = write_file(dir.path(), "wc2.1_10m_srad.zip", &bytes);
        let request = ExtractionRequest::new(Variable::Srad, Resolution::TenMinutes)?
            .with_layers(&[6])?
            .with_archive(ArchiveLocation::Local(path));

        let result = extract_layers(&points(), &request, &HttpConfig::default())?;
        assert_eq!(values(&result, "srad_10m_06"), vec![Some(600.0), Some(606.0), None]);
        Ok(())
    }
}
