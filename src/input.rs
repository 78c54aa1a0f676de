//! # Input Module
//!
//! Job configuration parsing and input table reading for worldclim-extract.
//!
//! ## Configuration Structure
//!
//! A job configuration (JSON or YAML) specifies:
//! - **input**: Path to the table of coordinates (CSV, Parquet or Excel)
//! - **output**: Path for the augmented table
//! - **variable** / **resolution**: WorldClim codes such as `bio` and `10m`
//! - **lon_column** / **lat_column**: Coordinate column names (`Longitude` / `Latitude`)
//! - **pixel_window**: Odd window edge for neighbourhood means (default 1)
//! - **layers**: Optional subset of layer numbers
//! - **base_url** / **archive**: Where the zip archive is read from
//! - **http**: Range request settings
//!
//! ## Example Usage
//!
//! ```rust
//! use worldclim_extract::input::JobConfig;
//!
//! let yaml = r#"
//! input: sites.csv
//! output: sites_bio.csv
//! variable: bio
//! resolution: 10m
//! layers: [1, 12]
//! "#;
//! let config = JobConfig::from_yaml(yaml)?;
//! assert_eq!(config.lon_column, "Longitude");
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::catalog::{CatalogError, LayerSelection, Resolution, Variable, DEFAULT_BASE_URL};
use crate::extract::{
    validate_pixel_window, ExtractionRequest, DEFAULT_LAT_COLUMN, DEFAULT_LON_COLUMN,
};
use crate::storage::HttpConfig;
use crate::vsi::ArchiveLocation;
use calamine::{open_workbook_auto, Data, Reader};
use log::debug;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Catalog(#[from] CatalogError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::Error),

    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("Cannot infer table format of '{0}' (expected .csv, .parquet, .pq, .xlsx or .xls)")]
    UnknownFormat(String),

    #[error("Input file not found: {0}")]
    NotFound(String),

    #[error("Workbook '{0}' has no worksheet")]
    EmptyWorkbook(String),

    #[error("Table has {rows} rows, more than the {max} an Excel worksheet holds")]
    TooManyRows { rows: usize, max: usize },
}

pub type TableResult<T> = Result<T, TableError>;

/// On-disk table formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Parquet,
    Xlsx,
}

impl TableFormat {
    /// Infers the format from a file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> TableResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension.as_deref() {
            Some("csv") => Ok(TableFormat::Csv),
            Some("parquet") | Some("pq") => Ok(TableFormat::Parquet),
            Some("xlsx") | Some("xls") => Ok(TableFormat::Xlsx),
            _ => Err(TableError::UnknownFormat(path.display().to_string())),
        }
    }

    /// Explicit format if given, otherwise inferred from `path`.
    pub fn resolve<P: AsRef<Path>>(path: P, explicit: Option<TableFormat>) -> TableResult<Self> {
        match explicit {
            Some(format) => Ok(format),
            None => Self::from_path(path),
        }
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableFormat::Csv => "csv",
            TableFormat::Parquet => "parquet",
            TableFormat::Xlsx => "xlsx",
        };
        f.write_str(name)
    }
}

impl FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(TableFormat::Csv),
            "parquet" | "pq" => Ok(TableFormat::Parquet),
            "xlsx" | "xls" | "excel" => Ok(TableFormat::Xlsx),
            other => Err(format!(
                "Invalid table format '{}'. Use csv, parquet or xlsx",
                other
            )),
        }
    }
}

/// Complete configuration of one extraction job.
///
/// Only `input`, `output`, `variable` and `resolution` are required; everything else has
/// a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Path to the coordinate table
    pub input: String,
    /// Path of the table to write
    pub output: String,
    /// WorldClim variable code
    pub variable: Variable,
    /// WorldClim resolution code
    pub resolution: Resolution,
    #[serde(default = "default_lon_column")]
    pub lon_column: String,
    #[serde(default = "default_lat_column")]
    pub lat_column: String,
    /// Odd window edge in pixels; values above 1 average the neighbourhood
    #[serde(default = "default_pixel_window")]
    pub pixel_window: u32,
    /// Layer numbers to extract; all layers when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<u32>>,
    /// Directory URL (or local directory) holding the `wc2.1_<res>_<var>.zip` archives
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Explicit archive path or URL, overriding `base_url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    /// Output table format; inferred from `output` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<TableFormat>,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_lon_column() -> String {
    DEFAULT_LON_COLUMN.to_string()
}

fn default_lat_column() -> String {
    DEFAULT_LAT_COLUMN.to_string()
}

fn default_pixel_window() -> u32 {
    1
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl JobConfig {
    /// Configuration with every optional field at its default.
    pub fn new(input: &str, output: &str, variable: Variable, resolution: Resolution) -> Self {
        JobConfig {
            input: input.to_string(),
            output: output.to_string(),
            variable,
            resolution,
            lon_column: default_lon_column(),
            lat_column: default_lat_column(),
            pixel_window: default_pixel_window(),
            layers: None,
            base_url: default_base_url(),
            archive: None,
            format: None,
            http: HttpConfig::default(),
        }
    }

    /// Loads a configuration file.
    ///
    /// `.yaml`/`.yml` files are parsed as YAML and `.json` as JSON; for any other
    /// extension JSON is tried first, then YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            _ => Self::from_json(&content).or_else(|_| Self::from_yaml(&content)),
        }
    }

    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json_str)?)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml_str)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Checks everything that can be checked without touching the input or network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.trim().is_empty() {
            return Err(ConfigError::Invalid("input path is empty".to_string()));
        }
        if self.output.trim().is_empty() {
            return Err(ConfigError::Invalid("output path is empty".to_string()));
        }
        if Path::new(&self.input) == Path::new(&self.output) {
            return Err(ConfigError::Invalid(format!(
                "input and output are the same file: {}",
                self.input
            )));
        }
        if self.lon_column.trim().is_empty() || self.lat_column.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "coordinate column names must not be empty".to_string(),
            ));
        }
        if self.lon_column == self.lat_column {
            return Err(ConfigError::Invalid(format!(
                "longitude and latitude both read column '{}'",
                self.lon_column
            )));
        }
        validate_pixel_window(self.pixel_window)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        LayerSelection::resolve(self.variable, self.layers.as_deref())?;
        if self.http.block_size == 0 {
            return Err(ConfigError::Invalid("http.block_size must be > 0".to_string()));
        }
        Ok(())
    }

    /// Where the archive is read from: the explicit override or `base_url`.
    pub fn archive_location(&self) -> ArchiveLocation {
        match &self.archive {
            Some(archive) => ArchiveLocation::parse(archive),
            None => ArchiveLocation::for_selection(&self.base_url, self.variable, self.resolution),
        }
    }

    pub fn output_format(&self) -> TableResult<TableFormat> {
        TableFormat::resolve(&self.output, self.format)
    }

    /// Extraction request described by this configuration.
    pub fn to_request(&self) -> Result<ExtractionRequest, ConfigError> {
        self.validate()?;
        let mut request = ExtractionRequest::new(self.variable, self.resolution)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?
            .with_columns(&self.lon_column, &self.lat_column)
            .with_pixel_window(self.pixel_window)
            .with_archive(self.archive_location());
        request.layers = LayerSelection::resolve(self.variable, self.layers.as_deref())?;
        Ok(request)
    }
}

/// Reads a table, inferring the format from the extension unless `format` is given.
pub fn read_table<P: AsRef<Path>>(path: P, format: Option<TableFormat>) -> TableResult<DataFrame> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TableError::NotFound(path.display().to_string()));
    }
    let format = TableFormat::resolve(path, format)?;
    debug!("Reading {} table from {}", format, path.display());

    let df = match format {
        TableFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(None)
            .try_into_reader_with_file_path(Some(PathBuf::from(path)))?
            .finish()?,
        TableFormat::Parquet => ParquetReader::new(File::open(path)?).finish()?,
        TableFormat::Xlsx => read_excel(path)?,
    };

    debug!("Read table with shape {:?}", df.shape());
    Ok(df)
}

/// First worksheet of a workbook, first row as header.
///
/// Columns whose non-empty cells are all numeric become `Float64`; every other column
/// is read as strings. Empty cells are nulls.
fn read_excel(path: &Path) -> TableResult<DataFrame> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| TableError::EmptyWorkbook(path.display().to_string()))??;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(DataFrame::empty());
    };
    let names = header_names(header);
    let body: Vec<&[Data]> = rows.collect();

    let columns = names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let cells: Vec<&Data> = body
                .iter()
                .map(|row| row.get(index).unwrap_or(&Data::Empty))
                .collect();
            excel_column(name, &cells)
        })
        .collect::<Vec<Column>>();

    Ok(DataFrame::new(columns)?)
}

fn header_names(header: &[Data]) -> Vec<String> {
    let mut seen = HashSet::new();
    header
        .iter()
        .enumerate()
        .map(|(index, cell)| {
            let base = match cell {
                Data::Empty => format!("column_{}", index + 1),
                other => other.to_string().trim().to_string(),
            };
            let mut name = base.clone();
            let mut suffix = 1;
            while !seen.insert(name.clone()) {
                suffix += 1;
                name = format!("{}_{}", base, suffix);
            }
            name
        })
        .collect()
}

fn excel_column(name: &str, cells: &[&Data]) -> Column {
    let numeric = cells
        .iter()
        .all(|cell| matches!(cell, Data::Int(_) | Data::Float(_) | Data::Empty));

    if numeric {
        let values: Vec<Option<f64>> = cells
            .iter()
            .map(|cell| match cell {
                Data::Int(v) => Some(*v as f64),
                Data::Float(v) => Some(*v),
                _ => None,
            })
            .collect();
        Series::new(name.into(), values).into()
    } else {
        let values: Vec<Option<String>> = cells
            .iter()
            .map(|cell| match cell {
                Data::Empty => None,
                other => Some(other.to_string()),
            })
            .collect();
        Series::new(name.into(), values).into()
    }
}
