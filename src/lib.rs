//! # worldclim-extract
//!
//! A Rust library for sampling WorldClim 2.1 climate rasters at the coordinates of a table.
//!
//! ## Features
//!
//! - **Catalog naming**: Archive, member and column names for every variable and resolution
//! - **Range reads**: GeoTIFF members are read straight from local or remote zip archives
//! - **Pixel windows**: Single pixel values or the mean of an odd N x N neighbourhood
//! - **Tables**: CSV, Parquet and Excel input and output through polars
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use worldclim_extract::{process_extraction_job, input::JobConfig};
//!
//! // Load configuration from a YAML or JSON file
//! let config = JobConfig::from_file("job.yaml").expect("Failed to load config");
//!
//! // Sample every requested layer and write the augmented table
//! let table = process_extraction_job(&config, false).expect("Extraction failed");
//! println!("{} rows", table.height());
//! ```
//!
//! ## Configuration Example
//!
//! ```json
//! {
//!   "input": "sites.csv",
//!   "output": "sites_prec.parquet",
//!   "variable": "prec",
//!   "resolution": "10m",
//!   "layers": [1, 7],
//!   "pixel_window": 3
//! }
//! ```

pub mod archive;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod extract;
pub mod info;
pub mod input;
pub mod log;
pub mod output;
pub mod raster;
pub mod storage;
pub mod vsi;


use crate::extract::extract_layers;
use crate::input::{read_table, JobConfig};
use crate::output::write_table;
use anyhow::{Context, Result};
use polars::prelude::DataFrame;

/// Runs one extraction job end to end.
///
/// This function orchestrates the whole pipeline:
/// 1. Reads the input table (format from its extension)
/// 2. Resolves the layers and the archive location
/// 3. Samples every layer at every coordinate
/// 4. Writes the table with one column appended per layer
///
/// Returns the written table.
///
/// # Errors
///
/// This function will return an error if:
/// - The configuration is invalid
/// - The input table cannot be read or lacks the coordinate columns
/// - A coordinate is missing, non-numeric or out of range
/// - The archive or one of its members cannot be read
/// - The output table cannot be written
pub fn process_extraction_job(config: &JobConfig, progress: bool) -> Result<DataFrame> {
    let request = config
        .to_request()
        .context("Invalid configuration")?
        .with_progress(progress);

    let table = read_table(&config.input, None)
        .with_context(|| format!("Failed to read input table: {}", config.input))?;
    ::log::info!("Read {} rows from {}", table.height(), config.input);

    let result = extract_layers(&table, &request, &config.http)
        .with_context(|| format!("Failed to sample {}", request.archive))?;

    write_table(&result, &config.output, config.format)
        .with_context(|| format!("Failed to write output table: {}", config.output))?;

    Ok(result)
}
