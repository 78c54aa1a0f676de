//! # CLI Module
//!
//! This module provides the command-line interface for worldclim-extract, including:
//! - Argument parsing with clap
//! - Configuration file loading (JSON/YAML)
//! - Environment variable support with the WORLDCLIM_EXTRACT_ prefix
//! - Multi-source configuration merging with priority CLI > environment > config file
//! - Subcommands for extraction, validation, inspection, templates and completions

use crate::catalog::{Resolution, Variable};
use crate::input::{JobConfig, TableFormat};
use crate::raster::{is_valid_window, MAX_PIXEL_WINDOW};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sample WorldClim climate rasters at the coordinates of a table
#[derive(Parser, Debug)]
#[command(name = "worldclim-extract")]
#[command(about = "Extract WorldClim 2.1 raster values at tabulated coordinates")]
#[command(version)]
#[command(long_about = "
worldclim-extract reads a table of longitude/latitude points, samples the WorldClim 2.1
climate rasters at each point and writes the table back with one column per layer.

Rasters are read straight from the zip archives published by WorldClim using HTTP range
requests, so only the parts of the archive that hold the sampled pixels are downloaded
(for archives stored without compression).

FEATURES:
  • Variables: bio, elev, tmin, tmax, tavg, prec, srad, wind, vapr
  • Resolutions: 30s, 2.5m, 5m, 10m
  • Tables: CSV, Parquet and Excel in and out
  • Pixel windows: mean over an N x N neighbourhood
  • Configuration files: JSON and YAML with templates
  • Shell completions: bash, zsh, fish, PowerShell and elvish

EXAMPLES:
  # Bioclimatic variables at 10 arc-minutes
  worldclim-extract extract sites.csv sites_bio.csv -V bio -r 10m

  # January and July minimum temperature, 3x3 pixel mean
  worldclim-extract extract sites.xlsx out.xlsx -V tmin -r 2.5m --layers 1,7 --window 3

  # Using a config file
  worldclim-extract extract --config job.yaml

  # Inspect an archive
  worldclim-extract info -V prec -r 10m --layer 1

  # List variables and naming
  worldclim-extract catalog -V bio -r 30s
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for structured data
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Configuration file path (JSON or YAML)
    #[arg(short, long, global = true, env = "WORLDCLIM_EXTRACT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level selected by `--verbose` / `--quiet`.
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract raster values for every coordinate of a table
    #[command(long_about = "
Extract WorldClim raster values for every row of a coordinate table.

The output holds every input row in input order, the input columns untouched and one
column per layer named <variable>_<resolution>_<layer> (elev_<resolution> for elevation).
Points outside the raster or on masked pixels get an empty value.

EXAMPLES:
  # All 19 bioclimatic layers
  worldclim-extract extract sites.csv out.csv -V bio -r 10m

  # Custom coordinate columns, selected layers, Parquet output
  worldclim-extract extract sites.csv out.parquet -V prec -r 5m \\
    --lon-column x --lat-column y --layers 6,12

  # Local mirror of the archives
  worldclim-extract extract sites.csv out.csv -V elev -r 30s --base-url /data/worldclim

  # Dry run: show the plan without downloading anything
  worldclim-extract extract sites.csv out.csv -V tavg -r 10m --dry-run

  # Config file with overrides
  worldclim-extract extract --config job.json -V tmax --force
")]
    Extract(ExtractArgs),

    /// Validate configuration file or arguments
    #[command(long_about = "
Validate configuration files without processing.

This command checks:
• Configuration file syntax and structure
• Variable, resolution and layer codes
• Pixel window and coordinate column settings
• Input file existence and output format (with --detailed)

EXAMPLES:
  # Validate a configuration file
  worldclim-extract validate job.json

  # Validate with detailed output
  worldclim-extract validate job.yaml --detailed

  # Validate using global config
  worldclim-extract validate --config ~/.worldclim-extract.yaml
")]
    Validate {
        /// Configuration file to validate
        config_file: Option<PathBuf>,

        /// Show detailed validation report
        #[arg(long)]
        detailed: bool,
    },

    /// Show information about a WorldClim archive
    #[command(long_about = "
Inspect a WorldClim zip archive (local or remote) and list its members.

With --layer, the raster metadata of that layer is shown as well: size, pixel size,
bounds, sample format, chunk layout and no-data value.

The archive is given as a path, a URL or a /vsizip/ virtual path. Without one, the
archive of -V/-r on the default WorldClim host is used.

EXAMPLES:
  # Members of the 10m precipitation archive
  worldclim-extract info -V prec -r 10m

  # Metadata of one layer
  worldclim-extract info /data/wc2.1_10m_bio.zip --layer 12

  # A single raster through its virtual path, as JSON
  worldclim-extract info /vsizip//data/wc2.1_10m_elev.zip/wc2.1_10m_elev.tif --format json
")]
    Info {
        /// Archive path, URL or /vsizip/ path
        archive: Option<String>,

        /// WorldClim variable
        #[arg(short = 'V', long)]
        variable: Option<Variable>,

        /// WorldClim resolution
        #[arg(short, long)]
        resolution: Option<Resolution>,

        /// Layer whose raster metadata to show
        #[arg(short, long)]
        layer: Option<u32>,

        /// Base URL used when no archive is given
        #[arg(long, env = "WORLDCLIM_EXTRACT_BASE_URL")]
        base_url: Option<String>,

        /// Output format for archive information
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Show the WorldClim variables, resolutions and naming
    #[command(long_about = "
List the variables and resolutions of WorldClim 2.1.

With both -V and -r, also show the archive URL, the virtual path of each layer and the
name of the column each layer produces.

EXAMPLES:
  # Every variable
  worldclim-extract catalog

  # Naming for monthly precipitation at 2.5 arc-minutes
  worldclim-extract catalog -V prec -r 2.5m --output-format json
")]
    Catalog {
        /// WorldClim variable
        #[arg(short = 'V', long)]
        variable: Option<Variable>,

        /// WorldClim resolution
        #[arg(short, long)]
        resolution: Option<Resolution>,

        /// Base URL of the archives
        #[arg(long, env = "WORLDCLIM_EXTRACT_BASE_URL")]
        base_url: Option<String>,
    },

    /// Generate configuration templates
    #[command(long_about = "
Generate configuration file templates for common use cases.

Available templates:
• basic: All layers of one variable at one resolution
• window: Neighbourhood mean over a pixel window
• subset: A few layers with custom coordinate columns
• local-mirror: Archives read from a local directory

EXAMPLES:
  # Generate basic JSON template
  worldclim-extract template basic

  # Generate YAML template to file
  worldclim-extract template window --format yaml -o job.yaml
")]
    Template {
        /// Template type to generate
        #[arg(value_enum)]
        template_type: TemplateType,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },

    /// Generate shell completions
    #[command(long_about = "
Generate shell completion scripts for various shells.

INSTALLATION:
  # Bash
  worldclim-extract completions bash > ~/.bash_completion.d/worldclim-extract

  # Zsh
  worldclim-extract completions zsh > ~/.zsh/completions/_worldclim-extract

  # Fish
  worldclim-extract completions fish > ~/.config/fish/completions/worldclim-extract.fish
")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Arguments of the `extract` command.
///
/// Every option can also come from a `WORLDCLIM_EXTRACT_*` environment variable.
#[derive(Args, Debug, Clone, Default)]
pub struct ExtractArgs {
    /// Input table (CSV, Parquet or Excel)
    #[arg(value_name = "INPUT", env = "WORLDCLIM_EXTRACT_INPUT")]
    pub input: Option<String>,

    /// Output table (CSV, Parquet or Excel)
    #[arg(value_name = "OUTPUT", env = "WORLDCLIM_EXTRACT_OUTPUT")]
    pub output: Option<String>,

    /// WorldClim variable: bio, elev, tmin, tmax, tavg, prec, srad, wind, vapr
    #[arg(short = 'V', long, env = "WORLDCLIM_EXTRACT_VARIABLE")]
    pub variable: Option<Variable>,

    /// WorldClim resolution: 30s, 2.5m, 5m, 10m
    #[arg(short, long, env = "WORLDCLIM_EXTRACT_RESOLUTION")]
    pub resolution: Option<Resolution>,

    /// Longitude column name
    #[arg(long, env = "WORLDCLIM_EXTRACT_LON_COLUMN")]
    pub lon_column: Option<String>,

    /// Latitude column name
    #[arg(long, env = "WORLDCLIM_EXTRACT_LAT_COLUMN")]
    pub lat_column: Option<String>,

    /// Odd pixel window edge; values above 1 average the neighbourhood
    #[arg(short, long, env = "WORLDCLIM_EXTRACT_WINDOW", value_parser = parse_window)]
    pub window: Option<u32>,

    /// Layers to extract, e.g. 1,5,12 (default: all)
    #[arg(short, long, env = "WORLDCLIM_EXTRACT_LAYERS", value_parser = parse_layers)]
    pub layers: Option<LayerList>,

    /// Directory URL or local directory holding the archives
    #[arg(long, env = "WORLDCLIM_EXTRACT_BASE_URL")]
    pub base_url: Option<String>,

    /// Explicit archive path or URL (overrides --base-url)
    #[arg(long, env = "WORLDCLIM_EXTRACT_ARCHIVE")]
    pub archive: Option<String>,

    /// Output table format (default: from the output extension)
    #[arg(short, long, value_enum, env = "WORLDCLIM_EXTRACT_FORMAT")]
    pub format: Option<TableFormat>,

    /// Force overwrite existing output files
    #[arg(long, env = "WORLDCLIM_EXTRACT_FORCE")]
    pub force: bool,

    /// Dry run - resolve and print the plan without reading any archive
    #[arg(long, env = "WORLDCLIM_EXTRACT_DRY_RUN")]
    pub dry_run: bool,
}

/// Comma separated layer numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerList(pub Vec<u32>);

#[derive(ValueEnum, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
    /// CSV output (where applicable)
    Csv,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum TemplateType {
    /// All layers of one variable
    Basic,
    /// Pixel window mean
    Window,
    /// Layer subset with custom columns
    Subset,
    /// Archives from a local directory
    LocalMirror,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON configuration format
    Json,
    /// YAML configuration format
    Yaml,
}

/// Parse a layer list from command line or environment
/// Format: 1,5,12 (ranges such as 1-3 are expanded)
pub fn parse_layers(s: &str) -> Result<LayerList, String> {
    let mut layers = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start
                    .trim()
                    .parse()
                    .map_err(|_| format!("Invalid layer range start: {}", part))?;
                let end: u32 = end
                    .trim()
                    .parse()
                    .map_err(|_| format!("Invalid layer range end: {}", part))?;
                if start > end {
                    return Err(format!("Layer range {} is reversed", part));
                }
                layers.extend(start..=end);
            }
            None => layers.push(
                part.parse()
                    .map_err(|_| format!("Invalid layer number: {}", part))?,
            ),
        }
    }
    if layers.is_empty() {
        return Err("Layer list is empty".to_string());
    }
    Ok(LayerList(layers))
}

/// Parse a pixel window size, which must be odd and at most `MAX_PIXEL_WINDOW`
fn parse_window(s: &str) -> Result<u32, String> {
    let size: u32 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid pixel window: {}", s))?;
    if !is_valid_window(size) {
        return Err(format!(
            "Pixel window must be an odd number between 1 and {}, got {}",
            MAX_PIXEL_WINDOW, size
        ));
    }
    Ok(size)
}

impl ExtractArgs {
    /// Merges these arguments over an optional configuration file.
    ///
    /// Arguments (already resolved by clap from the command line or the environment)
    /// override the file; without a file, input, output, variable and resolution are
    /// required.
    pub fn merge_into(&self, base: Option<JobConfig>) -> Result<JobConfig, String> {
        let mut config = match base {
            Some(config) => config,
            None => {
                let mut missing = Vec::new();
                if self.input.is_none() {
                    missing.push("INPUT");
                }
                if self.output.is_none() {
                    missing.push("OUTPUT");
                }
                if self.variable.is_none() {
                    missing.push("--variable");
                }
                if self.resolution.is_none() {
                    missing.push("--resolution");
                }
                if !missing.is_empty() {
                    return Err(format!(
                        "Missing {} (pass them as arguments, environment variables or in --config)",
                        missing.join(", ")
                    ));
                }
                JobConfig::new("", "", Variable::Bio, Resolution::TenMinutes)
            }
        };

        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(variable) = self.variable {
            if variable != config.variable && self.layers.is_none() {
                // Layer numbers of another variable may not exist for this one
                config.layers = None;
            }
            config.variable = variable;
        }
        if let Some(resolution) = self.resolution {
            config.resolution = resolution;
        }
        if let Some(lon_column) = &self.lon_column {
            config.lon_column = lon_column.clone();
        }
        if let Some(lat_column) = &self.lat_column {
            config.lat_column = lat_column.clone();
        }
        if let Some(window) = self.window {
            config.pixel_window = window;
        }
        if let Some(LayerList(layers)) = &self.layers {
            config.layers = Some(layers.clone());
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(archive) = &self.archive {
            config.archive = Some(archive.clone());
        }
        if let Some(format) = self.format {
            config.format = Some(format);
        }
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Global mutex to ensure environment variable tests run sequentially
    pub(crate) static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const EXTRACT_VARS: [&str; 4] = [
        "WORLDCLIM_EXTRACT_VARIABLE",
        "WORLDCLIM_EXTRACT_RESOLUTION",
        "WORLDCLIM_EXTRACT_LAYERS",
        "WORLDCLIM_EXTRACT_WINDOW",
    ];

    fn extract_args(cli: Cli) -> ExtractArgs {
        match cli.command {
            Commands::Extract(args) => args,
            other => panic!("Expected extract command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_layers() {
        assert_eq!(parse_layers("1,5,12").unwrap(), LayerList(vec![1, 5, 12]));
        assert_eq!(parse_layers(" 3 , 1-3 ").unwrap(), LayerList(vec![3, 1, 2, 3]));
        assert!(parse_layers("").is_err());
        assert!(parse_layers("a").is_err());
        assert!(parse_layers("5-2").is_err());
    }

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("3").unwrap(), 3);
        assert!(parse_window("4").is_err());
        assert!(parse_window("0").is_err());
        assert!(parse_window("-1").is_err());
        assert!(parse_window("101").is_ok());
        assert!(parse_window("200001").is_err());
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::parse_from(["worldclim-extract", "-q", "catalog"]);
        assert_eq!(cli.log_level(), LevelFilter::Error);
        let cli = Cli::parse_from(["worldclim-extract", "-v", "catalog"]);
        assert_eq!(cli.log_level(), LevelFilter::Debug);
        let cli = Cli::parse_from(["worldclim-extract", "catalog"]);
        assert_eq!(cli.log_level(), LevelFilter::Info);
    }

    #[test]
    fn test_merge_without_config_requires_selection() {
        let args = ExtractArgs {
            input: Some("a.csv".to_string()),
            ..ExtractArgs::default()
        };
        let error = args.merge_into(None).unwrap_err();
        assert!(error.contains("OUTPUT"));
        assert!(error.contains("--variable"));
        assert!(error.contains("--resolution"));
        assert!(!error.contains("INPUT,"));
    }

    #[test]
    fn test_merge_over_config() {
        let mut base = JobConfig::new("a.csv", "b.csv", Variable::Prec, Resolution::FiveMinutes);
        base.layers = Some(vec![6]);
        base.lat_column = "lat".to_string();

        let args = ExtractArgs {
            output: Some("c.parquet".to_string()),
            resolution: Some(Resolution::TenMinutes),
            window: Some(3),
            ..ExtractArgs::default()
        };
        let merged = args.merge_into(Some(base)).unwrap();
        assert_eq!(merged.input, "a.csv");
        assert_eq!(merged.output, "c.parquet");
        assert_eq!(merged.resolution, Resolution::TenMinutes);
        assert_eq!(merged.pixel_window, 3);
        assert_eq!(merged.lat_column, "lat");
        assert_eq!(merged.layers, Some(vec![6]));

        // Changing the variable drops layer numbers chosen for the old one
        let args = ExtractArgs {
            variable: Some(Variable::Elev),
            ..ExtractArgs::default()
        };
        let merged = args.merge_into(Some(merged)).unwrap();
        assert_eq!(merged.variable, Variable::Elev);
        assert_eq!(merged.layers, None);
    }

    #[test]
    fn test_environment_variables_fill_arguments() {
        // Acquire mutex to ensure exclusive access to environment variables
        let _guard = ENV_TEST_MUTEX.lock().unwrap();

        let originals: Vec<Option<String>> = EXTRACT_VARS.iter().map(|v| env::var(v).ok()).collect();
        unsafe {
            env::set_var("WORLDCLIM_EXTRACT_VARIABLE", "tmin");
            env::set_var("WORLDCLIM_EXTRACT_RESOLUTION", "2.5m");
            env::set_var("WORLDCLIM_EXTRACT_LAYERS", "1,7");
            env::set_var("WORLDCLIM_EXTRACT_WINDOW", "5");
        }

        let args = extract_args(Cli::parse_from(["worldclim-extract", "extract", "in.csv", "out.csv"]));
        assert_eq!(args.variable, Some(Variable::Tmin));
        assert_eq!(args.resolution, Some(Resolution::TwoAndHalfMinutes));
        assert_eq!(args.layers, Some(LayerList(vec![1, 7])));
        assert_eq!(args.window, Some(5));

        // Command line wins over the environment
        let args = extract_args(Cli::parse_from([
            "worldclim-extract",
            "extract",
            "in.csv",
            "out.csv",
            "-V",
            "tmax",
            "--window",
            "1",
        ]));
        assert_eq!(args.variable, Some(Variable::Tmax));
        assert_eq!(args.window, Some(1));

        // Environment wins over the config file
        let base = JobConfig::new("x.csv", "y.csv", Variable::Bio, Resolution::ThirtySeconds);
        let merged = args.merge_into(Some(base)).unwrap();
        assert_eq!(merged.resolution, Resolution::TwoAndHalfMinutes);
        assert_eq!(merged.layers, Some(vec![1, 7]));
        assert_eq!(merged.input, "in.csv");

        unsafe {
            for (name, original) in EXTRACT_VARS.iter().zip(originals) {
                env::remove_var(name);
                if let Some(value) = original {
                    env::set_var(name, value);
                }
            }
        }
    }

    #[test]
    fn test_invalid_environment_value_is_rejected() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        let original = env::var("WORLDCLIM_EXTRACT_VARIABLE").ok();
        unsafe {
            env::set_var("WORLDCLIM_EXTRACT_VARIABLE", "snowfall");
        }

        let result = Cli::try_parse_from(["worldclim-extract", "extract", "in.csv", "out.csv"]);
        assert!(result.is_err());

        unsafe {
            env::remove_var("WORLDCLIM_EXTRACT_VARIABLE");
            if let Some(value) = original {
                env::set_var("WORLDCLIM_EXTRACT_VARIABLE", value);
            }
        }
    }
}
