//! # Command Handlers
//!
//! One handler per CLI subcommand. Handlers print results to stdout and report
//! failures as [`anyhow::Error`] with context.

use crate::catalog::{
    archive_url, parse_archive_name, Resolution, Variable, DEFAULT_BASE_URL,
};
use crate::cli::{Cli, Commands, ConfigFormat, ExtractArgs, OutputFormat, TemplateType};
use crate::info::{
    get_archive_info, print_archive_info_csv, print_archive_info_human, print_archive_info_json,
    print_archive_info_yaml,
};
use crate::input::JobConfig;
use crate::log::{config_echo, show_extraction_summary, show_farewell_with_timing, show_greeting};
use crate::storage::{HttpConfig, StorageFactory};
use crate::vsi::{ArchiveLocation, RasterPath};
use crate::process_extraction_job;
use anyhow::{anyhow, bail, Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, Shell};
use log::{info, warn};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

/// Runs the parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let progress = !cli.quiet;
    let output_format = cli.output_format.clone();
    match &cli.command {
        Commands::Extract(args) => handle_extract(args, cli.config.as_deref(), progress),
        Commands::Validate {
            config_file,
            detailed,
        } => {
            let path = config_file
                .as_deref()
                .or(cli.config.as_deref())
                .ok_or_else(|| anyhow!("No configuration file given (pass a path or --config)"))?;
            handle_validate(path, *detailed)
        }
        Commands::Info {
            archive,
            variable,
            resolution,
            layer,
            base_url,
            format,
        } => {
            let target = resolve_info_target(
                archive.as_deref(),
                *variable,
                *resolution,
                *layer,
                base_url.as_deref(),
            )?;
            let http = http_settings(cli.config.as_deref())?;
            handle_info(&target, format.clone().unwrap_or(output_format), &http)
        }
        Commands::Catalog {
            variable,
            resolution,
            base_url,
        } => handle_catalog(
            *variable,
            *resolution,
            base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            &output_format,
        ),
        Commands::Template {
            template_type,
            output,
            format,
        } => handle_template(template_type, output.as_deref(), format),
        Commands::Completions { shell, output } => handle_completions(*shell, output.as_deref()),
    }
}

/// Resolves the configuration, checks the output and runs the extraction.
pub fn handle_extract(args: &ExtractArgs, config_path: Option<&Path>, progress: bool) -> Result<()> {
    let start_time = Instant::now();

    let base = match config_path {
        Some(path) => {
            show_greeting(&path.display().to_string());
            Some(
                JobConfig::from_file(path)
                    .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
            )
        }
        None => {
            show_greeting("command line arguments");
            None
        }
    };

    let config = args.merge_into(base).map_err(|e| anyhow!(e))?;
    config.validate().context("Invalid configuration")?;
    config_echo(&config);
    let format = config
        .output_format()
        .context("Cannot determine the output format")?;

    if args.dry_run {
        print_extraction_plan(&config)?;
        return Ok(());
    }

    if Path::new(&config.output).exists() && !args.force {
        bail!(
            "Output file {} already exists (use --force to overwrite)",
            config.output
        );
    }

    let result = process_extraction_job(&config, progress)?;
    show_extraction_summary(&result, &config.to_request()?.column_names());
    info!("Wrote {} table {}", format, config.output);
    show_farewell_with_timing(start_time.elapsed());
    Ok(())
}

fn print_extraction_plan(config: &JobConfig) -> Result<()> {
    let request = config.to_request()?;
    println!("Dry run - nothing will be read or written");
    println!("  Input: {}", config.input);
    println!("  Output: {} ({})", config.output, config.output_format()?);
    println!("  Archive: {}", request.archive);
    if config.pixel_window > 1 {
        println!("  Pixel window: {0}x{0}", config.pixel_window);
    }
    println!("  Layers:");
    for (path, column) in request.raster_paths().iter().zip(request.column_names()) {
        println!("    {} -> {}", path, column);
    }
    Ok(())
}

/// Loads and validates a configuration file.
pub fn handle_validate(path: &Path, detailed: bool) -> Result<()> {
    let config = JobConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Configuration {} is invalid", path.display()))?;

    if detailed {
        let request = config.to_request()?;
        println!("Configuration: {}", path.display());
        println!("  Variable: {} ({})", config.variable, config.variable.description());
        println!("  Resolution: {}", config.resolution);
        println!("  Columns: {}", request.column_names().join(", "));
        println!("  Archive: {}", request.archive);

        let format = config
            .output_format()
            .context("Cannot determine the output format")?;
        println!("  Output format: {}", format);
        if !Path::new(&config.input).exists() {
            warn!("Input file {} does not exist yet", config.input);
        }
        match StorageFactory::exists(&request.archive, &config.http) {
            Ok(true) => println!("  Archive reachable: yes"),
            Ok(false) => warn!("Archive {} does not exist", request.archive),
            Err(e) => warn!("Could not check archive {}: {}", request.archive, e),
        }
    }

    println!("✓ Configuration is valid");
    Ok(())
}

/// Archive and optional member selected by the `info` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoTarget {
    pub location: ArchiveLocation,
    pub member: Option<String>,
}

pub fn resolve_info_target(
    archive: Option<&str>,
    variable: Option<Variable>,
    resolution: Option<Resolution>,
    layer: Option<u32>,
    base_url: Option<&str>,
) -> Result<InfoTarget> {
    if let Some(path) = archive
        && path.starts_with("/vsizip/")
    {
        let raster: RasterPath = path.parse()?;
        return Ok(InfoTarget {
            location: raster.archive,
            member: Some(raster.member),
        });
    }

    let selection = match (variable, resolution) {
        (Some(variable), Some(resolution)) => Some((variable, resolution)),
        _ => archive.and_then(parse_archive_name),
    };

    let location = match archive {
        Some(path) => ArchiveLocation::parse(path),
        None => {
            let (variable, resolution) = selection
                .ok_or_else(|| anyhow!("Give an archive path or both --variable and --resolution"))?;
            ArchiveLocation::for_selection(
                base_url.unwrap_or(DEFAULT_BASE_URL),
                variable,
                resolution,
            )
        }
    };

    let member = match layer {
        Some(index) => {
            let (variable, resolution) = selection.ok_or_else(|| {
                anyhow!("--layer needs --variable and --resolution for an archive named {}", location)
            })?;
            Some(variable.layer(index)?.member_name(resolution))
        }
        None => None,
    };

    Ok(InfoTarget { location, member })
}

/// HTTP settings from the `http` block of a job configuration, or the defaults.
pub fn http_settings(config_path: Option<&Path>) -> Result<HttpConfig> {
    let Some(path) = config_path else {
        return Ok(HttpConfig::default());
    };
    let config = JobConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if config.http.block_size == 0 {
        bail!("http.block_size must be > 0");
    }
    Ok(config.http)
}

pub fn handle_info(target: &InfoTarget, format: OutputFormat, http: &HttpConfig) -> Result<()> {
    let info = get_archive_info(&target.location, target.member.as_deref(), http)?;
    match format {
        OutputFormat::Human => print_archive_info_human(&info),
        OutputFormat::Json => print_archive_info_json(&info)?,
        OutputFormat::Yaml => print_archive_info_yaml(&info)?,
        OutputFormat::Csv => print_archive_info_csv(&info)?,
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableEntry {
    pub code: String,
    pub description: String,
    pub units: String,
    pub layers: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionEntry {
    pub code: String,
    pub cell_size_degrees: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerEntry {
    pub layer: u32,
    pub member: String,
    pub virtual_path: String,
    pub column: String,
}

/// What `catalog` prints: the whole catalog, or the naming of one selection.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CatalogListing {
    Overview {
        variables: Vec<VariableEntry>,
        resolutions: Vec<ResolutionEntry>,
    },
    Selection {
        variable: VariableEntry,
        resolution: ResolutionEntry,
        archive_url: String,
        layers: Vec<LayerEntry>,
    },
}

fn variable_entry(variable: Variable) -> VariableEntry {
    VariableEntry {
        code: variable.code().to_string(),
        description: variable.description().to_string(),
        units: variable.units().to_string(),
        layers: variable.layer_count(),
    }
}

fn resolution_entry(resolution: Resolution) -> ResolutionEntry {
    ResolutionEntry {
        code: resolution.code().to_string(),
        cell_size_degrees: resolution.cell_size_degrees(),
    }
}

pub fn catalog_listing(
    variable: Option<Variable>,
    resolution: Option<Resolution>,
    base_url: &str,
) -> CatalogListing {
    match (variable, resolution) {
        (Some(variable), Some(resolution)) => {
            let archive = ArchiveLocation::for_selection(base_url, variable, resolution);
            CatalogListing::Selection {
                variable: variable_entry(variable),
                resolution: resolution_entry(resolution),
                archive_url: archive_url(base_url, variable, resolution),
                layers: variable
                    .layers()
                    .iter()
                    .map(|layer| LayerEntry {
                        layer: layer.index(),
                        member: layer.member_name(resolution),
                        virtual_path: RasterPath::for_layer(&archive, layer, resolution).to_string(),
                        column: layer.column_name(resolution),
                    })
                    .collect(),
            }
        }
        _ => CatalogListing::Overview {
            variables: variable
                .map(|v| vec![v])
                .unwrap_or_else(|| Variable::ALL.to_vec())
                .into_iter()
                .map(variable_entry)
                .collect(),
            resolutions: resolution
                .map(|r| vec![r])
                .unwrap_or_else(|| Resolution::ALL.to_vec())
                .into_iter()
                .map(resolution_entry)
                .collect(),
        },
    }
}

pub fn handle_catalog(
    variable: Option<Variable>,
    resolution: Option<Resolution>,
    base_url: &str,
    format: &OutputFormat,
) -> Result<()> {
    let listing = catalog_listing(variable, resolution, base_url);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listing)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&listing)?),
        OutputFormat::Csv => print_catalog_csv(&listing),
        OutputFormat::Human => print_catalog_human(&listing),
    }
    Ok(())
}

fn print_catalog_human(listing: &CatalogListing) {
    match listing {
        CatalogListing::Overview {
            variables,
            resolutions,
        } => {
            println!("WorldClim 2.1 Variables:");
            for v in variables {
                println!(
                    "  {:<5} {:>2} layer(s)  {} [{}]",
                    v.code, v.layers, v.description, v.units
                );
            }
            println!("Resolutions:");
            for r in resolutions {
                println!("  {:<5} {:.6} degrees", r.code, r.cell_size_degrees);
            }
        }
        CatalogListing::Selection {
            variable,
            resolution,
            archive_url,
            layers,
        } => {
            println!(
                "{} at {}: {} [{}]",
                variable.code, resolution.code, variable.description, variable.units
            );
            println!("  Archive: {}", archive_url);
            println!("  Layers:");
            for layer in layers {
                println!("    {:>2} {} -> {}", layer.layer, layer.virtual_path, layer.column);
            }
        }
    }
}

fn print_catalog_csv(listing: &CatalogListing) {
    match listing {
        CatalogListing::Overview { variables, .. } => {
            println!("variable,layers,units,description");
            for v in variables {
                println!("{},{},{},\"{}\"", v.code, v.layers, v.units, v.description);
            }
        }
        CatalogListing::Selection { layers, .. } => {
            println!("layer,member,virtual_path,column");
            for layer in layers {
                println!(
                    "{},{},{},{}",
                    layer.layer, layer.member, layer.virtual_path, layer.column
                );
            }
        }
    }
}

/// Configuration written by `template`.
pub fn template_config(template_type: &TemplateType) -> JobConfig {
    match template_type {
        TemplateType::Basic => JobConfig::new(
            "sites.csv",
            "sites_bio_10m.csv",
            Variable::Bio,
            Resolution::TenMinutes,
        ),
        TemplateType::Window => {
            let mut config = JobConfig::new(
                "sites.csv",
                "sites_tavg_window.parquet",
                Variable::Tavg,
                Resolution::TwoAndHalfMinutes,
            );
            config.pixel_window = 3;
            config
        }
        TemplateType::Subset => {
            let mut config = JobConfig::new(
                "plots.xlsx",
                "plots_prec.xlsx",
                Variable::Prec,
                Resolution::FiveMinutes,
            );
            config.lon_column = "lon".to_string();
            config.lat_column = "lat".to_string();
            config.layers = Some(vec![1, 4, 7, 10]);
            config
        }
        TemplateType::LocalMirror => {
            let mut config = JobConfig::new(
                "sites.csv",
                "sites_elev.csv",
                Variable::Elev,
                Resolution::ThirtySeconds,
            );
            config.base_url = "/data/worldclim/2_1/base".to_string();
            config
        }
    }
}

pub fn handle_template(template_type: &TemplateType, output: Option<&Path>, format: &ConfigFormat) -> Result<()> {
    let config = template_config(template_type);
    let content = match format {
        ConfigFormat::Json => config.to_json()?,
        ConfigFormat::Yaml => config.to_yaml()?,
    };

    match output {
        Some(path) => {
            std::fs::write(path, &content)
                .with_context(|| format!("Failed to write template to {}", path.display()))?;
            info!("Template written to {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

pub fn handle_completions(shell: Shell, output: Option<&Path>) -> Result<()> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    match output {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            generate(shell, &mut command, name, &mut file);
            file.flush()?;
        }
        None => generate(shell, &mut command, name, &mut io::stdout()),
    }
    Ok(())
}
