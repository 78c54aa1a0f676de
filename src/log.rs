use crate::input::JobConfig;
use log::info;
use polars::prelude::DataFrame;
use std::time::Duration;

pub fn show_greeting(config_source: &str) {
    info!("=== WorldClim Coordinate Extractor ===");
    info!("Loading configuration from: {}", config_source);
}

pub fn config_echo(config: &JobConfig) {
    info!("Configuration:");
    info!("  Input table: {}", config.input);
    info!("  Output table: {}", config.output);
    info!("  Variable: {} ({})", config.variable, config.variable.description());
    info!("  Resolution: {}", config.resolution);
    match &config.layers {
        Some(layers) => info!("  Layers: {:?}", layers),
        None => info!("  Layers: all {}", config.variable.layer_count()),
    }
    info!("  Coordinates: {} / {}", config.lon_column, config.lat_column);
    if config.pixel_window > 1 {
        info!("  Pixel window: {0}x{0} mean", config.pixel_window);
    }
    info!("  Archive: {}", config.archive_location());
}

pub fn show_extraction_summary(df: &DataFrame, columns: &[String]) {
    info!("Extraction Results:");
    info!("  Rows: {}", df.height());
    for name in columns {
        if let Ok(column) = df.column(name) {
            info!(
                "  {}: {} values, {} without data",
                name,
                column.len() - column.null_count(),
                column.null_count()
            );
        }
    }
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    info!(
        "=== Extraction completed successfully in {:.2}s ===",
        elapsed.as_secs_f64()
    );
}
