use clap::Parser;
use worldclim_extract::cli::Cli;
use worldclim_extract::commands;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(error) = commands::run(cli) {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}

/// RUST_LOG wins unless `--verbose` or `--quiet` was given.
fn init_logging(cli: &Cli) {
    let level = cli.log_level();
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.to_string().to_lowercase()),
    );
    if cli.verbose || cli.quiet {
        builder.filter_level(level);
    }
    builder.format_timestamp(None).init();
}
