use clap::Parser;

use snipbox::cli::args::{Cli, Commands};
use snipbox::cli::commands;
use snipbox::config::loader::load_config;
use snipbox::config::Language;
use snipbox::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.global_opts.verbose);

    let config = load_config(cli.global_opts.config.as_deref())?;
    let format = cli.global_opts.format.clone();

    match cli.command {
        Commands::Python(args) => {
            commands::run(Language::Python, args, config, format).await?;
        }
        Commands::Js(args) => {
            commands::run(Language::JavaScript, args, config, format).await?;
        }
        Commands::Analyze(args) => {
            commands::analyze(args, config, format).await?;
        }
        Commands::Backends(args) => {
            commands::backends(args, config, format).await?;
        }
        Commands::Init(args) => {
            commands::init(args).await?;
        }
        Commands::Config(args) => {
            commands::config(args, config).await?;
        }
    }

    Ok(())
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the result; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
