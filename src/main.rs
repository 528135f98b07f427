use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use polmap::config::AppConfig;
use polmap::data::Fixtures;
use polmap::{render, server};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the map tile pyramids and the mask feature
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Serve the generated tiles and the JSON API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Generate { config } => {
            tracing::info!("Generating map with config: {:?}", config);
            let app_config = AppConfig::load_from_file(config)?;

            let fixtures = Fixtures::load_lenient(&app_config.input);
            render::generate_tiles(&app_config, &fixtures)?;

            tracing::info!("Generation complete!");
        }
        Commands::Serve { config } => {
            tracing::info!("Serving map with config: {:?}", config);
            let app_config = AppConfig::load_from_file(config)?;

            let fixtures = Fixtures::load(&app_config.input)
                .context("Fixtures must load cleanly before serving")?;

            server::start_server(app_config, fixtures).await?;
        }
    }

    Ok(())
}
