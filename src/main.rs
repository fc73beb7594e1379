use std::path::PathBuf;

use clap::Parser;

use chirp_core::config::{Config, SurfaceKind};

mod init;

#[derive(Parser)]
#[command(name = "chirp", version, about = "Multi-agent streaming chat responder")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "chirp.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate()?;

    let (engine, router) = init::build(&config).await?;

    match config.surface.kind {
        SurfaceKind::Cli => init::run_cli(engine, router).await,
        SurfaceKind::Discord => {
            init::run_discord(engine, router, config.surface.discord_token.clone()).await
        }
    }
}
