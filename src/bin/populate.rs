use anyhow::Result;
use clap::Parser;
use statline::{Cli, Populator};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.build_settings()?;
    let populator = Populator::new(settings);
    if let Err(err) = populator.run(cli.mode) {
        error!(mode = ?cli.mode, "pipeline failed: {err:#}");
        return Err(err);
    }
    Ok(())
}
