//! ichirou init binary.

use clap::Parser;
use ichirou::Init;
use ichirou_config::load_system_config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ichirou", about = "ichirou - PID 1 init process", version)]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Don't require running as PID 1
    #[arg(long)]
    no_pid1: bool,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = load_system_config(cli.config.as_deref())?.init;
    if cli.no_pid1 {
        config.require_pid1 = false;
    }

    let init = Init::new(config)?;
    init.run()?;

    Ok(())
}
