#[cfg(not(unix))]
compile_error!("Only unix platforms are currently supported");

use std::path::PathBuf;

use clap::Parser;
use courier::{Config, Courier, config};
use courier_common::{internal, logging};
use courier_delivery::Dispatcher;

#[derive(Debug, Parser)]
#[command(version, about = "Queue notification emails and relay them over SMTP")]
struct Cli {
    /// Configuration file, takes precedence over COURIER_CONFIG
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let path = config::locate(
        cli.config,
        std::env::var_os(config::CONFIG_ENV).map(PathBuf::from),
    )?;
    match &path {
        Some(path) => internal!(level = INFO, "Using configuration from {}", path.display()),
        None => internal!(level = INFO, "No configuration file found, using defaults"),
    }

    let mut config = Config::load(path.as_deref())?;
    config.apply_env(|name| std::env::var(name).ok())?;

    if cli.check {
        Dispatcher::from_config(config.dispatcher)?;
        println!("Configuration OK");
        return Ok(());
    }

    Courier::new(config).run().await
}
