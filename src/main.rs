use clap::Parser;
use std::path::PathBuf;

use service_center::config::{load_config, RegistryConfig};
use service_center::lifecycle::startup;

#[derive(Parser)]
#[command(name = "service-center")]
#[command(about = "Service registry and client-side load balancer", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => load_config(&path)?,
        None => RegistryConfig::default(),
    };

    startup::run(config).await
}
