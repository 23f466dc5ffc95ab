use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rover_zenoh_runtime::config::RuntimeConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Rover actuation runtime: text commands over Zenoh to ramped PWM drive")]
struct Args {
    /// JSON config file (missing fields keep their defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the PWM bridge board
    #[arg(short, long, conflicts_with = "simulate")]
    port: Option<String>,

    /// Drive a simulated PWM device instead of the bridge board
    #[arg(long)]
    simulate: bool,

    /// Run each actuator briefly before accepting commands
    #[arg(long)]
    self_test: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(2);
            }
        },
        None => RuntimeConfig::default(),
    };
    if let Some(port) = args.port {
        config.bridge_port = Some(port);
    }
    if args.simulate {
        config.bridge_port = None;
    }
    config.self_test |= args.self_test;

    if let Err(e) = rover_zenoh_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
