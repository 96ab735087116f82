use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gantry_motion_runtime::bus::{SimulatedBus, ZenohBus};
use gantry_motion_runtime::config::ControllerConfig;
use gantry_motion_runtime::motion::GantryLoad;
use gantry_motion_runtime::runtime;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LoadArg {
    Standard,
    HighThroughput,
}

impl From<LoadArg> for GantryLoad {
    fn from(load: LoadArg) -> Self {
        match load {
            LoadArg::Standard => GantryLoad::Standard,
            LoadArg::HighThroughput => GantryLoad::HighThroughput,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "gantry-motion-runtime")]
#[command(version)]
#[command(about = "Motion control runtime for a liquid-handling gantry")]
struct Args {
    /// Controller config (JSON). Built-in defaults when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run against simulated nodes instead of the bus gateway
    #[arg(short = 's', long)]
    simulate: bool,

    /// Gantry load class used for default currents
    #[arg(short, long, value_enum, default_value = "standard")]
    load: LoadArg,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(e) = start(args).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn start(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            ControllerConfig::load(path)?
        }
        None => ControllerConfig::default(),
    };
    let load = GantryLoad::from(args.load);

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    if args.simulate {
        info!("Using simulated bus");
        runtime::run(session, SimulatedBus::full_gantry(), config, load).await
    } else {
        let bus = ZenohBus::new(session.clone());
        runtime::run(session, bus, config, load).await
    }
}
