//! CLI for vitalwatch: per-entity telemetry collection with a trailing retention window.

mod commands;

use clap::{Parser, Subcommand};
use vitalwatch_core::EntityId;

#[derive(Parser)]
#[command(name = "vitalwatch")]
#[command(about = "vitalwatch: poll sensor telemetry, keep a trailing window, log anomalies")]
#[command(version = vitalwatch_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one collector per entity until Ctrl+C or a fatal store failure
    Run(commands::run::RunArgs),

    /// Print an entity's retained window, anomaly log or one channel as JSON
    Inspect {
        /// Entity id to inspect
        #[arg(long)]
        id: EntityId,

        /// Store URL (redis://, rediss://, redis+unix://, memory://)
        #[arg(long, env = "VITALWATCH_STORE", default_value = "redis://127.0.0.1:6379/")]
        store: String,

        /// Show the anomaly log instead of the readings window
        #[arg(long)]
        anomalies: bool,

        /// Show the time series of a single channel
        #[arg(long, conflicts_with = "anomalies")]
        channel: Option<usize>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Inspect {
            id,
            store,
            anomalies,
            channel,
        } => {
            let view = match (anomalies, channel) {
                (_, Some(ch)) => commands::inspect::View::Channel(ch),
                (true, None) => commands::inspect::View::Anomalies,
                (false, None) => commands::inspect::View::Readings,
            };
            commands::inspect::run(id, &store, view);
        }
    }
}
