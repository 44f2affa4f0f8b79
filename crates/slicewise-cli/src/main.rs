//! slicewise — drive the request scheduler from the command line.
//!
//! # Usage
//!
//! ```text
//! slicewise simulate --slices 64 --max-requests 4 --latency-ms 20
//! slicewise simulate --config slicewise.toml --close-after-ms 150 --format json
//! slicewise config > slicewise.toml
//! ```

mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::simulate::{self, SimulationOptions};

#[derive(Parser)]
#[command(name = "slicewise", version, about = "Bounded admission scheduler for image loads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a simulated volume through the scheduler and report dispatch order.
    Simulate {
        /// Path to a slicewise.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of slices in the simulated volume.
        #[arg(long, default_value = "64")]
        slices: usize,

        /// Override the configured ceiling on simultaneous requests.
        #[arg(long)]
        max_requests: Option<usize>,

        /// Simulated latency of each request in milliseconds.
        #[arg(long, default_value = "20")]
        latency_ms: u64,

        /// Close the volume after this many milliseconds, dropping queued slices.
        #[arg(long)]
        close_after_ms: Option<u64>,

        /// Output format: text or json.
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Print the default configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,slicewise=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            config,
            slices,
            max_requests,
            latency_ms,
            close_after_ms,
            format,
        } => {
            let options = SimulationOptions {
                config: commands::config::load(config.as_deref())?,
                slices,
                max_requests,
                latency: Duration::from_millis(latency_ms),
                close_after: close_after_ms.map(Duration::from_millis),
            };
            let report = simulate::run(options).await?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&report)?),
                "text" => print!("{}", simulate::format_report(&report)),
                other => anyhow::bail!("unknown format: {other} (expected text or json)"),
            }
            Ok(())
        }
        Command::Config => commands::config::print_default(),
    }
}
