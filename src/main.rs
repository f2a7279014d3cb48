//! The daemon binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slirc_bot::{Bot, Config};

#[derive(Debug, Parser)]
#[command(name = "slirc-bot", version, about = "IRC bot daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Increase verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let mut bot = Bot::new();
    config.apply(&mut bot).await;

    info!("slirc-bot {} running", env!("CARGO_PKG_VERSION"));

    tokio::select! {
        _ = bot.run() => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }

    Ok(())
}
