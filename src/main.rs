use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod inspect;
mod monitor;

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries telemetry.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = cli::Cli::parse();
    match args.cmd {
        cli::Cmd::Monitor(opts) => monitor::run(opts),
        cli::Cmd::Ports => inspect::ports(),
        cli::Cmd::Decode(opts) => inspect::decode_stdin(opts),
    }
}
