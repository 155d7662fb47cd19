//! tunebar: a terminal client for a personalized internet-radio catalog.
//!
//! Songs are played by an external player command; keyboard input and an
//! optional control FIFO drive the session, and the current playback state is
//! published to a shared-memory segment for status-bar widgets.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = tunebar::cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("warn,tunebar=warn,tunebar_player=warn")
        }))
        .with_writer(std::io::stderr)
        .init();
    tunebar::runtime::run(&args)
}
