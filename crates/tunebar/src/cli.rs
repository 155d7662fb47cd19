use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tunebar", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Settings file (default: $XDG_CONFIG_HOME/tunebar/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Catalog file, overrides `catalog` from the settings
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Station id to tune in to without asking
    #[arg(long)]
    pub autostart: Option<String>,

    /// Player command template, overrides `player_command`
    #[arg(long)]
    pub player_command: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Log in and play (default)
    Play,

    /// Log in and list the available stations
    Stations,

    /// Print the published playback state as JSON
    Status,
}

impl Args {
    pub fn command(&self) -> Command {
        self.cmd.unwrap_or(Command::Play)
    }
}
