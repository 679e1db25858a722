use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "grapefruit-crawler")]
#[command(about = "BitTorrent DHT crawler that indexes torrent metadata")]
pub struct Cli {
    /// Path to a TOML config file (default: configs/default.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Join the DHT and crawl (the default)
    Run {
        /// Keep torrents in memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the container recipe for this service
    Dockerfile,

    /// Check a Dockerfile's structure
    LintDockerfile {
        /// Dockerfile to check
        path: PathBuf,

        /// Build context directory (default: the Dockerfile's directory)
        #[arg(long)]
        context: Option<PathBuf>,
    },
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run { dry_run: false })
    }
}
