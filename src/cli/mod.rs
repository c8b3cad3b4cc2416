//! CLI definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for list/query commands.
#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table (default)
    #[default]
    Table,
    /// JSON (same as --json)
    Json,
    /// Comma-separated values
    Csv,
}

pub mod commands;

/// mapsync - Mirror a local GIS project onto a remote map
#[derive(Parser, Debug)]
#[command(name = "mapsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.mapsync/data/mapsync.db)
    #[arg(long, global = true, env = "MAPSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Map service host (default: https://api.giscloud.com/)
    #[arg(long, global = true, env = "MAPSYNC_HOST")]
    pub host: Option<String>,

    /// API key (default: the key stored by `mapsync login`)
    #[arg(long, global = true, env = "MAPSYNC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Actor name recorded in the publish history
    #[arg(long, global = true, env = "MAPSYNC_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Output format (table, json, csv)
    #[arg(long, value_enum, global = true, default_value_t)]
    pub format: OutputFormat,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store an API key for later commands
    Login {
        /// API key from your account settings (or use --api-key)
        key: Option<String>,

        /// Store the key without checking it against the server
        #[arg(long)]
        no_verify: bool,
    },

    /// Forget the stored API key
    Logout,

    /// Check the API key and subscription
    Check,

    /// Compare a project with its published map
    Analyze {
        /// Project file
        project: PathBuf,

        /// Include hidden layers
        #[arg(long)]
        all: bool,

        /// Refetch the remote map even if it was listed recently
        #[arg(long)]
        force: bool,
    },

    /// Publish a project to its map, or to a new one
    Publish(PublishArgs),

    /// Show the published map and recent publish passes
    Status {
        /// Project file
        project: PathBuf,

        /// Maximum passes to show
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Record that layer data changed outside the project
    Touch {
        /// Project file
        project: PathBuf,

        /// Layer ids whose data changed
        #[arg(required = true)]
        layers: Vec<String>,
    },

    /// Watch a project file and report when the map is out of date
    Watch {
        /// Project file
        project: PathBuf,

        /// Seconds between checks of the project file (default: 2)
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many checks (default: run until interrupted)
        #[arg(long)]
        polls: Option<u64>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print version information
    Version,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(clap::Args, Debug)]
pub struct PublishArgs {
    /// Project file
    pub project: PathBuf,

    /// Publish into a new map instead of the remembered one
    #[arg(long = "new")]
    pub new_map: bool,

    /// Share a newly created map publicly
    #[arg(long)]
    pub public: bool,

    /// Include hidden layers
    #[arg(long)]
    pub all: bool,

    /// Map name (default: the remembered name, then the project name)
    #[arg(long)]
    pub name: Option<String>,
}
