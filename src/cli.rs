use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "portico")]
#[command(about = "Discover, install, and connect MCP servers")]
#[command(version)]
pub(crate) struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Search the server registry
    Search {
        /// Free-text query matched against name, id, description, and tags
        query: Option<String>,

        /// Require a tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        limit: u32,

        /// Read only the local catalog
        #[arg(long)]
        offline: bool,

        /// Print the raw result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Warm the registry cache and print its counters
    Sync,

    /// Show one registry entry
    Show { entry_id: String },

    /// Print the server config generated for a registry entry
    Install {
        entry_id: String,

        /// Also add it to the configured server list
        #[arg(long)]
        save: bool,
    },

    /// List configured servers
    Servers,

    /// Connect to a configured server and list its tools
    Connect { server_id: String },

    /// Probe a configured server without changing its state
    Test { server_id: String },
}
