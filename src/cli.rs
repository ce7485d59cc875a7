use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stock-watchlist")]
#[command(about = "Search symbols, inspect quotes and keep a persisted watchlist")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON config overlaid on the builtin defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Keep the watchlist in memory instead of on disk
    #[arg(long)]
    pub ephemeral: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search symbols by ticker and company name
    Search {
        query: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the quote and insight for one symbol
    Quote { symbol: String },

    /// Manage the watchlist
    Watchlist {
        #[command(subcommand)]
        action: WatchlistAction,
    },
}

#[derive(Subcommand)]
pub enum WatchlistAction {
    /// Print every watched symbol with its latest quote
    List,

    /// Watch a symbol
    Add { symbol: String, name: Option<String> },

    /// Stop watching a symbol
    Remove { symbol: String },

    /// Refetch quotes for every watched symbol, optionally on an interval
    Refresh {
        /// Keep refreshing at the configured interval until interrupted
        #[arg(short, long)]
        watch: bool,
    },
}
