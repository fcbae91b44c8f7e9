//! Command-line interface.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "forecast-cache", version, about = "Forecast result cache and gateway")]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = TracingFormat::default())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the HTTP gateway (default)
    Serve,
    /// Inspect or reset the file-backed cache in CACHE_DIR
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum CacheAction {
    /// Print resident entries with their age and size
    Stats,
    /// Remove every cached entry
    Clear,
    /// Show the filter set a cache key encodes
    Decode { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable single line output
    Pretty,
    /// Structured JSON, one object per line
    Json,
}

impl Default for TracingFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            TracingFormat::Pretty
        } else {
            TracingFormat::Json
        }
    }
}
