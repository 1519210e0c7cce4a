//! CLI argument definitions for feedrelay.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Fetch one catalog source through the fallback tiers |
//! | `fanout` | Collect rows from a state-level source across jurisdictions |
//! | `money-flow` | Aggregate lobbying, spending, campaign and registry records |
//! | `sources` | List catalog entries |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--catalog` | `catalog.json` | JSON array of source definitions |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Treat warnings as errors |
//! | `--verbose` | `false` | Debug logging on stderr |
//!
//! # Examples
//!
//! ```bash
//! feedrelay fetch gdelt --pretty
//! feedrelay fetch fred --param series_id=UNRATE --start 2024-01-01
//! feedrelay fanout openstates --target 25
//! feedrelay money-flow "acme corp" --limit 20
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Resilient public-data fetching with relays, retries and fallbacks.
#[derive(Debug, Parser)]
#[command(
    name = "feedrelay",
    author,
    version,
    about = "Resilient public-data feed fetcher",
    long_about = "feedrelay fetches public-data feeds that fail in ordinary ways. Features include:\n\
\n\
  • Proxy fallback chain with per-attempt deadlines\n\
  • Fixed-attempt and rate-limit retry policies\n\
  • Stale-cache, legacy-endpoint and live-snapshot fallbacks\n\
  • Bounded fan-out over US state jurisdictions\n\
  • Money-flow aggregation across four sources\n\
\n\
Use 'feedrelay <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Path to the source catalog (JSON array of definitions).
    #[arg(long, global = true, default_value = "catalog.json")]
    pub catalog: PathBuf,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Treat warnings and errors as failures (exit code 5).
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    /// Log relay attempts and retries to stderr.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch one source.
    ///
    /// # Examples
    ///
    ///   feedrelay fetch gdelt
    ///   feedrelay fetch opensanctions --query "acme corp"
    ///   feedrelay fetch acled --api-key "$ACLED_KEY" --start 2024-01-01 --end 2024-02-01
    Fetch(FetchArgs),

    /// Fan a state-level source out over the 50 states.
    ///
    /// # Examples
    ///
    ///   feedrelay fanout openstates --target 25
    Fanout(FanoutArgs),

    /// Aggregate money flows for a person or organisation.
    ///
    /// # Examples
    ///
    ///   feedrelay money-flow "acme corp"
    ///   feedrelay money-flow "acme corp" --start 2023-01-01 --limit 10
    MoneyFlow(MoneyFlowArgs),

    /// List catalog entries.
    Sources(SourcesArgs),
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Catalog source id.
    pub source_id: String,

    /// Free-text query for sources that accept one.
    #[arg(long)]
    pub query: Option<String>,

    /// Extra parameter as key=value; repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// US state code for state-level sources.
    #[arg(long)]
    pub jurisdiction: Option<String>,

    /// Range start (YYYY-MM-DD).
    #[arg(long)]
    pub start: Option<String>,

    /// Range end (YYYY-MM-DD).
    #[arg(long)]
    pub end: Option<String>,

    /// Caller-supplied key for client-keyed sources.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Skip the fresh cache.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct FanoutArgs {
    /// State-level catalog source id.
    pub source_id: String,

    /// Stop once this many rows are collected.
    #[arg(long, default_value_t = 20)]
    pub target: usize,
}

#[derive(Debug, Args)]
pub struct MoneyFlowArgs {
    /// Person or organisation to search for.
    pub query: String,

    /// Window start (YYYY-MM-DD); defaults to 180 days before the end.
    #[arg(long)]
    pub start: Option<String>,

    /// Window end (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    pub end: Option<String>,

    /// Items to return, clamped to 5..=100.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// Only list sources that can be fanned out.
    #[arg(long, default_value_t = false)]
    pub jurisdictional: bool,
}
