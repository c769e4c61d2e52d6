//! Lorekeep CLI: the main entry point.
//!
//! Commands:
//! - `run`: Submit a request and drive it through the pipeline
//! - `status`: Show a stored run, or list runs
//! - `plan`: Show how a request's facts would be chunked
//! - `merge`: Merge JSON contribution files
//! - `guard`: Run the validation guards over a draft file
//! - `config`: Show or generate configuration

use clap::{Parser, Subcommand};
use lorekeep_core::ContentKind;
use std::path::PathBuf;

mod commands;
mod inputs;
mod replay;

#[derive(Parser)]
#[command(
    name = "lorekeep",
    about = "Lorekeep — AI-assisted worldbuilding content pipeline",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Where a request comes from: a JSON file, or flags.
#[derive(clap::Args, Debug, Clone)]
pub struct RequestArgs {
    /// Request file (`{"kind": "...", "params": {...}}`)
    #[arg(short, long, conflicts_with_all = ["kind", "prompt", "title", "param"])]
    pub request: Option<PathBuf>,

    /// Content kind (creature, npc, item, spell, ability, location, lore, adventure)
    #[arg(short, long)]
    pub kind: Option<ContentKind>,

    #[arg(long)]
    pub prompt: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    /// Extra request parameters as key=value; values are parsed as JSON when possible
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    pub param: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a request and drive it to completion or failure
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// JSONL file of exchange replies, served in order
        #[arg(long)]
        replies: PathBuf,

        /// JSON fact corpus (array of facts)
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Drive an existing run instead of submitting a new one
        #[arg(long, conflicts_with = "request")]
        resume: Option<String>,

        /// With --resume: reset this stage and every later stage first
        #[arg(long, requires = "resume")]
        from: Option<String>,
    },

    /// Show a stored run (or list all runs)
    Status {
        run_id: Option<String>,

        /// Print the stored artifacts as well
        #[arg(long)]
        artifacts: bool,
    },

    /// Show the chunk plan for a request
    Plan {
        #[command(flatten)]
        request: RequestArgs,

        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Print every payload in full
        #[arg(long)]
        payloads: bool,
    },

    /// Merge JSON contribution files, in order
    Merge {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Contributors expected to supply something
        #[arg(long, value_delimiter = ',')]
        expect: Vec<String>,
    },

    /// Run the validation guards over a draft file
    Guard {
        /// Draft file in reply form (`sourcesUsed`, `canonChange`, ... plus entity fields)
        draft: PathBuf,

        #[arg(short, long)]
        kind: ContentKind,

        /// Fact pack file (`{"facts": [...]}`) for the citation check
        #[arg(long)]
        facts: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the built-in defaults as TOML
    Default,
    /// Print the config file path
    Path,
    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            request,
            replies,
            corpus,
            resume,
            from,
        } => commands::run::run(request, &replies, corpus.as_deref(), resume, from).await?,
        Commands::Status { run_id, artifacts } => commands::status::run(run_id.as_deref(), artifacts).await?,
        Commands::Plan {
            request,
            corpus,
            payloads,
        } => commands::plan::run(request, corpus.as_deref(), payloads).await?,
        Commands::Merge { files, expect } => commands::merge::run(&files, &expect).await?,
        Commands::Guard { draft, kind, facts } => commands::guard::run(&draft, kind, facts.as_deref()).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Default => commands::config_cmd::default().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}
