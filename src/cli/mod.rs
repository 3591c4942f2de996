//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod helpers;
mod interactive;
mod scrape;
mod sessions;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::models::{BackendKind, ExportFormat};

#[derive(Parser)]
#[command(name = "postharvest")]
#[command(about = "Resumable social media post acquisition")]
#[command(version)]
pub struct Cli {
    /// Data directory holding sessions and exports (overrides config file)
    #[arg(long, global = true, env = "POSTHARVEST_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Options shared by every command that starts sessions.
#[derive(Args, Debug, Clone)]
pub(crate) struct QueryArgs {
    /// Start of the time window (YYYY-MM-DD or YYYY-MM-DD_HH:MM:SS)
    #[arg(long)]
    since: Option<String>,

    /// End of the time window, inclusive (YYYY-MM-DD or YYYY-MM-DD_HH:MM:SS)
    #[arg(long)]
    until: Option<String>,

    /// Minimum likes
    #[arg(long, default_value = "0")]
    min_likes: u64,

    /// Minimum reposts
    #[arg(long, default_value = "0")]
    min_reposts: u64,

    /// Minimum replies
    #[arg(long, default_value = "0")]
    min_replies: u64,

    /// Skip replies
    #[arg(long)]
    no_replies: bool,

    /// Skip reposts
    #[arg(long)]
    no_reposts: bool,

    /// Only keep posts with media
    #[arg(long)]
    media_only: bool,

    /// Retrieval backend (defaults to the configured one)
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,

    /// Export format (defaults to the configured one)
    #[arg(short, long, value_enum)]
    format: Option<ExportFormat>,

    /// Take scheduled breaks even if the config file disables them
    #[arg(long)]
    breaks: bool,

    /// Never prompt; stop the session whenever input would be needed
    #[arg(long)]
    no_prompt: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape posts by account, keyword or link into a new session
    Scrape {
        /// Account to scrape (repeatable)
        #[arg(short, long = "user", value_name = "NAME")]
        users: Vec<String>,

        /// Keyword to search for (repeatable)
        #[arg(short, long = "keyword", value_name = "WORD")]
        keywords: Vec<String>,

        /// Require every keyword instead of any
        #[arg(long)]
        all_keywords: bool,

        /// Post link to fetch (repeatable)
        #[arg(short, long = "link", value_name = "URL")]
        links: Vec<String>,

        /// File with one post link per line
        #[arg(long)]
        links_file: Option<PathBuf>,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Scrape many accounts, one session each
    Batch {
        /// Accounts to scrape
        identities: Vec<String>,

        /// File with one account per line (# starts a comment)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Sessions to run at the same time
        #[arg(short = 'j', long, default_value = "1")]
        concurrency: usize,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// List sessions
    Sessions {
        /// Include finished sessions
        #[arg(short, long)]
        all: bool,
    },

    /// Show one session in detail
    Show {
        /// Session id or unique prefix
        id: String,
    },

    /// Resume an interrupted session, or retry a finished one
    Resume {
        /// Session id or unique prefix (defaults to the most recent resumable session)
        id: Option<String>,

        /// Resume every resumable session, one after another
        #[arg(short, long, conflicts_with = "id")]
        all: bool,

        /// Never prompt; stop the session whenever input would be needed
        #[arg(long)]
        no_prompt: bool,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        data_dir: cli.data_dir,
    };
    let (settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Scrape {
            users,
            keywords,
            all_keywords,
            links,
            links_file,
            query,
        } => {
            let targets = scrape::Targets {
                users,
                keywords,
                all_keywords,
                links,
                links_file,
            };
            scrape::cmd_scrape(&settings, targets, &query).await
        }
        Commands::Batch {
            identities,
            file,
            concurrency,
            query,
        } => scrape::cmd_batch(&settings, identities, file, concurrency, &query).await,
        Commands::Sessions { all } => sessions::cmd_sessions(&settings, all).await,
        Commands::Show { id } => sessions::cmd_show(&settings, &id).await,
        Commands::Resume { id, all, no_prompt } => {
            sessions::cmd_resume(&settings, id.as_deref(), all, no_prompt).await
        }
    }
}
