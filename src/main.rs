//! triage CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use triage::{
    commands::{
        cmd_event, cmd_init, cmd_list_issues, cmd_organize, cmd_remove_issue, cmd_show_issue,
        cmd_similar, cmd_status, cmd_sync, print_event_result, print_issue, print_issue_list,
        print_organization, print_similar, print_status, print_sync_stats, OrganizeOptions,
        SyncOptions,
    },
    config::{Config, IndexBackendKind},
    embed::create_embedder,
    error::{Error, Result},
    meta::IssueDb,
    organize::Organizer,
    progress::LogWriterFactory,
    store::{DurableIndex, MemoryIndex, SimilarityIndex},
    tracker::TrackerClient,
};

#[derive(Parser)]
#[command(name = "triage")]
#[command(version, about = "Organize issue-tracker tickets by semantic similarity", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize triage configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Bulk-index recent issues from the tracker
    Sync {
        /// Maximum issues to fetch
        #[arg(long)]
        max: Option<usize>,

        /// Custom JQL filter instead of project-recent
        #[arg(long)]
        jql: Option<String>,
    },

    /// Organize a ticket: find similar issues and suggest epic/labels/components
    Organize {
        /// Issue key (e.g. PROJ-123)
        issue_key: String,

        /// Number of similar issues to consider
        #[arg(short, long)]
        top_k: Option<usize>,

        /// Write accepted suggestions back to the tracker
        #[arg(long)]
        apply: bool,
    },

    /// Find issues similar to an already-indexed ticket
    Similar {
        /// Issue key (e.g. PROJ-123)
        issue_key: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Inspect indexed issues
    Issues {
        #[command(subcommand)]
        action: IssuesAction,
    },

    /// Handle an external change notification (idempotent per event id)
    Event {
        /// Unique event identifier
        event_id: String,

        /// Event type (issue_created, issue_updated, issue_deleted)
        event_type: String,

        /// Issue key the event refers to
        issue_key: String,
    },

    /// Show system status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum IssuesAction {
    /// List indexed issues
    List {
        /// Maximum issues to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one indexed issue
    Show {
        /// Issue key
        issue_key: String,
    },

    /// Remove an issue from the index
    Remove {
        /// Issue key
        issue_key: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        match e {
            Error::IssueNotFound(key) => error!("Issue not found: {}", key),
            other => error!("{}", other),
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        return handle_init(cli.config, force).await;
    }

    // Handle completions command (doesn't need config/db)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "triage", &mut std::io::stdout());
        return Ok(());
    }

    // Load configuration
    let config = load_config(cli.config.as_deref())?;

    // Initialize components
    let db = IssueDb::connect(&config).await?;
    let dimension = config.embedding.resolved_dimension();
    let index: Arc<dyn SimilarityIndex> = match config.index.backend_kind()? {
        IndexBackendKind::Memory => Arc::new(MemoryIndex::new(dimension)),
        IndexBackendKind::Durable => Arc::new(
            DurableIndex::open(db.clone(), dimension, config.paths.snapshot_file.clone()).await?,
        ),
    };

    // Handle commands
    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Sync { max, jql } => {
            let organizer = build_organizer(&config, &db, index.clone())?;
            let options = SyncOptions {
                max_issues: max,
                jql,
            };
            let stats = cmd_sync(&organizer, config.sync.max_issues, options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_sync_stats(&stats);
            }
        }

        Commands::Organize {
            issue_key,
            top_k,
            apply,
        } => {
            let organizer = build_organizer(&config, &db, index.clone())?;
            let options = OrganizeOptions { top_k, apply };
            let result =
                cmd_organize(&organizer, &issue_key, config.suggest.neighbors, options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_organization(&result);
                if apply {
                    println!("\n✓ Suggestions applied to {}", issue_key);
                }
            }
        }

        Commands::Similar { issue_key, limit } => {
            let similar = cmd_similar(index.as_ref(), &issue_key, limit).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&similar)?);
            } else {
                print_similar(&issue_key, &similar);
            }
        }

        Commands::Issues { action } => match action {
            IssuesAction::List { limit } => {
                let issues = cmd_list_issues(index.as_ref(), limit).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&issues)?);
                } else {
                    print_issue_list(&issues);
                }
            }
            IssuesAction::Show { issue_key } => {
                let record = cmd_show_issue(index.as_ref(), &issue_key).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                } else {
                    print_issue(&record);
                }
            }
            IssuesAction::Remove { issue_key } => {
                cmd_remove_issue(index.as_ref(), &issue_key).await?;
                if cli.json {
                    println!(r#"{{"status": "ok", "removed": "{}"}}"#, issue_key);
                } else {
                    println!("✓ Issue '{}' removed from the index", issue_key);
                }
            }
        },

        Commands::Event {
            event_id,
            event_type,
            issue_key,
        } => {
            let organizer = build_organizer(&config, &db, index.clone())?;
            let result = cmd_event(&organizer, &event_id, &event_type, &issue_key).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_event_result(&result);
            }
        }

        Commands::Status => {
            let status = cmd_status(&config, &db, index.as_ref()).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

fn build_organizer(config: &Config, db: &IssueDb, index: Arc<dyn SimilarityIndex>) -> Result<Organizer> {
    let tracker = TrackerClient::new(&config.tracker, config.tracker_api_token())?;
    let embedder = create_embedder(&config.embedding)?;
    Ok(Organizer::new(
        tracker,
        embedder,
        index,
        db.event_ledger(),
        config.suggest.clone(),
    ))
}

async fn handle_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    // Get the base directory: if user specifies config file, use its parent dir
    let base_dir = if let Some(path) = config_path {
        if path.extension().map_or(false, |e| e == "toml") {
            path.parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir)
        } else {
            path
        }
    } else {
        Config::default_base_dir()
    };

    let config = cmd_init(Some(base_dir), force).await?;

    println!("✓ triage initialized successfully");
    println!("  Config: {}", config.paths.config_file.display());
    println!("\nNext steps:");
    println!("  1. Edit the config file: set tracker.base_url, tracker.email, tracker.project_key");
    println!(
        "  2. Export your tracker API token: export {}=...",
        config.tracker.api_token_env
    );
    println!("  3. Start the embedding sidecar and index your backlog: triage sync");

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
