//! Memory Keeper command-line interface.
//!
//! Each invocation runs one command against the data directory. The engine
//! resumes the most recently updated session at startup, since the current
//! session pointer does not outlive the process.
//!
//! Exit code 0 on success, 1 on any error (printed to stderr).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use keeper_context_store::{
    BackendKind, Category, ContextEngine, ContextItem, ItemQuery, KeeperConfig, NewItem,
    NewSession, Priority, Session,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Persist and query session context from the command line.
#[derive(Parser)]
#[command(name = "keeper")]
#[command(version)]
#[command(about = "Persist and query session context items")]
struct Cli {
    /// Data directory (defaults to $MEMORY_KEEPER_DIR or ./.memory-keeper)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Storage backend: json or sqlite
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new session and make it current
    #[command(name = "session:start")]
    SessionStart {
        name: String,
        description: Option<String>,
        /// Channel applied to items saved without one
        #[arg(long)]
        channel: Option<String>,
    },

    /// List sessions, most recently updated first
    #[command(name = "session:list")]
    SessionList {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Save (or overwrite) an item in the current session
    Save {
        key: String,
        value: String,
        category: Option<Category>,
        priority: Option<Priority>,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        private: bool,
    },

    /// Show items of the current session
    Get {
        key: Option<String>,
        category: Option<Category>,
        #[arg(long, default_value_t = keeper_context_store::DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Delete an item from the current session
    Delete { key: String },

    /// Show the current session and storage statistics
    Status,

    /// Export the current session to a JSON file
    Export { output_path: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(data_dir: Option<PathBuf>, backend: Option<BackendKind>) -> Result<KeeperConfig> {
    let mut config = match data_dir {
        Some(dir) => KeeperConfig::load(dir)?,
        None => KeeperConfig::from_env()?,
    };
    if let Some(backend) = backend {
        config = config.with_backend(backend);
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.data_dir, cli.backend)?;
    debug!("Using {} backend in {}", config.backend, config.data_dir.display());

    let engine = ContextEngine::open(config).await?;
    engine.resume_latest().await?;

    match cli.command {
        Command::SessionStart {
            name,
            description,
            channel,
        } => {
            let mut request = NewSession::new(name);
            request.description = description;
            request.default_channel = channel;
            if let Ok(dir) = std::env::current_dir() {
                request.project_dir = Some(dir.to_string_lossy().into_owned());
            }
            let session = engine.start_session(request).await?;
            println!("Started session {} ({})", session.name, session.id);
            if let Some(branch) = &session.branch {
                println!("Branch: {branch}");
            }
        }
        Command::SessionList { limit } => {
            let sessions = engine.list_sessions(limit).await?;
            if sessions.is_empty() {
                println!("No sessions");
            }
            let current = engine.current_session().await?.map(|s| s.id);
            for session in &sessions {
                let marker = if current.as_ref() == Some(&session.id) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {}", format_session(session));
            }
        }
        Command::Save {
            key,
            value,
            category,
            priority,
            channel,
            private,
        } => {
            let mut request = NewItem::new(key, value);
            request.category = category;
            request.priority = priority;
            request.channel = channel;
            request.private = private;
            let item = engine.save(None, request).await?;
            println!("Saved {} ({})", item.key, item.priority);
        }
        Command::Get {
            key,
            category,
            limit,
        } => {
            let mut query = ItemQuery::new().page(0, limit);
            query.key = key;
            query.category = category;
            let items = engine.get(None, &query).await?;
            if items.is_empty() {
                println!("No items found");
            }
            for item in &items {
                println!("{}", format_item(item));
            }
        }
        Command::Delete { key } => {
            if engine.delete(None, &key).await? {
                println!("Deleted {key}");
            } else {
                println!("No item with key {key}");
            }
        }
        Command::Status => {
            let status = engine.status().await?;
            match &status.current_session {
                Some(session) => println!("Current session: {}", format_session(session)),
                None => println!("Current session: none"),
            }
            println!("Sessions: {}", status.total_sessions);
            println!("Items: {}", status.total_items);
            println!("Storage: {} bytes", status.storage_size);
            println!(
                "Backend: {} at {}",
                status.backend.kind,
                status.backend.location.display()
            );
        }
        Command::Export { output_path } => {
            let summary = engine.export(None, output_path.as_deref()).await?;
            println!(
                "Exported {} items to {}",
                summary.item_count,
                summary.path.display()
            );
        }
    }

    Ok(())
}

fn format_session(session: &Session) -> String {
    format!(
        "{}  {}  {} items  updated {}",
        session.id,
        session.name,
        session.item_count,
        session.updated_at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn format_item(item: &ContextItem) -> String {
    let category = item.category.map_or("-", Category::as_str);
    format!(
        "[{category}/{}] {}: {}",
        item.priority, item.key, item.value
    )
}
