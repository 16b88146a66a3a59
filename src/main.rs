use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

use scribe::config::Config;
use scribe::provider::Providers;
use scribe::refresh::{RefreshError, Refresher, RegisterSource};
use scribe::storage::{Database, DatabaseError, SourceType};

#[derive(Parser, Debug)]
#[command(name = "scribe", about = "Ingest videos and articles from YouTube, Vimeo and Feedly")]
struct Args {
    /// Config file (default: ~/.config/scribe/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite database (overrides `database_path` from the config file)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh every source of the given types
    Refresh {
        #[arg(long, value_delimiter = ',', default_value = "youtube,vimeo,rss")]
        types: Vec<SourceType>,
    },
    /// Refresh one source by internal ID
    RefreshSource {
        id: i64,
        /// Overwrite display fields of content that is already stored
        #[arg(long)]
        force: bool,
    },
    /// Create sources for feeds of the configured Feedly category
    SyncFeed,
    /// Register the source behind a channel or feed URL
    AddSource {
        url: String,
        #[arg(long)]
        lang: String,
        /// Only try this provider
        #[arg(long = "type", value_name = "TYPE")]
        source_type: Option<SourceType>,
        #[arg(long)]
        not_curated: bool,
    },
    /// Remove a source and its content
    RemoveSource { id: i64 },
    /// List sources in display order
    Sources {
        #[arg(long, value_delimiter = ',')]
        types: Vec<SourceType>,
    },
    /// List stored content, newest first
    Contents {
        #[arg(long, value_delimiter = ',')]
        types: Vec<SourceType>,
        #[arg(long, default_value_t = 1)]
        page: i64,
    },
}

fn home_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home))
}

/// Create `dir` if needed and restrict it to the owner.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory '{}'", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to set directory permissions to 0700");
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only JSON
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => home_dir()?.join(".config").join("scribe").join("config.toml"),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    config.apply_env();
    tracing::debug!(config = ?config, "Resolved configuration");

    let db_path = match args.db.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            let data_dir = home_dir()?.join(".local").join("share").join("scribe");
            ensure_private_dir(&data_dir)?;
            data_dir.join("scribe.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the database is locked by another scribe process. Try again later.");
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    let providers = Providers::new(&config).context("Invalid provider configuration")?;
    let refresher = Refresher::new(db.clone(), providers, &config);

    match args.command {
        Command::Refresh { types } => {
            let report = refresher.refresh_by_types(&types).await.map_err(user_error)?;
            print_json(&report)?;
        }
        Command::RefreshSource { id, force } => {
            let items = refresher.refresh_source(id, force).await.map_err(user_error)?;
            print_json(&items)?;
        }
        Command::SyncFeed => {
            let created = refresher.sync_feed().await.map_err(user_error)?;
            print_json(&created)?;
        }
        Command::AddSource {
            url,
            lang,
            source_type,
            not_curated,
        } => {
            let source = refresher
                .register_source(RegisterSource {
                    url,
                    source_type,
                    lang,
                    curated: !not_curated,
                })
                .await
                .map_err(user_error)?;
            print_json(&source)?;
        }
        Command::RemoveSource { id } => {
            if !db.delete_source(id).await.context("Failed to remove source")? {
                anyhow::bail!("Source {} not found", id);
            }
            tracing::info!(id, "Source removed");
        }
        Command::Sources { types } => {
            let sources = db.list_sources(&types).await.context("Failed to list sources")?;
            print_json(&sources)?;
        }
        Command::Contents { types, page } => {
            let contents = db
                .list_contents(&types, page)
                .await
                .context("Failed to list contents")?;
            print_json(&contents)?;
        }
    }

    Ok(())
}

fn user_error(err: RefreshError) -> anyhow::Error {
    match &err {
        RefreshError::DuplicateSource(_) => anyhow::Error::new(err).context("Conflict"),
        RefreshError::Validation(_) | RefreshError::UnsupportedUrl(_) => {
            anyhow::Error::new(err).context("Rejected")
        }
        _ => anyhow::Error::new(err).context("Refresh failed"),
    }
}
