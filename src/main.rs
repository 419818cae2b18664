use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use taskhub::cache::{CacheStore, MemoryStore, SqliteStore};
use taskhub::market::types::{Credentials, TaskFilters, TaskStatus};
use taskhub::{logging, Config, HttpClient, Loaded, Marketplace, QueryCache, RemoteClient};

#[derive(Parser, Debug)]
#[command(name = "taskhub")]
#[command(about = "Browse a task marketplace from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/taskhub/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Serve demo data without contacting the server
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List every task, across all pages
  Tasks {
    #[arg(long)]
    category: Option<String>,
    #[arg(long, value_parser = parse_status)]
    status: Option<TaskStatus>,
    #[arg(long)]
    search: Option<String>,
  },
  /// Show one task
  Task { id: String },
  /// Tasks you posted
  Mine,
  /// Tasks you made offers on
  Offers,
  /// Categories with task counts
  Categories,
  /// Sign in and print the session token (password read from TASKHUB_PASSWORD or stdin)
  Login { email: String },
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
  serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
    .map_err(|_| format!("unknown status '{s}' (open, assigned, completed, cancelled, pending)"))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if args.offline {
    config.offline = true;
  }

  let _log_guard = logging::init(&config.logging)?;

  let market = build(&config)?;

  match args.command {
    Command::Tasks {
      category,
      status,
      search,
    } => {
      let filters = TaskFilters {
        category,
        status,
        search,
      };
      print(market.tasks(&filters).await?)?;
    }
    Command::Task { id } => print(market.task(&id).await?)?,
    Command::Mine => print(market.my_tasks().await?)?,
    Command::Offers => print(market.my_offers().await?)?,
    Command::Categories => print(market.categories().await?)?,
    Command::Login { email } => {
      let password = read_password()?;
      let session = market.login(&Credentials { email, password }).await?;
      if session.demo {
        eprintln!("server unreachable: signed in with a demo session");
      }
      println!("{}", serde_json::to_string_pretty(&session)?);
    }
  }

  Ok(())
}

fn build(config: &Config) -> Result<Marketplace> {
  let store: Arc<dyn CacheStore> = if config.cache.persist {
    let path = config.cache_path()?;
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory {}: {}", parent.display(), e))?;
    }
    Arc::new(SqliteStore::open(&path)?)
  } else {
    Arc::new(MemoryStore::new())
  };

  let cache = QueryCache::new(store, config.cache.freshness.clone());
  let client: Arc<dyn RemoteClient> = Arc::new(HttpClient::new(&config.api)?);
  Ok(Marketplace::new(client, cache, config))
}

fn print<T: Serialize>(loaded: Loaded<T>) -> Result<()> {
  tracing::info!(source = ?loaded.source, cache = ?loaded.cache, "loaded");
  if loaded.is_demo() {
    eprintln!("server unreachable: showing demo data");
  } else if let Some(at) = loaded.cached_at.filter(|_| loaded.cache == taskhub::cache::CacheSource::Offline) {
    eprintln!("server unreachable: showing data from {}", at.to_rfc3339());
  }
  println!("{}", serde_json::to_string_pretty(&loaded.data)?);
  Ok(())
}

fn read_password() -> Result<String> {
  if let Ok(password) = std::env::var("TASKHUB_PASSWORD") {
    return Ok(password);
  }
  eprint!("Password: ");
  std::io::stderr().flush()?;
  let mut line = String::new();
  std::io::stdin()
    .lock()
    .read_line(&mut line)
    .map_err(|e| eyre!("Failed to read password: {}", e))?;
  Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
