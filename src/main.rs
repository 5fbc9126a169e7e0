mod app;
mod cache;
mod catalog;
mod config;
mod diff;
mod display;
mod pagination;
mod settings;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pricewatch")]
#[command(about = "Search products and compare shop prices")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pricewatch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Print cache statistics after the command
  #[arg(long, global = true)]
  stats: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Search products; an empty query lists popular products
  Search {
    #[arg(default_value = "")]
    query: String,

    /// Number of pages to load
    #[arg(short, long, default_value_t = 1)]
    pages: usize,

    /// Ignore cached results and report what changed
    #[arg(short, long)]
    refresh: bool,
  },

  /// Show a product with every shop offer
  Show {
    id: i64,

    /// Ignore the cached product
    #[arg(short, long)]
    refresh: bool,
  },

  /// Read or change preferences
  Settings {
    #[command(subcommand)]
    action: SettingsAction,
  },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
  Get { key: String },
  Set { key: String, value: String },
  List,
}

/// Log to a file in the data directory; stdout is reserved for results.
fn init_logging() -> Option<WorkerGuard> {
  let dir = config::Config::data_dir().ok()?;
  std::fs::create_dir_all(&dir).ok()?;

  let appender = tracing_appender::rolling::never(dir, "pricewatch.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("PRICEWATCH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .ok()?;

  Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let app = app::App::new(config)?;

  match args.command {
    Command::Search {
      query,
      pages,
      refresh,
    } => app.run_search(&query, pages, refresh).await?,
    Command::Show { id, refresh } => app.run_show(id, refresh).await?,
    Command::Settings { action } => match action {
      SettingsAction::Get { key } => println!("{}", app.get_setting(&key)?),
      SettingsAction::Set { key, value } => app.set_setting(&key, &value)?,
      SettingsAction::List => {
        for (key, value) in app.list_settings()? {
          println!("{} = {}", key, value);
        }
      }
    },
  }

  if args.stats {
    app.print_stats();
  }

  Ok(())
}
