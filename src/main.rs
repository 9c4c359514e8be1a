use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use medsync::cache::SqliteStore;
use medsync::config::Config;
use medsync::engine::SyncEngine;
use medsync::event::{EngineEvent, EventHandler};
use medsync::net::{HttpClient, Request};

#[derive(Parser, Debug)]
#[command(name = "medsync")]
#[command(about = "Offline cache and sync daemon for the MedStudy app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/medsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Drain the write queue once and exit
  #[arg(long)]
  drain_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config)?;

  let store = match &config.data_dir {
    Some(dir) => SqliteStore::open_at(&dir.join("engine.db"))?,
    None => SqliteStore::open()?,
  };
  let network = Arc::new(HttpClient::new(&config.remote.url)?);

  let mut events = EventHandler::new(Duration::from_secs(60));
  let engine = SyncEngine::new(&config, Arc::new(store), network.clone(), events.sender());

  let active = engine.install_and_activate().await?;
  info!(version = %active.version, "serving cache version");

  if args.drain_once {
    let report = engine.drain().await?;
    println!(
      "drained: {} succeeded, {} still queued",
      report.succeeded.len(),
      report.failed.len()
    );
    return Ok(());
  }

  // Watch for reconnection edges
  events.spawn_probe(
    network,
    Request::get(&config.remote.probe_path),
    Duration::from_secs(30),
  );

  // First study reminder; "later" pushes it out by the configured delay
  engine.schedule_reminder(
    chrono::Utc::now() + chrono::Duration::minutes(config.reminders.defer_minutes as i64),
  );

  while let Some(event) = events.next().await {
    match event {
      EngineEvent::Online => {
        if let Err(err) = engine.drain().await {
          warn!("drain failed: {err}");
        }
        if let Err(err) = engine.refresh_dynamic().await {
          warn!("dynamic refresh failed: {err}");
        }
      }
      EngineEvent::Tick => {
        if engine.pending_writes()? > 0 {
          if let Err(err) = engine.drain().await {
            warn!("drain failed: {err}");
          }
        }
      }
      EngineEvent::NotificationFired { id, notification } => {
        // Delivery to the user sits with the app shell; the daemon records it
        info!(id, body = %notification.payload.body, "reminder fired");
      }
    }
  }

  Ok(())
}

/// Set up tracing to stderr plus a daily-rotated daemon log.
fn init_tracing(config: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

  let log_dir = config
    .data_dir
    .clone()
    .or_else(|| dirs::data_dir().map(|d| d.join("medsync")))
    .ok_or_else(|| eyre!("Could not determine data directory for logs"))?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let file_appender = tracing_appender::rolling::daily(&log_dir, "medsync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

  Ok(guard)
}
