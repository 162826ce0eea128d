//! habitledger-sync - offline sync client for HabitLedger
//!
//! This is the main entry point. It wires together:
//! - Configuration loading
//! - The on-disk store (queue and credential)
//! - The HTTP transport
//! - The sync services (monitor, queue, engine, status)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use habitledger_api::{MutationKind, SyncEvent};
use habitledger_config::{load_config_or_default, Settings};
use habitledger_core::{ApiResponse, SyncOutcome, SyncServices};
use habitledger_http::ReqwestTransport;
use habitledger_store::{SqliteStore, Store};
use habitledger_util::{
    default_config_path, format_ago, format_datetime_full, MutationId, HABITLEDGER_API_URL_ENV,
    HABITLEDGER_DATA_DIR_ENV, MOCK_TIME_ENV_VAR, STORE_FILENAME,
};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// habitledger-sync - offline mutation queue and sync client for HabitLedger
#[derive(Parser, Debug)]
#[command(name = "habitledger-sync")]
#[command(about = "Offline mutation queue and sync client for HabitLedger", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/habitledger/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set HABITLEDGER_DATA_DIR env var)
    #[arg(short, long, env = HABITLEDGER_DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// API base URL override (or set HABITLEDGER_API_URL env var)
    #[arg(long, env = HABITLEDGER_API_URL_ENV)]
    api_url: Option<String>,

    /// Treat the API as unreachable: mutations are queued, nothing is sent
    #[arg(long, global = true)]
    offline: bool,

    /// Log level (default: info for `run`, warn otherwise)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync services until interrupted
    Run,

    /// Print the current sync status as JSON
    Status,

    /// Replay queued mutations now
    Sync,

    /// Drop every queued mutation
    Clear,

    /// List queued mutations
    List,

    /// Drop one queued mutation
    Discard { id: MutationId },

    /// Store the bearer token sent with API calls
    Login {
        #[arg(long, env = "HABITLEDGER_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Forget the stored bearer token
    Logout,

    /// Toggle a habit's log for one day
    Toggle {
        habit_id: String,
        /// Day to toggle, YYYY-MM-DD
        date: String,
        #[arg(long, default_value_t = 1)]
        value: i64,
    },

    /// Write several logs at once (JSON request body)
    BulkLogs { logs: String },

    /// Create a habit
    CreateHabit {
        name: String,
        /// Extra fields as a JSON object
        #[arg(long)]
        fields: Option<String>,
    },

    /// Update a habit (JSON object of changed fields)
    UpdateHabit { id: String, fields: String },

    /// Delete a habit
    DeleteHabit { id: String },
}

impl Command {
    fn default_log_level(&self) -> &'static str {
        match self {
            Command::Run => "info",
            _ => "warn",
        }
    }
}

/// Command-line client state
struct App {
    settings: Settings,
    services: SyncServices,
    offline: bool,
}

impl App {
    fn new(args: &Args) -> Result<Self> {
        let mut settings = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        if let Some(url) = &args.api_url {
            settings.api.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = &args.data_dir {
            settings.storage.data_dir = dir.clone();
        }

        let store_path = settings.storage.data_dir.join(STORE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&store_path)
                .with_context(|| format!("Failed to open store at {:?}", store_path))?,
        );

        let transport = Arc::new(
            ReqwestTransport::new(&settings.api.base_url, settings.api.request_timeout)
                .context("Failed to create HTTP transport")?,
        );

        info!(
            api = %settings.api.base_url,
            store = %store_path.display(),
            offline = args.offline,
            "Client initialized"
        );

        let services = SyncServices::new(&settings, transport, store, !args.offline);

        Ok(Self {
            settings,
            services,
            offline: args.offline,
        })
    }

    /// Confirm reachability before acting, unless forced offline
    async fn probe(&self) -> bool {
        if self.offline {
            return false;
        }
        self.services.monitor.check_connectivity().await
    }

    async fn execute(self, command: Command) -> Result<()> {
        match command {
            Command::Run => self.run().await,
            Command::Status => {
                self.probe().await;
                let status = self.services.status.current();
                println!("{}", status.indicator());
                println!("{}", serde_json::to_string_pretty(&status)?);
                if !self.services.store_healthy() {
                    bail!("Local store is not responding");
                }
                Ok(())
            }
            Command::Sync => self.sync().await,
            Command::Clear => {
                let count = self.services.queue.len();
                self.services.status.clear_queue();
                println!("Cleared {} queued mutation(s)", count);
                Ok(())
            }
            Command::List => {
                self.list();
                Ok(())
            }
            Command::Discard { id } => {
                if self.services.client.discard(id) {
                    println!("Discarded {}", id);
                    Ok(())
                } else {
                    bail!("No queued mutation with id {}", id)
                }
            }
            Command::Login { token } => {
                self.services
                    .credentials
                    .set_token(&token)
                    .context("Failed to store token")?;
                println!("Token stored");
                Ok(())
            }
            Command::Logout => {
                self.services
                    .credentials
                    .clear()
                    .context("Failed to clear token")?;
                println!("Token cleared");
                Ok(())
            }
            Command::Toggle {
                habit_id,
                date,
                value,
            } => {
                let body = json!({
                    "habitId": id_value(&habit_id),
                    "date": date,
                    "value": value,
                });
                self.mutate(MutationKind::ToggleLog, None, Some(body)).await
            }
            Command::BulkLogs { logs } => {
                let body = parse_json(&logs)?;
                self.mutate(MutationKind::BulkLogs, None, Some(body)).await
            }
            Command::CreateHabit { name, fields } => {
                let mut body = match fields {
                    Some(fields) => parse_object(&fields)?,
                    None => Map::new(),
                };
                body.insert("name".into(), Value::String(name));
                self.mutate(MutationKind::CreateHabit, None, Some(Value::Object(body)))
                    .await
            }
            Command::UpdateHabit { id, fields } => {
                let body = Value::Object(parse_object(&fields)?);
                self.mutate(MutationKind::UpdateHabit, Some(&id), Some(body))
                    .await
            }
            Command::DeleteHabit { id } => {
                self.mutate(MutationKind::DeleteHabit, Some(&id), None).await
            }
        }
    }

    async fn mutate(
        &self,
        kind: MutationKind,
        target_id: Option<&str>,
        body: Option<Value>,
    ) -> Result<()> {
        self.probe().await;
        let response = self
            .services
            .client
            .mutate(kind, target_id, body)
            .await
            .with_context(|| format!("{} failed", kind))?;
        print_response(&response)
    }

    async fn sync(&self) -> Result<()> {
        if !self.probe().await {
            bail!("API unreachable, nothing synced");
        }

        let outcome = self.services.status.manual_sync().await;
        self.services.shutdown();

        match outcome {
            SyncOutcome::AlreadySyncing => println!("Sync already in progress"),
            SyncOutcome::Offline => bail!("API unreachable, nothing synced"),
            SyncOutcome::NothingToSync => println!("Nothing to sync"),
            SyncOutcome::Completed(report) => {
                println!("Synced {}, failed {}", report.succeeded, report.failed);
                for failure in &report.errors {
                    println!("  {}: {}", failure.mutation_id, failure.error);
                }
            }
            SyncOutcome::Aborted { message } => bail!("Sync aborted: {}", message),
        }
        Ok(())
    }

    fn list(&self) {
        let records = self.services.queue.records();
        if records.is_empty() {
            println!("Queue is empty");
            return;
        }

        let now = habitledger_util::now();
        let max_retries = self.services.queue.max_retries();
        for record in records {
            println!(
                "{}  {:<13} {:<28} retries {}/{}  {} ({})",
                record.id,
                record.kind.to_string(),
                record.endpoint.to_string(),
                record.retry_count,
                max_retries,
                format_datetime_full(&record.created_at),
                format_ago(&record.created_at, &now),
            );
        }
    }

    async fn run(self) -> Result<()> {
        if self.offline {
            bail!("--offline cannot be used with run");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut status_rx = self.services.status.subscribe();
        let mut sync_events = self.services.engine.subscribe();
        let handles = self.services.spawn(shutdown_rx);

        // Startup check, then drain anything left from the last session
        if self.services.monitor.check_connectivity().await {
            self.services.engine.sync().await;
        }

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        info!(
            api = %self.settings.api.base_url,
            pending = self.services.queue.pending_count(),
            store_ok = self.services.store_healthy(),
            "Sync client running"
        );

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = status_rx.borrow_and_update().clone();
                    info!(
                        indicator = %status.indicator(),
                        online = status.is_online,
                        pending = status.pending_count,
                        error = ?status.sync_error,
                        "Sync status"
                    );
                }
                event = sync_events.recv() => match event {
                    Ok(event) => log_sync_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Missed sync events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        let _ = shutdown_tx.send(true);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Service task failed");
            }
        }
        self.services.shutdown();

        info!("Shutdown complete");
        Ok(())
    }
}

fn log_sync_event(event: &SyncEvent) {
    match event {
        SyncEvent::Syncing { count } => info!(count, "Syncing"),
        SyncEvent::Success(report) => info!(succeeded = report.succeeded, "Sync complete"),
        SyncEvent::Partial(report) => warn!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Sync partially failed"
        ),
        SyncEvent::Error { message } => warn!(error = %message, "Sync failed"),
        SyncEvent::Cleared => info!("Queue cleared"),
    }
}

fn print_response(response: &ApiResponse) -> Result<()> {
    if let Some(id) = response.queued {
        println!("Offline: queued as {}", id);
    } else {
        println!("HTTP {}", response.status);
    }
    if let Some(body) = &response.body {
        println!("{}", serde_json::to_string_pretty(body)?);
    }
    Ok(())
}

/// Numeric ids stay numbers in the request body
fn id_value(id: &str) -> Value {
    match id.parse::<i64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::String(id.to_string()),
    }
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON: {}", raw))
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    match parse_json(raw)? {
        Value::Object(map) => Ok(map),
        _ => bail!("Expected a JSON object: {}", raw),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            args.log_level
                .as_deref()
                .unwrap_or(args.command.default_log_level()),
        )
    });

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    debug!(version = env!("CARGO_PKG_VERSION"), "habitledger-sync starting");

    if habitledger_util::is_mock_time_active() {
        warn!(
            env = MOCK_TIME_ENV_VAR,
            now = %format_datetime_full(&habitledger_util::now()),
            "Mock time is active, queue ages are shifted"
        );
    }

    let app = App::new(&args)?;
    app.execute(args.command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from([
            "habitledger-sync",
            "--offline",
            "toggle",
            "42",
            "2024-03-10",
        ])
        .unwrap();
        assert!(args.offline);
        assert!(matches!(
            args.command,
            Command::Toggle { ref habit_id, value: 1, .. } if habit_id == "42"
        ));
    }

    #[test]
    fn numeric_ids_stay_numbers() {
        assert_eq!(id_value("42"), json!(42));
        assert_eq!(id_value("65f1c2"), json!("65f1c2"));
    }

    #[test]
    fn parse_object_rejects_arrays() {
        assert!(parse_object(r#"{"name": "Read"}"#).is_ok());
        assert!(parse_object("[1, 2]").is_err());
        assert!(parse_object("not json").is_err());
    }

    #[test]
    fn log_level_defaults() {
        assert_eq!(Command::Run.default_log_level(), "info");
        assert_eq!(Command::List.default_log_level(), "warn");
    }
}
