//! Binary entry point for annotations-rw.
//!
//! Serves the HTTP API, replays queued annotation messages, or initialises
//! the graph store.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use annotations_rw::config::{AppInfo, LifecycleConfig, ServiceSettings};
use annotations_rw::forwarder::{Forwarder, HttpProducer, QueueForwarder};
use annotations_rw::observability::{self, LogFormat, LoggingConfig};
use annotations_rw::queue::{QueueHandler, QueueMessage};
use annotations_rw::services::AnnotationsService;
use annotations_rw::storage::SqliteGraphStore;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Queue messages buffered between the reader and the handler.
const INGEST_CHANNEL_CAPACITY: usize = 64;

/// annotations-rw - reads and writes content annotations in a graph store.
#[derive(Parser)]
#[command(name = "annotations-rw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database holding the graph.
    #[arg(long, global = true, env = "GRAPH_DB_PATH", default_value = "annotations.db")]
    db_path: PathBuf,

    /// JSON file with the origin and lifecycle maps.
    #[arg(
        long,
        global = true,
        env = "LIFECYCLE_CONFIG_PATH",
        default_value = "annotation-config.json"
    )]
    lifecycle_config: PathBuf,

    /// Public API base URL used for concept identifiers on read.
    #[arg(long, global = true, env = "API_HOST", default_value = "http://api.ft.com")]
    api_url: String,

    /// Log level filter (overridden by `RUST_LOG`).
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format: json or pretty.
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// Map annotations without a predicate to "mentions" instead of rejecting them.
    #[arg(long, global = true, env = "ALLOW_DEFAULT_PREDICATE")]
    allow_default_predicate: bool,

    /// Application name reported by the health endpoints.
    #[arg(long, global = true, env = "APP_NAME", default_value = "annotations-rw")]
    app_name: String,

    /// System code reported by the health endpoints.
    #[arg(long, global = true, env = "APP_SYSTEM_CODE", default_value = "annotations-rw")]
    app_system_code: String,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, env = "APP_PORT", default_value = "8080")]
        port: u16,

        /// Message-bus HTTP proxy to forward written annotations to.
        #[arg(long, env = "FORWARD_URL")]
        forward_url: Option<String>,

        /// Expose Prometheus metrics at /__metrics.
        #[arg(long, env = "METRICS_ENABLED")]
        metrics: bool,
    },

    /// Replay queue messages from a JSON-lines file.
    Ingest {
        /// Input file; reads stdin when omitted.
        file: Option<PathBuf>,

        /// Message-bus HTTP proxy to forward written annotations to.
        #[arg(long, env = "FORWARD_URL")]
        forward_url: Option<String>,
    },

    /// Create the graph store constraints and exit.
    Init,
}

fn main() -> ExitCode {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
    };
    if let Err(e) = observability::init_logging(&logging) {
        eprintln!("Failed to initialize observability: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Command failed: {e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(cli: Cli) -> anyhow::Result<()> {
    let service = build_service(&cli)?;

    match &cli.command {
        Commands::Init => cmd_init(&service),
        Commands::Serve {
            port,
            forward_url,
            metrics,
        } => cmd_serve(&cli, service, *port, forward_url.clone(), *metrics),
        Commands::Ingest { file, forward_url } => {
            cmd_ingest(&cli, service, file.as_deref(), forward_url.clone())
        },
    }
}

fn build_service(cli: &Cli) -> anyhow::Result<AnnotationsService> {
    let store = SqliteGraphStore::open(&cli.db_path)
        .with_context(|| format!("opening graph store at {}", cli.db_path.display()))?;
    let settings = ServiceSettings::new(cli.api_url.clone())
        .with_allow_default_predicate(cli.allow_default_predicate);
    AnnotationsService::new(Arc::new(store), settings).context("configuring annotations service")
}

fn load_lifecycles(cli: &Cli) -> anyhow::Result<Arc<LifecycleConfig>> {
    let config = LifecycleConfig::load_from_file(&cli.lifecycle_config).with_context(|| {
        format!(
            "loading lifecycle config from {}",
            cli.lifecycle_config.display()
        )
    })?;
    Ok(Arc::new(config))
}

fn build_forwarder(
    url: Option<String>,
    lifecycles: &LifecycleConfig,
) -> Option<Arc<dyn QueueForwarder>> {
    url.map(|url| {
        tracing::info!(url = %url, "Forwarding written annotations");
        Arc::new(Forwarder::new(
            HttpProducer::new(url),
            lifecycles.message_type.clone(),
        )) as Arc<dyn QueueForwarder>
    })
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("creating tokio runtime")
}

/// Creates the store constraints.
fn cmd_init(service: &AnnotationsService) -> anyhow::Result<()> {
    service.initialise().context("initialising graph store")?;
    println!("Graph store initialised");
    Ok(())
}

/// Starts the HTTP server.
#[cfg(feature = "http")]
fn cmd_serve(
    cli: &Cli,
    service: AnnotationsService,
    port: u16,
    forward_url: Option<String>,
    metrics: bool,
) -> anyhow::Result<()> {
    use annotations_rw::http::{self, AppState};

    let lifecycles = load_lifecycles(cli)?;
    service.initialise().context("initialising graph store")?;

    let mut state = AppState::new(
        service,
        Arc::clone(&lifecycles),
        AppInfo::new(cli.app_name.clone(), cli.app_system_code.clone()),
    );
    if let Some(handle) = observability::install_prometheus(metrics)? {
        state = state.with_metrics(handle);
    }
    // Built and dropped outside the runtime; the blocking client owns one.
    let forwarder = build_forwarder(forward_url, &lifecycles);
    if let Some(forwarder) = &forwarder {
        state = state.with_forwarder(Arc::clone(forwarder));
    }

    let rt = build_runtime()?;
    rt.block_on(http::serve(state, port))?;
    drop(rt);
    drop(forwarder);
    Ok(())
}

/// Starts the HTTP server (feature not enabled).
#[cfg(not(feature = "http"))]
fn cmd_serve(
    _cli: &Cli,
    _service: AnnotationsService,
    _port: u16,
    _forward_url: Option<String>,
    _metrics: bool,
) -> anyhow::Result<()> {
    anyhow::bail!("this build does not include the http feature")
}

/// Feeds JSON-lines queue records through the queue handler.
fn cmd_ingest(
    cli: &Cli,
    service: AnnotationsService,
    file: Option<&Path>,
    forward_url: Option<String>,
) -> anyhow::Result<()> {
    let lifecycles = load_lifecycles(cli)?;
    let forwarder = build_forwarder(forward_url, &lifecycles);
    let mut handler = QueueHandler::new(service, lifecycles);
    if let Some(forwarder) = &forwarder {
        handler = handler.with_forwarder(Arc::clone(forwarder));
    }

    let reader: Box<dyn BufRead + Send> = match file {
        Some(path) => Box::new(std::io::BufReader::new(
            std::fs::File::open(path)
                .with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(std::io::BufReader::new(std::io::stdin())),
    };

    let rt = build_runtime()?;
    let stats = rt.block_on(async move {
        let (sender, receiver) = tokio::sync::mpsc::channel(INGEST_CHANNEL_CAPACITY);
        let consumer = tokio::spawn(async move { handler.run(receiver).await });

        let producer = tokio::task::spawn_blocking(move || {
            for (number, line) in reader.lines().enumerate() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(line = number + 1, error = %e, "Failed to read input");
                        break;
                    },
                };
                if line.trim().is_empty() {
                    continue;
                }
                match QueueMessage::from_json_line(&line) {
                    Ok(message) => {
                        if sender.blocking_send(message).is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        tracing::error!(line = number + 1, error = %e, "Skipping malformed record");
                    },
                }
            }
        });

        producer.await.context("reading queue records")?;
        consumer.await.context("processing queue records")
    })?;
    drop(rt);
    drop(forwarder);

    println!(
        "Ingested: {} written, {} skipped, {} failed",
        stats.written, stats.skipped, stats.failed
    );
    Ok(())
}
