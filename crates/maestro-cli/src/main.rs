mod config;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use config::{MaestroConfig, API_KEY_ENV};
use maestro_agent::LlmInvoker;
use maestro_gateway::{AuthConfig, GatewayServer};
use maestro_orchestrator::{
    profiles::catalog, ExecutionStatus, Orchestrator, Pattern, StatusEvent, TaskRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "maestro", about = "Maestro — multi-pattern agent orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "maestro.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one execution in-process and print its progress
    Run {
        /// Pattern name, e.g. sequential or deep_research
        pattern: String,
        /// The objective
        task: String,
        /// Session label
        #[arg(long, default_value = "cli")]
        session: String,
        /// Pattern options as a JSON object
        #[arg(long)]
        options: Option<String>,
    },
    /// List patterns and their default rosters
    Patterns,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn build_orchestrator(config: &MaestroConfig) -> Arc<Orchestrator> {
    if config.model.api_key.is_empty() {
        warn!(
            env = API_KEY_ENV,
            "No model API key configured; agent calls will be rejected by the provider"
        );
    }
    let invoker = Arc::new(LlmInvoker::new(config.model.clone()));
    Arc::new(Orchestrator::new(invoker, config.orchestrator.clone()))
}

/// Periodically evict finished executions.
fn spawn_retention_sweeper(orchestrator: Arc<Orchestrator>) {
    let every = orchestrator.config().retention.sweep_interval_secs;
    if every == 0 {
        info!("Retention sweeper disabled");
        return;
    }
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(every));
        // the first tick fires immediately
        tick.tick().await;
        loop {
            tick.tick().await;
            orchestrator.evict_expired();
        }
    });
}

async fn serve(config: MaestroConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let orchestrator = build_orchestrator(&config);
    spawn_retention_sweeper(orchestrator.clone());

    let auth = AuthConfig::new(config.security.api_keys.clone());
    if auth.is_enabled() {
        info!(keys = auth.api_keys.len(), "API key auth enabled");
    }
    let app = GatewayServer::build_with_auth(orchestrator, auth);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, provider = ?config.model.provider, model = %config.model.model_id, "Maestro gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run(
    config: MaestroConfig,
    pattern: &str,
    task: String,
    session: String,
    options: Option<String>,
) -> anyhow::Result<()> {
    let pattern: Pattern = pattern.parse()?;
    let options = match options {
        Some(raw) => serde_json::from_str(&raw).context("--options must be a JSON object")?,
        None => serde_json::Value::Null,
    };

    let orchestrator = build_orchestrator(&config);
    let mut updates = orchestrator.subscribe(None);
    let id = orchestrator.start(TaskRequest::new(pattern, task, session).with_options(options))?;
    println!("execution {id} ({pattern})");

    let mut last_line = String::new();
    let done = loop {
        tokio::select! {
            update = updates.next() => {
                let snapshot = match update {
                    Some(StatusEvent::Snapshot(snapshot)) => snapshot,
                    Some(StatusEvent::Lagged(_)) => Arc::new(orchestrator.status(id)?),
                    None => break orchestrator.status(id)?,
                };
                if snapshot.execution_id != id {
                    continue;
                }
                let line = format!(
                    "[{:>3.0}%] {}{}",
                    snapshot.progress * 100.0,
                    snapshot.status,
                    snapshot
                        .current_task
                        .as_deref()
                        .map(|t| format!(": {t}"))
                        .unwrap_or_default()
                );
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
                if snapshot.is_terminal() {
                    break (*snapshot).clone();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("cancelling...");
                orchestrator.cancel(id)?;
                break orchestrator.wait_for_terminal(id).await?;
            }
        }
    };

    match done.status {
        ExecutionStatus::Completed => {
            if let Some(result) = &done.result {
                println!("\n{}", result.output);
                if result.inconclusive {
                    println!("\n(inconclusive)");
                }
                for note in &result.notes {
                    println!("note: {note}");
                }
            }
            Ok(())
        }
        ExecutionStatus::Failed => {
            let (category, message) = done
                .error
                .map(|e| (e.category.to_string(), e.message))
                .unwrap_or_default();
            anyhow::bail!("execution {id} failed [{category}]: {message}")
        }
        status => anyhow::bail!("execution {id} ended {status}"),
    }
}

fn print_patterns() {
    println!("Patterns:");
    for info in catalog() {
        println!("  {} — {}", info.name, info.description);
        println!("    default roles: {}", info.default_roles.join(", "));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Patterns => print_patterns(),
        Commands::Serve { host, port } => {
            let config = MaestroConfig::load(&cli.config).await?;
            serve(config, host, port).await?;
        }
        Commands::Run {
            pattern,
            task,
            session,
            options,
        } => {
            let config = MaestroConfig::load(&cli.config).await?;
            run(config, &pattern, task, session, options).await?;
        }
    }

    Ok(())
}
