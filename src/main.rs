use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arena::battle::BattleSummary;
use arena::web::{run_server, ServerConfig, WebAppState};
use arena::{util, Arena, ArenaEvent, Config, HttpEndpoint};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

/// Traditional vs Ralph Loop, battled side by side
#[derive(Parser, Debug)]
#[command(name = "arena", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Data directory (default: ~/.arena)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Battle backend API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Task to battle on
    #[arg(long = "task", global = true)]
    task_id: Option<String>,

    /// Pacing delay between rounds, in milliseconds
    #[arg(long, global = true)]
    round_delay_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one battle to completion and print the summary (default)
    Run {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve the control API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir.clone());

    // Initialize logging to file (~/.arena/logs/arena.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .init();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(base_url) = cli.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(task_id) = cli.task_id {
        config = config.with_task_id(task_id);
    }
    if let Some(ms) = cli.round_delay_ms {
        config = config.with_round_delay(Duration::from_millis(ms));
    }

    let endpoint = HttpEndpoint::with_timeout(config.base_url.clone(), config.request_timeout)
        .context("Failed to build HTTP client")?;
    let arena = Arena::new(Arc::new(endpoint), config.arena_options());

    match cli.command.unwrap_or(Commands::Run { json: false }) {
        Commands::Run { json } => run_battle(arena, json).await,
        Commands::Serve { host, port } => {
            let mut server = ServerConfig::from(config.server.clone());
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            eprintln!("Serving arena control API on http://{}:{}", server.host, server.port);
            run_server(WebAppState::new(arena), server, shutdown_signal()).await
        }
    }
}

async fn run_battle(arena: Arena, json: bool) -> Result<()> {
    let mut events = arena.subscribe();
    let session = arena
        .start()
        .await
        .context("Failed to start battle")?;
    eprintln!("Battle {session} started on task {}", arena.options().task_id);

    loop {
        tokio::select! {
            _ = arena.wait_until_stopped() => break,
            event = events.recv() => match event {
                Ok(event) => report(&event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = shutdown_signal() => {
                eprintln!("Interrupted, resetting battle");
                arena.reset().await;
                return Ok(());
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        report(&event);
    }

    let session = arena
        .session()
        .context("Battle session disappeared")?;
    let summary = BattleSummary::from_session(&session);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }

    if arena.rate_limited() {
        anyhow::bail!("Battle halted by rate limiting");
    }
    Ok(())
}

fn report(event: &ArenaEvent) {
    match event {
        ArenaEvent::AgentFailed { agent, message } => {
            eprintln!("{} failed: {message}", agent.display_name());
        }
        ArenaEvent::RateLimited {
            message,
            retry_after_secs,
        } => match retry_after_secs {
            Some(secs) => eprintln!("Rate limited: {message} (retry after {secs}s)"),
            None => eprintln!("Rate limited: {message}"),
        },
        ArenaEvent::RoundSettled { round } => eprintln!("Round {round} settled"),
        ArenaEvent::BattleFinished { .. } => {}
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
