use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use mazewar_server::maze::{DEFAULT_MAZE, Maze};
use mazewar_server::{ServerContext, run};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// MazeWar game server.
#[derive(Parser, Debug)]
#[command(name = "mazewar")]
struct Args {
    /// Port to listen on.
    #[arg(short = 'p', long = "port")]
    port: u16,
    /// Maze template file, one text line per maze row. Without it a
    /// compiled-in maze is used.
    #[arg(short = 't', long = "template")]
    template: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.port > 0, "port must be greater than zero");

    let template: Vec<String> = match &args.template {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read maze template {}", path.display()))?
            .lines()
            .map(str::to_owned)
            .collect(),
        None => DEFAULT_MAZE.iter().map(|line| line.to_string()).collect(),
    };
    let maze = Maze::from_template(&template).context("invalid maze template")?;

    let ctx = Arc::new(ServerContext::new(maze));
    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;
    tracing::info!(port = args.port, "mazewar server listening");

    let mut sighup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    run(ctx, listener, async move {
        sighup.recv().await;
        tracing::info!("SIGHUP received, shutting down");
    })
    .await;

    tracing::info!("mazewar server terminating");
    Ok(())
}
