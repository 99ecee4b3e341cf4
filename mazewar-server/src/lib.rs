//! Server-authoritative MazeWar game runtime.
//!
//! Clients connect over TCP, steer an avatar through a shared maze, and
//! receive the incremental corridor view, scoreboard and alert events their
//! actions produce. One session task per connection mutates the shared state
//! described by [`ServerContext`].

pub mod maze;
pub mod player;
pub mod registry;
pub mod session;

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::maze::Maze;
use crate::player::PlayerMap;
use crate::registry::ClientRegistry;

/// The process-wide game state, passed into every session instead of living
/// in globals.
pub struct ServerContext {
    pub maze: Maze,
    pub players: PlayerMap,
    pub registry: ClientRegistry,
}

impl ServerContext {
    pub fn new(maze: Maze) -> Self {
        ServerContext {
            maze,
            players: PlayerMap::new(),
            registry: ClientRegistry::new(),
        }
    }
}

/// Accepts clients until `shutdown` resolves, then drains the fleet.
///
/// Shutdown order: the accept socket closes first, every live session is
/// signalled, and the call returns once the registry reports empty. A player
/// sitting out its respawn pause can delay that by up to the pause length.
pub async fn run(ctx: Arc<ServerContext>, listener: TcpListener, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, addr)) => {
                    tracing::info!(%addr, "client connected");
                    tokio::spawn(session::client_session(ctx.clone(), stream));
                }
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                }
            },
            _ = &mut shutdown => break,
        }
    }

    drop(listener);
    ctx.registry.shutdown_all();
    ctx.registry.wait_for_empty().await;
    tracing::info!("all sessions drained");
}
