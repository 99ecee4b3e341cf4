//! Per-connection session handling.
//!
//! Each accepted connection gets a pair of tasks: the session task reads and
//! dispatches packets, the writer task drains the outbound queue into the
//! socket. The session starts unauthenticated, admits exactly one login, and
//! cleans up its player on any exit path.

use std::sync::Arc;

use bytes::Bytes;
use protocol::{
    Connection, FIRE_PKT, INUSE_PKT, LOGIN_PKT, MOVE_PKT, Packet, PacketWriter, READY_PKT,
    REFRESH_PKT, SEND_PKT, TURN_PKT,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::ServerContext;
use crate::player::{self, HitSignal, Outbound, Player};
use crate::registry::SessionHandle;

/// Runs one client connection to completion.
pub async fn client_session(ctx: Arc<ServerContext>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    tracing::debug!(?peer, "session started");
    let (read_half, write_half) = stream.into_split();
    serve(ctx, read_half, write_half).await;
    tracing::debug!(?peer, "session ended");
}

/// The session loop over any byte stream.
///
/// Laser hits are checked at the top of every cycle and again right after a
/// receive returns, so a hit raised while the task was blocked is processed
/// before the next client packet is dispatched. The receive itself is
/// cancellation safe, so losing the `select!` race to a hit or shutdown
/// notification never drops bytes.
pub async fn serve<R, W>(ctx: Arc<ServerContext>, read: R, write: W)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = Connection::new(read);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(write, out_rx));

    let handle = SessionHandle::new();
    ctx.registry.register(handle.clone());
    let hit = Arc::new(HitSignal::default());

    let mut current: Option<Arc<Player>> = None;

    loop {
        if let Some(p) = &current {
            player::check_for_laser_hit(&ctx, p).await;
        }

        let received = tokio::select! {
            res = conn.recv() => res,
            _ = hit.notified() => continue,
            _ = handle.shutdown_requested() => break,
        };

        let (pkt, payload) = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(%err, "receive failed");
                break;
            }
        };

        if let Some(p) = &current {
            player::check_for_laser_hit(&ctx, p).await;
        }

        dispatch(&ctx, &out_tx, &hit, &mut current, pkt, payload);
        tracing::trace!(maze = %ctx.maze.render(), "maze state");
    }

    if let Some(p) = current.take() {
        player::logout(&ctx, &p);
    }
    ctx.registry.unregister(handle.id());
}

/// Applies one client packet to the game.
fn dispatch(
    ctx: &ServerContext,
    out_tx: &mpsc::UnboundedSender<Outbound>,
    hit: &Arc<HitSignal>,
    current: &mut Option<Arc<Player>>,
    pkt: Packet,
    payload: Option<Bytes>,
) {
    match pkt.kind {
        LOGIN_PKT => {
            if current.is_some() {
                tracing::debug!("ignoring duplicate LOGIN");
                return;
            }
            let avatar = pkt.param1 as u8;
            let name_buf = payload.unwrap_or_default();
            let name = String::from_utf8_lossy(&name_buf);
            match ctx
                .players
                .login(&ctx.maze, out_tx.clone(), hit.clone(), avatar, &name)
            {
                Some(p) => {
                    p.send_packet(Packet::new(READY_PKT), None);
                    player::reset_player(ctx, &p);
                    *current = Some(p);
                }
                None => {
                    let _ = out_tx.send((Packet::new(INUSE_PKT), None));
                }
            }
        }
        MOVE_PKT => {
            if let Some(p) = current {
                player::move_player(ctx, p, pkt.param1);
            }
        }
        TURN_PKT => {
            if let Some(p) = current {
                player::rotate_player(ctx, p, pkt.param1);
            }
        }
        FIRE_PKT => {
            if let Some(p) = current {
                player::fire_laser(ctx, p);
            }
        }
        REFRESH_PKT => {
            if let Some(p) = current {
                player::invalidate_view(p);
                player::update_view(ctx, p);
            }
        }
        SEND_PKT => {
            if let (Some(p), Some(data)) = (current.as_ref(), payload.as_ref()) {
                player::send_chat(ctx, p, data);
            }
        }
        other => {
            tracing::debug!(kind = other, "ignoring unknown packet type");
        }
    }
}

/// Drains a player's outbound queue into the socket.
///
/// Exits when the queue closes or a write fails; broadcasts to a player
/// whose writer has gone away are dropped at the queue.
async fn write_loop<W: AsyncWrite + Unpin>(write: W, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    let mut writer = PacketWriter::new(write);
    while let Some((pkt, payload)) = rx.recv().await {
        if let Err(err) = writer.send(&pkt, payload.as_deref()).await {
            tracing::debug!(%err, "write failed, closing outbound queue");
            break;
        }
    }
}
