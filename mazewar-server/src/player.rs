//! Player records, the avatar table, and the game operations.
//!
//! All outgoing traffic for a player is an enqueue onto that player's
//! outbound channel; a dedicated writer task per connection drains it. An
//! enqueue never blocks and never takes another lock, so packet groups such
//! as a CLEAR followed by its SHOW run can be emitted while the player's
//! state lock is held, which keeps them contiguous per recipient. Broadcasts
//! iterate a snapshot of the avatar table in index order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use protocol::{ALERT_PKT, CHAT_PKT, CLEAR_PKT, Packet, SCORE_PKT, SHOW_PKT};
use tokio::sync::Notify;
use tokio::sync::mpsc;

use crate::ServerContext;
use crate::maze::{Direction, EMPTY, Maze, VIEW_DEPTH, VIEW_WIDTH, View, is_avatar};

/// Size of the avatar table; avatars are raw bytes.
pub const MAX_AVATARS: usize = 256;

/// How long a hit player stays off the grid before respawning.
const PURGATORY: Duration = Duration::from_secs(3);

/// Upper bound on a formatted chat line.
const CHAT_LIMIT: usize = 1024;

/// A packet queued for a player's writer task.
pub type Outbound = (Packet, Option<Bytes>);

/// Laser-hit indicator shared between a player record and its session task.
///
/// `raise` is called from the shooter's task; the stored notify permit wakes
/// the victim's session even if it is currently parked in a blocking
/// receive. The flag itself is the authoritative datum, the notification
/// only hurries its observation along.
#[derive(Default)]
pub struct HitSignal {
    hit: AtomicBool,
    notify: Notify,
}

impl HitSignal {
    pub fn raise(&self) {
        self.hit.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn take(&self) -> bool {
        self.hit.swap(false, Ordering::SeqCst)
    }

    /// Resolves once a hit has been signalled.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

struct PlayerState {
    row: usize,
    col: usize,
    dir: Direction,
    score: i32,
    last_view: View,
    /// Valid depth of `last_view`; -1 means the cache is invalid and the
    /// next update must resend the whole view.
    view_valid_depth: i32,
}

/// Server-side state of one logged-in player.
///
/// Records are shared via `Arc`: the avatar table holds one reference, the
/// owning session another, and broadcasts take transient clones.
pub struct Player {
    avatar: u8,
    name: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    hit: Arc<HitSignal>,
    state: Mutex<PlayerState>,
}

impl Player {
    pub fn avatar(&self) -> u8 {
        self.avatar
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn score(&self) -> i32 {
        self.state.lock().unwrap().score
    }

    /// Queues a packet for delivery. A closed queue means the connection is
    /// already going down, which broadcasts tolerate silently.
    pub fn send_packet(&self, pkt: Packet, payload: Option<Bytes>) {
        let _ = self.outbound.send((pkt, payload));
    }
}

/// The avatar table: at most one live player per avatar byte.
pub struct PlayerMap {
    slots: Mutex<Vec<Option<Arc<Player>>>>,
}

impl PlayerMap {
    pub fn new() -> Self {
        PlayerMap {
            slots: Mutex::new(vec![None; MAX_AVATARS]),
        }
    }

    /// Creates a player record, places its avatar randomly, and installs it.
    ///
    /// Fails when the avatar is not an uppercase letter, is already in use,
    /// or the maze has no free cell.
    pub fn login(
        &self,
        maze: &Maze,
        outbound: mpsc::UnboundedSender<Outbound>,
        hit: Arc<HitSignal>,
        avatar: u8,
        name: &str,
    ) -> Option<Arc<Player>> {
        if !is_avatar(avatar) {
            tracing::debug!(avatar, "rejected login with non-avatar byte");
            return None;
        }

        let mut slots = self.slots.lock().unwrap();
        if slots[avatar as usize].is_some() {
            tracing::debug!(avatar = %(avatar as char), "avatar already in use");
            return None;
        }

        let (row, col) = match maze.place_random(avatar) {
            Ok(pos) => pos,
            Err(err) => {
                tracing::error!(avatar = %(avatar as char), %err, "login placement failed");
                return None;
            }
        };

        let name = if name.is_empty() { "Anonymous" } else { name };
        let player = Arc::new(Player {
            avatar,
            name: name.to_owned(),
            outbound,
            hit,
            state: Mutex::new(PlayerState {
                row,
                col,
                dir: Direction::North,
                score: 0,
                last_view: [[EMPTY; VIEW_WIDTH]; VIEW_DEPTH],
                view_valid_depth: -1,
            }),
        });
        slots[avatar as usize] = Some(player.clone());
        tracing::info!(name, avatar = %(avatar as char), "logged in");
        Some(player)
    }

    /// Clears the table slot if it still holds this record.
    fn remove(&self, player: &Arc<Player>) {
        let mut slots = self.slots.lock().unwrap();
        let slot = &mut slots[player.avatar as usize];
        if slot.as_ref().is_some_and(|p| Arc::ptr_eq(p, player)) {
            *slot = None;
        }
    }

    /// Clones the record for this avatar, if logged in.
    pub fn get(&self, avatar: u8) -> Option<Arc<Player>> {
        self.slots.lock().unwrap()[avatar as usize].clone()
    }

    /// Snapshot of all live players in avatar order.
    pub fn live(&self) -> Vec<Arc<Player>> {
        self.slots.lock().unwrap().iter().flatten().cloned().collect()
    }
}

impl Default for PlayerMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the player from the table and the maze, then tells the remaining
/// players to drop its scoreboard entry.
pub fn logout(ctx: &ServerContext, player: &Arc<Player>) {
    ctx.players.remove(player);

    let (row, col) = {
        let st = player.state.lock().unwrap();
        (st.row, st.col)
    };
    ctx.maze.remove(player.avatar, row, col);

    let pkt = Packet {
        kind: SCORE_PKT,
        param1: player.avatar as i8,
        param2: -1,
        ..Default::default()
    };
    for other in ctx.players.live() {
        other.send_packet(pkt, None);
    }
    tracing::info!(name = player.name(), avatar = %(player.avatar as char), "logged out");
}

/// Moves the player one step along its gaze (`sign` >= 0) or away from it.
///
/// Every live player gets a view update afterwards whether or not the move
/// succeeded; another player's corridor may have been affected either way.
pub fn move_player(ctx: &ServerContext, player: &Arc<Player>, sign: i8) {
    {
        let mut st = player.state.lock().unwrap();
        let dir = if sign == -1 { st.dir.reverse() } else { st.dir };
        if ctx.maze.move_avatar(st.row, st.col, dir).is_ok() {
            let (dr, dc) = dir.delta();
            st.row = (st.row as isize + dr) as usize;
            st.col = (st.col as isize + dc) as usize;
        }
    }

    for other in ctx.players.live() {
        update_view(ctx, &other);
    }
}

/// Turns the player's gaze a quarter turn: counter-clockwise for `dir` == 1,
/// clockwise otherwise. Only this player's view changes.
pub fn rotate_player(ctx: &ServerContext, player: &Arc<Player>, dir: i8) {
    {
        let mut st = player.state.lock().unwrap();
        st.dir = if dir == 1 {
            st.dir.turn_left()
        } else {
            st.dir.turn_right()
        };
        st.view_valid_depth = -1;
    }
    update_view(ctx, player);
}

/// Marks the cached view stale so the next update resends everything.
pub fn invalidate_view(player: &Arc<Player>) {
    player.state.lock().unwrap().view_valid_depth = -1;
}

/// Recomputes the player's view and sends the difference to its client.
///
/// An invalid cache produces a CLEAR followed by the full matrix; otherwise
/// only cells that differ from the previous view are sent.
pub fn update_view(ctx: &ServerContext, player: &Arc<Player>) {
    let mut st = player.state.lock().unwrap();
    let (view, depth) = ctx.maze.get_view(st.row, st.col, st.dir, VIEW_DEPTH);

    if st.view_valid_depth < 0 {
        player.send_packet(Packet::new(CLEAR_PKT), None);
        for d in 0..depth {
            for x in 0..VIEW_WIDTH {
                player.send_packet(show_packet(view[d][x], x, d), None);
            }
        }
    } else {
        for d in 0..depth {
            for x in 0..VIEW_WIDTH {
                if view[d][x] != st.last_view[d][x] {
                    player.send_packet(show_packet(view[d][x], x, d), None);
                }
            }
        }
    }

    st.last_view = view;
    st.view_valid_depth = depth as i32;
}

fn show_packet(cell: u8, x: usize, depth: usize) -> Packet {
    Packet {
        kind: SHOW_PKT,
        param1: cell as i8,
        param2: x as i8,
        param3: depth as i8,
        ..Default::default()
    }
}

/// Fires the player's laser along its gaze.
///
/// A hit flags the victim and nudges its session task, then credits the
/// shooter and broadcasts the new score. Walls absorb the beam.
pub fn fire_laser(ctx: &ServerContext, player: &Arc<Player>) {
    let (row, col, dir) = {
        let st = player.state.lock().unwrap();
        (st.row, st.col, st.dir)
    };

    let Some(target) = ctx.maze.find_target(row, col, dir) else {
        return;
    };
    let Some(victim) = ctx.players.get(target) else {
        tracing::debug!(target = %(target as char), "target avatar has no record");
        return;
    };

    victim.hit.raise();

    let score = {
        let mut st = player.state.lock().unwrap();
        st.score += 1;
        st.score
    };
    tracing::debug!(
        shooter = %(player.avatar as char),
        victim = %(target as char),
        score,
        "laser hit"
    );

    let pkt = Packet {
        kind: SCORE_PKT,
        param1: player.avatar as i8,
        param2: score as i8,
        ..Default::default()
    };
    for other in ctx.players.live() {
        other.send_packet(pkt, None);
    }
}

/// Consumes a pending laser hit, if any.
///
/// Called by the player's own session at the top of each receive cycle and
/// again right after a receive returns. A set flag removes the avatar from
/// the grid, refreshes everyone's view, alerts the victim, holds it in
/// purgatory, and respawns it.
pub async fn check_for_laser_hit(ctx: &ServerContext, player: &Arc<Player>) {
    if !player.hit.take() {
        return;
    }
    tracing::debug!(avatar = %(player.avatar as char), "processing laser hit");

    let (row, col) = {
        let st = player.state.lock().unwrap();
        (st.row, st.col)
    };
    ctx.maze.remove(player.avatar, row, col);

    for other in ctx.players.live() {
        update_view(ctx, &other);
    }

    player.send_packet(Packet::new(ALERT_PKT), None);

    tokio::time::sleep(PURGATORY).await;

    reset_player(ctx, player);
}

/// Respawns the player: new random cell, score back to zero, scoreboard
/// seeded, all views refreshed. Also runs once after login.
///
/// When no free cell can be found the failure is logged and the player is
/// left off the grid until the next reset; the session keeps running.
pub fn reset_player(ctx: &ServerContext, player: &Arc<Player>) {
    {
        let mut st = player.state.lock().unwrap();
        ctx.maze.remove(player.avatar, st.row, st.col);
        match ctx.maze.place_random(player.avatar) {
            Ok((row, col)) => {
                st.row = row;
                st.col = col;
            }
            Err(err) => {
                tracing::error!(avatar = %(player.avatar as char), %err, "respawn failed");
                return;
            }
        }
        st.score = 0;
    }

    let live = ctx.players.live();

    // Seed this player's scoreboard with everyone else's standing.
    for other in &live {
        if other.avatar != player.avatar {
            let pkt = Packet {
                kind: SCORE_PKT,
                param1: other.avatar as i8,
                param2: other.score() as i8,
                ..Default::default()
            };
            player.send_packet(pkt, None);
        }
    }

    let pkt = Packet {
        kind: SCORE_PKT,
        param1: player.avatar as i8,
        param2: 0,
        ..Default::default()
    };
    for other in &live {
        other.send_packet(pkt, None);
    }

    for other in &live {
        update_view(ctx, other);
    }
}

/// Broadcasts `<name>[<avatar>] <msg>` to every live player.
pub fn send_chat(ctx: &ServerContext, player: &Arc<Player>, msg: &[u8]) {
    let text = String::from_utf8_lossy(msg);
    let mut line = format!("{}[{}] {}", player.name, player.avatar as char, text);
    if line.len() > CHAT_LIMIT {
        let mut end = CHAT_LIMIT;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        line.truncate(end);
    }

    let pkt = Packet {
        kind: CHAT_PKT,
        size: line.len() as u16,
        ..Default::default()
    };
    let payload = Bytes::from(line.into_bytes());
    for other in ctx.players.live() {
        other.send_packet(pkt, Some(payload.clone()));
    }
}
