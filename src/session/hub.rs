//! Per-session hub task.
//!
//! The hub owns the session's connection set. It admits and removes
//! connections, relays match snapshots to every member and closes the
//! session once the last player has gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::game::{Command, GameMatch, MatchConfig, MatchPhase, PlayerId, MAX_PLAYERS};
use crate::ws::connection::ConnectionHandle;
use crate::ws::protocol::{
    encode, ConnectedPayload, GameSnapshot, LobbyInfoPayload, ServerMsg,
};

use super::registry::SessionRegistry;
use super::SessionError;

const HUB_INBOX_CAPACITY: usize = 64;

/// Membership changes routed through the hub
#[derive(Debug)]
pub enum HubCommand {
    Register(ConnectionHandle),
    Unregister(PlayerId),
}

struct SessionShared {
    code: String,
    created_at: DateTime<Utc>,
    game: GameMatch,
    inbox: mpsc::Sender<HubCommand>,
    player_count: AtomicUsize,
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
    stop: watch::Sender<bool>,
}

/// Shared handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn code(&self) -> &str {
        &self.inner.code
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn game(&self) -> &GameMatch {
        &self.inner.game
    }

    /// Hand a connection to the hub. Admission is decided by the hub,
    /// which replies on the connection itself.
    pub async fn register(&self, conn: ConnectionHandle) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.inner.code.clone()));
        }
        self.inner
            .inbox
            .send(HubCommand::Register(conn))
            .await
            .map_err(|_| SessionError::Closed(self.inner.code.clone()))
    }

    /// No-op for unknown ids or a finished hub
    pub async fn unregister(&self, player_id: PlayerId) {
        let _ = self.inner.inbox.send(HubCommand::Unregister(player_id)).await;
    }

    pub fn submit_command(&self, player_id: PlayerId, command: Command) -> bool {
        self.inner.game.submit_command(player_id, command)
    }

    pub fn player_count(&self) -> usize {
        self.inner.player_count.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> MatchPhase {
        self.inner.game.phase()
    }

    pub fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop the match and the hub. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!(code = %self.inner.code, "Session closed");
        }
        self.inner.game.stop();
        self.inner.stop.send_replace(true);
    }

    fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("code", &self.inner.code)
            .field("players", &self.player_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The hub task state
pub struct SessionHub {
    session: SessionHandle,
    connections: HashMap<PlayerId, ConnectionHandle>,
    inbox: mpsc::Receiver<HubCommand>,
    snapshots: mpsc::Receiver<GameSnapshot>,
    stop: watch::Receiver<bool>,
    registry: Weak<SessionRegistry>,
}

enum HubEvent {
    Command(HubCommand),
    Snapshot(GameSnapshot),
    Stop,
}

impl SessionHub {
    /// Create the session's match and spawn its hub task
    pub fn spawn(code: String, config: MatchConfig, registry: Weak<SessionRegistry>) -> SessionHandle {
        let (inbox_tx, inbox) = mpsc::channel(HUB_INBOX_CAPACITY);
        let (snapshot_tx, snapshots) = mpsc::channel(config.snapshot_queue_capacity.max(1));
        let (stop_tx, stop) = watch::channel(false);

        let game = GameMatch::new(code.clone(), config, snapshot_tx);
        let session = SessionHandle {
            inner: Arc::new(SessionShared {
                code,
                created_at: Utc::now(),
                game,
                inbox: inbox_tx,
                player_count: AtomicUsize::new(0),
                last_activity: Mutex::new(Instant::now()),
                closed: AtomicBool::new(false),
                stop: stop_tx,
            }),
        };

        let hub = SessionHub {
            session: session.clone(),
            connections: HashMap::new(),
            inbox,
            snapshots,
            stop,
            registry,
        };
        tokio::spawn(hub.run());

        session
    }

    async fn run(mut self) {
        debug!(code = %self.session.code(), "Session hub started");

        loop {
            let event = tokio::select! {
                cmd = self.inbox.recv() => match cmd {
                    Some(cmd) => HubEvent::Command(cmd),
                    None => HubEvent::Stop,
                },
                snapshot = self.snapshots.recv() => match snapshot {
                    Some(snapshot) => HubEvent::Snapshot(snapshot),
                    None => HubEvent::Stop,
                },
                _ = self.stop.changed() => HubEvent::Stop,
            };

            match event {
                HubEvent::Command(HubCommand::Register(conn)) => self.handle_register(conn),
                HubEvent::Command(HubCommand::Unregister(player_id)) => {
                    if self.handle_unregister(player_id) {
                        break;
                    }
                }
                HubEvent::Snapshot(snapshot) => self.broadcast_snapshot(&snapshot),
                HubEvent::Stop => break,
            }
        }

        self.shutdown();
    }

    fn handle_register(&mut self, conn: ConnectionHandle) {
        let code = self.session.code().to_string();

        if self.session.is_closed() {
            conn.send_msg(&ServerMsg::error("Lobby is closed"));
            return;
        }

        if self.session.phase() == MatchPhase::GameOver {
            warn!(code = %code, player_id = %conn.id, "Match is over, rejecting connection");
            conn.send_msg(&ServerMsg::error("Match is over"));
            return;
        }

        if self.connections.len() >= MAX_PLAYERS || !self.session.game().join(conn.id) {
            warn!(code = %code, player_id = %conn.id, "Lobby full, rejecting connection");
            // dropping the handle closes the socket after the error is flushed
            conn.send_msg(&ServerMsg::error("Lobby is full"));
            return;
        }

        conn.send_msg(&ServerMsg::Connected(ConnectedPayload {
            player_id: conn.id,
            lobby_code: code.clone(),
        }));

        info!(code = %code, player_id = %conn.id, "Player connected to lobby");
        self.connections.insert(conn.id, conn);
        self.sync_count();
        self.session.touch();
        self.broadcast_lobby_info();
    }

    /// Returns true when the session has emptied and the hub should exit
    fn handle_unregister(&mut self, player_id: PlayerId) -> bool {
        let Some(conn) = self.connections.remove(&player_id) else {
            return false;
        };
        drop(conn);

        self.session.game().leave(player_id);
        self.sync_count();
        self.session.touch();
        info!(
            code = %self.session.code(),
            player_id = %player_id,
            remaining = self.connections.len(),
            "Player disconnected from lobby"
        );

        if self.connections.is_empty() {
            self.session.close();
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(self.session.code());
            }
            return true;
        }

        self.broadcast_lobby_info();
        false
    }

    fn broadcast_snapshot(&self, snapshot: &GameSnapshot) {
        self.broadcast_frame(snapshot);
        self.session.touch();
    }

    fn broadcast_lobby_info(&self) {
        let mut players: Vec<PlayerId> = self.connections.keys().copied().collect();
        players.sort();

        let msg = ServerMsg::LobbyInfo(LobbyInfoPayload {
            code: self.session.code().to_string(),
            player_count: self.connections.len(),
            max_players: MAX_PLAYERS,
            state: self.session.phase(),
            players,
        });
        self.broadcast_frame(&msg);
    }

    /// Serialize once and fan out. A connection whose queue overflows is
    /// closed by its handle and unregisters through its inbound pump.
    fn broadcast_frame<T: serde::Serialize>(&self, msg: &T) {
        let frame = match encode(msg) {
            Ok(frame) => frame,
            Err(e) => {
                error!(code = %self.session.code(), error = %e, "Failed to encode broadcast");
                return;
            }
        };

        for conn in self.connections.values() {
            conn.send(frame.clone());
        }
    }

    fn sync_count(&self) {
        self.session
            .inner
            .player_count
            .store(self.connections.len(), Ordering::Release);
    }

    fn shutdown(&mut self) {
        for (_, conn) in self.connections.drain() {
            conn.close();
        }
        self.sync_count();
        self.session.close();
        debug!(code = %self.session.code(), "Session hub stopped");
    }
}
