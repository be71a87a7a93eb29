//! Match state and authoritative tick loop

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::ws::protocol::GameSnapshot;

use super::arena::MapConfig;
use super::combat::{Bullet, BulletKind};
use super::snapshot;
use super::tank::Tank;
use super::{Command, PlayerCommand, PlayerId, MAX_PLAYERS};

/// Match phase; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPhase {
    /// Fewer than two players
    Waiting,
    /// Match in progress
    Playing,
    /// Match ended
    GameOver,
}

/// Tunables for a match and its tick loop
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub tick_rate: u32,
    pub command_queue_capacity: usize,
    /// Capacity of the hub inbox the tick loop delivers snapshots to
    pub snapshot_queue_capacity: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            command_queue_capacity: 100,
            snapshot_queue_capacity: 256,
        }
    }
}

impl MatchConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }
}

/// Match state (shared between the tick loop and join/leave)
#[derive(Debug)]
pub struct MatchState {
    pub phase: MatchPhase,
    pub map: MapConfig,
    pub tanks: HashMap<PlayerId, Tank>,
    pub bullets: Vec<Bullet>,
    pub winner_id: Option<PlayerId>,
    pub tick: u64,
    next_bullet_id: u64,
    /// Time of the most recent tick
    clock: Instant,
}

impl MatchState {
    pub fn new(now: Instant) -> Self {
        Self {
            phase: MatchPhase::Waiting,
            map: MapConfig::default(),
            tanks: HashMap::new(),
            bullets: Vec::new(),
            winner_id: None,
            tick: 0,
            next_bullet_id: 1,
            clock: now,
        }
    }

    pub fn clock(&self) -> Instant {
        self.clock
    }

    /// Place a tank on the first free spawn point.
    ///
    /// Returns false when the match is full or the player is already in it.
    pub fn add_player(&mut self, player_id: PlayerId) -> bool {
        if self.tanks.len() >= MAX_PLAYERS || self.tanks.contains_key(&player_id) {
            return false;
        }

        let spawns = self.map.spawn_points();
        let Some(slot) = (0..spawns.len()).find(|s| !self.tanks.values().any(|t| t.slot == *s))
        else {
            return false;
        };

        self.tanks
            .insert(player_id, Tank::new(player_id, slot, spawns[slot]));

        if self.phase == MatchPhase::Waiting && self.tanks.len() == MAX_PLAYERS {
            self.phase = MatchPhase::Playing;
        }
        true
    }

    /// Remove a tank; a departure mid-match hands the win to whoever is left
    pub fn remove_player(&mut self, player_id: PlayerId) -> bool {
        if self.tanks.remove(&player_id).is_none() {
            return false;
        }

        if self.phase == MatchPhase::Playing && self.tanks.len() == 1 {
            let survivor = self.tanks.keys().next().copied();
            self.finish(survivor);
        }
        true
    }

    /// Apply one queued command; unknown players are ignored
    pub fn apply_command(&mut self, cmd: PlayerCommand, now: Instant) {
        let Some(tank) = self.tanks.get_mut(&cmd.player_id) else {
            return;
        };

        match cmd.command {
            Command::SetInput(input) => tank.input = input,
            Command::Fire => {
                if self.phase == MatchPhase::Playing {
                    fire_from(tank, &mut self.bullets, &mut self.next_bullet_id, now);
                }
            }
            Command::SwitchWeapon(weapon) => tank.switch_weapon(weapon),
        }
    }

    /// Advance the simulation by `dt` seconds ending at `now`
    pub fn step(&mut self, dt: f32, now: Instant) {
        self.clock = now;
        if self.phase != MatchPhase::Playing {
            return;
        }
        self.tick += 1;

        let bounds = self.map.bounds();

        for tank in self.tanks.values_mut() {
            tank.update(dt, &bounds);
            if tank.input.firing {
                fire_from(tank, &mut self.bullets, &mut self.next_bullet_id, now);
            }
        }

        // Mortar shells sit at their launch point until impact, so bounds don't apply to them
        self.bullets.retain_mut(|bullet| {
            bullet.update(dt, now)
                && (bounds.contains(bullet.position)
                    || matches!(bullet.kind, BulletKind::Mortar(_)))
        });

        self.resolve_collisions();
    }

    fn resolve_collisions(&mut self) {
        let mut consumed: HashSet<u64> = HashSet::new();
        let mut killed: Option<PlayerId> = None;

        for bullet in self.bullets.iter().filter(|b| b.is_active()) {
            let hitbox = bullet.hitbox();

            for tank in self.tanks.values_mut() {
                if !bullet.can_hit(tank.id) || !hitbox.intersects(&tank.hitbox()) {
                    continue;
                }

                tank.take_damage(bullet.damage);
                consumed.insert(bullet.id);
                if !tank.is_alive() {
                    killed = Some(tank.id);
                }
                break;
            }

            if killed.is_some() {
                break;
            }
        }

        if !consumed.is_empty() {
            self.bullets.retain(|b| !consumed.contains(&b.id));
        }

        if let Some(dead) = killed {
            let winner = self.tanks.keys().find(|id| **id != dead).copied();
            self.finish(winner);
        }
    }

    fn finish(&mut self, winner: Option<PlayerId>) {
        self.phase = MatchPhase::GameOver;
        self.winner_id = winner;
    }

    pub fn snapshot(&self) -> GameSnapshot {
        snapshot::build(self)
    }
}

/// Shared fire path for explicit fire commands and held triggers
fn fire_from(tank: &mut Tank, bullets: &mut Vec<Bullet>, next_id: &mut u64, now: Instant) {
    if let Some(bullet) = tank.fire(*next_id, now) {
        *next_id += 1;
        bullets.push(bullet);
    }
}

struct LoopParts {
    commands: mpsc::Receiver<PlayerCommand>,
    stop: oneshot::Receiver<()>,
}

struct MatchInner {
    /// Session code, for log context
    label: String,
    config: MatchConfig,
    state: RwLock<MatchState>,
    command_tx: mpsc::Sender<PlayerCommand>,
    snapshot_tx: mpsc::Sender<GameSnapshot>,
    /// Present until the tick loop starts (or the match is stopped)
    loop_parts: Mutex<Option<LoopParts>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// The authoritative game match.
///
/// Cloning yields another handle to the same match.
#[derive(Clone)]
pub struct GameMatch {
    inner: Arc<MatchInner>,
}

impl GameMatch {
    /// Create a dormant match that delivers one snapshot per tick to `snapshot_tx`
    pub fn new(
        label: impl Into<String>,
        config: MatchConfig,
        snapshot_tx: mpsc::Sender<GameSnapshot>,
    ) -> Self {
        let (command_tx, commands) = mpsc::channel(config.command_queue_capacity.max(1));
        let (stop_tx, stop) = oneshot::channel();

        Self {
            inner: Arc::new(MatchInner {
                label: label.into(),
                config,
                state: RwLock::new(MatchState::new(Instant::now())),
                command_tx,
                snapshot_tx,
                loop_parts: Mutex::new(Some(LoopParts { commands, stop })),
                stop_tx: Mutex::new(Some(stop_tx)),
            }),
        }
    }

    /// Add a player; the second join starts the tick loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn join(&self, player_id: PlayerId) -> bool {
        let playing = {
            let mut state = self.inner.state.write();
            if !state.add_player(player_id) {
                return false;
            }
            state.phase == MatchPhase::Playing
        };

        info!(
            code = %self.inner.label,
            player_id = %player_id,
            "Player joined match"
        );

        if playing {
            self.start_loop();
        }
        true
    }

    pub fn leave(&self, player_id: PlayerId) {
        let (removed, winner) = {
            let mut state = self.inner.state.write();
            (state.remove_player(player_id), state.winner_id)
        };

        if removed {
            info!(
                code = %self.inner.label,
                player_id = %player_id,
                winner = ?winner,
                "Player left match"
            );
        }
    }

    /// Queue a command for the next tick; dropped when the queue is full
    pub fn submit_command(&self, player_id: PlayerId, command: Command) -> bool {
        match self
            .inner
            .command_tx
            .try_send(PlayerCommand { player_id, command })
        {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(code = %self.inner.label, player_id = %player_id, "Command queue full, dropping command");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.inner.state.read().snapshot()
    }

    pub fn phase(&self) -> MatchPhase {
        self.inner.state.read().phase
    }

    pub fn player_count(&self) -> usize {
        self.inner.state.read().tanks.len()
    }

    /// Signal the tick loop to exit; also prevents a dormant match from starting
    pub fn stop(&self) {
        self.inner.loop_parts.lock().take();
        if let Some(stop_tx) = self.inner.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
    }

    fn start_loop(&self) {
        let Some(parts) = self.inner.loop_parts.lock().take() else {
            return;
        };
        let inner = self.inner.clone();
        tokio::spawn(run_tick_loop(inner, parts));
    }
}

/// Fixed-rate loop: drain commands, step, emit one snapshot per tick
async fn run_tick_loop(inner: Arc<MatchInner>, parts: LoopParts) {
    let LoopParts {
        mut commands,
        mut stop,
    } = parts;

    info!(code = %inner.label, tick_rate = inner.config.tick_rate, "Match started");

    let mut ticker = interval(inner.config.tick_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = &mut stop => {
                info!(code = %inner.label, "Match stopped");
                break;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.saturating_duration_since(last).as_secs_f32();
                last = now;

                let (snapshot, over) = {
                    let mut state = inner.state.write();
                    while let Ok(cmd) = commands.try_recv() {
                        state.apply_command(cmd, now);
                    }
                    state.step(dt, now);

                    let state = RwLockWriteGuard::downgrade(state);
                    (state.snapshot(), state.phase == MatchPhase::GameOver)
                };
                if over {
                    info!(code = %inner.label, winner = ?snapshot.winner_id, "Match ended");
                    // the final snapshot carries the winner and is never dropped
                    tokio::select! {
                        _ = &mut stop => {}
                        sent = inner.snapshot_tx.send(snapshot) => {
                            if sent.is_err() {
                                debug!(code = %inner.label, "Snapshot inbox closed");
                            }
                        }
                    }
                    break;
                }

                match inner.snapshot_tx.try_send(snapshot) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!(code = %inner.label, "Snapshot inbox full, dropping snapshot");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(code = %inner.label, "Snapshot inbox closed");
                        break;
                    }
                }
            }
        }
    }
}
