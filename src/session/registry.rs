//! Session registry keyed by short join codes

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::{MatchConfig, MatchPhase, MAX_PLAYERS};

use super::hub::{SessionHandle, SessionHub};
use super::SessionError;

/// Join code alphabet; omits I, O, 0 and 1 to avoid misreads
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Session limits and timings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub code_length: usize,
    pub game: MatchConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            code_length: 4,
            game: MatchConfig::default(),
        }
    }
}

/// Public listing entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub code: String,
    pub player_count: usize,
    pub max_players: usize,
    pub state: MatchPhase,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
}

/// Generate a random join code
pub fn generate_code(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Codes are case-insensitive on input
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    /// Serializes the capacity check with the insert
    create_lock: Mutex<()>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            create_lock: Mutex::new(()),
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session under a fresh code and start its hub
    pub fn create(self: &Arc<Self>) -> Result<SessionHandle, SessionError> {
        let _guard = self.create_lock.lock();

        if self.sessions.len() >= self.config.max_sessions {
            warn!(
                max_sessions = self.config.max_sessions,
                "Session capacity reached, rejecting create"
            );
            return Err(SessionError::CapacityReached {
                max: self.config.max_sessions,
            });
        }

        let mut rng = rand::thread_rng();
        let code = loop {
            let code = generate_code(&mut rng, self.config.code_length);
            if !self.sessions.contains_key(&code) {
                break code;
            }
        };

        let session = SessionHub::spawn(code.clone(), self.config.game.clone(), Arc::downgrade(self));
        self.sessions.insert(code.clone(), session.clone());

        info!(code = %code, active = self.sessions.len(), "Session created");
        Ok(session)
    }

    pub fn get(&self, code: &str) -> Option<SessionHandle> {
        self.sessions
            .get(&normalize_code(code))
            .map(|entry| entry.value().clone())
    }

    /// Remove and close a session. Returns false if it was already gone.
    pub fn remove(&self, code: &str) -> bool {
        match self.sessions.remove(&normalize_code(code)) {
            Some((code, session)) => {
                session.close();
                info!(code = %code, active = self.sessions.len(), "Session removed");
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let now = Instant::now();
        let mut sessions: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionSummary {
                    code: session.code().to_string(),
                    player_count: session.player_count(),
                    max_players: MAX_PLAYERS,
                    state: session.phase(),
                    created_at: session.created_at(),
                    idle_secs: session.idle_for(now).as_secs(),
                }
            })
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn total_players(&self) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().player_count())
            .sum()
    }

    /// Remove sessions idle longer than the timeout, plus any that have
    /// already closed. Returns how many were removed.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.is_closed() || session.idle_for(now) > self.config.idle_timeout
            })
            .map(|entry| entry.key().clone())
            .collect();

        let removed = expired.iter().filter(|code| self.remove(code)).count();
        if removed > 0 {
            info!(removed, active = self.sessions.len(), "Swept idle sessions");
        }
        removed
    }

    /// Periodic idle sweep; runs until the registry is dropped elsewhere
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut ticker = interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = self.sweep_idle(Instant::now());
            debug!(removed, active = self.sessions.len(), "Idle sweep finished");
        }
    }
}
