//! Game simulation modules

pub mod arena;
pub mod combat;
pub mod r#match;
pub mod physics;
pub mod snapshot;
pub mod tank;

pub use r#match::{GameMatch, MatchConfig, MatchPhase, MatchState};

use uuid::Uuid;

use self::combat::WeaponKind;
use self::tank::InputState;

/// Ephemeral per-connection player identity
pub type PlayerId = Uuid;

/// Maximum tanks in one match
pub const MAX_PLAYERS: usize = 2;

/// Player intent decoded from the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Replace the tank's stored input
    SetInput(InputState),
    /// Fire the active weapon once
    Fire,
    SwitchWeapon(WeaponKind),
}

/// Command queued for the match tick loop
#[derive(Debug, Clone)]
pub struct PlayerCommand {
    pub player_id: PlayerId,
    pub command: Command,
}
