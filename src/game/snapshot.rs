//! Snapshot building for network transmission

use std::time::Instant;

use crate::ws::protocol::{BulletType, BulletView, GameSnapshot, TankView};

use super::combat::{Ammo, Bullet, BulletKind, Weapon};
use super::tank::Tank;
use super::MatchState;

/// Build an owned view of the match.
///
/// Flight progress is measured against the simulation clock so repeated
/// calls between ticks return identical data.
pub fn build(state: &MatchState) -> GameSnapshot {
    let now = state.clock();

    GameSnapshot {
        state: state.phase,
        tanks: state
            .tanks
            .iter()
            .map(|(id, tank)| (*id, tank_view(tank)))
            .collect(),
        bullets: state.bullets.iter().map(|b| bullet_view(b, now)).collect(),
        map: state.map,
        winner_id: state.winner_id,
    }
}

pub fn tank_view(tank: &Tank) -> TankView {
    let (mortar_ammo, mortar_max_ammo) = match tank.mortar.ammo() {
        Ammo::Limited { current, max } => (current, max),
        Ammo::Unlimited => (0, 0),
    };

    TankView {
        id: tank.id,
        position: tank.position,
        rotation: tank.rotation,
        turret_angle: tank.turret_angle,
        health: tank.health,
        max_health: tank.max_health,
        active_weapon: tank.weapon().kind(),
        mortar_ammo,
        mortar_max_ammo,
    }
}

pub fn bullet_view(bullet: &Bullet, now: Instant) -> BulletView {
    match bullet.kind {
        BulletKind::Normal => BulletView {
            id: bullet.id,
            owner_id: bullet.owner_id,
            position: bullet.position,
            kind: BulletType::Normal,
            impact_pos: None,
            flight_progress: None,
            impact_radius: None,
        },
        BulletKind::Mortar(impact) => BulletView {
            id: bullet.id,
            owner_id: bullet.owner_id,
            position: bullet.position,
            kind: BulletType::Mortar,
            impact_pos: Some(impact.position),
            flight_progress: bullet.flight_progress(now),
            impact_radius: Some(impact.radius),
        },
    }
}
