//! Tank entity and per-tick movement rules

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::combat::{Bullet, Cannon, Mortar, Shot, Weapon, WeaponKind};
use super::physics::{Circle, Rect, Vec2};
use super::PlayerId;

/// Movement speed in pixels per second
pub const TANK_SPEED: f32 = 200.0;
/// Width/height of the tank body
pub const TANK_SIZE: f32 = 40.0;
pub const TANK_MAX_HEALTH: u32 = 100;

/// Latest input reported by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputState {
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub down: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub mouse_x: f32,
    #[serde(default)]
    pub mouse_y: f32,
    #[serde(default)]
    pub firing: bool,
}

impl InputState {
    /// Raw direction from the four movement flags (not normalized)
    fn move_direction(&self) -> Vec2 {
        let mut dir = Vec2::ZERO;
        if self.up {
            dir.y -= 1.0;
        }
        if self.down {
            dir.y += 1.0;
        }
        if self.left {
            dir.x -= 1.0;
        }
        if self.right {
            dir.x += 1.0;
        }
        dir
    }

    fn aim_point(&self) -> Vec2 {
        Vec2::new(self.mouse_x, self.mouse_y)
    }
}

/// A player's tank (authoritative)
#[derive(Debug, Clone)]
pub struct Tank {
    pub id: PlayerId,
    /// Spawn point index this tank occupies
    pub slot: usize,
    pub position: Vec2,
    /// Body heading, follows movement
    pub rotation: f32,
    /// Turret heading, follows the aim point
    pub turret_angle: f32,
    pub health: u32,
    pub max_health: u32,
    pub speed: f32,
    pub active_weapon: WeaponKind,
    pub cannon: Cannon,
    pub mortar: Mortar,
    pub input: InputState,
}

impl Tank {
    pub fn new(id: PlayerId, slot: usize, position: Vec2) -> Self {
        Self {
            id,
            slot,
            position,
            rotation: 0.0,
            turret_angle: 0.0,
            health: TANK_MAX_HEALTH,
            max_health: TANK_MAX_HEALTH,
            speed: TANK_SPEED,
            active_weapon: WeaponKind::Cannon,
            cannon: Cannon::default(),
            mortar: Mortar::default(),
            input: InputState::default(),
        }
    }

    /// Movement, aiming and weapon upkeep for one tick
    pub fn update(&mut self, dt: f32, bounds: &Rect) {
        let dir = self.input.move_direction();
        let mut position = self.position;
        if dir != Vec2::ZERO {
            let dir = dir.normalize();
            position = position.add(dir.scale(self.speed * dt));
            self.rotation = dir.angle();
        }
        self.position = bounds.clamp_inset(position, TANK_SIZE / 2.0);

        self.turret_angle = self.input.aim_point().sub(self.position).angle();

        self.cannon.upkeep(dt);
        self.mortar.upkeep(dt);
    }

    pub fn weapon(&self) -> &dyn Weapon {
        match self.active_weapon {
            WeaponKind::Cannon => &self.cannon,
            WeaponKind::Mortar => &self.mortar,
        }
    }

    fn weapon_mut(&mut self) -> &mut dyn Weapon {
        match self.active_weapon {
            WeaponKind::Cannon => &mut self.cannon,
            WeaponKind::Mortar => &mut self.mortar,
        }
    }

    /// Fire the active weapon along the turret heading
    pub fn fire(&mut self, bullet_id: u64, now: Instant) -> Option<Bullet> {
        let shot = Shot {
            id: bullet_id,
            owner_id: self.id,
            origin: self.position,
            angle: self.turret_angle,
        };
        self.weapon_mut().fire(shot, now)
    }

    /// Cooldowns keep running across switches
    pub fn switch_weapon(&mut self, weapon: WeaponKind) {
        self.active_weapon = weapon;
    }

    pub fn take_damage(&mut self, amount: u32) {
        self.health = self.health.saturating_sub(amount);
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn hitbox(&self) -> Circle {
        Circle::new(self.position, TANK_SIZE / 2.0)
    }
}
