//! Combat system - weapons, projectiles, hit detection

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::physics::{Circle, Vec2};
use super::PlayerId;

/// Hitbox radius of a projectile in flight
pub const BULLET_RADIUS: f32 = 5.0;

/// Weapon selector sent by clients and echoed in snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    Cannon,
    Mortar,
}

impl Default for WeaponKind {
    fn default() -> Self {
        Self::Cannon
    }
}

/// Ammunition report for a weapon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ammo {
    Unlimited,
    Limited { current: u32, max: u32 },
}

/// Parameters of a single shot, supplied by the tank firing it
#[derive(Debug, Clone, Copy)]
pub struct Shot {
    /// Match-scoped bullet id to assign if the shot succeeds
    pub id: u64,
    pub owner_id: PlayerId,
    pub origin: Vec2,
    pub angle: f32,
}

/// Capabilities shared by every weapon
pub trait Weapon {
    fn kind(&self) -> WeaponKind;

    /// Whether a shot at `now` would succeed
    fn can_fire(&self, now: Instant) -> bool;

    /// Attempt a shot; `None` when on cooldown or out of ammo
    fn fire(&mut self, shot: Shot, now: Instant) -> Option<Bullet>;

    fn ammo(&self) -> Ammo;

    /// Per-tick upkeep (recharge etc.)
    fn upkeep(&mut self, dt: f32);
}

fn cooldown_elapsed(last_fired: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    match last_fired {
        Some(t) => now.saturating_duration_since(t) >= cooldown,
        None => true,
    }
}

/// Primary weapon: straight-flying shell, unlimited ammo
#[derive(Debug, Clone)]
pub struct Cannon {
    last_fired: Option<Instant>,
    pub cooldown: Duration,
    /// Spawn offset ahead of the tank center
    pub muzzle_offset: f32,
    pub speed: f32,
    pub damage: u32,
    pub max_age: Duration,
}

impl Default for Cannon {
    fn default() -> Self {
        Self {
            last_fired: None,
            cooldown: Duration::from_millis(500),
            muzzle_offset: 30.0,
            speed: 600.0,
            damage: 100,
            max_age: Duration::from_secs(3),
        }
    }
}

impl Weapon for Cannon {
    fn kind(&self) -> WeaponKind {
        WeaponKind::Cannon
    }

    fn can_fire(&self, now: Instant) -> bool {
        cooldown_elapsed(self.last_fired, self.cooldown, now)
    }

    fn fire(&mut self, shot: Shot, now: Instant) -> Option<Bullet> {
        if !self.can_fire(now) {
            return None;
        }
        self.last_fired = Some(now);

        let direction = Vec2::from_angle(shot.angle);
        Some(Bullet {
            id: shot.id,
            owner_id: shot.owner_id,
            kind: BulletKind::Normal,
            position: shot.origin.add(direction.scale(self.muzzle_offset)),
            velocity: direction.scale(self.speed),
            damage: self.damage,
            created_at: now,
            max_age: self.max_age,
        })
    }

    fn ammo(&self) -> Ammo {
        Ammo::Unlimited
    }

    fn upkeep(&mut self, _dt: f32) {}
}

/// Secondary weapon: lobbed shell with delayed area impact and recharging charges
#[derive(Debug, Clone)]
pub struct Mortar {
    last_fired: Option<Instant>,
    ammo: u32,
    pub max_ammo: u32,
    pub cooldown: Duration,
    /// Time to regain one charge
    pub recharge_time: f32,
    recharge_progress: f32,
    /// Landing distance along the turret heading
    pub range: f32,
    pub flight_time: Duration,
    pub impact_radius: f32,
    pub damage: u32,
    pub max_age: Duration,
}

impl Default for Mortar {
    fn default() -> Self {
        Self {
            last_fired: None,
            ammo: 3,
            max_ammo: 3,
            cooldown: Duration::from_secs(3),
            recharge_time: 10.0,
            recharge_progress: 0.0,
            range: 300.0,
            flight_time: Duration::from_secs(3),
            impact_radius: 50.0,
            damage: 100,
            max_age: Duration::from_secs(4),
        }
    }
}

impl Weapon for Mortar {
    fn kind(&self) -> WeaponKind {
        WeaponKind::Mortar
    }

    fn can_fire(&self, now: Instant) -> bool {
        self.ammo > 0 && cooldown_elapsed(self.last_fired, self.cooldown, now)
    }

    fn fire(&mut self, shot: Shot, now: Instant) -> Option<Bullet> {
        if !self.can_fire(now) {
            return None;
        }
        self.last_fired = Some(now);
        self.ammo -= 1;

        let landing = shot
            .origin
            .add(Vec2::from_angle(shot.angle).scale(self.range));
        Some(Bullet {
            id: shot.id,
            owner_id: shot.owner_id,
            kind: BulletKind::Mortar(MortarImpact {
                position: landing,
                at: now + self.flight_time,
                radius: self.impact_radius,
                impacted: false,
            }),
            position: shot.origin,
            velocity: Vec2::ZERO,
            damage: self.damage,
            created_at: now,
            max_age: self.max_age,
        })
    }

    fn ammo(&self) -> Ammo {
        Ammo::Limited {
            current: self.ammo,
            max: self.max_ammo,
        }
    }

    fn upkeep(&mut self, dt: f32) {
        if self.ammo >= self.max_ammo {
            self.recharge_progress = 0.0;
            return;
        }
        self.recharge_progress += dt;
        if self.recharge_progress >= self.recharge_time {
            self.ammo += 1;
            self.recharge_progress -= self.recharge_time;
        }
    }
}

/// Landing data of a delayed-impact shell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MortarImpact {
    pub position: Vec2,
    pub at: Instant,
    pub radius: f32,
    pub impacted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BulletKind {
    /// Moves linearly, collides immediately
    Normal,
    /// Stays put until impact, then explodes at the landing point
    Mortar(MortarImpact),
}

/// Active projectile in the match
#[derive(Debug, Clone)]
pub struct Bullet {
    pub id: u64,
    pub owner_id: PlayerId,
    pub kind: BulletKind,
    pub position: Vec2,
    pub velocity: Vec2,
    pub damage: u32,
    pub created_at: Instant,
    pub max_age: Duration,
}

impl Bullet {
    /// Advance one tick; returns false once the bullet outlived its max age
    pub fn update(&mut self, dt: f32, now: Instant) -> bool {
        if now.saturating_duration_since(self.created_at) > self.max_age {
            return false;
        }

        match &mut self.kind {
            BulletKind::Normal => {
                self.position = self.position.add(self.velocity.scale(dt));
            }
            BulletKind::Mortar(impact) => {
                if !impact.impacted && now >= impact.at {
                    impact.impacted = true;
                    self.position = impact.position;
                }
            }
        }
        true
    }

    /// Whether the bullet can currently deal damage
    pub fn is_active(&self) -> bool {
        match self.kind {
            BulletKind::Normal => true,
            BulletKind::Mortar(impact) => impact.impacted,
        }
    }

    pub fn hitbox(&self) -> Circle {
        let radius = match self.kind {
            BulletKind::Mortar(impact) if impact.impacted => impact.radius,
            _ => BULLET_RADIUS,
        };
        Circle::new(self.position, radius)
    }

    /// Only straight shells spare their owner; explosions hit everyone in range
    pub fn can_hit(&self, target: PlayerId) -> bool {
        match self.kind {
            BulletKind::Normal => target != self.owner_id,
            BulletKind::Mortar(_) => true,
        }
    }

    /// Fraction of the mortar flight elapsed at `now`, for client-side arcs
    pub fn flight_progress(&self, now: Instant) -> Option<f32> {
        let BulletKind::Mortar(impact) = self.kind else {
            return None;
        };
        let total = impact.at.saturating_duration_since(self.created_at).as_secs_f32();
        if total <= 0.0 {
            return Some(1.0);
        }
        let elapsed = now.saturating_duration_since(self.created_at).as_secs_f32();
        Some((elapsed / total).min(1.0))
    }
}
