//! Arena dimensions and spawn layout

use serde::{Deserialize, Serialize};

use super::physics::{Rect, Vec2};

/// Distance of each spawn point from its side wall
const SPAWN_MARGIN: f32 = 100.0;

/// Map configuration sent to clients with every snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    pub width: f32,
    pub height: f32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: 1200.0,
            height: 800.0,
        }
    }
}

impl MapConfig {
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }

    /// Spawn points on opposite sides of the map: slot 0 left, slot 1 right
    pub fn spawn_points(&self) -> [Vec2; 2] {
        [
            Vec2::new(SPAWN_MARGIN, self.height / 2.0),
            Vec2::new(self.width - SPAWN_MARGIN, self.height / 2.0),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_points_are_left_and_right() {
        let map = MapConfig::default();
        let [left, right] = map.spawn_points();
        assert_eq!(left, Vec2::new(100.0, 400.0));
        assert_eq!(right, Vec2::new(1100.0, 400.0));
        assert!(map.bounds().contains(left));
        assert!(map.bounds().contains(right));
    }
}
