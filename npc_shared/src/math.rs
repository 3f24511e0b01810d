//! Math types.
//!
//! Only what actor positions and navigation goals need. Kept deterministic,
//! no SIMD and no `unsafe`.

use serde::{Deserialize, Serialize};

/// 3D vector, serialized as `{x, y, z}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn distance(self, to: Self) -> f32 {
        Self::new(to.x - self.x, to.y - self.y, to.z - self.z)
            .len_sq()
            .sqrt()
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }

    /// Moves toward `to` by at most `max_step`, landing exactly on `to` when
    /// it is within reach.
    pub fn move_towards(self, to: Self, max_step: f32) -> Self {
        let dist = self.distance(to);
        if dist <= max_step || dist == 0.0 {
            return to;
        }
        self.lerp(to, max_step / dist)
    }
}
