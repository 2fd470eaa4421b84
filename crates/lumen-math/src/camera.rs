// SPDX-License-Identifier: CEPL-1.0
//! A free-flying camera with a fixed orientation.
//!
//! Input moves a *target* position; the rendered position chases it through
//! [`Smoothing`](crate::Smoothing), which gives movement a short ease-out
//! without tying it to frame rate.

use bitflags::bitflags;
use glam::{Mat4, Vec3};

pub const MOVE_SPEED: f32 = 200.639;
pub const FOV_Y_DEGREES: f32 = 45.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 10_000.0;

bitflags! {
    /// Directions requested this frame. Opposite directions cancel out.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Movement: u8 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

#[derive(Clone, Debug)]
pub struct FlyCamera {
    position: Vec3,
    target: Vec3,
    front: Vec3,
    up: Vec3,
    speed: f32,
}

impl Default for FlyCamera {
    fn default() -> Self {
        let start = Vec3::new(0.0, 0.0, -100.0);
        Self {
            position: start,
            target: start,
            front: Vec3::Z,
            up: Vec3::Y,
            speed: MOVE_SPEED,
        }
    }
}

impl FlyCamera {
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    /// Moves the target position by `speed * dt` along each requested axis.
    pub fn apply_movement(&mut self, movement: Movement, dt: f32) {
        let step = self.speed * dt;
        let right = self.front.cross(self.up).normalize();

        if movement.contains(Movement::FORWARD) {
            self.target += step * self.front;
        }
        if movement.contains(Movement::BACKWARD) {
            self.target -= step * self.front;
        }
        if movement.contains(Movement::LEFT) {
            self.target -= step * right;
        }
        if movement.contains(Movement::RIGHT) {
            self.target += step * right;
        }
    }

    /// Pulls the rendered position towards the target by `alpha` (0..=1).
    pub fn smooth(&mut self, alpha: f32) {
        self.position = self.position.lerp(self.target, alpha);
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front, self.up)
    }

    /// Right-handed, zero-to-one depth, with Y flipped for Vulkan clip space.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        proj.y_axis.y *= -1.0;
        proj
    }
}
