// SPDX-License-Identifier: CEPL-1.0
pub mod camera;
pub mod smoothing;

pub use camera::{FlyCamera, Movement};
pub use glam;
pub use smoothing::Smoothing;
