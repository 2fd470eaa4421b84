// SPDX-License-Identifier: CEPL-1.0
pub mod input;

pub use input::{InputState, Keys};
pub use winit;
