// SPDX-License-Identifier: CEPL-1.0
//! Engine-wide defaults. The config file can override the window and
//! render values; `FRAMES_IN_FLIGHT` is fixed at build time.

pub const FRAMES_IN_FLIGHT: usize = 2;
pub const TARGET_FPS: u32 = 60;

pub const WINDOW_WIDTH: u32 = 640;
pub const WINDOW_HEIGHT: u32 = 480;
pub const WINDOW_TITLE: &str = "lumen";

pub const DESIRED_IMAGE_COUNT: u32 = 3;
