// SPDX-License-Identifier: CEPL-1.0
//! Wall-clock frame timing: delta time, the frame limiter and an fps counter.

use std::time::{Duration, Instant};

/// Measures the time between consecutive ticks.
#[derive(Debug)]
pub struct FrameClock {
    last_tick: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            last_tick: Instant::now(),
        }
    }

    /// Seconds since the previous tick (or since construction).
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now - self.last_tick;
        self.last_tick = now;
        dt.as_secs_f32()
    }

    /// Restarts the measurement, e.g. after the loop was paused.
    pub fn reset(&mut self) {
        self.last_tick = Instant::now();
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Caps the loop at a target frame rate by sleeping away whatever is left of
/// the frame budget. A target of 0 fps disables the cap.
#[derive(Clone, Copy, Debug)]
pub struct FrameLimiter {
    budget: Option<Duration>,
}

impl FrameLimiter {
    pub fn new(target_fps: u32) -> Self {
        let budget = (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / target_fps as f64));
        Self { budget }
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Time still owed to the budget after a frame that took `elapsed`.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        match self.budget {
            Some(budget) => budget.saturating_sub(elapsed),
            None => Duration::ZERO,
        }
    }

    /// Sleeps until the budget for the frame that began at `frame_start` is spent.
    pub fn throttle(&self, frame_start: Instant) {
        let rest = self.remaining(frame_start.elapsed());
        if !rest.is_zero() {
            std::thread::sleep(rest);
        }
    }
}

/// Counts frames and reports the rate roughly once per second.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            frames: 0,
            window_start: Instant::now(),
        }
    }

    /// Records one frame; returns the frame count once a full second has passed.
    pub fn frame(&mut self) -> Option<u32> {
        self.frames = self.frames.saturating_add(1);
        if self.window_start.elapsed() >= Duration::from_secs(1) {
            let fps = self.frames;
            self.frames = 0;
            self.window_start = Instant::now();
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
