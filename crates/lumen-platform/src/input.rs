// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use lumen_math::Movement;
use tracing::trace;
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

bitflags! {
    /// Keys the renderer reacts to, tracked by physical position.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Keys: u8 {
        const W = 1 << 0;
        const A = 1 << 1;
        const S = 1 << 2;
        const D = 1 << 3;
        const Q = 1 << 4;
        const E = 1 << 5;
    }
}

impl Keys {
    fn from_code(code: KeyCode) -> Option<Self> {
        Some(match code {
            KeyCode::KeyW => Keys::W,
            KeyCode::KeyA => Keys::A,
            KeyCode::KeyS => Keys::S,
            KeyCode::KeyD => Keys::D,
            KeyCode::KeyQ => Keys::Q,
            KeyCode::KeyE => Keys::E,
            _ => return None,
        })
    }
}

/// Held-key snapshot polled once per frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct InputState {
    held: Keys,
}

impl InputState {
    pub fn held(&self) -> Keys {
        self.held
    }

    pub fn handle_key_event(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(code) = event.physical_key {
            self.set_key(code, event.state == ElementState::Pressed);
        }
    }

    pub fn set_key(&mut self, code: KeyCode, pressed: bool) {
        if let Some(key) = Keys::from_code(code) {
            trace!("key {:?} pressed={}", key, pressed);
            self.held.set(key, pressed);
        }
    }

    /// Focus loss drops every held key so nothing sticks.
    pub fn clear(&mut self) {
        self.held = Keys::empty();
    }

    pub fn movement(&self) -> Movement {
        let mut m = Movement::empty();
        m.set(Movement::FORWARD, self.held.contains(Keys::W));
        m.set(Movement::BACKWARD, self.held.contains(Keys::S));
        m.set(Movement::LEFT, self.held.contains(Keys::A));
        m.set(Movement::RIGHT, self.held.contains(Keys::D));
        m
    }

    /// `Some(true)` for wireframe (Q), `Some(false)` for solid (E), Q wins.
    pub fn wireframe_request(&self) -> Option<bool> {
        if self.held.contains(Keys::Q) {
            Some(true)
        } else if self.held.contains(Keys::E) {
            Some(false)
        } else {
            None
        }
    }
}
