// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod error;
pub mod frame_data;
pub mod mesh;
pub mod pacing;

pub use error::FrameError;
pub use frame_data::{FrameInput, FrameReport, PerFrameData, PipelineVariant};
pub use mesh::{load_obj, Batch, MeshError, MeshNode, SubMesh};
pub use pacing::{Acquired, FrameBackend, FramePacer, SlotState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentMode {
    /// Vsync, always available.
    #[default]
    Fifo,
    /// Low-latency vsync; falls back to FIFO when unsupported.
    Mailbox,
}

/// Precompiled SPIR-V for the mesh pipeline.
#[derive(Clone, Debug)]
pub struct ShaderBlobs {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

/// Everything fixed for the lifetime of a renderer.
#[derive(Clone, Debug)]
pub struct SceneDesc {
    pub batch: Batch,
    /// Built-in shaders are used when `None`.
    pub shaders: Option<ShaderBlobs>,
    pub clear_color: [f32; 4],
    pub present_mode: PresentMode,
    pub desired_image_count: u32,
    pub frames_in_flight: usize,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        scene: &SceneDesc,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Rebuilds everything that depends on the swapchain.
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self, frame: &FrameInput) -> Result<FrameReport, FrameError>;
    /// Size of the images currently being presented.
    fn extent(&self) -> RenderSize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_windows_are_detected() {
        assert!(RenderSize { width: 0, height: 480 }.is_zero());
        assert!(RenderSize { width: 640, height: 0 }.is_zero());
        assert!(!RenderSize { width: 640, height: 480 }.is_zero());
    }

    #[test]
    fn aspect_never_divides_by_zero() {
        assert_eq!(RenderSize { width: 640, height: 480 }.aspect(), 640.0 / 480.0);
        assert!(RenderSize { width: 640, height: 0 }.aspect().is_finite());
    }
}
